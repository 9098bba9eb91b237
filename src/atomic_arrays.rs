use aligned_vec::{AVec, ConstAlign};
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::arrays::ALIGN;

/// Output label scalar paired with its shared atomic representation.
///
/// The engine validates up front that the cluster count fits the scalar, so
/// conversions in the hot loops never truncate. All accesses use relaxed
/// ordering; phases that hand a buffer from one writer set to another are
/// separated by a barrier.
pub trait Label: Copy + Eq + Send + Sync + std::fmt::Debug + 'static {
    type Atomic: Send + Sync;
    /// Largest value representable by the scalar.
    const MAX_LABEL: usize;
    fn from_usize(value: usize) -> Self;
    fn to_usize(self) -> usize;
    fn new_atomic(value: Self) -> Self::Atomic;
    fn load(atomic: &Self::Atomic) -> Self;
    fn store(atomic: &Self::Atomic, value: Self);
}

macro_rules! impl_label {
    ($scalar:ty, $atomic:ty) => {
        impl Label for $scalar {
            type Atomic = $atomic;
            const MAX_LABEL: usize = <$scalar>::MAX as usize;

            #[inline(always)]
            fn from_usize(value: usize) -> Self {
                debug_assert!(value <= Self::MAX_LABEL);
                value as $scalar
            }

            #[inline(always)]
            fn to_usize(self) -> usize {
                self as usize
            }

            #[inline(always)]
            fn new_atomic(value: Self) -> Self::Atomic {
                <$atomic>::new(value)
            }

            #[inline(always)]
            fn load(atomic: &Self::Atomic) -> Self {
                atomic.load(Ordering::Relaxed)
            }

            #[inline(always)]
            fn store(atomic: &Self::Atomic, value: Self) {
                atomic.store(value, Ordering::Relaxed)
            }
        }
    };
}

impl_label!(u8, AtomicU8);
impl_label!(u16, AtomicU16);
impl_label!(u32, AtomicU32);

/// Flat label buffer shared by the worker tiles during a run.
pub struct AtomicLabelBuffer<L: Label> {
    data: AVec<L::Atomic, ConstAlign<ALIGN>>,
}

impl<L: Label> AtomicLabelBuffer<L> {
    pub fn new_filled(len: usize, value: L) -> Self {
        Self {
            data: AVec::from_iter(ALIGN, (0..len).map(|_| L::new_atomic(value))),
        }
    }

    pub fn from_labels(labels: &[L]) -> Self {
        Self {
            data: AVec::from_iter(ALIGN, labels.iter().map(|l| L::new_atomic(*l))),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline(always)]
    pub fn load(&self, offset: usize) -> L {
        L::load(&self.data[offset])
    }

    #[inline(always)]
    pub fn store(&self, offset: usize, value: L) {
        L::store(&self.data[offset], value)
    }

    /// Relaxed copy of the whole buffer.
    pub fn snapshot(&self) -> Vec<L> {
        self.data.iter().map(L::load).collect()
    }
}

/// Flat `f32` buffer behind relaxed `AtomicU32` bit-casts. Holds the running
/// per-pixel minimum distances while worker tiles write concurrently.
pub struct AtomicF32Buffer {
    data: AVec<AtomicU32, ConstAlign<ALIGN>>,
}

impl AtomicF32Buffer {
    pub fn new_filled(len: usize, value: f32) -> Self {
        Self {
            data: AVec::from_iter(ALIGN, (0..len).map(|_| AtomicU32::new(value.to_bits()))),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline(always)]
    pub fn load(&self, offset: usize) -> f32 {
        f32::from_bits(self.data[offset].load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn store(&self, offset: usize, value: f32) {
        self.data[offset].store(value.to_bits(), Ordering::Relaxed)
    }

    pub fn fill(&self, value: f32) {
        let bits = value.to_bits();
        for cell in self.data.iter() {
            cell.store(bits, Ordering::Relaxed);
        }
    }
}

/// Flat `f64` buffer behind relaxed `AtomicU64` bit-casts; backs the cluster
/// store so that barrier-separated phases can share it without locks.
pub struct AtomicF64Buffer {
    data: AVec<AtomicU64, ConstAlign<ALIGN>>,
}

impl AtomicF64Buffer {
    pub fn new_zeroed(len: usize) -> Self {
        Self {
            data: AVec::from_iter(ALIGN, (0..len).map(|_| AtomicU64::new(0f64.to_bits()))),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline(always)]
    pub fn load(&self, offset: usize) -> f64 {
        f64::from_bits(self.data[offset].load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn store(&self, offset: usize, value: f64) {
        self.data[offset].store(value.to_bits(), Ordering::Relaxed)
    }
}
