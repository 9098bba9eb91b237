use aligned_vec::{AVec, ConstAlign};

pub(crate) const ALIGN: usize = 64;

/// Rectangular n-dimensional index region: a signed start index plus a
/// per-axis size. Axis 0 is the fastest-varying axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region<const N: usize> {
    pub index: [isize; N],
    pub size: [usize; N],
}

impl<const N: usize> Region<N> {
    pub fn new(index: [isize; N], size: [usize; N]) -> Self {
        Self { index, size }
    }

    /// Exclusive upper index per axis.
    pub fn upper(&self) -> [isize; N] {
        let mut upper = self.index;
        for (u, s) in upper.iter_mut().zip(&self.size) {
            *u += *s as isize;
        }
        upper
    }

    pub fn num_pixels(&self) -> usize {
        self.size.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.size.iter().any(|s| *s == 0)
    }

    /// Grows the region by `radius` pixels on both sides of every axis.
    pub fn pad(&self, radius: &[usize; N]) -> Region<N> {
        let mut out = *self;
        for a in 0..N {
            out.index[a] -= radius[a] as isize;
            out.size[a] += 2 * radius[a];
        }
        out
    }

    /// Shrinks the region by `radius` pixels on both sides of every axis.
    /// Axes shorter than `2 * radius` collapse to an empty extent.
    pub fn shrink(&self, radius: usize) -> Region<N> {
        let mut out = *self;
        for a in 0..N {
            out.index[a] += radius as isize;
            out.size[a] = out.size[a].saturating_sub(2 * radius);
        }
        out
    }

    /// Intersection with `other`, or `None` when the regions are disjoint.
    pub fn crop(&self, other: &Region<N>) -> Option<Region<N>> {
        let mut index = [0isize; N];
        let mut size = [0usize; N];
        let upper_a = self.upper();
        let upper_b = other.upper();
        for a in 0..N {
            let start = self.index[a].max(other.index[a]);
            let end = upper_a[a].min(upper_b[a]);
            if end <= start {
                return None;
            }
            index[a] = start;
            size[a] = (end - start) as usize;
        }
        Some(Region { index, size })
    }

    pub fn contains(&self, idx: &[isize; N]) -> bool {
        let upper = self.upper();
        (0..N).all(|a| idx[a] >= self.index[a] && idx[a] < upper[a])
    }

    /// Iterates over the start index of every axis-0 scanline, row-major.
    pub fn scanlines(&self) -> Scanlines<N> {
        let rows = if self.is_empty() {
            0
        } else {
            self.size.iter().skip(1).product()
        };
        Scanlines {
            region: *self,
            cursor: self.index,
            remaining: rows,
        }
    }
}

/// Row-major iterator over the scanline start indices of a [`Region`].
pub struct Scanlines<const N: usize> {
    region: Region<N>,
    cursor: [isize; N],
    remaining: usize,
}

impl<const N: usize> Iterator for Scanlines<N> {
    type Item = [isize; N];

    fn next(&mut self) -> Option<[isize; N]> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let row = self.cursor;
        for a in 1..N {
            self.cursor[a] += 1;
            if self.cursor[a] < self.region.index[a] + self.region.size[a] as isize {
                break;
            }
            self.cursor[a] = self.region.index[a];
        }
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// n-dimensional image of `components`-vector pixels with physical geometry.
///
/// Samples are stored interleaved in a contiguous, cache-aligned buffer; the
/// pixel at index `(i_0, .., i_{N-1})` starts at sample offset
/// `components * (i_0 + i_1 * size_0 + ..)`. The index to physical-point
/// mapping is the axis-wise affine transform given by `origin` and `spacing`.
pub struct VectorImage<const N: usize> {
    data: AVec<f32, ConstAlign<ALIGN>>,
    size: [usize; N],
    spacing: [f64; N],
    origin: [f64; N],
    components: usize,
    strides: [usize; N],
}

impl<const N: usize> VectorImage<N> {
    /// Image with unit spacing and zero origin.
    pub fn new(data: &[f32], size: [usize; N], components: usize) -> Self {
        Self::with_geometry(data, size, components, [1.0; N], [0.0; N])
    }

    pub fn with_geometry(
        data: &[f32],
        size: [usize; N],
        components: usize,
        spacing: [f64; N],
        origin: [f64; N],
    ) -> Self {
        assert!(components > 0, "pixels must have at least one component");
        assert!(
            spacing.iter().all(|s| *s > 0.0),
            "spacing must be positive along every axis"
        );
        let num_pixels: usize = size.iter().product();
        assert_eq!(
            data.len(),
            num_pixels * components,
            "buffer length does not match size and components"
        );
        let mut strides = [1usize; N];
        for a in 1..N {
            strides[a] = strides[a - 1] * size[a - 1];
        }
        Self {
            data: AVec::from_slice(ALIGN, data),
            size,
            spacing,
            origin,
            components,
            strides,
        }
    }

    pub fn size(&self) -> &[usize; N] {
        &self.size
    }

    pub fn spacing(&self) -> &[f64; N] {
        &self.spacing
    }

    pub fn origin(&self) -> &[f64; N] {
        &self.origin
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn num_pixels(&self) -> usize {
        self.size.iter().product()
    }

    /// Per-axis pixel strides; axis 0 has stride 1.
    pub fn strides(&self) -> &[usize; N] {
        &self.strides
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// The whole buffered extent as a region starting at index zero.
    pub fn region(&self) -> Region<N> {
        Region::new([0; N], self.size)
    }

    /// Flat pixel offset of an index inside the buffered extent.
    #[inline(always)]
    pub fn pixel_offset(&self, idx: &[isize; N]) -> usize {
        let mut offset = 0usize;
        for a in 0..N {
            debug_assert!(
                idx[a] >= 0 && (idx[a] as usize) < self.size[a],
                "index {idx:?} out of bounds {:?}",
                self.size
            );
            offset += idx[a] as usize * self.strides[a];
        }
        offset
    }

    /// Samples of the pixel at a flat offset.
    #[inline(always)]
    pub fn pixel(&self, offset: usize) -> &[f32] {
        let start = offset * self.components;
        &self.data[start..start + self.components]
    }

    #[inline(always)]
    pub fn pixel_at(&self, idx: &[isize; N]) -> &[f32] {
        self.pixel(self.pixel_offset(idx))
    }

    /// Samples of `len` consecutive pixels starting at a flat offset.
    #[inline(always)]
    pub fn samples_row(&self, offset: usize, len: usize) -> &[f32] {
        let start = offset * self.components;
        &self.data[start..start + len * self.components]
    }

    pub fn index_to_point(&self, idx: &[isize; N]) -> [f64; N] {
        let mut pt = [0.0; N];
        for a in 0..N {
            pt[a] = self.origin[a] + idx[a] as f64 * self.spacing[a];
        }
        pt
    }

    /// Nearest pixel index of a physical point. The result may lie outside
    /// the buffered extent; callers crop against it.
    pub fn point_to_index(&self, pt: &[f64; N]) -> [isize; N] {
        let mut idx = [0isize; N];
        for a in 0..N {
            idx[a] = ((pt[a] - self.origin[a]) / self.spacing[a]).round() as isize;
        }
        idx
    }
}

/// Label image produced by a segmentation run. Geometry is copied from the
/// input so labels can be mapped back to physical space.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelImage<L, const N: usize> {
    pub data: Vec<L>,
    pub size: [usize; N],
    pub spacing: [f64; N],
    pub origin: [f64; N],
}

impl<L: Copy, const N: usize> LabelImage<L, N> {
    #[inline(always)]
    pub fn offset(&self, idx: &[usize; N]) -> usize {
        let mut offset = 0;
        let mut stride = 1;
        for a in 0..N {
            debug_assert!(idx[a] < self.size[a]);
            offset += idx[a] * stride;
            stride *= self.size[a];
        }
        offset
    }

    #[inline(always)]
    pub fn label(&self, idx: &[usize; N]) -> L {
        self.data[self.offset(idx)]
    }
}

#[cfg(test)]
mod tests {
    use super::{Region, VectorImage};

    #[test]
    fn region_crop_and_pad() {
        let full = Region::new([0, 0], [64, 32]);
        let window = Region::new([60, -3], [1, 1]).pad(&[8, 8]);
        assert_eq!(window.index, [52, -11]);
        assert_eq!(window.size, [17, 17]);
        let cropped = window.crop(&full).unwrap();
        assert_eq!(cropped.index, [52, 0]);
        assert_eq!(cropped.size, [12, 6]);
        assert!(Region::new([70, 0], [4, 4]).crop(&full).is_none());
    }

    #[test]
    fn region_shrink_collapses_thin_axes() {
        let r = Region::new([0, 0, 0], [10, 2, 1]).shrink(1);
        assert_eq!(r.size, [8, 0, 0]);
        assert!(r.is_empty());
        assert_eq!(r.scanlines().count(), 0);
    }

    #[test]
    fn scanlines_walk_row_major() {
        let r = Region::new([1, 2, 3], [4, 2, 2]);
        let rows: Vec<_> = r.scanlines().collect();
        assert_eq!(
            rows,
            vec![[1, 2, 3], [1, 3, 3], [1, 2, 4], [1, 3, 4]]
        );
        let line = Region::<1>::new([5], [3]);
        assert_eq!(line.scanlines().collect::<Vec<_>>(), vec![[5]]);
    }

    #[test]
    fn image_offsets_and_transforms() {
        let data: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let image = VectorImage::with_geometry(&data, [4, 3], 2, [0.5, 2.0], [10.0, -1.0]);
        assert_eq!(image.strides(), &[1, 4]);
        assert_eq!(image.pixel_offset(&[2, 1]), 6);
        assert_eq!(image.pixel_at(&[2, 1]), &[12.0, 13.0]);
        assert_eq!(image.samples_row(4, 2), &[8.0, 9.0, 10.0, 11.0]);
        assert_eq!(image.index_to_point(&[2, 1]), [11.0, 1.0]);
        assert_eq!(image.point_to_index(&[11.2, 0.9]), [2, 1]);
    }
}
