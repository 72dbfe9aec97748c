// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Strided layouts and the view algebra over them.
//!
//! A [`Layout`] maps an n-dimensional index to an element offset:
//! `offset + Σ index[i] * strides[i]`. All view operations produce a new
//! layout over the same storage; none of them touch element data.

use crate::{DType, Shape, TensorError};

/// Sizes, strides (in elements), base offset and the inner-contiguity flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
    offset: usize,
    inner_contiguous: bool,
}

impl Layout {
    /// A row-major layout starting at element 0.
    pub fn contiguous(shape: impl Into<Shape>) -> Result<Self, TensorError> {
        let shape = shape.into();
        let strides = shape.contiguous_strides();
        Self::new(shape, strides, 0)
    }

    /// A layout with explicit strides and element offset.
    pub fn new(
        shape: impl Into<Shape>,
        strides: Vec<usize>,
        offset: usize,
    ) -> Result<Self, TensorError> {
        let shape = shape.into();
        if shape.rank() == 0 {
            return Err(TensorError::shape("layout", "rank must be at least 1"));
        }
        if strides.len() != shape.rank() {
            return Err(TensorError::shape(
                "layout",
                format!("{} strides for rank {}", strides.len(), shape.rank()),
            ));
        }
        Ok(Self {
            shape,
            strides,
            offset,
            inner_contiguous: false,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn sizes(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Base offset in elements.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// Size of `dim`. Panics if `dim >= rank`.
    pub fn size(&self, dim: usize) -> usize {
        self.shape.dims()[dim]
    }

    /// Stride of `dim`. Panics if `dim >= rank`.
    pub fn stride(&self, dim: usize) -> usize {
        self.strides[dim]
    }

    pub fn is_inner_contiguous(&self) -> bool {
        self.inner_contiguous
    }

    /// `true` when the layout is dense row-major.
    ///
    /// Size-1 dimensions are skipped, so their strides are irrelevant.
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 1usize;
        for (&size, &stride) in self.sizes().iter().zip(&self.strides).rev() {
            if size == 1 {
                continue;
            }
            if stride != expected {
                return false;
            }
            expected *= size;
        }
        true
    }

    /// `true` when `dim` can be merged with `dim + 1` without gaps.
    ///
    /// The innermost dimension is always contiguous in this sense.
    pub fn is_contiguous_dim(&self, dim: usize) -> bool {
        let rank = self.rank();
        if dim + 1 == rank {
            return true;
        }
        dim + 1 < rank && self.strides[dim] == self.strides[dim + 1] * self.size(dim + 1)
    }

    pub fn is_same_size(&self, other: &Layout) -> bool {
        self.shape == other.shape
    }

    /// One past the last element offset this layout can reach.
    pub fn extent(&self) -> usize {
        if self.num_elements() == 0 {
            return self.offset;
        }
        let span: usize = self
            .sizes()
            .iter()
            .zip(&self.strides)
            .map(|(&size, &stride)| (size - 1) * stride)
            .sum();
        self.offset + span + 1
    }

    /// Element offset of `index`.
    pub fn element_offset(&self, index: &[usize]) -> Result<usize, TensorError> {
        if index.len() != self.rank() {
            return Err(TensorError::range(
                "index",
                format!("{} indices for rank {}", index.len(), self.rank()),
            ));
        }
        let mut offset = self.offset;
        for (dim, (&i, &size)) in index.iter().zip(self.sizes()).enumerate() {
            if i >= size {
                return Err(TensorError::range(
                    "index",
                    format!("index {i} out of bounds for dim {dim} of size {size}"),
                ));
            }
            offset += i * self.strides[dim];
        }
        Ok(offset)
    }

    /// Element offsets in row-major index order.
    pub fn offsets(&self) -> ElementOffsets<'_> {
        ElementOffsets {
            layout: self,
            index: vec![0; self.rank()],
            current: self.offset,
            remaining: self.num_elements(),
        }
    }

    /// Reinterprets a contiguous layout with new sizes.
    pub fn view(&self, new_shape: impl Into<Shape>) -> Result<Self, TensorError> {
        let new_shape = new_shape.into();
        if !self.is_contiguous() {
            return Err(TensorError::aliasing(
                "view",
                "cannot view a non-contiguous tensor",
            ));
        }
        if new_shape.num_elements() != self.num_elements() {
            return Err(TensorError::ShapeMismatch {
                op: "view",
                lhs: self.shape.clone(),
                rhs: new_shape,
            });
        }
        let strides = new_shape.contiguous_strides();
        let mut layout = Self::new(new_shape, strides, self.offset)?;
        layout.inner_contiguous = self.inner_contiguous;
        Ok(layout)
    }

    /// The innermost `sub_rank` dimensions.
    pub fn view_inner(&self, sub_rank: usize) -> Result<Self, TensorError> {
        let rank = self.rank();
        if sub_rank == 0 || sub_rank >= rank {
            return Err(TensorError::range(
                "view_inner",
                format!("sub-rank {sub_rank} must be in 1..{rank}"),
            ));
        }
        let skip = rank - sub_rank;
        Ok(Self {
            shape: Shape::from(&self.sizes()[skip..]),
            strides: self.strides[skip..].to_vec(),
            offset: self.offset,
            inner_contiguous: self.inner_contiguous,
        })
    }

    /// Swaps two dimensions.
    pub fn transpose(&self, d1: usize, d2: usize) -> Result<Self, TensorError> {
        let rank = self.rank();
        if d1 >= rank || d2 >= rank {
            return Err(TensorError::range(
                "transpose",
                format!("dims ({d1}, {d2}) out of range for rank {rank}"),
            ));
        }
        if self.inner_contiguous && (d1 == rank - 1 || d2 == rank - 1) {
            return Err(TensorError::aliasing(
                "transpose",
                "cannot move the innermost dimension of an inner-contiguous tensor",
            ));
        }
        let mut out = self.clone();
        out.shape.dims_mut().swap(d1, d2);
        out.strides.swap(d1, d2);
        Ok(out)
    }

    /// Restricts `dim` to `[start, start + len)`.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self, TensorError> {
        let rank = self.rank();
        if dim >= rank {
            return Err(TensorError::range(
                "narrow",
                format!("dim {dim} out of range for rank {rank}"),
            ));
        }
        let size = self.size(dim);
        if start.checked_add(len).map_or(true, |end| end > size) {
            return Err(TensorError::range(
                "narrow",
                format!("[{start}, {start}+{len}) exceeds size {size} of dim {dim}"),
            ));
        }
        let mut out = self.clone();
        out.offset += start * self.strides[dim];
        out.shape.dims_mut()[dim] = len;
        Ok(out)
    }

    /// Prepends size-1 dimensions until the rank is `new_rank`.
    pub fn upcast_outer(&self, new_rank: usize) -> Result<Self, TensorError> {
        let pad = self.upcast_padding("upcast_outer", new_rank)?;
        let outer_stride = self.size(0) * self.stride(0);
        let mut sizes = vec![1; pad];
        sizes.extend_from_slice(self.sizes());
        let mut strides = vec![outer_stride; pad];
        strides.extend_from_slice(&self.strides);
        Ok(Self {
            shape: Shape::new(sizes),
            strides,
            offset: self.offset,
            inner_contiguous: self.inner_contiguous,
        })
    }

    /// Appends size-1 dimensions until the rank is `new_rank`.
    pub fn upcast_inner(&self, new_rank: usize) -> Result<Self, TensorError> {
        let pad = self.upcast_padding("upcast_inner", new_rank)?;
        let mut sizes = self.sizes().to_vec();
        sizes.extend(std::iter::repeat(1).take(pad));
        let mut strides = self.strides.clone();
        strides.extend(std::iter::repeat(1).take(pad));
        Ok(Self {
            shape: Shape::new(sizes),
            strides,
            offset: self.offset,
            inner_contiguous: self.inner_contiguous,
        })
    }

    /// Merges the outermost dimensions until the rank is `new_rank`.
    pub fn downcast_outer(&self, new_rank: usize) -> Result<Self, TensorError> {
        let merged = self.downcast_count("downcast_outer", new_rank)?;
        if let Some(dim) = (0..merged).find(|&d| !self.is_contiguous_dim(d)) {
            return Err(TensorError::aliasing(
                "downcast_outer",
                format!("dim {dim} is padded and cannot be collapsed"),
            ));
        }
        let collapsed: usize = self.sizes()[..=merged].iter().product();
        let mut sizes = vec![collapsed];
        sizes.extend_from_slice(&self.sizes()[merged + 1..]);
        Ok(Self {
            shape: Shape::new(sizes),
            strides: self.strides[merged..].to_vec(),
            offset: self.offset,
            inner_contiguous: self.inner_contiguous,
        })
    }

    /// Merges the innermost dimensions until the rank is `new_rank`.
    pub fn downcast_inner(&self, new_rank: usize) -> Result<Self, TensorError> {
        self.downcast_count("downcast_inner", new_rank)?;
        let rank = self.rank();
        let first = new_rank - 1;
        if let Some(dim) = (first..rank - 1).find(|&d| !self.is_contiguous_dim(d)) {
            return Err(TensorError::aliasing(
                "downcast_inner",
                format!("dim {dim} is padded and cannot be collapsed"),
            ));
        }
        let collapsed: usize = self.sizes()[first..].iter().product();
        let mut sizes = self.sizes()[..first].to_vec();
        sizes.push(collapsed);
        let mut strides = self.strides[..first].to_vec();
        strides.push(self.strides[rank - 1]);
        Ok(Self {
            shape: Shape::new(sizes),
            strides,
            offset: self.offset,
            inner_contiguous: self.inner_contiguous,
        })
    }

    /// Marks the layout inner-contiguous. Fails unless the innermost
    /// stride is 1.
    pub fn require_inner_contiguous(&self) -> Result<Self, TensorError> {
        let inner = self.stride(self.rank() - 1);
        if inner != 1 {
            return Err(TensorError::aliasing(
                "require_inner_contiguous",
                format!("innermost stride is {inner}"),
            ));
        }
        let mut out = self.clone();
        out.inner_contiguous = true;
        Ok(out)
    }

    /// Re-expresses the layout in units of `to` instead of `from`.
    pub(crate) fn resize_elements(&self, from: DType, to: DType) -> Result<Self, TensorError> {
        const OP: &str = "cast_resize";
        let (old_w, new_w) = (from.size_bytes(), to.size_bytes());
        if old_w == new_w {
            return Ok(self.clone());
        }
        let rank = self.rank();
        let inner = rank - 1;
        if self.stride(inner) != 1 && self.size(inner) > 1 {
            return Err(TensorError::alignment(
                OP,
                format!("innermost stride is {}", self.stride(inner)),
            ));
        }

        let mut out = self.clone();
        out.strides[inner] = 1;
        if new_w > old_w {
            let ratio = new_w / old_w;
            if self.size(inner) % ratio != 0 {
                return Err(TensorError::alignment(
                    OP,
                    format!("innermost size {} not divisible by {ratio}", self.size(inner)),
                ));
            }
            if let Some(dim) = (0..inner).find(|&d| self.strides[d] % ratio != 0) {
                return Err(TensorError::alignment(
                    OP,
                    format!("stride {} of dim {dim} not divisible by {ratio}", self.strides[dim]),
                ));
            }
            if (self.offset * old_w) % new_w != 0 {
                return Err(TensorError::alignment(
                    OP,
                    format!("byte offset {} not aligned to {new_w}", self.offset * old_w),
                ));
            }
            out.shape.dims_mut()[inner] /= ratio;
            for s in &mut out.strides[..inner] {
                *s /= ratio;
            }
            out.offset /= ratio;
        } else {
            let ratio = old_w / new_w;
            out.shape.dims_mut()[inner] *= ratio;
            for s in &mut out.strides[..inner] {
                *s *= ratio;
            }
            out.offset *= ratio;
        }
        Ok(out)
    }

    fn upcast_padding(&self, op: &'static str, new_rank: usize) -> Result<usize, TensorError> {
        if new_rank <= self.rank() {
            return Err(TensorError::range(
                op,
                format!("new rank {new_rank} must exceed rank {}", self.rank()),
            ));
        }
        Ok(new_rank - self.rank())
    }

    fn downcast_count(&self, op: &'static str, new_rank: usize) -> Result<usize, TensorError> {
        if new_rank == 0 || new_rank >= self.rank() {
            return Err(TensorError::range(
                op,
                format!("new rank {new_rank} must be in 1..{}", self.rank()),
            ));
        }
        Ok(self.rank() - new_rank)
    }
}

/// Iterator over a layout's element offsets, row-major.
pub struct ElementOffsets<'a> {
    layout: &'a Layout,
    index: Vec<usize>,
    current: usize,
    remaining: usize,
}

impl Iterator for ElementOffsets<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let out = self.current;
        self.remaining -= 1;
        if self.remaining > 0 {
            let sizes = self.layout.sizes();
            let strides = self.layout.strides();
            for dim in (0..self.index.len()).rev() {
                self.index[dim] += 1;
                self.current += strides[dim];
                if self.index[dim] < sizes[dim] {
                    break;
                }
                self.current -= strides[dim] * self.index[dim];
                self.index[dim] = 0;
            }
        }
        Some(out)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ElementOffsets<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn l(sizes: &[usize]) -> Layout {
        Layout::contiguous(sizes).unwrap()
    }

    #[test]
    fn test_rank_zero_rejected() {
        assert!(Layout::contiguous(Vec::<usize>::new()).is_err());
        assert!(Layout::new([2, 3], vec![1], 0).is_err());
    }

    #[test]
    fn test_contiguity() {
        assert!(l(&[2, 3, 4]).is_contiguous());
        let t = l(&[3, 4]).transpose(0, 1).unwrap();
        assert!(!t.is_contiguous());
        // Size-1 dims do not break contiguity.
        assert!(l(&[4, 1]).transpose(0, 1).unwrap().is_contiguous());
    }

    #[test]
    fn test_offsets_row_major() {
        let t = l(&[2, 3]).transpose(0, 1).unwrap();
        let offs: Vec<usize> = t.offsets().collect();
        assert_eq!(offs, vec![0, 3, 1, 4, 2, 5]);
        assert_eq!(t.offsets().len(), 6);
    }

    #[test]
    fn test_element_offset() {
        let t = l(&[2, 3, 4]).narrow(1, 1, 2).unwrap();
        assert_eq!(t.element_offset(&[1, 1, 3]).unwrap(), 4 + 12 + 4 + 3);
        assert_eq!(
            t.element_offset(&[0, 2, 0]).unwrap_err().kind(),
            ErrorKind::Range
        );
    }

    #[test]
    fn test_view_requires_contiguous() {
        let t = l(&[3, 4]).transpose(0, 1).unwrap();
        assert_eq!(t.view([12]).unwrap_err().kind(), ErrorKind::Aliasing);
        assert_eq!(l(&[3, 4]).view([5, 2]).unwrap_err().kind(), ErrorKind::Shape);
        let v = l(&[3, 4]).view([2, 6]).unwrap();
        assert_eq!(v.strides(), &[6, 1]);
    }

    #[test]
    fn test_view_inner() {
        let v = l(&[2, 3, 4]).view_inner(2).unwrap();
        assert_eq!(v.sizes(), &[3, 4]);
        assert_eq!(v.strides(), &[4, 1]);
        assert!(l(&[2, 3]).view_inner(2).is_err());
    }

    #[test]
    fn test_transpose_inner_contiguous() {
        let t = l(&[3, 4, 5]).require_inner_contiguous().unwrap();
        assert_eq!(t.transpose(0, 2).unwrap_err().kind(), ErrorKind::Aliasing);
        assert!(t.transpose(0, 1).is_ok());
        assert_eq!(t.transpose(0, 3).unwrap_err().kind(), ErrorKind::Range);
    }

    #[test]
    fn test_narrow() {
        let n = l(&[4, 5]).narrow(0, 1, 2).unwrap();
        assert_eq!(n.sizes(), &[2, 5]);
        assert_eq!(n.offset(), 5);
        assert!(l(&[4, 5]).narrow(0, 3, 2).is_err());
        assert!(l(&[4, 5]).narrow(2, 0, 1).is_err());
        assert_eq!(l(&[4, 5]).narrow(0, 4, 0).unwrap().num_elements(), 0);
    }

    #[test]
    fn test_upcast() {
        let o = l(&[3, 4]).upcast_outer(4).unwrap();
        assert_eq!(o.sizes(), &[1, 1, 3, 4]);
        assert_eq!(o.strides(), &[12, 12, 4, 1]);
        let i = l(&[3, 4]).upcast_inner(3).unwrap();
        assert_eq!(i.sizes(), &[3, 4, 1]);
        assert_eq!(i.strides(), &[4, 1, 1]);
        assert_eq!(l(&[3]).upcast_outer(1).unwrap_err().kind(), ErrorKind::Range);
    }

    #[test]
    fn test_downcast() {
        let base = l(&[2, 3, 4]);
        let o = base.downcast_outer(2).unwrap();
        assert_eq!(o.sizes(), &[6, 4]);
        assert_eq!(o.strides(), &[4, 1]);
        let i = base.downcast_inner(2).unwrap();
        assert_eq!(i.sizes(), &[2, 12]);
        assert_eq!(i.strides(), &[12, 1]);

        let padded = l(&[2, 3, 8]).narrow(2, 0, 4).unwrap();
        assert_eq!(
            padded.downcast_inner(1).unwrap_err().kind(),
            ErrorKind::Aliasing
        );
        // The outer boundary is still dense.
        assert_eq!(padded.downcast_outer(2).unwrap().sizes(), &[6, 4]);
    }

    #[test]
    fn test_resize_widen_and_narrow() {
        let bytes = l(&[3, 8]);
        let words = bytes.resize_elements(DType::Compact8, DType::U32).unwrap();
        assert_eq!(words.sizes(), &[3, 2]);
        assert_eq!(words.strides(), &[2, 1]);

        let back = words.resize_elements(DType::U32, DType::Compact8).unwrap();
        assert_eq!(back, bytes);

        let odd = l(&[3, 6]);
        assert_eq!(
            odd.resize_elements(DType::Compact8, DType::U32).unwrap_err().kind(),
            ErrorKind::Alignment
        );
        let shifted = l(&[4, 8]).narrow(1, 2, 4).unwrap();
        assert_eq!(
            shifted
                .resize_elements(DType::Compact8, DType::U32)
                .unwrap_err()
                .kind(),
            ErrorKind::Alignment
        );
    }

    #[test]
    fn test_extent() {
        assert_eq!(l(&[2, 3]).extent(), 6);
        assert_eq!(l(&[4, 5]).narrow(1, 1, 2).unwrap().extent(), 1 + 15 + 1 + 1);
        assert_eq!(l(&[0, 5]).extent(), 0);
    }
}
