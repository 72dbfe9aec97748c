// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Strided tensors over shared host or device storage.
//!
//! A [`StridedTensor`] is a dtype, a [`Layout`] and a storage handle. Views
//! clone the handle and build a new layout; element data is never copied.
//! [`DeviceTensor`] and [`HostTensor`] are the two instantiations.

use crate::dtype::{self, Element};
use crate::{DType, Layout, Shape, TensorError};
use device::{Context, DeviceMemory, Event, HostBuffer, Queue, Storage};

/// An n-dimensional strided view over `S`.
#[derive(Debug, Clone)]
pub struct StridedTensor<S: Storage> {
    dtype: DType,
    layout: Layout,
    storage: S,
}

/// A tensor resident in accelerator memory.
pub type DeviceTensor = StridedTensor<DeviceMemory>;

/// A tensor in host memory.
pub type HostTensor = StridedTensor<HostBuffer>;

impl<S: Storage> StridedTensor<S> {
    /// Wraps existing storage. Every element the layout can reach must lie
    /// inside the storage region.
    pub fn from_storage(storage: S, dtype: DType, layout: Layout) -> Result<Self, TensorError> {
        let needed = layout.extent() * dtype.size_bytes();
        if needed > storage.len_bytes() {
            return Err(TensorError::BufferSizeMismatch {
                expected: needed,
                actual: storage.len_bytes(),
            });
        }
        Ok(Self {
            dtype,
            layout,
            storage,
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn sizes(&self) -> &[usize] {
        self.layout.sizes()
    }

    pub fn strides(&self) -> &[usize] {
        self.layout.strides()
    }

    /// Base offset in elements.
    pub fn offset(&self) -> usize {
        self.layout.offset()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn size(&self, dim: usize) -> usize {
        self.layout.size(dim)
    }

    pub fn stride(&self, dim: usize) -> usize {
        self.layout.stride(dim)
    }

    pub fn num_elements(&self) -> usize {
        self.layout.num_elements()
    }

    /// Bytes covered by the elements, ignoring padding between them.
    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_bytes()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    pub fn is_contiguous_dim(&self, dim: usize) -> bool {
        self.layout.is_contiguous_dim(dim)
    }

    pub fn is_inner_contiguous(&self) -> bool {
        self.layout.is_inner_contiguous()
    }

    /// Same rank and per-dimension sizes.
    pub fn is_same_size<T: Storage>(&self, other: &StridedTensor<T>) -> bool {
        self.layout.is_same_size(other.layout())
    }

    /// Same storage region, same starting byte and same sizes.
    pub fn is_same_instance(&self, other: &Self) -> bool {
        self.storage.is_same(&other.storage)
            && self.byte_offset() == other.byte_offset()
            && self.is_same_size(other)
    }

    /// `true` when both tensors live in the same allocation.
    pub fn shares_storage(&self, other: &Self) -> bool {
        self.storage.shares_allocation(&other.storage)
    }

    pub fn view(&self, new_shape: impl Into<Shape>) -> Result<Self, TensorError> {
        Ok(self.with_layout(self.layout.view(new_shape)?))
    }

    pub fn view_inner(&self, sub_rank: usize) -> Result<Self, TensorError> {
        Ok(self.with_layout(self.layout.view_inner(sub_rank)?))
    }

    pub fn transpose(&self, d1: usize, d2: usize) -> Result<Self, TensorError> {
        Ok(self.with_layout(self.layout.transpose(d1, d2)?))
    }

    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self, TensorError> {
        Ok(self.with_layout(self.layout.narrow(dim, start, len)?))
    }

    pub fn narrow_outermost(&self, start: usize, len: usize) -> Result<Self, TensorError> {
        self.narrow(0, start, len)
    }

    pub fn upcast_outer(&self, new_rank: usize) -> Result<Self, TensorError> {
        Ok(self.with_layout(self.layout.upcast_outer(new_rank)?))
    }

    pub fn upcast_inner(&self, new_rank: usize) -> Result<Self, TensorError> {
        Ok(self.with_layout(self.layout.upcast_inner(new_rank)?))
    }

    pub fn downcast_outer(&self, new_rank: usize) -> Result<Self, TensorError> {
        Ok(self.with_layout(self.layout.downcast_outer(new_rank)?))
    }

    pub fn downcast_inner(&self, new_rank: usize) -> Result<Self, TensorError> {
        Ok(self.with_layout(self.layout.downcast_inner(new_rank)?))
    }

    pub fn require_inner_contiguous(&self) -> Result<Self, TensorError> {
        Ok(self.with_layout(self.layout.require_inner_contiguous()?))
    }

    /// Reinterprets the elements as another type of the same width.
    pub fn cast(&self, dtype: DType) -> Result<Self, TensorError> {
        if dtype.size_bytes() != self.dtype.size_bytes() {
            return Err(TensorError::alignment(
                "cast",
                format!("{} and {} differ in width", self.dtype, dtype),
            ));
        }
        Ok(Self {
            dtype,
            layout: self.layout.clone(),
            storage: self.storage.clone(),
        })
    }

    /// Reinterprets the elements as a type of a different width, scaling
    /// the innermost size, the outer strides and the offset.
    ///
    /// The first element must sit at a byte address of the underlying
    /// allocation that is a multiple of the new width.
    pub fn cast_resize(&self, dtype: DType) -> Result<Self, TensorError> {
        let new_w = dtype.size_bytes();
        let start = self.storage.region_offset() + self.layout.offset() * self.dtype.size_bytes();
        if new_w > self.dtype.size_bytes() && start % new_w != 0 {
            return Err(TensorError::alignment(
                "cast_resize",
                format!("byte address {start} not aligned to {new_w}"),
            ));
        }
        let layout = self.layout.resize_elements(self.dtype, dtype)?;
        Ok(Self {
            dtype,
            layout,
            storage: self.storage.clone(),
        })
    }

    /// Reads every element in row-major index order.
    pub fn read_elements<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        self.expect_dtype::<T>("read_elements")?;
        let width = self.dtype.size_bytes();
        let layout = &self.layout;
        let values = self.storage.read(|bytes| {
            if layout.is_contiguous() {
                let start = layout.offset() * width;
                dtype::from_bytes(&bytes[start..start + layout.num_elements() * width])
            } else {
                layout
                    .offsets()
                    .map(|o| T::read_le(&bytes[o * width..]))
                    .collect()
            }
        })?;
        Ok(values)
    }

    /// Writes `values` in row-major index order.
    pub fn write_elements<T: Element>(&self, values: &[T]) -> Result<(), TensorError> {
        self.expect_dtype::<T>("write_elements")?;
        if values.len() != self.num_elements() {
            return Err(TensorError::BufferSizeMismatch {
                expected: self.size_bytes(),
                actual: values.len() * self.dtype.size_bytes(),
            });
        }
        let width = self.dtype.size_bytes();
        let layout = &self.layout;
        self.storage.write(|bytes| {
            for (o, v) in layout.offsets().zip(values) {
                v.write_le(&mut bytes[o * width..]);
            }
        })?;
        Ok(())
    }

    /// The byte region of a contiguous tensor.
    pub(crate) fn byte_region(&self, op: &'static str) -> Result<S, TensorError> {
        if !self.is_contiguous() {
            return Err(TensorError::shape(op, "tensor must be contiguous"));
        }
        Ok(self
            .storage
            .at(self.byte_offset(), Some(self.size_bytes()))?)
    }

    fn byte_offset(&self) -> usize {
        self.layout.offset() * self.dtype.size_bytes()
    }

    fn with_layout(&self, layout: Layout) -> Self {
        Self {
            dtype: self.dtype,
            layout,
            storage: self.storage.clone(),
        }
    }

    fn expect_dtype<T: Element>(&self, op: &'static str) -> Result<(), TensorError> {
        if T::DTYPE != self.dtype {
            return Err(TensorError::UnsupportedDType {
                op,
                dtype: self.dtype,
            });
        }
        Ok(())
    }
}

fn check_transfer<A: Storage, B: Storage>(
    op: &'static str,
    src: &StridedTensor<A>,
    dst: &StridedTensor<B>,
) -> Result<(), TensorError> {
    if src.dtype() != dst.dtype() {
        return Err(TensorError::UnsupportedDType {
            op,
            dtype: src.dtype(),
        });
    }
    if src.num_elements() != dst.num_elements() {
        return Err(TensorError::ShapeMismatch {
            op,
            lhs: src.shape().clone(),
            rhs: dst.shape().clone(),
        });
    }
    Ok(())
}

impl DeviceTensor {
    /// Allocates a zero-filled contiguous tensor.
    pub fn new(ctx: &Context, dtype: DType, shape: impl Into<Shape>) -> Result<Self, TensorError> {
        let layout = Layout::contiguous(shape)?;
        let memory = ctx.alloc(layout.num_elements() * dtype.size_bytes())?;
        Self::from_storage(memory, dtype, layout)
    }

    /// Allocates a tensor shaped like `host` and enqueues the upload.
    pub fn upload(
        ctx: &Context,
        queue: &Queue,
        host: &HostTensor,
    ) -> Result<(Self, Event), TensorError> {
        let tensor = Self::new(ctx, host.dtype(), host.shape().clone())?;
        let event = tensor.copy_from_host(queue, host)?;
        Ok((tensor, event))
    }

    /// Enqueues a host → device copy into this tensor.
    pub fn copy_from_host(&self, queue: &Queue, src: &HostTensor) -> Result<Event, TensorError> {
        const OP: &str = "copy_from_host";
        check_transfer(OP, src, self)?;
        tracing::debug!(bytes = self.size_bytes(), queue = queue.id(), "enqueue h2d");
        Ok(device::copy_h2d(
            queue,
            &src.byte_region(OP)?,
            &self.byte_region(OP)?,
        )?)
    }

    /// Enqueues a device → host copy out of this tensor.
    pub fn copy_to_host(&self, queue: &Queue, dst: &HostTensor) -> Result<Event, TensorError> {
        const OP: &str = "copy_to_host";
        check_transfer(OP, self, dst)?;
        tracing::debug!(bytes = self.size_bytes(), queue = queue.id(), "enqueue d2h");
        Ok(device::copy_d2h(
            queue,
            &self.byte_region(OP)?,
            &dst.byte_region(OP)?,
        )?)
    }

    /// Enqueues a device → device copy from `src` into this tensor.
    pub fn copy_from(&self, queue: &Queue, src: &DeviceTensor) -> Result<Event, TensorError> {
        const OP: &str = "copy_from";
        check_transfer(OP, src, self)?;
        tracing::debug!(bytes = self.size_bytes(), queue = queue.id(), "enqueue d2d");
        Ok(device::copy_d2d(
            queue,
            &src.byte_region(OP)?,
            &self.byte_region(OP)?,
        )?)
    }

    /// Copies the tensor to a fresh host tensor, blocking until done.
    ///
    /// Drains `queue`, so a failure of any earlier command on it is
    /// returned here instead of stale contents.
    pub fn to_host(&self, queue: &Queue) -> Result<HostTensor, TensorError> {
        let host = HostTensor::zeros(self.dtype(), self.shape().clone())?;
        self.copy_to_host(queue, &host)?;
        queue.finish()?;
        Ok(host)
    }

    /// Allocates a new contiguous tensor and enqueues a copy of this one.
    pub fn duplicate(&self, ctx: &Context, queue: &Queue) -> Result<(Self, Event), TensorError> {
        let copy = Self::new(ctx, self.dtype(), self.shape().clone())?;
        let event = copy.copy_from(queue, self)?;
        Ok((copy, event))
    }
}

impl HostTensor {
    /// A zero-filled contiguous host tensor.
    pub fn zeros(dtype: DType, shape: impl Into<Shape>) -> Result<Self, TensorError> {
        let layout = Layout::contiguous(shape)?;
        let buffer = HostBuffer::zeroed(layout.num_elements() * dtype.size_bytes());
        Self::from_storage(buffer, dtype, layout)
    }

    /// Copies `values` into a new contiguous tensor.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Compact8, HostTensor};
    /// let t = HostTensor::from_slice([2, 2], &[Compact8::ONE; 4]).unwrap();
    /// assert_eq!(t.get::<Compact8>(&[1, 0]).unwrap(), Compact8::ONE);
    /// ```
    pub fn from_slice<T: Element>(shape: impl Into<Shape>, values: &[T]) -> Result<Self, TensorError> {
        let layout = Layout::contiguous(shape)?;
        if values.len() != layout.num_elements() {
            return Err(TensorError::BufferSizeMismatch {
                expected: layout.num_elements() * T::DTYPE.size_bytes(),
                actual: values.len() * T::DTYPE.size_bytes(),
            });
        }
        let buffer = HostBuffer::from_vec(dtype::to_bytes(values));
        Self::from_storage(buffer, T::DTYPE, layout)
    }

    /// Wraps raw little-endian bytes. The length must match exactly.
    pub fn from_bytes(
        shape: impl Into<Shape>,
        dtype: DType,
        bytes: Vec<u8>,
    ) -> Result<Self, TensorError> {
        let layout = Layout::contiguous(shape)?;
        let expected = layout.num_elements() * dtype.size_bytes();
        if bytes.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        Self::from_storage(HostBuffer::from_vec(bytes), dtype, layout)
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, TensorError> {
        self.read_elements()
    }

    pub fn get<T: Element>(&self, index: &[usize]) -> Result<T, TensorError> {
        self.expect_dtype::<T>("get")?;
        let offset = self.layout.element_offset(index)? * self.dtype.size_bytes();
        Ok(self.storage.read(|bytes| T::read_le(&bytes[offset..]))?)
    }

    pub fn set<T: Element>(&self, index: &[usize], value: T) -> Result<(), TensorError> {
        self.expect_dtype::<T>("set")?;
        let offset = self.layout.element_offset(index)? * self.dtype.size_bytes();
        Ok(self
            .storage
            .write(|bytes| value.write_le(&mut bytes[offset..]))?)
    }
}
