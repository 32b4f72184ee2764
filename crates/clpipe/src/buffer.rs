//! Device-resident buffers.
//!
//! A buffer is either created pre-populated from a host slice (the copy
//! happens before the constructor returns) or uninitialized. Its element type
//! is fixed at creation; host transfers go through `bytemuck` byte views.

use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;
use tracing::debug;

use crate::backend::{AccessMode, Backend};
use crate::context::ExecutionContext;
use crate::error::{status, Result, RuntimeError};

/// Bytes required for `len` elements of `T`.
///
/// # Errors
///
/// `CL_INVALID_BUFFER_SIZE` when `len` is zero or the size overflows `usize`.
pub fn byte_size<T>(len: usize) -> Result<usize> {
    if len == 0 {
        return Err(RuntimeError::new(
            "clCreateBuffer",
            status::CL_INVALID_BUFFER_SIZE,
            "buffer must hold at least one element",
        )
        .into());
    }
    len.checked_mul(size_of::<T>()).ok_or_else(|| {
        RuntimeError::new(
            "clCreateBuffer",
            status::CL_INVALID_BUFFER_SIZE,
            format!("size overflow: {len} x {} bytes", size_of::<T>()),
        )
        .into()
    })
}

/// A typed allocation in device memory, owned by one [`ExecutionContext`].
pub struct DeviceBuffer<'c, B: Backend, T: Pod> {
    ctx: &'c ExecutionContext<'c, B>,
    raw: B::Buffer,
    len: usize,
    access: AccessMode,
    _elem: PhantomData<T>,
}

impl<'c, B: Backend, T: Pod> DeviceBuffer<'c, B, T> {
    /// Number of `T` elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: zero-length buffers are rejected at creation.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.len * size_of::<T>()
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// The backend's memory object.
    pub fn raw(&self) -> &B::Buffer {
        &self.raw
    }

    pub(crate) fn owner_context(&self) -> &'c B::Context {
        self.ctx.raw_context()
    }

    /// Reject use with a context other than the owning one.
    pub(crate) fn check_owner(
        &self,
        ctx: &ExecutionContext<'_, B>,
        operation: &'static str,
    ) -> Result<()> {
        if std::ptr::eq(self.ctx.raw_context(), ctx.raw_context()) {
            Ok(())
        } else {
            Err(RuntimeError::new(
                operation,
                status::CL_INVALID_CONTEXT,
                "buffer belongs to a different execution context",
            )
            .into())
        }
    }
}

impl<B: Backend, T: Pod> fmt::Debug for DeviceBuffer<'_, B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("elem", &std::any::type_name::<T>())
            .field("len", &self.len)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

impl<'b, B: Backend> ExecutionContext<'b, B> {
    /// Allocate a buffer initialised with a copy of `data`.
    pub fn buffer_from_slice<T: Pod>(
        &self,
        access: AccessMode,
        data: &[T],
    ) -> Result<DeviceBuffer<'_, B, T>> {
        let size = byte_size::<T>(data.len())?;
        let raw = self.backend().create_buffer(
            self.raw_context(),
            access,
            size,
            Some(bytemuck::cast_slice(data)),
        )?;
        debug!("Allocated {} buffer of {} byte(s), copied from host", access, size);
        Ok(DeviceBuffer { ctx: self, raw, len: data.len(), access, _elem: PhantomData })
    }

    /// Allocate a buffer of `len` elements without initialising it.
    pub fn buffer_uninit<T: Pod>(
        &self,
        access: AccessMode,
        len: usize,
    ) -> Result<DeviceBuffer<'_, B, T>> {
        let size = byte_size::<T>(len)?;
        let raw = self.backend().create_buffer(self.raw_context(), access, size, None)?;
        debug!("Allocated {} buffer of {} byte(s), uninitialised", access, size);
        Ok(DeviceBuffer { ctx: self, raw, len, access, _elem: PhantomData })
    }
}
