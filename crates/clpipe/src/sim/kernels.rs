//! Host implementations of kernels for the simulated device.
//!
//! The simulated compiler only extracts signatures; what a kernel *does* is
//! supplied here as a Rust closure keyed by entry-point name. Work items run
//! in parallel with `rayon`.

use std::fmt;
use std::ops::Add;
use std::sync::Arc;

use bytemuck::Pod;
use rayon::prelude::*;

use super::compiler::{ElemType, KernelSignature, ParamKind, ScalarType};
use super::SimBuffer;
use crate::backend::{NdRange, Scalar};

/// Outcome of a host kernel; `Err` aborts the command with the message.
pub type HostKernelResult = std::result::Result<(), String>;

type HostFn = dyn Fn(&HostInvocation<'_>) -> HostKernelResult + Send + Sync;

/// A kernel body executed on the host.
#[derive(Clone)]
pub struct HostKernel(Arc<HostFn>);

impl HostKernel {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&HostInvocation<'_>) -> HostKernelResult + Send + Sync + 'static,
    {
        Self(Arc::new(body))
    }

    pub(crate) fn call(&self, invocation: &HostInvocation<'_>) -> HostKernelResult {
        (self.0)(invocation)
    }
}

impl fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostKernel(..)")
    }
}

/// An argument captured at submission time.
#[derive(Debug, Clone)]
pub(crate) enum BoundArg {
    Buffer(SimBuffer),
    Scalar(Scalar),
}

/// Everything a host kernel can see of one launch.
pub struct HostInvocation<'a> {
    pub(crate) range: NdRange,
    pub(crate) signature: &'a KernelSignature,
    pub(crate) args: &'a [BoundArg],
}

impl HostInvocation<'_> {
    pub fn range(&self) -> NdRange {
        self.range
    }

    pub fn signature(&self) -> &KernelSignature {
        self.signature
    }

    /// Element type of pointer parameter `index`.
    pub fn elem_type(&self, index: usize) -> Option<ElemType> {
        match self.signature.params.get(index)?.kind {
            ParamKind::Pointer { elem, .. } => elem,
            ParamKind::Value(_) => None,
        }
    }

    fn buffer(&self, index: usize) -> Result<&SimBuffer, String> {
        match self.args.get(index) {
            Some(BoundArg::Buffer(buffer)) => Ok(buffer),
            Some(BoundArg::Scalar(_)) => Err(format!("argument {index} is not a buffer")),
            None => Err(format!("argument {index} does not exist")),
        }
    }

    pub fn scalar(&self, index: usize) -> Result<Scalar, String> {
        match self.args.get(index) {
            Some(BoundArg::Scalar(value)) => Ok(*value),
            Some(BoundArg::Buffer(_)) => Err(format!("argument {index} is not a scalar")),
            None => Err(format!("argument {index} does not exist")),
        }
    }

    /// Copy of buffer argument `index`.
    pub fn read<T: Pod>(&self, index: usize) -> Result<Vec<T>, String> {
        let buffer = self.buffer(index)?;
        if !buffer.access().kernel_readable() {
            return Err(format!("kernel read from write-only buffer (argument {index})"));
        }
        buffer.with_bytes(|bytes| {
            bytemuck::try_cast_slice::<u8, T>(bytes)
                .map(<[T]>::to_vec)
                .map_err(|e| format!("argument {index}: {e}"))
        })
    }

    /// Run `body` over buffer argument `index` in place.
    pub fn write<T: Pod, R>(
        &self,
        index: usize,
        body: impl FnOnce(&mut [T]) -> R,
    ) -> Result<R, String> {
        let buffer = self.buffer(index)?;
        if !buffer.access().kernel_writable() {
            return Err(format!("kernel wrote to read-only buffer (argument {index})"));
        }
        buffer.with_bytes_mut(|bytes| {
            bytemuck::try_cast_slice_mut::<u8, T>(bytes)
                .map(body)
                .map_err(|e| format!("argument {index}: {e}"))
        })
    }
}

// ── Built-in bodies ─────────────────────────────────────────────────────────

/// Entry points with a built-in host body.
pub(crate) const BUILTIN_ADD_KERNELS: [&str; 4] =
    ["main_kernel", "hello_kernel", "sandbox", "vector_add"];

/// `c[i] = a[i] + b[i]` for `i` in `0..global[0]`, over `float` or `double`.
pub fn elementwise_add(invocation: &HostInvocation<'_>) -> HostKernelResult {
    match invocation.elem_type(2) {
        Some(ElemType { scalar: ScalarType::Double, width: 1 }) => add::<f64>(invocation),
        Some(ElemType { scalar: ScalarType::Float, width: 1 }) => add::<f32>(invocation),
        other => Err(format!("no host implementation of element-wise add for {other:?}")),
    }
}

fn add<T>(invocation: &HostInvocation<'_>) -> HostKernelResult
where
    T: Pod + Send + Sync + Add<Output = T>,
{
    let n = invocation.range().global[0];
    let a = invocation.read::<T>(0)?;
    let b = invocation.read::<T>(1)?;

    let inputs = a.len().min(b.len());
    if inputs < n {
        return Err(format!("work item {inputs} reads past the end of a {inputs}-element input"));
    }

    invocation.write::<T, _>(2, |c| {
        if c.len() < n {
            return Err(format!("work item {} writes past the end of a {}-element output", c.len(), c.len()));
        }
        c[..n]
            .par_iter_mut()
            .zip(a[..n].par_iter().zip(b[..n].par_iter()))
            .for_each(|(out, (x, y))| *out = *x + *y);
        Ok(())
    })?
}
