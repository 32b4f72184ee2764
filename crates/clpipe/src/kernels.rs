//! OpenCL C sources compiled into the binary.
//!
//! Each program defines one double-precision element-wise addition entry
//! point taking `(a, b, c)` and computing `c[i] = a[i] + b[i]` for
//! `i = get_global_id(0)`. They are compiled at runtime like any
//! user-supplied source.

use crate::program::KernelSource;

/// Source for `main_kernel`, the fixed-size run.
pub const MAIN: KernelSource =
    KernelSource::Embedded { name: "main.cl", text: include_str!("../kernels/main.cl") };

/// Source for `hello_kernel`, sized to the device maximum.
pub const HELLO: KernelSource =
    KernelSource::Embedded { name: "hello.cl", text: include_str!("../kernels/hello.cl") };

/// Source for `sandbox`, the experimentation kernel.
pub const SANDBOX: KernelSource =
    KernelSource::Embedded { name: "sandbox.cl", text: include_str!("../kernels/sandbox.cl") };
