//! Runtime compilation of kernel source text.
//!
//! A build either yields a [`Program`] or fails with
//! [`CompilationError::BuildFailed`] carrying the compiler log verbatim.
//! Because a failed build produces no `Program`, no kernel can be extracted
//! from it.

use std::fmt;
use std::path::PathBuf;

use serde::{Serialize, Serializer};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::context::ExecutionContext;
use crate::dispatch::Kernel;
use crate::error::{status, CompilationError, Error, Result};

// ── KernelSource ────────────────────────────────────────────────────────────

/// Where kernel source text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSource {
    /// Source compiled into the binary.
    Embedded { name: &'static str, text: &'static str },
    /// Source supplied by the caller at runtime.
    Inline { name: String, text: String },
    /// A file read in full before compilation.
    File(PathBuf),
}

impl KernelSource {
    pub fn inline(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Inline { name: name.into(), text: text.into() }
    }

    /// Label used in logs and reports.
    pub fn label(&self) -> String {
        match self {
            Self::Embedded { name, .. } => format!("embedded:{name}"),
            Self::Inline { name, .. } => format!("inline:{name}"),
            Self::File(path) => path.display().to_string(),
        }
    }

    /// The complete source text.
    ///
    /// # Errors
    ///
    /// [`Error::Source`] if the file cannot be read.
    pub fn read(&self) -> Result<String> {
        match self {
            Self::Embedded { text, .. } => Ok((*text).to_owned()),
            Self::Inline { text, .. } => Ok(text.clone()),
            Self::File(path) => std::fs::read_to_string(path)
                .map_err(|source| Error::Source { path: path.clone(), source }),
        }
    }
}

impl fmt::Display for KernelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for KernelSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

// ── Program ─────────────────────────────────────────────────────────────────

/// A successfully built program.
pub struct Program<'c, B: Backend> {
    ctx: &'c ExecutionContext<'c, B>,
    raw: B::Program,
    build_log: String,
}

impl<'c, B: Backend> Program<'c, B> {
    /// Compiler output from the successful build (warnings, often empty).
    pub fn build_log(&self) -> &str {
        &self.build_log
    }

    /// Names of every entry point the program defines.
    pub fn kernel_names(&self) -> Result<Vec<String>> {
        self.ctx.backend().kernel_names(&self.raw)
    }

    /// Extract the entry point `name`.
    ///
    /// # Errors
    ///
    /// [`CompilationError::EntryPointNotFound`] when the program has no such
    /// kernel.
    pub fn kernel(&self, name: &str) -> Result<Kernel<'c, B>> {
        let backend = self.ctx.backend();
        let raw = match backend.create_kernel(&self.raw, name) {
            Ok(raw) => raw,
            Err(Error::Runtime(e)) if e.code == status::CL_INVALID_KERNEL_NAME => {
                return Err(CompilationError::EntryPointNotFound {
                    name: name.to_owned(),
                    available: self.kernel_names().unwrap_or_default(),
                }
                .into());
            }
            Err(e) => return Err(e),
        };
        let arity = backend.kernel_arg_count(&raw)?;
        debug!("Kernel '{}' takes {} argument(s)", name, arity);
        Ok(Kernel::new(self.ctx, raw, name, arity))
    }
}

impl<B: Backend> fmt::Debug for Program<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("device", &self.ctx.device().name)
            .field("build_log_len", &self.build_log.len())
            .finish_non_exhaustive()
    }
}

impl<'b, B: Backend> ExecutionContext<'b, B> {
    /// Compile `source` for the bound device.
    ///
    /// # Errors
    ///
    /// [`CompilationError::BuildFailed`] with the compiler log when the
    /// runtime rejects the source.
    pub fn build_program(&self, source: &str, options: &str) -> Result<Program<'_, B>> {
        debug!("Building {} byte(s) of source (options: '{}')", source.len(), options);
        let (raw, build_log) = self.backend().build_program(
            self.raw_context(),
            self.device_handle(),
            source,
            options,
        )?;
        if !build_log.trim().is_empty() {
            debug!("Build log:\n{}", build_log);
        }
        info!("Program built for '{}'", self.device().name);
        Ok(Program { ctx: self, raw, build_log })
    }

    /// Read and compile `source`.
    pub fn load_program(&self, source: &KernelSource, options: &str) -> Result<Program<'_, B>> {
        let text = source.read()?;
        debug!("Loaded kernel source {}", source);
        self.build_program(&text, options)
    }
}
