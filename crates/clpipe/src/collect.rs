//! Reading results back to the host and checking them.
//!
//! Blocking reads return only after the data is in host memory; on an
//! in-order queue that also means every earlier command has finished.
//! Non-blocking reads hand out a [`PendingRead`] that owns the staging
//! memory, so the host can only see the data through
//! [`PendingRead::wait`].

use std::fmt;
use std::marker::PhantomData;

use bytemuck::Pod;
use tracing::{debug, warn};

use crate::backend::{Backend, CompletionEvent, EventStatus};
use crate::buffer::DeviceBuffer;
use crate::context::ExecutionContext;
use crate::error::{status, Result, RuntimeError, VerificationFailure};

const READ_OP: &str = "clEnqueueReadBuffer";

impl<'b, B: Backend> ExecutionContext<'b, B> {
    /// Copy the whole of `buffer` into a new host vector (blocking).
    pub fn read_back<T: Pod>(&self, buffer: &DeviceBuffer<'_, B, T>) -> Result<Vec<T>> {
        let mut out = vec![T::zeroed(); buffer.len()];
        self.read_into(buffer, &mut out)?;
        Ok(out)
    }

    /// Copy the whole of `buffer` into `dst` (blocking).
    ///
    /// # Errors
    ///
    /// `CL_INVALID_VALUE` when `dst` and the buffer differ in length.
    pub fn read_into<T: Pod>(&self, buffer: &DeviceBuffer<'_, B, T>, dst: &mut [T]) -> Result<()> {
        buffer.check_owner(self, READ_OP)?;
        if dst.len() != buffer.len() {
            return Err(RuntimeError::new(
                READ_OP,
                status::CL_INVALID_VALUE,
                format!("destination holds {} element(s), buffer holds {}", dst.len(), buffer.len()),
            )
            .into());
        }

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(dst);
        // SAFETY: blocking read; the runtime has finished writing `bytes`
        // when the call returns.
        let event = unsafe {
            self.backend().enqueue_read(self.raw_queue(), buffer.raw(), true, 0, bytes, &[])?
        };
        event.wait()?;
        debug!("Read back {} byte(s)", buffer.size_bytes());
        Ok(())
    }

    /// Start copying `buffer` to the host without blocking.
    pub fn read_back_async<T: Pod>(
        &self,
        buffer: &DeviceBuffer<'_, B, T>,
        wait_list: &[&B::Event],
    ) -> Result<PendingRead<'_, B, T>> {
        buffer.check_owner(self, READ_OP)?;
        let mut staging = vec![0u8; buffer.size_bytes()];
        // SAFETY: `staging` moves into the returned guard, whose heap block
        // stays put and is not touched until the event completes (in
        // `wait` or `drop`).
        let event = unsafe {
            self.backend().enqueue_read(
                self.raw_queue(),
                buffer.raw(),
                false,
                0,
                &mut staging,
                wait_list,
            )?
        };
        Ok(PendingRead { event, staging, waited: false, _marker: PhantomData })
    }
}

/// An in-flight device-to-host copy.
#[must_use = "a pending read must be waited on to obtain its data"]
pub struct PendingRead<'c, B: Backend, T: Pod> {
    event: B::Event,
    staging: Vec<u8>,
    waited: bool,
    _marker: PhantomData<(&'c ExecutionContext<'c, B>, T)>,
}

impl<B: Backend, T: Pod> PendingRead<'_, B, T> {
    pub fn event(&self) -> &B::Event {
        &self.event
    }

    pub fn status(&self) -> Result<EventStatus> {
        self.event.status()
    }

    /// Block until the copy completes and return the data.
    pub fn wait(mut self) -> Result<Vec<T>> {
        self.waited = true;
        self.event.wait()?;
        Ok(bytemuck::pod_collect_to_vec(&self.staging))
    }
}

impl<B: Backend, T: Pod> Drop for PendingRead<'_, B, T> {
    fn drop(&mut self) {
        if self.waited {
            return;
        }
        // The staging block must outlive the device write.
        if let Err(e) = self.event.wait() {
            warn!("Pending read dropped; wait failed: {e}");
        }
    }
}

impl<B: Backend, T: Pod> fmt::Debug for PendingRead<'_, B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRead").field("bytes", &self.staging.len()).finish_non_exhaustive()
    }
}

// ── Verification ────────────────────────────────────────────────────────────

/// Check `values[i] == expected(i)` for every element.
pub fn verify_with<T, F>(values: &[T], expected: F) -> std::result::Result<(), VerificationFailure>
where
    T: PartialEq + fmt::Display,
    F: Fn(usize) -> T,
{
    let mut first: Option<(usize, T)> = None;
    let mut mismatches = 0usize;
    for (i, actual) in values.iter().enumerate() {
        let want = expected(i);
        if *actual != want {
            mismatches += 1;
            if first.is_none() {
                first = Some((i, want));
            }
        }
    }

    match first {
        None => Ok(()),
        Some((first_index, want)) => Err(VerificationFailure {
            total: values.len(),
            mismatches,
            first_index,
            expected: want.to_string(),
            actual: values[first_index].to_string(),
        }),
    }
}

/// Check that every element equals `expected`.
pub fn verify_uniform<T>(values: &[T], expected: T) -> std::result::Result<(), VerificationFailure>
where
    T: PartialEq + fmt::Display + Copy,
{
    verify_with(values, |_| expected)
}
