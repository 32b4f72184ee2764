//! Process exit codes of `clpipe`.
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | results were read back and verified |
//! | 1 | no result: no platform or fp64 GPU, build failure, runtime error, bad input |
//! | 3 | the kernel ran but at least one result differs from the expected value |

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_NO_RESULT: i32 = 1;
pub const EXIT_WRONG_RESULT: i32 = 3;

/// Exit code for a command that failed with `err`.
pub fn code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<clpipe::Error>() {
        Some(e) if e.is_verification() => EXIT_WRONG_RESULT,
        _ => EXIT_NO_RESULT,
    }
}
