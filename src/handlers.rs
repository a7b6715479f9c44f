//! Report handlers.
//!
//! A handler receives every report exactly once, synchronously, before the
//! failing call returns (or the process halts). It runs while the engine's
//! report lock is held, so calls back into the engine from inside a handler
//! are detected and ignored rather than deadlocking.
//!
//! Any `Fn(&Report<'_>)` closure that is `Send + Sync + 'static` is a
//! handler:
//!
//! ```
//! use forensics::Config;
//!
//! let config = Config::default().with_handler(|report: &forensics::Report<'_>| {
//!     eprintln!("{} failed: {}", report.id(), report.message());
//! });
//! # drop(config);
//! ```
//!
//! The `forensics-tracing` crate provides a handler that logs through
//! `tracing`.

use crate::report::Report;

/// Receives assembled reports.
pub trait ReportHandler: Send + Sync + 'static {
    /// Handles one report. The report borrows engine buffers and is only
    /// valid for the duration of the call; use
    /// [`Report::to_owned_report`] to keep it.
    fn handle(&self, report: &Report<'_>);
}

impl<F> ReportHandler for F
where
    F: Fn(&Report<'_>) + Send + Sync + 'static,
{
    fn handle(&self, report: &Report<'_>) {
        self(report);
    }
}

/// Writes the [`Display`](core::fmt::Display) form of each report to
/// standard error. This is the default handler.
///
/// With the `signals` feature on Unix, the report goes straight to file
/// descriptor 2 without taking the `std` stderr lock or allocating, so it
/// can run from a fault handler while another thread holds that lock.
/// Output is unbuffered and may interleave with other writers. Elsewhere
/// the locked `std` handle is used.
#[derive(Copy, Clone, Debug, Default)]
pub struct StderrHandler;

impl ReportHandler for StderrHandler {
    fn handle(&self, report: &Report<'_>) {
        write_report(report);
    }
}

#[cfg(all(unix, feature = "signals"))]
fn write_report(report: &Report<'_>) {
    use core::fmt::Write;

    // Nothing sensible can be done if stderr is gone.
    let _ = writeln!(RawStderr, "{report}");
}

#[cfg(not(all(unix, feature = "signals")))]
fn write_report(report: &Report<'_>) {
    use std::io::Write;

    let mut stderr = std::io::stderr().lock();
    // Nothing sensible can be done if stderr is gone.
    let _ = writeln!(stderr, "{report}");
}

/// Unbuffered, unlocked writes to standard error.
#[cfg(all(unix, feature = "signals"))]
struct RawStderr;

#[cfg(all(unix, feature = "signals"))]
impl core::fmt::Write for RawStderr {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let mut bytes = s.as_bytes();
        while !bytes.is_empty() {
            // SAFETY: `STDERR_FILENO` is a plain descriptor number and the
            // pointer and length come from a live slice. `write` is
            // async-signal-safe.
            let written =
                unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len()) };
            match usize::try_from(written) {
                Ok(0) => return Err(core::fmt::Error),
                Ok(written) => bytes = &bytes[written..],
                Err(_) if interrupted() => {}
                Err(_) => return Err(core::fmt::Error),
            }
        }
        Ok(())
    }
}

#[cfg(all(unix, feature = "signals"))]
fn interrupted() -> bool {
    std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted
}
