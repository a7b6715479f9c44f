//! Backtrace capture.
//!
//! The engine only records raw return addresses. Symbolication is left to
//! whatever the report handler forwards the addresses to.

/// Fills a buffer with the return addresses of the calling thread.
///
/// Implementations must not allocate and must tolerate being called on a
/// thread that is handling a fault.
pub trait BacktraceCapture: Send + Sync + 'static {
    /// Writes up to `frames.len()` addresses, innermost first, and returns
    /// how many were written. Returning `0` is always valid.
    fn capture(&self, frames: &mut [usize]) -> usize;

    /// Variant used from the crash path, where the interrupted thread may be
    /// holding locks the regular capture would need.
    fn capture_in_fault(&self, frames: &mut [usize]) -> usize {
        self.capture(frames)
    }
}

/// A capture that never records anything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoBacktrace;

impl BacktraceCapture for NoBacktrace {
    fn capture(&self, _frames: &mut [usize]) -> usize {
        0
    }
}

/// Captures backtraces by unwinding with the [`backtrace`] crate.
#[cfg(feature = "backtrace")]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnwindCapture;

#[cfg(feature = "backtrace")]
impl UnwindCapture {
    fn record(frames: &mut [usize], count: &mut usize, frame: &::backtrace::Frame) -> bool {
        frames[*count] = frame.ip() as usize;
        *count += 1;
        *count < frames.len()
    }
}

#[cfg(feature = "backtrace")]
impl BacktraceCapture for UnwindCapture {
    fn capture(&self, frames: &mut [usize]) -> usize {
        if frames.is_empty() {
            return 0;
        }
        let mut count = 0;
        ::backtrace::trace(|frame| Self::record(frames, &mut count, frame));
        count
    }

    fn capture_in_fault(&self, frames: &mut [usize]) -> usize {
        if frames.is_empty() {
            return 0;
        }
        let mut count = 0;
        // SAFETY: `trace_unsynchronized` skips the global lock `trace` takes,
        // which the faulting thread may already hold. Concurrent unwinds on
        // other threads are the accepted risk of reporting from a fault.
        unsafe {
            ::backtrace::trace_unsynchronized(|frame| Self::record(frames, &mut count, frame));
        }
        count
    }
}

/// The capture used when none is configured.
pub(crate) fn default_capture() -> Box<dyn BacktraceCapture> {
    #[cfg(feature = "backtrace")]
    {
        Box::new(UnwindCapture)
    }
    #[cfg(not(feature = "backtrace"))]
    {
        Box::new(NoBacktrace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_backtrace() {
        let mut frames = [0usize; 4];
        assert_eq!(NoBacktrace.capture(&mut frames), 0);
        assert_eq!(NoBacktrace.capture_in_fault(&mut frames), 0);
    }

    #[cfg(feature = "backtrace")]
    #[test]
    fn test_unwind_capture_respects_capacity() {
        let mut frames = [0usize; 3];
        let count = UnwindCapture.capture(&mut frames);
        assert!(count <= 3);
        assert!(frames[..count].iter().all(|&address| address != 0));

        assert_eq!(UnwindCapture.capture(&mut []), 0);
        assert_eq!(UnwindCapture.capture_in_fault(&mut []), 0);
    }

    #[cfg(feature = "backtrace")]
    #[test]
    fn test_unwind_capture_records_frames() {
        let mut frames = [0usize; 64];
        assert!(UnwindCapture.capture(&mut frames) > 0);
    }
}
