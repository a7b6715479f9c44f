//! Fault signal handlers.
//!
//! [`install_crash_handlers`] routes SIGABRT, SIGBUS, SIGFPE, SIGILL and
//! SIGSEGV to the process-wide engine as crash reports. The handler only
//! uses the engine's crash path, which never blocks on the report lock and
//! never allocates.
//!
//! Handlers run on the alternate signal stack when the interrupted thread
//! has one, which the standard library sets up for the threads it spawns.
//! That is what lets a stack overflow still be reported.

use core::{
    ffi::{c_int, c_void},
    fmt, mem, ptr,
    sync::atomic::{AtomicBool, Ordering},
};

const SIGNALS: [c_int; 5] = [
    libc::SIGABRT,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGILL,
    libc::SIGSEGV,
];

const EXIT_FAILURE: c_int = 1;

/// Dispositions replaced by [`install_crash_handlers`], in `SIGNALS` order.
static PREVIOUS: spin::Mutex<Option<[libc::sigaction; SIGNALS.len()]>> = spin::Mutex::new(None);

/// Set while a fault is being reported.
static HANDLING: AtomicBool = AtomicBool::new(false);

/// Error returned when installing or removing the crash handlers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SignalError {
    /// [`install_crash_handlers`] was already called.
    AlreadyInstalled,
    /// [`uninstall_crash_handlers`] was called without handlers installed.
    NotInstalled,
    /// `sigaction` failed.
    Os {
        /// The signal being configured.
        signal: c_int,
        /// The `errno` value.
        code: i32,
    },
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInstalled => f.write_str("crash handlers are already installed"),
            Self::NotInstalled => f.write_str("crash handlers are not installed"),
            Self::Os { signal, code } => write!(
                f,
                "failed to configure {}: {}",
                signal_name(*signal).unwrap_or("signal"),
                std::io::Error::from_raw_os_error(*code)
            ),
        }
    }
}

impl core::error::Error for SignalError {}

/// Installs the crash handlers.
///
/// Reports go to the engine installed with [`init`](crate::init). After the
/// report, the process exits with status 1 if the engine halts on fatal
/// reports; otherwise the signal's default action runs.
pub fn install_crash_handlers() -> Result<(), SignalError> {
    let mut previous = PREVIOUS.lock();
    if previous.is_some() {
        return Err(SignalError::AlreadyInstalled);
    }

    // SAFETY: `sigaction` is a plain C struct for which all-zeroes is a
    // valid value.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = handle_fault as *const () as libc::sighandler_t;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
    // SAFETY: `sa_mask` is a valid, writable signal set.
    unsafe { libc::sigemptyset(&raw mut action.sa_mask) };

    // SAFETY: As above.
    let mut replaced: [libc::sigaction; SIGNALS.len()] = unsafe { mem::zeroed() };
    for (index, &signal) in SIGNALS.iter().enumerate() {
        if let Err(error) = set_action(signal, &action, Some(&mut replaced[index])) {
            for (&signal, old) in SIGNALS.iter().zip(&replaced).take(index) {
                let _ = set_action(signal, old, None);
            }
            return Err(error);
        }
    }

    *previous = Some(replaced);
    drop(previous);
    tracing::debug!("crash handlers installed");
    Ok(())
}

/// Restores the dispositions that were in place before
/// [`install_crash_handlers`].
pub fn uninstall_crash_handlers() -> Result<(), SignalError> {
    let mut previous = PREVIOUS.lock();
    let Some(replaced) = previous.take() else {
        return Err(SignalError::NotInstalled);
    };

    let mut result = Ok(());
    for (&signal, old) in SIGNALS.iter().zip(&replaced) {
        if let Err(error) = set_action(signal, old, None) {
            result = result.and(Err(error));
        }
    }
    drop(previous);
    tracing::debug!("crash handlers uninstalled");
    result
}

fn set_action(
    signal: c_int,
    action: &libc::sigaction,
    old: Option<&mut libc::sigaction>,
) -> Result<(), SignalError> {
    let old = old.map_or(ptr::null_mut(), ptr::from_mut);
    // SAFETY: `action` is a fully initialized disposition and `old` is null
    // or points to writable storage.
    let status = unsafe { libc::sigaction(signal, action, old) };
    if status == 0 {
        Ok(())
    } else {
        Err(SignalError::Os {
            signal,
            code: std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or_default(),
        })
    }
}

fn signal_name(signal: c_int) -> Option<&'static str> {
    match signal {
        libc::SIGABRT => Some("SIGABRT"),
        libc::SIGBUS => Some("SIGBUS"),
        libc::SIGFPE => Some("SIGFPE"),
        libc::SIGILL => Some("SIGILL"),
        libc::SIGSEGV => Some("SIGSEGV"),
        _ => None,
    }
}

fn crash_message(signal: c_int) -> &'static str {
    match signal {
        libc::SIGABRT => "got signal: SIGABRT",
        libc::SIGBUS => "got signal: SIGBUS",
        libc::SIGFPE => "got signal: SIGFPE",
        libc::SIGILL => "got signal: SIGILL",
        libc::SIGSEGV => "got signal: SIGSEGV",
        _ => "got unexpected signal",
    }
}

extern "C" fn handle_fault(signal: c_int, _info: *mut libc::siginfo_t, _context: *mut c_void) {
    let errno = SavedErrno::save();

    if HANDLING.swap(true, Ordering::AcqRel) {
        // Faulted while reporting a fault.
        // SAFETY: `_exit` is async-signal-safe.
        unsafe { libc::_exit(EXIT_FAILURE) };
    }

    if crate::global::report_crash(crash_message(signal)) {
        // SAFETY: `_exit` is async-signal-safe.
        unsafe { libc::_exit(EXIT_FAILURE) };
    }

    // The signal stays blocked until the handler returns, so the raised
    // signal is delivered with the default action right after.
    // SAFETY: `signal` and `raise` are async-signal-safe.
    unsafe { libc::signal(signal, libc::SIG_DFL) };
    HANDLING.store(false, Ordering::Release);
    drop(errno);
    // SAFETY: As above.
    unsafe { libc::raise(signal) };
}

/// Restores the interrupted thread's `errno` when dropped.
struct SavedErrno(c_int);

impl SavedErrno {
    fn save() -> Self {
        let location = errno_location();
        if location.is_null() {
            return Self(0);
        }
        // SAFETY: The errno location is valid for the lifetime of the
        // thread.
        Self(unsafe { *location })
    }
}

impl Drop for SavedErrno {
    fn drop(&mut self) {
        let location = errno_location();
        if !location.is_null() {
            // SAFETY: See `save`.
            unsafe { *location = self.0 };
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "emscripten", target_os = "hurd"))]
fn errno_location() -> *mut c_int {
    // SAFETY: Always returns the calling thread's errno.
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "android", target_os = "netbsd", target_os = "openbsd"))]
fn errno_location() -> *mut c_int {
    // SAFETY: Always returns the calling thread's errno.
    unsafe { libc::__errno() }
}

#[cfg(any(target_vendor = "apple", target_os = "freebsd"))]
fn errno_location() -> *mut c_int {
    // SAFETY: Always returns the calling thread's errno.
    unsafe { libc::__error() }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "emscripten",
    target_os = "hurd",
    target_os = "android",
    target_os = "netbsd",
    target_os = "openbsd",
    target_vendor = "apple",
    target_os = "freebsd"
)))]
fn errno_location() -> *mut c_int {
    ptr::null_mut()
}
