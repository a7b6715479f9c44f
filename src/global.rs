//! The process-wide engine.
//!
//! [`init`] installs an [`Engine`] that the free functions in this module,
//! the instrumentation macros, the crash handlers and the panic hook all
//! report through. Every function here is a no-op until `init` succeeds
//! and again after [`shutdown`].

use core::fmt;

use forensics_internals::AllocError;

use crate::{config::Config, context::ContextGuard, engine::Engine, failure::Failure};

static ENGINE: spin::RwLock<Option<Engine>> = spin::RwLock::new(None);

/// Error returned by [`init`].
pub enum InitError {
    /// An engine is already installed. The rejected configuration is
    /// handed back.
    AlreadyInitialized(Config),
    /// The engine's buffers could not be allocated.
    Allocation(AllocError),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized(_) => f.write_str("forensics is already initialized"),
            Self::Allocation(error) => write!(f, "failed to initialize forensics: {error}"),
        }
    }
}

impl fmt::Debug for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized(_) => f.write_str("AlreadyInitialized(..)"),
            Self::Allocation(error) => f.debug_tuple("Allocation").field(error).finish(),
        }
    }
}

impl core::error::Error for InitError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::AlreadyInitialized(_) => None,
            Self::Allocation(error) => Some(error),
        }
    }
}

impl From<AllocError> for InitError {
    fn from(error: AllocError) -> Self {
        Self::Allocation(error)
    }
}

/// Installs the process-wide engine.
///
/// ```
/// # use forensics::Config;
/// forensics::init(Config {
///     fatal_should_halt: false,
///     ..Config::new_from_env()
/// })
/// .unwrap();
/// assert!(forensics::init(Config::default()).is_err());
/// forensics::shutdown();
/// ```
pub fn init(config: Config) -> Result<(), InitError> {
    let mut engine = ENGINE.write();
    if engine.is_some() {
        return Err(InitError::AlreadyInitialized(config));
    }
    *engine = Some(Engine::new(config)?);
    Ok(())
}

/// Removes and drops the process-wide engine, releasing every buffer it
/// allocated. Returns whether an engine was installed.
///
/// Waits for reports in progress on other threads to finish.
pub fn shutdown() -> bool {
    let engine = ENGINE.write().take();
    engine.is_some()
}

/// Whether [`init`] has installed an engine.
pub fn is_initialized() -> bool {
    ENGINE.read().is_some()
}

fn with_engine(f: impl FnOnce(&Engine)) {
    if let Some(engine) = ENGINE.read().as_ref() {
        f(engine);
    }
}

/// See [`Engine::set_attribute`].
#[track_caller]
pub fn set_attribute(key: &str, value: Option<&str>) {
    if let Some(engine) = ENGINE.read().as_ref() {
        engine.set_attribute(key, value);
    }
}

/// See [`Engine::add_breadcrumb`].
pub fn add_breadcrumb(name: &str, metadata: &[(&str, &str)]) {
    with_engine(|engine| engine.add_breadcrumb(name, metadata));
}

/// See [`Engine::begin_context`].
pub fn begin_context(name: &'static str) {
    with_engine(|engine| engine.begin_context(name));
}

/// See [`Engine::end_context`].
#[track_caller]
pub fn end_context() {
    if let Some(engine) = ENGINE.read().as_ref() {
        engine.end_context();
    }
}

/// Pushes a context onto the calling thread's stack and pops it when the
/// returned guard is dropped.
///
/// ```
/// # forensics::init(forensics::Config::default()).unwrap();
/// fn render() {
///     let _zone = forensics::context("render");
///     // failures in here are attributed to "render"
/// }
/// render();
/// # forensics::shutdown();
/// ```
pub fn context(name: &'static str) -> ContextGuard<'static> {
    begin_context(name);
    ContextGuard::new(None)
}

/// See [`Engine::release_thread_context`].
pub fn release_thread_context() {
    with_engine(Engine::release_thread_context);
}

/// See [`Engine::report_failure`].
pub fn report_failure(failure: Failure<'_>) {
    with_engine(|engine| engine.report_failure(failure));
}

/// Reports a crash through the process-wide engine without blocking.
///
/// Returns whether the caller should terminate the process. Without an
/// engine, or while one is being installed or removed, nothing is reported
/// and the answer is `true`.
pub fn report_crash(message: &str) -> bool {
    match ENGINE.try_read() {
        Some(engine) => match engine.as_ref() {
            Some(engine) => engine.report_crash(message),
            None => true,
        },
        None => true,
    }
}
