//! Engine configuration.
//!
//! All capacities are fixed when the engine is created; nothing grows
//! afterwards. A capacity of `0` is always accepted and turns the matching
//! feature into a no-op.
//!
//! # Environment
//!
//! [`Config::new_from_env`] starts from the defaults and applies the
//! comma-separated options in the `FORENSICS` environment variable:
//!
//! - `no_halt` - do not terminate the process after a fatal report
//! - `halt` - terminate after a fatal report (the default)
//! - `no_backtrace` - never capture backtraces
//!
//! Unknown options are ignored.

use core::fmt;

use forensics_internals::Allocator;

use crate::{
    backtrace::{self, BacktraceCapture, NoBacktrace},
    handlers::{ReportHandler, StderrHandler},
};

/// Capacities, collaborators and policy for an [`Engine`](crate::Engine).
///
/// ```
/// use forensics::Config;
///
/// let config = Config {
///     max_breadcrumb_count: 32,
///     fatal_should_halt: false,
///     ..Config::default()
/// };
/// # drop(config);
/// ```
pub struct Config {
    /// Maximum length of a report id (fingerprint), in bytes.
    pub max_id_size_bytes: usize,
    /// Maximum length of a formatted report message, in bytes.
    pub max_formatted_message_size_bytes: usize,
    /// Size of the region holding attribute keys and values.
    pub attribute_buf_size_bytes: usize,
    /// Maximum number of attributes.
    pub max_attribute_count: usize,
    /// Size of the region holding breadcrumb payloads.
    pub breadcrumb_buf_size_bytes: usize,
    /// Maximum number of breadcrumbs kept.
    pub max_breadcrumb_count: usize,
    /// Maximum number of backtrace frames per report.
    pub max_backtrace_count: usize,
    /// Maximum depth of each thread's context stack.
    pub max_context_depth: usize,
    /// Whether a fatal report terminates the process once the handler
    /// returns.
    pub fatal_should_halt: bool,
    /// Handler that receives reports.
    pub handler: Box<dyn ReportHandler>,
    /// Backtrace collaborator.
    pub backtrace: Box<dyn BacktraceCapture>,
    /// Allocator every engine buffer is taken from.
    pub allocator: Allocator,
}

impl Config {
    /// Creates a configuration with the default capacities, the
    /// [`StderrHandler`] and the system allocator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_id_size_bytes: 512,
            max_formatted_message_size_bytes: 1024,
            attribute_buf_size_bytes: 4 * 1024,
            max_attribute_count: 128,
            breadcrumb_buf_size_bytes: 4 * 1024,
            max_breadcrumb_count: 128,
            max_backtrace_count: 256,
            max_context_depth: 128,
            fatal_should_halt: true,
            handler: Box::new(StderrHandler),
            backtrace: backtrace::default_capture(),
            allocator: &std::alloc::System,
        }
    }

    /// Creates a default configuration adjusted by the `FORENSICS`
    /// environment variable. See the [module documentation](self).
    #[must_use]
    pub fn new_from_env() -> Self {
        let mut config = Self::new();
        if let Some(var) = std::env::var_os("FORENSICS") {
            config.apply_options(&var.to_string_lossy());
        }
        config
    }

    fn apply_options(&mut self, options: &str) {
        for option in options.split(',').map(str::trim) {
            if option.eq_ignore_ascii_case("no_halt") {
                self.fatal_should_halt = false;
            } else if option.eq_ignore_ascii_case("halt") {
                self.fatal_should_halt = true;
            } else if option.eq_ignore_ascii_case("no_backtrace") {
                self.backtrace = Box::new(NoBacktrace);
            }
        }
    }

    /// Sets the handler that receives reports.
    #[must_use]
    pub fn with_handler(mut self, handler: impl ReportHandler) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Sets the backtrace collaborator.
    #[must_use]
    pub fn with_backtrace(mut self, backtrace: impl BacktraceCapture) -> Self {
        self.backtrace = Box::new(backtrace);
        self
    }

    /// Sets the allocator every engine buffer is taken from.
    ///
    /// It is used while the engine is created, when a thread first pushes a
    /// context, and when buffers are released.
    #[must_use]
    pub fn with_allocator(mut self, allocator: Allocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// The configured allocator.
    pub fn allocator(&self) -> Allocator {
        self.allocator
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_id_size_bytes", &self.max_id_size_bytes)
            .field(
                "max_formatted_message_size_bytes",
                &self.max_formatted_message_size_bytes,
            )
            .field("attribute_buf_size_bytes", &self.attribute_buf_size_bytes)
            .field("max_attribute_count", &self.max_attribute_count)
            .field("breadcrumb_buf_size_bytes", &self.breadcrumb_buf_size_bytes)
            .field("max_breadcrumb_count", &self.max_breadcrumb_count)
            .field("max_backtrace_count", &self.max_backtrace_count)
            .field("max_context_depth", &self.max_context_depth)
            .field("fatal_should_halt", &self.fatal_should_halt)
            .finish_non_exhaustive()
    }
}
