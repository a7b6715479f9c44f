#![deny(
    missing_docs,
    clippy::missing_safety_doc,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::as_ptr_cast_mut,
    clippy::ptr_as_ptr,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
// Make docs.rs generate better docs
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Assertion and crash reporting for long-running native programs.
//!
//! ## Overview
//!
//! `forensics` turns a failed check, a panic or a fatal signal into a
//! structured report and hands it to a handler of your choice. Each report
//! carries not only where things went wrong, but also what the program was
//! doing at the time:
//!
//! - **Contexts** name the area of code that owns the failure. Each thread
//!   keeps its own stack of `&'static str` labels; the innermost one is held
//!   responsible.
//! - **Attributes** are process-wide key/value pairs, such as the logged-in
//!   user or the build version.
//! - **Breadcrumbs** are a rolling history of recent events, with optional
//!   metadata. When the history is full the oldest entries are evicted, and
//!   repeating the newest breadcrumb just bumps its repeat count.
//! - A **backtrace** of the failing thread.
//!
//! Every report also carries an id, `context-file-function-format`, that
//! stays the same for every failure of the same call site regardless of the
//! values that were formatted into the message.
//!
//! All of the storage above is allocated once, when the engine is created.
//! Recording contexts, attributes and breadcrumbs never allocates afterwards
//! (apart from each thread's first context), and neither does assembling a
//! report. That is what makes it possible to report from a signal handler.
//!
//! ## Quick Example
//!
//! ```
//! use forensics::{Config, breadcrumb, check, context};
//!
//! forensics::init(Config {
//!     fatal_should_halt: false,
//!     ..Config::new_from_env()
//! })
//! .unwrap();
//! forensics::set_attribute("version", Some("1.2.0"));
//!
//! fn place_order(qty: u32) {
//!     context!("checkout");
//!     breadcrumb!("order", "qty" => qty.to_string());
//!     check!(qty > 0, "bad qty={}", qty);
//! }
//!
//! place_order(0);
//! forensics::shutdown();
//! ```
//!
//! ## Engines
//!
//! The free functions and macros go through a process-wide [`Engine`]
//! installed with [`init`]. An `Engine` can also be owned directly, which
//! keeps its state isolated from the rest of the process:
//!
//! ```
//! use forensics::{Config, Engine, Failure, Report};
//!
//! let engine = Engine::new(
//!     Config {
//!         fatal_should_halt: false,
//!         ..Config::default()
//!     }
//!     .with_handler(|report: &Report<'_>| println!("{report}")),
//! )
//! .unwrap();
//! let _zone = engine.enter_context("import");
//! engine.report_failure(Failure::new("rows > 0").text("empty file"));
//! ```
//!
//! ## Crashes and panics
//!
//! `install_crash_handlers` reports SIGABRT, SIGBUS, SIGFPE, SIGILL and
//! SIGSEGV on unix (feature `signals`, on by default), and
//! [`install_panic_hook`] reports panics. Crash reports never block: when
//! the faulting thread holds the engine's lock, a reduced report with the
//! contexts and the backtrace is sent instead.
//!
//! ## Ecosystem
//!
//! - **[`forensics-tracing`]** - a handler that logs reports through
//!   `tracing`, and a subscriber layer that turns spans into contexts and
//!   events into breadcrumbs.
//!
//! For the packed stores themselves, see the [`forensics-internals`] crate.
//!
//! [`forensics-tracing`]: https://docs.rs/forensics-tracing
//! [`forensics-internals`]: forensics_internals

#[macro_use]
mod macros;

mod backtrace;
mod config;
mod context;
mod engine;
mod failure;
mod global;
pub mod handlers;
mod lock;
mod panic;
pub mod report;
#[cfg(all(unix, feature = "signals"))]
mod signal;

pub use forensics_internals::AllocError;

#[cfg(feature = "backtrace")]
pub use self::backtrace::UnwindCapture;
#[cfg(all(unix, feature = "signals"))]
pub use self::signal::{SignalError, install_crash_handlers, uninstall_crash_handlers};
pub use self::{
    backtrace::{BacktraceCapture, NoBacktrace},
    config::Config,
    context::ContextGuard,
    engine::Engine,
    failure::Failure,
    global::{
        InitError, add_breadcrumb, begin_context, context, end_context, init, is_initialized,
        release_thread_context, report_crash, report_failure, set_attribute, shutdown,
    },
    handlers::{ReportHandler, StderrHandler},
    panic::install_panic_hook,
    report::{Location, OwnedReport, Report, ReportKind},
};

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    pub use core::{cfg, convert::AsRef, format_args, stringify};

    #[doc(hidden)]
    #[must_use]
    pub fn type_name_of<T>(_: T) -> &'static str {
        core::any::type_name::<T>()
    }

    /// Turns the type name of a marker function declared inside
    /// [`function_name!`](crate::function_name) into the path of the
    /// function that contains it.
    #[doc(hidden)]
    #[must_use]
    pub fn enclosing_function(marker: &'static str) -> &'static str {
        let mut name = marker.strip_suffix("::__here").unwrap_or(marker);
        while let Some(outer) = name.strip_suffix("::{{closure}}") {
            name = outer;
        }
        name
    }

}
