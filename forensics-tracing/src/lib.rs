#![deny(
    missing_docs,
    unsafe_code,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]

//! `tracing` integration for forensics reports.
//!
//! Two independent pieces:
//!
//! - [`TracingHandler`] is a report handler that emits each report as a
//!   `tracing` event, so reports end up wherever your logs already go.
//! - [`ForensicsLayer`] is a subscriber layer that feeds the process-wide
//!   engine: entered spans become contexts and events become breadcrumbs.
//!
//! # Quick Start
//!
//! ```
//! use forensics::Config;
//! use forensics_tracing::{ForensicsLayer, TracingHandler};
//! use tracing_subscriber::{Registry, layer::SubscriberExt};
//!
//! forensics::init(Config {
//!     fatal_should_halt: false,
//!     ..Config::default()
//! }
//! .with_handler(TracingHandler))
//! .unwrap();
//!
//! let subscriber = Registry::default().with(ForensicsLayer::new());
//! tracing::subscriber::with_default(subscriber, || {
//!     let span = tracing::info_span!("checkout");
//!     let _entered = span.enter();
//!     tracing::info!(items = 3, "cart loaded");
//!
//!     // Reported with "checkout" as its context and a "cart loaded"
//!     // breadcrumb.
//!     forensics::verify!(1 + 1 == 3);
//! });
//! forensics::release_thread_context();
//! forensics::shutdown();
//! ```
//!
//! Events and spans whose target starts with `forensics` are ignored by the
//! layer, so reports logged by [`TracingHandler`] and the engine's own
//! diagnostics never feed back into the engine.

use core::fmt;

use forensics::{Report, ReportHandler, report::NO_CONTEXT};
use tracing::{
    Event, Subscriber,
    field::{Field, Visit},
    span,
};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

/// Target of the events emitted by [`TracingHandler`].
pub const REPORT_TARGET: &str = "forensics::report";

/// A report handler that emits every report as a `tracing` event.
///
/// Fatal reports are logged at `ERROR`, others at `WARN`, with the target
/// [`REPORT_TARGET`].
///
/// The handler formats into whatever the installed subscriber does, which
/// usually allocates. Prefer a handler that writes to a pre-opened file
/// descriptor if crash reports must survive heap corruption.
#[derive(Copy, Clone, Debug, Default)]
pub struct TracingHandler;

macro_rules! log_report {
    ($level:expr, $report:expr) => {{
        let report = $report;
        let message = if report.message().is_empty() {
            report.expression()
        } else {
            report.message()
        };
        tracing::event!(
            target: REPORT_TARGET,
            $level,
            id = report.id(),
            kind = ?report.kind(),
            expression = report.expression(),
            file = report.file(),
            line = report.line(),
            function = report.function(),
            context = report.responsible_context().unwrap_or(NO_CONTEXT),
            attributes = ?report.attributes(),
            breadcrumbs = report.breadcrumbs().len(),
            "{}",
            message
        );
    }};
}

impl ReportHandler for TracingHandler {
    fn handle(&self, report: &Report<'_>) {
        if report.is_fatal() {
            log_report!(tracing::Level::ERROR, report);
        } else {
            log_report!(tracing::Level::WARN, report);
        }
    }
}

/// A tracing layer that records spans and events in the process-wide
/// forensics engine.
///
/// Entering a span pushes its name as a context on the current thread, and
/// exiting pops it. Each event is recorded as a breadcrumb named after its
/// message, with the event level and fields as metadata.
///
/// # Examples
///
/// ```
/// use forensics_tracing::ForensicsLayer;
/// use tracing_subscriber::{Registry, layer::SubscriberExt};
///
/// let layer = ForensicsLayer {
///     record_events: false,
///     ..ForensicsLayer::new()
/// };
/// let subscriber = Registry::default().with(layer);
/// # drop(subscriber);
/// ```
#[derive(Copy, Clone, Debug)]
pub struct ForensicsLayer {
    /// Whether events are recorded as breadcrumbs.
    pub record_events: bool,
    /// Whether entered spans are pushed as contexts.
    pub track_spans: bool,
}

impl ForensicsLayer {
    /// Creates a layer that records events and tracks spans.
    pub fn new() -> Self {
        Self {
            record_events: true,
            track_spans: true,
        }
    }
}

impl Default for ForensicsLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// How many times a span is currently entered with a context pushed.
#[derive(Default)]
struct EnteredCount(usize);

fn is_own_target(target: &str) -> bool {
    target.starts_with("forensics")
}

impl<S> Layer<S> for ForensicsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.record_events || is_own_target(metadata.target()) {
            return;
        }

        let mut visitor = BreadcrumbVisitor::default();
        event.record(&mut visitor);

        let mut pairs = Vec::with_capacity(visitor.fields.len() + 1);
        pairs.push(("level", metadata.level().as_str()));
        pairs.extend(
            visitor
                .fields
                .iter()
                .map(|(key, value)| (*key, value.as_str())),
        );
        let name = visitor.message.as_deref().unwrap_or(metadata.name());
        forensics::add_breadcrumb(name, &pairs);
    }

    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        if !self.track_spans {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };
        let metadata = span.metadata();
        // Without an engine nothing is pushed, so the exit must not pop.
        if is_own_target(metadata.target()) || !forensics::is_initialized() {
            return;
        }

        forensics::begin_context(metadata.name());
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<EnteredCount>() {
            Some(count) => count.0 += 1,
            None => extensions.insert(EnteredCount(1)),
        }
    }

    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        let Some(count) = extensions.get_mut::<EnteredCount>() else {
            // Entered before the layer was installed, or while span
            // tracking was off.
            return;
        };
        if count.0 == 0 {
            return;
        }
        count.0 -= 1;
        drop(extensions);
        forensics::end_context();
    }
}

/// Collects an event's message and fields.
#[derive(Default)]
struct BreadcrumbVisitor {
    message: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl Visit for BreadcrumbVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_owned());
        } else {
            self.fields.push((field.name(), value.to_owned()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name(), value));
        }
    }
}
