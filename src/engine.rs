//! The diagnostics engine.
//!
//! An [`Engine`] owns every buffer it will ever use: the attribute store,
//! the breadcrumb ring and the scratch space reports are assembled in are
//! all allocated by [`Engine::new`] and released when the engine is dropped.
//! Each thread's context stack is allocated the first time that thread
//! pushes a context.
//!
//! Attribute changes, breadcrumbs and report assembly are serialized by a
//! single report lock, so a report always shows one consistent point in
//! time. Calls made from inside a report handler, on the thread that holds
//! that lock, are ignored (mutations) or produce a reduced report (failures)
//! instead of deadlocking.
//!
//! Most programs use the process-wide engine through [`crate::init`] and the
//! instrumentation macros. Owning an `Engine` directly is useful for tests
//! and for libraries that want isolated diagnostics state.

use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use forensics_internals::{
    AddOutcome, AllocError, AttributeError, AttributeStore, BreadcrumbRing, FixedBuffer, Slot,
};

use crate::{
    backtrace::BacktraceCapture,
    config::Config,
    context::{ContextGuard, ContextRegistry},
    failure::Failure,
    handlers::ReportHandler,
    lock::ReportLock,
    report::{Attributes, Breadcrumbs, FixedString, Location, Report, ReportKind, write_fingerprint},
};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// How many times the crash path tries the report lock before falling back
/// to a reduced report.
const CRASH_LOCK_ATTEMPTS: usize = 100_000;

// Stack scratch for reduced reports.
const REDUCED_ID_BYTES: usize = 256;
const REDUCED_MESSAGE_BYTES: usize = 256;
const REDUCED_CONTEXT_DEPTH: usize = 32;
const REDUCED_BACKTRACE_FRAMES: usize = 64;

const EXIT_FAILURE: i32 = 1;

/// State guarded by the report lock.
struct ReportState {
    attributes: AttributeStore,
    breadcrumbs: BreadcrumbRing,
    id: FixedBuffer<u8>,
    message: FixedBuffer<u8>,
    breadcrumb_slots: FixedBuffer<Slot>,
    contexts: FixedBuffer<&'static str>,
    backtrace: FixedBuffer<usize>,
}

/// Limits for reduced reports, which never exceed the configured ones.
#[derive(Copy, Clone, Debug)]
struct ReducedLimits {
    id: usize,
    message: usize,
    contexts: usize,
    frames: usize,
}

/// Borrowed buffers a report is assembled in.
struct Scratch<'s> {
    id: &'s mut [u8],
    message: &'s mut [u8],
    contexts: &'s mut [&'static str],
    backtrace: &'s mut [usize],
}

/// An in-process diagnostics engine.
pub struct Engine {
    id: u64,
    fatal_should_halt: bool,
    reduced: ReducedLimits,
    handler: Box<dyn ReportHandler>,
    backtrace: Box<dyn BacktraceCapture>,
    state: ReportLock<ReportState>,
    contexts: ContextRegistry,
}

impl Engine {
    /// Creates an engine, allocating every buffer up front.
    pub fn new(config: Config) -> Result<Self, AllocError> {
        let Config {
            max_id_size_bytes,
            max_formatted_message_size_bytes,
            attribute_buf_size_bytes,
            max_attribute_count,
            breadcrumb_buf_size_bytes,
            max_breadcrumb_count,
            max_backtrace_count,
            max_context_depth,
            fatal_should_halt,
            handler,
            backtrace,
            allocator,
        } = config;

        let state = ReportState {
            attributes: AttributeStore::new(
                allocator,
                max_attribute_count,
                attribute_buf_size_bytes,
            )?,
            breadcrumbs: BreadcrumbRing::new(
                allocator,
                max_breadcrumb_count,
                breadcrumb_buf_size_bytes,
            )?,
            id: FixedBuffer::new(allocator, max_id_size_bytes, 0)?,
            message: FixedBuffer::new(allocator, max_formatted_message_size_bytes, 0)?,
            breadcrumb_slots: FixedBuffer::new(allocator, max_breadcrumb_count, Slot::default())?,
            contexts: FixedBuffer::new(allocator, max_context_depth, "")?,
            backtrace: FixedBuffer::new(allocator, max_backtrace_count, 0)?,
        };

        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            engine = id,
            max_attribute_count,
            attribute_buf_size_bytes,
            max_breadcrumb_count,
            breadcrumb_buf_size_bytes,
            max_context_depth,
            max_backtrace_count,
            fatal_should_halt,
            "forensics engine created"
        );

        Ok(Self {
            id,
            fatal_should_halt,
            reduced: ReducedLimits {
                id: max_id_size_bytes.min(REDUCED_ID_BYTES),
                message: max_formatted_message_size_bytes.min(REDUCED_MESSAGE_BYTES),
                contexts: max_context_depth.min(REDUCED_CONTEXT_DEPTH),
                frames: max_backtrace_count.min(REDUCED_BACKTRACE_FRAMES),
            },
            handler,
            backtrace,
            state: ReportLock::new(state),
            contexts: ContextRegistry::new(id, max_context_depth, allocator),
        })
    }

    /// Whether fatal reports terminate the process.
    pub fn fatal_should_halt(&self) -> bool {
        self.fatal_should_halt
    }

    /// Sets `key` to `value`, or removes it when `value` is `None`.
    ///
    /// Exceeding the configured attribute count or byte budget is a
    /// configuration error: the store is left unchanged and a fatal
    /// assertion report is raised at the caller's location.
    #[track_caller]
    pub fn set_attribute(&self, key: &str, value: Option<&str>) {
        let Some(mut state) = self.state.lock() else {
            return;
        };
        let result = state.attributes.set(key, value);
        drop(state);

        let Err(error) = result else {
            return;
        };
        tracing::debug!(key, %error, "attribute rejected");
        let value = value.unwrap_or_default();
        let failure = Failure::new("attribute fits").function("forensics::set_attribute");
        match error {
            AttributeError::TooManyAttributes { .. } => self.report_failure(failure.message(
                "Cannot set attribute because the attribute key array is full. Try increasing the size of max_attribute_count. key={} value={}",
                format_args!(
                    "Cannot set attribute because the attribute key array is full. Try increasing the size of max_attribute_count. key={} value={}",
                    key, value
                ),
            )),
            AttributeError::OutOfSpace { needed, available } => self.report_failure(failure.message(
                "Cannot set attribute because the attribute buffer is full. Try increasing the size of attribute_buf_size_bytes. attribute={} needed={} avail={}",
                format_args!(
                    "Cannot set attribute because the attribute buffer is full. Try increasing the size of attribute_buf_size_bytes. attribute={} needed={} avail={}",
                    key, needed, available
                ),
            )),
        }
    }

    /// Records a breadcrumb.
    ///
    /// Repeating the newest breadcrumb only increments its repeat count.
    /// A breadcrumb larger than the whole breadcrumb buffer is dropped.
    pub fn add_breadcrumb(&self, name: &str, metadata: &[(&str, &str)]) {
        let Some(mut state) = self.state.lock() else {
            return;
        };
        let outcome = state.breadcrumbs.add(name, metadata);
        drop(state);

        if outcome == AddOutcome::Dropped {
            tracing::debug!(name, "breadcrumb larger than the breadcrumb buffer was dropped");
        }
    }

    /// Pushes a context onto the calling thread's stack.
    ///
    /// Beyond the configured depth the push is only counted, and the
    /// matching [`end_context`](Self::end_context) calls are absorbed.
    pub fn begin_context(&self, name: &'static str) {
        self.contexts.begin(name);
    }

    /// Pops the calling thread's innermost context.
    ///
    /// Popping an empty stack means `begin_context` and `end_context` calls
    /// are mismatched somewhere; it is reported as a fatal assertion at the
    /// caller's location.
    #[track_caller]
    pub fn end_context(&self) {
        if self.contexts.end().is_err() {
            self.report_failure(
                Failure::new("context stack is not empty")
                    .function("forensics::end_context")
                    .text("The forensics context stack underflowed. Do you have mismatched begin/end calls?"),
            );
        }
    }

    /// Pushes a context that is popped when the returned guard is dropped.
    pub fn enter_context(&self, name: &'static str) -> ContextGuard<'_> {
        self.begin_context(name);
        ContextGuard::new(Some(self))
    }

    /// Frees the calling thread's context stack.
    ///
    /// Stacks are otherwise kept until the engine is dropped, even after
    /// their thread exits. Threads that come and go can call this before
    /// exiting.
    pub fn release_thread_context(&self) {
        self.contexts.release_current_thread();
    }

    /// Number of context stacks currently allocated.
    pub fn context_stack_count(&self) -> usize {
        self.contexts.len()
    }

    /// Assembles a report for `failure` and hands it to the handler.
    ///
    /// If the failure is fatal and the engine is configured to halt, the
    /// process exits after the handler returns.
    pub fn report_failure(&self, failure: Failure<'_>) {
        match self.state.lock() {
            Some(mut state) => self.dispatch_full(&mut state, &failure, false),
            None => self.dispatch_reduced(&failure, false),
        }
        tracing::debug!(
            kind = ?failure.kind,
            fatal = failure.fatal,
            file = failure.location.file(),
            line = failure.location.line(),
            "failure reported"
        );

        if failure.fatal && self.fatal_should_halt {
            std::process::exit(EXIT_FAILURE);
        }
    }

    /// Reports a crash from a fault handler.
    ///
    /// Never blocks indefinitely: if the report lock cannot be taken (the
    /// faulting thread may hold it) a reduced report with the context stack
    /// and backtrace, but no attributes or breadcrumbs, is sent instead. No
    /// log events are emitted. Returns whether the caller should terminate
    /// the process.
    ///
    /// The report has no file, line or expression. `message` is both its
    /// message and its format, so every crash with the same message in the
    /// same context shares an id.
    pub fn report_crash(&self, message: &str) -> bool {
        let failure = Failure::new("")
            .at(Location::new("", 0, 0))
            .kind(ReportKind::Crash)
            .function("crash")
            .text(message);
        match self.state.try_lock_for(CRASH_LOCK_ATTEMPTS) {
            Some(mut state) => self.dispatch_full(&mut state, &failure, true),
            None => self.dispatch_reduced(&failure, true),
        }
        self.fatal_should_halt
    }

    fn dispatch_full(&self, state: &mut ReportState, failure: &Failure<'_>, in_fault: bool) {
        let ReportState {
            attributes,
            breadcrumbs,
            id,
            message,
            breadcrumb_slots,
            contexts,
            backtrace,
        } = state;

        let slot_count = breadcrumbs.copy_chronological(breadcrumb_slots);
        self.dispatch(
            failure,
            Scratch {
                id,
                message,
                contexts,
                backtrace,
            },
            Attributes::new(Some(&*attributes)),
            Breadcrumbs::new(Some(&*breadcrumbs), &breadcrumb_slots[..slot_count]),
            in_fault,
        );
    }

    fn dispatch_reduced(&self, failure: &Failure<'_>, in_fault: bool) {
        let mut id = [0u8; REDUCED_ID_BYTES];
        let mut message = [0u8; REDUCED_MESSAGE_BYTES];
        let mut contexts = [""; REDUCED_CONTEXT_DEPTH];
        let mut backtrace = [0usize; REDUCED_BACKTRACE_FRAMES];
        let limits = self.reduced;

        self.dispatch(
            failure,
            Scratch {
                id: &mut id[..limits.id],
                message: &mut message[..limits.message],
                contexts: &mut contexts[..limits.contexts],
                backtrace: &mut backtrace[..limits.frames],
            },
            Attributes::new(None),
            Breadcrumbs::new(None, &[]),
            in_fault,
        );
    }

    fn dispatch(
        &self,
        failure: &Failure<'_>,
        scratch: Scratch<'_>,
        attributes: Attributes<'_>,
        breadcrumbs: Breadcrumbs<'_>,
        in_fault: bool,
    ) {
        let mut message = FixedString::new(scratch.message);
        failure.write_message(&mut message);
        let message = message.into_str();

        let context_count = self.contexts.snapshot(scratch.contexts);
        let contexts = &scratch.contexts[..context_count];

        let frame_count = if in_fault {
            self.backtrace.capture_in_fault(scratch.backtrace)
        } else {
            self.backtrace.capture(scratch.backtrace)
        };
        let frame_count = frame_count.min(scratch.backtrace.len());

        let mut id = FixedString::new(scratch.id);
        // The sink truncates instead of failing.
        let _ = write_fingerprint(
            &mut id,
            contexts.last().copied(),
            failure.location.file(),
            failure.function,
            failure.format,
        );

        let report = Report {
            kind: failure.kind,
            id: id.into_str(),
            location: failure.location,
            function: failure.function,
            expression: failure.expression,
            format: failure.format,
            message,
            fatal: failure.fatal,
            contexts,
            attributes,
            breadcrumbs,
            backtrace: &scratch.backtrace[..frame_count],
        };
        self.handler.handle(&report);
    }

    #[cfg(test)]
    fn validate_stores(&self) -> bool {
        let state = self.state.lock();
        state.is_some_and(|state| state.attributes.validate() && state.breadcrumbs.validate())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        tracing::debug!(
            engine = self.id,
            context_stacks = self.contexts.len(),
            "forensics engine shut down"
        );
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("fatal_should_halt", &self.fatal_should_halt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        alloc::{GlobalAlloc, Layout, System},
        sync::{
            Arc, Mutex, OnceLock,
            atomic::{AtomicBool, AtomicUsize},
        },
    };

    use super::*;
    use crate::report::OwnedReport;

    type Reports = Arc<Mutex<Vec<OwnedReport>>>;

    fn test_config() -> Config {
        Config {
            fatal_should_halt: false,
            ..Config::default()
        }
        .with_backtrace(crate::NoBacktrace)
    }

    fn recording(config: Config) -> (Engine, Reports) {
        let reports = Reports::default();
        let sink = Arc::clone(&reports);
        let engine = Engine::new(config.with_handler(move |report: &Report<'_>| {
            sink.lock().unwrap().push(report.to_owned_report());
        }))
        .unwrap();
        (engine, reports)
    }

    fn take_last(reports: &Reports) -> OwnedReport {
        reports.lock().unwrap().pop().unwrap()
    }

    #[test]
    fn test_report_without_message() {
        let (engine, reports) = recording(test_config());
        engine.report_failure(Failure::new("1 == 2").function("check_math"));

        let report = take_last(&reports);
        assert_eq!(report.kind, ReportKind::Assertion);
        assert_eq!(report.expression, "1 == 2");
        assert_eq!(report.message, "");
        assert_eq!(report.format, "");
        assert!(report.fatal);
        assert_eq!(report.id, "<none>-engine.rs-check_math-");
        assert!(report.file.ends_with("engine.rs"));
        assert!(report.contexts.is_empty());
        assert!(report.attributes.is_empty());
        assert!(report.breadcrumbs.is_empty());
        assert!(report.backtrace.is_empty());
    }

    #[test]
    fn test_report_with_formatted_message() {
        let (engine, reports) = recording(test_config());
        let qty = 3;
        engine.report_failure(
            Failure::new("qty > 5")
                .function("validate")
                .message("bad qty={}", format_args!("bad qty={}", qty))
                .fatal(false),
        );

        let report = take_last(&reports);
        assert_eq!(report.message, "bad qty=3");
        assert_eq!(report.format, "bad qty={}");
        assert!(!report.fatal);
        assert_eq!(report.id, "<none>-engine.rs-validate-bad qty={}");
    }

    #[test]
    fn test_fingerprint_ignores_arguments() {
        let (engine, reports) = recording(test_config());
        engine.begin_context("checkout");
        for qty in [1, 2] {
            engine.report_failure(
                Failure::new("qty > 5")
                    .function("validate")
                    .message("bad qty={}", format_args!("bad qty={}", qty)),
            );
        }
        engine.report_failure(
            Failure::new("qty > 5")
                .function("validate")
                .message("quantity {} too small", format_args!("quantity {} too small", 1)),
        );
        engine.end_context();
        engine.release_thread_context();

        let reports = reports.lock().unwrap();
        assert_eq!(reports[0].id, "checkout-engine.rs-validate-bad qty={}");
        assert_eq!(reports[0].id, reports[1].id);
        assert_ne!(reports[0].message, reports[1].message);
        assert_ne!(reports[1].id, reports[2].id);
    }

    #[test]
    fn test_attributes() {
        let (engine, reports) = recording(test_config());
        engine.set_attribute("user", Some("x"));
        engine.set_attribute("version", Some("1.0"));
        engine.report_failure(Failure::new("false"));
        let report = take_last(&reports);
        assert_eq!(report.attribute("user"), Some("x"));
        assert_eq!(report.attribute("version"), Some("1.0"));

        engine.set_attribute("user", None);
        engine.report_failure(Failure::new("false"));
        let report = take_last(&reports);
        assert_eq!(report.attributes, [("version".to_owned(), "1.0".to_owned())]);
        assert_eq!(report.attribute("user"), None);
    }

    #[test]
    fn test_contexts() {
        let (engine, reports) = recording(test_config());
        engine.begin_context("global");
        engine.begin_context("local");
        engine.begin_context("personal");
        engine.report_failure(Failure::new("false").function("f"));
        engine.end_context();
        engine.end_context();
        engine.end_context();
        engine.release_thread_context();

        let report = take_last(&reports);
        assert_eq!(report.contexts, ["global", "local", "personal"]);
        assert_eq!(report.responsible_context(), Some("personal"));
        assert!(report.id.starts_with("personal-engine.rs-f-"));
        assert!(reports.lock().unwrap().is_empty());
    }

    #[test]
    fn test_context_guard() {
        let (engine, reports) = recording(test_config());
        {
            let _outer = engine.enter_context("outer");
            let _inner = engine.enter_context("inner");
            engine.report_failure(Failure::new("false"));
        }
        engine.report_failure(Failure::new("false"));
        engine.release_thread_context();

        let reports = reports.lock().unwrap();
        assert_eq!(reports[0].contexts, ["outer", "inner"]);
        assert!(reports[1].contexts.is_empty());
        assert_eq!(reports.len(), 2);
    }

    #[test]
    fn test_engines_on_one_thread_keep_separate_contexts() {
        let (a, a_reports) = recording(test_config());
        let (b, b_reports) = recording(test_config());

        a.begin_context("a_zone");
        b.begin_context("b_zone");
        a.report_failure(Failure::new("false").function("f"));
        b.report_failure(Failure::new("false").function("f"));
        a.end_context();
        b.end_context();
        a.release_thread_context();
        b.release_thread_context();

        let a_reports = a_reports.lock().unwrap();
        let b_reports = b_reports.lock().unwrap();
        // No underflow reports from the balanced ends.
        assert_eq!(a_reports.len(), 1);
        assert_eq!(b_reports.len(), 1);
        assert_eq!(a_reports[0].contexts, ["a_zone"]);
        assert_eq!(b_reports[0].contexts, ["b_zone"]);
        assert_eq!(a.context_stack_count(), 0);
        assert_eq!(b.context_stack_count(), 0);
    }

    #[test]
    fn test_context_underflow_is_reported() {
        let (engine, reports) = recording(test_config());
        let line = line!() + 1;
        engine.end_context();
        assert_eq!(engine.context_stack_count(), 0);
        engine.release_thread_context();

        let report = take_last(&reports);
        assert_eq!(
            report.message,
            "The forensics context stack underflowed. Do you have mismatched begin/end calls?"
        );
        assert!(report.fatal);
        assert_eq!(report.line, line);
        assert!(report.file.ends_with("engine.rs"));
        assert_eq!(report.function, "forensics::end_context");
    }

    #[test]
    fn test_context_overflow_is_absorbed() {
        let (engine, reports) = recording(Config {
            max_context_depth: 1,
            ..test_config()
        });
        engine.begin_context("kept");
        engine.begin_context("counted");
        engine.report_failure(Failure::new("false"));
        engine.end_context();
        engine.end_context();
        engine.release_thread_context();

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].contexts, ["kept"]);
    }

    #[test]
    fn test_breadcrumbs() {
        let (engine, reports) = recording(test_config());
        engine.add_breadcrumb("boot", &[("env", "production")]);
        engine.report_failure(Failure::new("false"));
        let report = take_last(&reports);
        assert_eq!(report.breadcrumbs.len(), 1);
        assert_eq!(report.breadcrumbs[0].name, "boot");
        assert_eq!(
            report.breadcrumbs[0].metadata,
            [("env".to_owned(), "production".to_owned())]
        );
        assert_eq!(report.breadcrumbs[0].repeat_count, 1);

        engine.add_breadcrumb("boot", &[("env", "production")]);
        engine.report_failure(Failure::new("false"));
        let report = take_last(&reports);
        assert_eq!(report.breadcrumbs.len(), 1);
        assert_eq!(report.breadcrumbs[0].repeat_count, 2);

        engine.add_breadcrumb("boot", &[("env", "dev")]);
        engine.report_failure(Failure::new("false"));
        let report = take_last(&reports);
        assert_eq!(report.breadcrumb_names(), ["boot", "boot"]);
        assert_eq!(report.breadcrumbs[1].repeat_count, 1);
    }

    #[test]
    fn test_breadcrumb_count_eviction() {
        let (engine, reports) = recording(Config {
            max_breadcrumb_count: 2,
            ..test_config()
        });
        for name in ["one", "two", "three", "four"] {
            engine.add_breadcrumb(name, &[]);
        }
        engine.report_failure(Failure::new("false"));
        assert_eq!(take_last(&reports).breadcrumb_names(), ["three", "four"]);
    }

    #[test]
    fn test_breadcrumb_byte_eviction() {
        let (engine, reports) = recording(Config {
            breadcrumb_buf_size_bytes: 16,
            ..test_config()
        });
        for name in ["one", "two", "three", "four"] {
            engine.add_breadcrumb(name, &[]);
        }
        engine.report_failure(Failure::new("false"));
        assert_eq!(take_last(&reports).breadcrumb_names(), ["three", "four"]);
    }

    #[test]
    fn test_breadcrumb_budget_of_one_entry() {
        let (engine, reports) = recording(Config {
            breadcrumb_buf_size_bytes: BreadcrumbRing::packed_size("aaaa", &[]).unwrap(),
            ..test_config()
        });
        for name in ["aaaa", "bbbb", "cccc", "dddd"] {
            engine.add_breadcrumb(name, &[]);
        }
        engine.add_breadcrumb("too long to ever fit", &[]);
        engine.report_failure(Failure::new("false"));
        assert_eq!(take_last(&reports).breadcrumb_names(), ["dddd"]);
    }

    #[test]
    fn test_zero_capacity() {
        let (engine, reports) = recording(Config {
            max_attribute_count: 0,
            max_breadcrumb_count: 0,
            max_context_depth: 0,
            ..test_config()
        });
        engine.set_attribute("user", Some("x"));
        engine.add_breadcrumb("boot", &[("env", "production")]);
        engine.begin_context("global");
        engine.report_failure(Failure::new("false").function("f"));
        engine.end_context();
        engine.release_thread_context();

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].attributes.is_empty());
        assert!(reports[0].breadcrumbs.is_empty());
        assert!(reports[0].contexts.is_empty());
        assert_eq!(reports[0].id, "<none>-engine.rs-f-");
    }

    #[test]
    fn test_zero_sized_report_buffers() {
        let (engine, reports) = recording(Config {
            max_id_size_bytes: 0,
            max_formatted_message_size_bytes: 0,
            max_backtrace_count: 0,
            ..test_config()
        });
        engine.report_failure(Failure::new("false").text("lost"));
        let report = take_last(&reports);
        assert_eq!(report.id, "");
        assert_eq!(report.message, "");
        assert_eq!(report.format, "lost");
    }

    #[test]
    fn test_truncation() {
        let (engine, reports) = recording(Config {
            max_id_size_bytes: 10,
            max_formatted_message_size_bytes: 4,
            ..test_config()
        });
        engine.report_failure(
            Failure::new("false")
                .function("f")
                .message("{}", format_args!("{}", "abcdefgh")),
        );
        let report = take_last(&reports);
        assert_eq!(report.message, "abcd");
        assert_eq!(report.id, "<none>-eng");
    }

    #[test]
    fn test_too_many_attributes_is_reported() {
        let (engine, reports) = recording(Config {
            max_attribute_count: 1,
            ..test_config()
        });
        engine.set_attribute("a", Some("1"));
        engine.set_attribute("b", Some("2"));

        let report = take_last(&reports);
        assert!(report.fatal);
        assert_eq!(
            report.message,
            "Cannot set attribute because the attribute key array is full. Try increasing the size of max_attribute_count. key=b value=2"
        );
        assert_eq!(report.attributes, [("a".to_owned(), "1".to_owned())]);
        assert!(report.file.ends_with("engine.rs"));
    }

    #[test]
    fn test_attribute_buffer_full_is_reported() {
        let (engine, reports) = recording(Config {
            attribute_buf_size_bytes: 8,
            ..test_config()
        });
        engine.set_attribute("key", Some("val"));
        engine.set_attribute("k", Some("v"));

        let report = take_last(&reports);
        assert_eq!(
            report.message,
            "Cannot set attribute because the attribute buffer is full. Try increasing the size of attribute_buf_size_bytes. attribute=k needed=4 avail=0"
        );
        assert_eq!(report.attributes, [("key".to_owned(), "val".to_owned())]);
    }

    #[test]
    fn test_backtrace_is_capped() {
        struct Fixed;
        impl BacktraceCapture for Fixed {
            fn capture(&self, frames: &mut [usize]) -> usize {
                let source = [0x1, 0x2, 0x3];
                let count = source.len().min(frames.len());
                frames[..count].copy_from_slice(&source[..count]);
                count
            }
        }

        let (engine, reports) = recording(
            Config {
                max_backtrace_count: 2,
                ..test_config()
            }
            .with_backtrace(Fixed),
        );
        engine.report_failure(Failure::new("false"));
        assert_eq!(take_last(&reports).backtrace, [0x1, 0x2]);
    }

    #[test]
    fn test_crash_report() {
        let (engine, reports) = recording(test_config());
        engine.set_attribute("user", Some("x"));
        engine.begin_context("render");
        assert!(!engine.report_crash("got signal: SIGSEGV"));
        engine.end_context();
        engine.release_thread_context();

        let report = take_last(&reports);
        assert_eq!(report.kind, ReportKind::Crash);
        assert!(report.fatal);
        assert_eq!(report.file, "");
        assert_eq!(report.line, 0);
        assert_eq!(report.expression, "");
        assert_eq!(report.message, "got signal: SIGSEGV");
        assert_eq!(report.format, "got signal: SIGSEGV");
        assert_eq!(report.attribute("user"), Some("x"));
        assert_eq!(report.id, "render--crash-got signal: SIGSEGV");
    }

    #[test]
    fn test_crash_id_does_not_depend_on_caller() {
        let (engine, reports) = recording(test_config());
        engine.report_crash("got signal: SIGFPE");
        let report_from_closure = || engine.report_crash("got signal: SIGFPE");
        report_from_closure();

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].id, "<none>--crash-got signal: SIGFPE");
        assert_eq!(reports[1].id, reports[0].id);
        assert_eq!(reports[1].line, 0);
    }

    #[test]
    fn test_crash_while_lock_is_held_elsewhere() {
        let (engine, reports) = recording(test_config());
        engine.set_attribute("user", Some("x"));
        engine.add_breadcrumb("boot", &[]);
        let held = AtomicBool::new(false);
        let release = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let _state = engine.state.lock().unwrap();
                held.store(true, Ordering::SeqCst);
                while !release.load(Ordering::SeqCst) {
                    std::thread::yield_now();
                }
            });
            while !held.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }

            engine.begin_context("render");
            engine.report_crash("got signal: SIGBUS");
            engine.end_context();
            release.store(true, Ordering::SeqCst);
        });
        engine.release_thread_context();

        let report = take_last(&reports);
        assert_eq!(report.kind, ReportKind::Crash);
        assert_eq!(report.contexts, ["render"]);
        assert!(report.attributes.is_empty());
        assert!(report.breadcrumbs.is_empty());
        assert_eq!(report.file, "");
        assert_eq!(report.expression, "");
        assert_eq!(report.id, "render--crash-got signal: SIGBUS");
    }

    #[test]
    fn test_reentrant_calls_from_handler() {
        static ENGINE: OnceLock<Engine> = OnceLock::new();
        static NESTED: AtomicUsize = AtomicUsize::new(0);
        let reports = Reports::default();
        let sink = Arc::clone(&reports);

        let engine = ENGINE.get_or_init(|| {
            Engine::new(test_config().with_handler(move |report: &Report<'_>| {
                sink.lock().unwrap().push(report.to_owned_report());
                if NESTED.fetch_add(1, Ordering::SeqCst) == 0 {
                    let engine = ENGINE.get().unwrap();
                    // Both are ignored instead of deadlocking.
                    engine.set_attribute("from_handler", Some("1"));
                    engine.add_breadcrumb("from_handler", &[]);
                    engine.report_failure(Failure::new("nested").fatal(false));
                }
            }))
            .unwrap()
        });

        engine.set_attribute("user", Some("x"));
        engine.report_failure(Failure::new("outer").fatal(false));

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].expression, "outer");
        assert_eq!(reports[0].attribute("user"), Some("x"));
        assert_eq!(reports[1].expression, "nested");
        assert!(reports[1].attributes.is_empty());
        drop(reports);

        engine.report_failure(Failure::new("after").fatal(false));
        assert!(engine.validate_stores());
    }

    #[test]
    fn test_concurrent_use_keeps_stores_valid() {
        let (engine, reports) = recording(Config {
            max_attribute_count: 16,
            attribute_buf_size_bytes: 4096,
            max_breadcrumb_count: 8,
            breadcrumb_buf_size_bytes: 128,
            ..test_config()
        });

        std::thread::scope(|scope| {
            for thread in 0..8usize {
                let engine = &engine;
                scope.spawn(move || {
                    let key = format!("thread{thread}");
                    for round in 0..200usize {
                        let value = "v".repeat(round % 13);
                        engine.set_attribute(&key, Some(&value));
                        let name = "n".repeat(1 + (thread + round) % 17);
                        engine.add_breadcrumb(&name, &[("round", &value)]);
                        if round % 50 == 0 {
                            engine.begin_context("worker");
                            engine.report_failure(Failure::new("false").fatal(false));
                            engine.end_context();
                        }
                    }
                    engine.release_thread_context();
                });
            }
        });

        assert!(engine.validate_stores());
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 8 * 4);
        for report in reports.iter() {
            assert_eq!(report.contexts, ["worker"]);
            assert!(report.breadcrumbs.len() <= 8);
        }
        assert_eq!(engine.context_stack_count(), 0);
    }

    struct CountingAlloc {
        allocs: AtomicUsize,
        frees: AtomicUsize,
    }

    // SAFETY: Delegates to the system allocator unchanged.
    unsafe impl GlobalAlloc for CountingAlloc {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            // SAFETY: The caller upholds the `GlobalAlloc::alloc` contract.
            unsafe { System.alloc(layout) }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            self.frees.fetch_add(1, Ordering::SeqCst);
            // SAFETY: The caller upholds the `GlobalAlloc::dealloc` contract.
            unsafe { System.dealloc(ptr, layout) }
        }
    }

    #[test]
    fn test_every_buffer_is_freed_on_drop() {
        static COUNTING: CountingAlloc = CountingAlloc {
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        };

        let (engine, _reports) = recording(test_config().with_allocator(&COUNTING));
        let after_init = COUNTING.allocs.load(Ordering::SeqCst);
        assert_eq!(after_init, 9);

        engine.set_attribute("user", Some("x"));
        engine.add_breadcrumb("boot", &[]);
        engine.report_failure(Failure::new("false"));
        assert_eq!(COUNTING.allocs.load(Ordering::SeqCst), after_init);

        engine.begin_context("main");
        std::thread::scope(|scope| {
            scope.spawn(|| engine.begin_context("worker"));
        });
        assert_eq!(COUNTING.allocs.load(Ordering::SeqCst), after_init + 2);
        assert_eq!(engine.context_stack_count(), 2);

        drop(engine);
        assert_eq!(
            COUNTING.frees.load(Ordering::SeqCst),
            COUNTING.allocs.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_allocation_failure() {
        struct NullAlloc;

        // SAFETY: Never hands out memory, so there is nothing to free.
        unsafe impl GlobalAlloc for NullAlloc {
            unsafe fn alloc(&self, _layout: Layout) -> *mut u8 {
                core::ptr::null_mut()
            }

            unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {}
        }

        static NULL: NullAlloc = NullAlloc;
        let error = Engine::new(test_config().with_allocator(&NULL)).unwrap_err();
        assert!(error.bytes > 0);
    }

    #[test]
    fn test_send_sync() {
        static_assertions::assert_impl_all!(Engine: Send, Sync);
        static_assertions::assert_not_impl_any!(ContextGuard<'static>: Send);
    }
}
