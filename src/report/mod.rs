//! The report value handed to handlers.
//!
//! A [`Report`] borrows the engine's buffers for the duration of a single
//! handler call: building one never allocates. Handlers that need to keep
//! the data past the call convert it with [`Report::to_owned_report`].

mod fingerprint;
mod message;
mod owned;
mod snapshot;

use core::fmt;

pub use forensics_internals::{Breadcrumb, Metadata};

pub(crate) use self::{fingerprint::write_fingerprint, message::FixedString};
pub use self::{
    fingerprint::{NO_CONTEXT, fingerprint},
    owned::{OwnedBreadcrumb, OwnedReport},
    snapshot::{Attributes, Breadcrumbs},
};

/// What triggered a report.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// A failed assertion, or an engine-detected misuse such as a context
    /// underflow.
    Assertion,
    /// A fatal signal.
    Crash,
    /// A Rust panic, forwarded by the panic hook.
    Panic,
}

impl ReportKind {
    /// The header line used by the [`Display`](fmt::Display) impl of
    /// [`Report`].
    pub fn header(self) -> &'static str {
        match self {
            Self::Assertion => "ASSERTION FAILED",
            Self::Crash => "CRASH",
            Self::Panic => "PANIC",
        }
    }
}

/// A source location.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location<'a> {
    file: &'a str,
    line: u32,
    column: u32,
}

impl<'a> Location<'a> {
    /// Creates a location.
    pub const fn new(file: &'a str, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }

    /// The location of the caller, through `#[track_caller]`.
    #[track_caller]
    pub fn caller() -> Location<'static> {
        Location::from_std(core::panic::Location::caller())
    }

    /// Converts a standard library location.
    pub fn from_std(location: &'a core::panic::Location<'_>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }

    /// The source file path.
    pub fn file(&self) -> &'a str {
        self.file
    }

    /// The 1-based line.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The 1-based column.
    pub fn column(&self) -> u32 {
        self.column
    }
}

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An immutable snapshot describing one failure.
#[derive(Copy, Clone)]
pub struct Report<'a> {
    pub(crate) kind: ReportKind,
    pub(crate) id: &'a str,
    pub(crate) location: Location<'a>,
    pub(crate) function: &'a str,
    pub(crate) expression: &'a str,
    pub(crate) format: &'a str,
    pub(crate) message: &'a str,
    pub(crate) fatal: bool,
    pub(crate) contexts: &'a [&'static str],
    pub(crate) attributes: Attributes<'a>,
    pub(crate) breadcrumbs: Breadcrumbs<'a>,
    pub(crate) backtrace: &'a [usize],
}

impl<'a> Report<'a> {
    /// What triggered the report.
    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    /// The fingerprint used to group reports from the same call site, in
    /// the form `context-file-function-format`.
    pub fn id(&self) -> &'a str {
        self.id
    }

    /// Where the failure happened.
    pub fn location(&self) -> Location<'a> {
        self.location
    }

    /// Shorthand for `self.location().file()`.
    pub fn file(&self) -> &'a str {
        self.location.file
    }

    /// Shorthand for `self.location().line()`.
    pub fn line(&self) -> u32 {
        self.location.line
    }

    /// The enclosing function, as captured at the call site.
    pub fn function(&self) -> &'a str {
        self.function
    }

    /// The failed expression, as written.
    pub fn expression(&self) -> &'a str {
        self.expression
    }

    /// The raw format string of the message.
    pub fn format(&self) -> &'a str {
        self.format
    }

    /// The formatted message, truncated to the configured size.
    pub fn message(&self) -> &'a str {
        self.message
    }

    /// Whether the failure is fatal.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// The active contexts of the failing thread, outermost first.
    pub fn contexts(&self) -> &'a [&'static str] {
        self.contexts
    }

    /// The innermost context, which is held responsible for the failure.
    pub fn responsible_context(&self) -> Option<&'static str> {
        self.contexts.last().copied()
    }

    /// The attributes at the time of the failure.
    pub fn attributes(&self) -> Attributes<'a> {
        self.attributes
    }

    /// The breadcrumbs at the time of the failure, oldest first.
    pub fn breadcrumbs(&self) -> Breadcrumbs<'a> {
        self.breadcrumbs
    }

    /// Return addresses of the failing thread, innermost first.
    pub fn backtrace(&self) -> &'a [usize] {
        self.backtrace
    }

    /// Copies the report into owned memory.
    pub fn to_owned_report(&self) -> OwnedReport {
        OwnedReport::from(self)
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.kind.header())?;
        writeln!(f, "expression: {}", self.expression)?;
        if !self.message.is_empty() {
            writeln!(f, "message: {}", self.message)?;
        }
        writeln!(
            f,
            "context: {}",
            self.responsible_context().unwrap_or(NO_CONTEXT)
        )?;
        writeln!(f, "file: {}", self.location.file)?;
        writeln!(f, "line: {}", self.location.line)?;
        writeln!(f, "function: {}", self.function)?;
        writeln!(f, "id: {}", self.id)?;
        if self.contexts.len() > 1 {
            write!(f, "contexts:")?;
            for context in self.contexts {
                write!(f, " {context}")?;
            }
            writeln!(f)?;
        }
        if !self.attributes.is_empty() {
            writeln!(f, "attributes:")?;
            for (key, value) in self.attributes.iter() {
                writeln!(f, "  {key} = {value}")?;
            }
        }
        if !self.breadcrumbs.is_empty() {
            writeln!(f, "breadcrumbs:")?;
            for breadcrumb in self.breadcrumbs.iter() {
                write!(f, "  {}", breadcrumb.name())?;
                for (key, value) in breadcrumb.metadata() {
                    write!(f, " {key}={value}")?;
                }
                if breadcrumb.repeat_count() > 1 {
                    write!(f, " (x{})", breadcrumb.repeat_count())?;
                }
                writeln!(f)?;
            }
        }
        write!(f, "backtrace:")?;
        for address in self.backtrace {
            write!(f, "\n  {address:#x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Report")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("location", &self.location)
            .field("function", &self.function)
            .field("expression", &self.expression)
            .field("format", &self.format)
            .field("message", &self.message)
            .field("fatal", &self.fatal)
            .field("contexts", &self.contexts)
            .field("attributes", &self.attributes)
            .field("breadcrumbs", &self.breadcrumbs)
            .field("backtrace", &self.backtrace.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::alloc::System;

    use forensics_internals::{AttributeStore, BreadcrumbRing, Slot};

    use super::*;

    #[test]
    fn test_display() {
        let mut attributes = AttributeStore::new(&System, 4, 64).unwrap();
        attributes.set("user", Some("x")).unwrap();
        let mut ring = BreadcrumbRing::new(&System, 4, 64).unwrap();
        ring.add("boot", &[("env", "production")]);
        ring.add("boot", &[("env", "production")]);
        let mut slots = [Slot::default(); 4];
        let count = ring.copy_chronological(&mut slots);

        let report = Report {
            kind: ReportKind::Assertion,
            id: "personal-order.rs-validate-bad qty={}",
            location: Location::new("src/order.rs", 12, 5),
            function: "validate",
            expression: "qty > 0",
            format: "bad qty={}",
            message: "bad qty=0",
            fatal: true,
            contexts: &["global", "personal"],
            attributes: Attributes::new(Some(&attributes)),
            breadcrumbs: Breadcrumbs::new(Some(&ring), &slots[..count]),
            backtrace: &[0x10, 0x20],
        };

        assert_eq!(
            report.to_string(),
            "ASSERTION FAILED\n\
             expression: qty > 0\n\
             message: bad qty=0\n\
             context: personal\n\
             file: src/order.rs\n\
             line: 12\n\
             function: validate\n\
             id: personal-order.rs-validate-bad qty={}\n\
             contexts: global personal\n\
             attributes:\n  user = x\n\
             breadcrumbs:\n  boot env=production (x2)\n\
             backtrace:\n  0x10\n  0x20"
        );
    }

    #[test]
    fn test_empty_report() {
        let report = Report {
            kind: ReportKind::Crash,
            id: "<none>-lib.rs-crash-",
            location: Location::new("lib.rs", 1, 1),
            function: "crash",
            expression: "got signal: SIGSEGV",
            format: "",
            message: "",
            fatal: true,
            contexts: &[],
            attributes: Attributes::new(None),
            breadcrumbs: Breadcrumbs::new(None, &[]),
            backtrace: &[],
        };
        assert_eq!(report.responsible_context(), None);
        assert!(report.attributes().is_empty());
        assert_eq!(report.breadcrumbs().len(), 0);
        assert!(report.to_string().starts_with("CRASH\nexpression: got signal: SIGSEGV\ncontext: <none>\n"));
        assert!(report.to_string().ends_with("backtrace:"));
    }

    #[test]
    fn test_location_caller() {
        let location = Location::caller();
        assert!(location.file().ends_with("mod.rs"));
        assert_eq!(location.line(), line!() - 2);
    }
}
