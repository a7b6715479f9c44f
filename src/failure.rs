use core::fmt;

use crate::report::{Location, ReportKind};

#[derive(Copy, Clone, Debug)]
pub(crate) enum Message<'a> {
    Empty,
    Text(&'a str),
    Formatted(fmt::Arguments<'a>),
}

/// Describes a failure to report.
///
/// This is what [`check!`](crate::check) and [`verify!`](crate::verify)
/// build under the hood. The location is taken from the caller of
/// [`Failure::new`].
///
/// ```
/// use forensics::{Config, Engine, Failure};
///
/// let engine = Engine::new(Config {
///     fatal_should_halt: false,
///     ..Config::default()
/// })
/// .unwrap();
/// let qty = 0;
/// engine.report_failure(
///     Failure::new("qty > 0")
///         .function("validate")
///         .message("bad qty={}", format_args!("bad qty={}", qty))
///         .fatal(false),
/// );
/// ```
#[derive(Copy, Clone, Debug)]
#[must_use = "a failure does nothing until it is reported"]
pub struct Failure<'a> {
    pub(crate) kind: ReportKind,
    pub(crate) location: Location<'a>,
    pub(crate) function: &'a str,
    pub(crate) expression: &'a str,
    pub(crate) format: &'a str,
    pub(crate) message: Message<'a>,
    pub(crate) fatal: bool,
}

impl<'a> Failure<'a> {
    /// A fatal assertion failure of `expression`, located at the caller.
    #[track_caller]
    pub fn new(expression: &'a str) -> Self {
        Self {
            kind: ReportKind::Assertion,
            location: Location::caller(),
            function: "",
            expression,
            format: "",
            message: Message::Empty,
            fatal: true,
        }
    }

    /// Sets the enclosing function name.
    pub fn function(mut self, function: &'a str) -> Self {
        self.function = function;
        self
    }

    /// Sets the message. `format` is the raw format string, which takes
    /// part in the fingerprint; `args` is only formatted into the report.
    pub fn message(mut self, format: &'a str, args: fmt::Arguments<'a>) -> Self {
        self.format = format;
        self.message = Message::Formatted(args);
        self
    }

    /// Sets a message without arguments. It is also used as the format
    /// string.
    pub fn text(mut self, text: &'a str) -> Self {
        self.format = text;
        self.message = Message::Text(text);
        self
    }

    /// Sets whether the failure is fatal. Failures are fatal by default.
    pub fn fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    /// Overrides the location.
    pub fn at(mut self, location: Location<'a>) -> Self {
        self.location = location;
        self
    }

    pub(crate) fn kind(mut self, kind: ReportKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn write_message(&self, out: &mut impl fmt::Write) {
        // The sink never fails; a failing `Display` impl just ends the
        // message early.
        let _ = match self.message {
            Message::Empty => Ok(()),
            Message::Text(text) => out.write_str(text),
            Message::Formatted(args) => out.write_fmt(args),
        };
    }
}
