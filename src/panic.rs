//! Forwarding panics to the process-wide engine.

use std::panic::PanicHookInfo;

use crate::{
    failure::Failure,
    global,
    report::{Location, ReportKind},
};

/// Installs a panic hook that reports every panic as a fatal
/// [`ReportKind::Panic`] report.
///
/// The previously installed hook runs first, so the usual panic message is
/// still printed. The report is located at the panic and carries the panic
/// payload as its message. A payload that is a string literal is also used
/// as the format string, so panics with a fixed message share an id.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        report_panic(info);
    }));
}

fn report_panic(info: &PanicHookInfo<'_>) {
    let payload = info.payload();
    let (format, message) = if let Some(&message) = payload.downcast_ref::<&'static str>() {
        (message, message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        ("", message.as_str())
    } else {
        ("", "Box<dyn Any>")
    };

    let mut failure = Failure::new("panic!")
        .kind(ReportKind::Panic)
        .function("panic");
    if let Some(location) = info.location() {
        failure = failure.at(Location::from_std(location));
    }
    // The arguments borrow a temporary, so they are added in the same
    // statement that reports.
    global::report_failure(failure.message(format, format_args!("{message}")));
}
