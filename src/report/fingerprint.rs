use core::fmt;

/// Context name used in fingerprints when no context is active.
pub const NO_CONTEXT: &str = "<none>";

/// Strips everything up to the last `/` or `\`, whatever the host platform.
pub(crate) fn basename(path: &str) -> &str {
    path.rfind(['/', '\\']).map_or(path, |index| &path[index + 1..])
}

pub(crate) fn write_fingerprint(
    out: &mut impl fmt::Write,
    context: Option<&str>,
    file: &str,
    function: &str,
    format: &str,
) -> fmt::Result {
    write!(
        out,
        "{}-{}-{}-{}",
        context.unwrap_or(NO_CONTEXT),
        basename(file),
        function,
        format
    )
}

/// Computes the report id a failure with these properties receives.
///
/// The id depends only on the innermost context, the file name (without
/// its directory), the function name and the raw format string. Message
/// arguments never take part, so repeated failures at one call site share
/// an id.
///
/// ```
/// assert_eq!(
///     forensics::report::fingerprint(Some("checkout"), "src/order.rs", "validate", "bad qty={}"),
///     "checkout-order.rs-validate-bad qty={}",
/// );
/// assert_eq!(forensics::report::fingerprint(None, "a.rs", "f", ""), "<none>-a.rs-f-");
/// ```
pub fn fingerprint(context: Option<&str>, file: &str, function: &str, format: &str) -> String {
    let mut id = String::new();
    // Writing into a `String` cannot fail.
    let _ = write_fingerprint(&mut id, context, file, function, format);
    id
}
