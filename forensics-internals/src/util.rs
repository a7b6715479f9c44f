/// Decodes a span that was written from a `&str`.
///
/// Spans only ever hold bytes copied from string slices at whole-string
/// boundaries, so decoding cannot fail unless the layout invariants are
/// broken. In that case an empty string is returned instead of panicking,
/// because the reader may be a crash path.
#[inline]
pub(crate) fn text(bytes: &[u8]) -> &str {
    core::str::from_utf8(bytes).unwrap_or_default()
}

/// Copies `value` followed by a NUL byte into the start of `dst`.
///
/// Returns the number of bytes written. The caller must have sized `dst` to
/// at least `value.len() + 1`.
#[inline]
pub(crate) fn write_nul_terminated(dst: &mut [u8], value: &str) -> usize {
    let len = value.len();
    dst[..len].copy_from_slice(value.as_bytes());
    dst[len] = 0;
    len + 1
}
