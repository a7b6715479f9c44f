use core::fmt;

/// A `fmt::Write` sink over a fixed byte buffer.
///
/// Output past the end of the buffer is cut at the last whole character and
/// then ignored; writing never fails.
pub(crate) struct FixedString<'a> {
    buf: &'a mut [u8],
    len: usize,
    truncated: bool,
}

impl<'a> FixedString<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            truncated: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub(crate) fn into_str(self) -> &'a str {
        let Self { buf, len, .. } = self;
        let buf: &'a [u8] = buf;
        core::str::from_utf8(&buf[..len]).unwrap_or_default()
    }
}

impl fmt::Write for FixedString<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.truncated {
            return Ok(());
        }
        let available = self.buf.len() - self.len;
        let take = if s.len() <= available {
            s.len()
        } else {
            self.truncated = true;
            let mut boundary = available;
            while !s.is_char_boundary(boundary) {
                boundary -= 1;
            }
            boundary
        };
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}
