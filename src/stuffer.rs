//! POP3 multi-line byte-stuffing
//!
//! Rewrites an arbitrary octet stream into POP3 multi-line wire form:
//! line endings are normalized to CRLF and any line that begins with
//! `.` gets an extra `.` prepended. The terminating `.CRLF` sentinel
//! is the response writer's job, not the stuffer's.

/// Incremental byte-stuffing transducer.
///
/// Feed input in arbitrary chunks with [`Stuffer::push`]; the output
/// is a pure function of the concatenated input. A line is a maximal
/// run ending at an LF (or at end of input, in which case the partial
/// line is emitted as-is). A bare CR not followed by LF passes
/// through verbatim and does not end the line.
///
/// # Examples
///
/// ```
/// use popd::Stuffer;
///
/// let mut out = Vec::new();
/// let mut stuffer = Stuffer::new();
/// stuffer.push(b".hello\nworld\n", &mut out);
/// assert_eq!(out, b"..hello\r\nworld\r\n");
/// ```
#[derive(Debug)]
pub struct Stuffer {
    last: u8,
}

impl Stuffer {
    #[must_use]
    pub const fn new() -> Self {
        // The stream notionally starts just after a newline, so the
        // first byte is a line start.
        Self { last: b'\n' }
    }

    /// Transduce one chunk of input, appending wire bytes to `out`.
    pub fn push(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            if self.last == b'\n' && byte == b'.' {
                out.push(b'.');
            }
            if byte == b'\n' && self.last != b'\r' {
                out.push(b'\r');
            }
            out.push(byte);
            self.last = byte;
        }
    }
}

impl Default for Stuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Stuff a complete buffer in one call.
#[must_use]
pub fn stuff(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + input.len() / 8);
    Stuffer::new().push(input, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inverse of [`stuff`] for LF-terminated inputs: CRLF becomes
    /// LF and one leading `.` is stripped from lines starting `..`.
    fn unstuff(input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        let mut line_start = true;
        let mut i = 0;
        while i < input.len() {
            let byte = input[i];
            if byte == b'\r' && input.get(i + 1) == Some(&b'\n') {
                out.push(b'\n');
                line_start = true;
                i += 2;
                continue;
            }
            if line_start && byte == b'.' && input.get(i + 1) == Some(&b'.') {
                i += 1; // drop the stuffed dot
            }
            out.push(input[i]);
            line_start = input[i] == b'\n';
            i += 1;
        }
        out
    }

    #[test]
    fn dot_stuffing() {
        assert_eq!(stuff(b".hello\nworld\n"), b"..hello\r\nworld\r\n");
    }

    #[test]
    fn crlf_left_alone() {
        assert_eq!(stuff(b"a\r\nb\r\n"), b"a\r\nb\r\n");
    }

    #[test]
    fn bare_lf_normalized() {
        assert_eq!(stuff(b"a\nb\n"), b"a\r\nb\r\n");
    }

    #[test]
    fn bare_cr_passes_through() {
        assert_eq!(stuff(b"a\rb\n"), b"a\rb\r\n");
    }

    #[test]
    fn dot_after_bare_cr_is_not_line_start() {
        assert_eq!(stuff(b"a\r.b\n"), b"a\r.b\r\n");
    }

    #[test]
    fn trailing_partial_line_kept() {
        assert_eq!(stuff(b"no newline"), b"no newline");
        assert_eq!(stuff(b".partial"), b"..partial");
    }

    #[test]
    fn lone_dot_line() {
        assert_eq!(stuff(b".\n"), b"..\r\n");
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let input = b".one\n.two\r\nth\rree\n.";
        let whole = stuff(input);
        for split in 0..input.len() {
            let mut out = Vec::new();
            let mut stuffer = Stuffer::new();
            stuffer.push(&input[..split], &mut out);
            stuffer.push(&input[split..], &mut out);
            assert_eq!(out, whole, "split at {split}");
        }
    }

    #[test]
    fn round_trip_lf_inputs() {
        let cases: &[&[u8]] = &[
            b"",
            b"hello\n",
            b".hello\nworld\n",
            b".\n..\n...\n",
            b"mixed\n.dot\nplain",
            b"bare\rcr\n",
        ];
        for &case in cases {
            assert_eq!(
                unstuff(&stuff(case)),
                case,
                "round trip failed for {case:?}"
            );
        }
    }

    #[test]
    fn normalization_idempotent_without_dot_lines() {
        let cases: &[&[u8]] = &[b"a\nb\n", b"x\r\ny\n", b"line\rmid\n"];
        for &case in cases {
            let once = stuff(case);
            assert_eq!(stuff(&once), once);
        }
    }
}
