/// Splits a byte stream into newline-delimited records.
///
/// Network chunks do not respect line boundaries, so partial lines are held
/// back until their terminating `\n` arrives. Lines are handed out as raw
/// bytes; decoding (and rejecting invalid UTF-8) is left to the JSON parser.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    pending: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `bytes` and returns every line completed by them, without the
    /// line terminator. Blank lines are dropped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(line) = trim_line(&self.pending[start..end]) {
                lines.push(line.to_vec());
            }
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Returns the unterminated remainder, if any, once the stream has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.pending);
        trim_line(&rest).map(<[u8]>::to_vec)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.iter().any(|b| !b.is_ascii_whitespace())
    }
}

fn trim_line(raw: &[u8]) -> Option<&[u8]> {
    let start = raw.iter().position(|b| !b.is_ascii_whitespace())?;
    let end = raw.iter().rposition(|b| !b.is_ascii_whitespace())?;
    Some(&raw[start..=end])
}
