/// Incremental line splitter for the device's newline-delimited stream.
///
/// Bytes arrive in arbitrary chunks, so a multi-byte UTF-8 character or a line
/// can be split across reads. Undecodable tails are held back until the next
/// chunk completes them; the unfinished last line is carried over.
#[derive(Debug, Default)]
pub struct LineAccumulator {
    pending: Vec<u8>,
    partial: String,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line completed by it, without line endings.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        self.decode_pending();

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }

    /// Text received after the last newline.
    pub fn partial(&self) -> &str {
        &self.partial
    }

    fn decode_pending(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.partial.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // valid_up_to guarantees this prefix decodes
                    self.partial
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end, wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                        Some(bad) => {
                            self.partial.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }
}

/// True when any of `lines` contains `terminator`.
pub fn contains_terminator(lines: &[String], terminator: Option<&str>) -> bool {
    match terminator {
        Some(t) => lines.iter().any(|line| line.contains(t)),
        None => false,
    }
}
