use std::borrow::Cow;

/// Incremental UTF-8 decoder for chunked response bodies.
///
/// A multi-byte sequence split across two reads is held back until the rest
/// of it arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let joined: Cow<'_, [u8]> = if self.pending.is_empty() {
            Cow::Borrowed(chunk)
        } else {
            let mut bytes = std::mem::take(&mut self.pending);
            bytes.extend_from_slice(chunk);
            Cow::Owned(bytes)
        };

        let mut decoded = String::with_capacity(joined.len());
        let mut rest: &[u8] = &joined;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, remainder) = rest.split_at(err.valid_up_to());
                    decoded.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(invalid_len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            rest = remainder.get(invalid_len..).unwrap_or_default();
                        }
                        None => {
                            // Incomplete trailing sequence; wait for the next chunk.
                            self.pending = remainder.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        decoded
    }

    /// Flush bytes still held back when the body ends.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
