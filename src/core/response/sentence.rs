//! Incremental sentence chunking for model output.
//!
//! Model text arrives in arbitrary chunks; synthesis wants whole sentences.
//! The splitter buffers chunks and yields completed sentences as soon as a
//! terminator is followed by whitespace, so time-to-first-audio tracks the
//! first sentence, not the full reply.

/// Streaming sentence splitter.
pub struct SentenceSplitter {
    buffer: String,
    /// Sentences shorter than this are merged with the next one to avoid
    /// synthesizing one-word fragments like "Okay."
    min_chars: usize,
}

impl SentenceSplitter {
    pub fn new(min_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            min_chars,
        }
    }

    /// Feed one chunk; returns any sentences completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();

        let mut from = 0;
        while let Some(end) = self.find_boundary(from) {
            let candidate = self.buffer[..end].trim();
            if candidate.len() < self.min_chars {
                // Too short to synthesize alone; extend to the next boundary
                // so it merges with the following sentence.
                from = end;
                continue;
            }
            let sentence = candidate.to_string();
            self.buffer.drain(..end);
            self.buffer = self.buffer.trim_start().to_string();
            out.push(sentence);
            from = 0;
        }
        out
    }

    /// Return whatever remains once the stream ends.
    pub fn flush(&mut self) -> Option<String> {
        let rest = self.buffer.trim().to_string();
        self.buffer.clear();
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Byte index just past the first sentence terminator at or after `from`
    /// that is followed by whitespace (terminator at the very end counts as
    /// incomplete; the next chunk may continue it).
    fn find_boundary(&self, from: usize) -> Option<usize> {
        let bytes = self.buffer.as_bytes();
        for i in from..bytes.len() {
            let b = bytes[i];
            if matches!(b, b'.' | b'!' | b'?') {
                match bytes.get(i + 1) {
                    Some(&next) if next.is_ascii_whitespace() => {
                        // "3.14" and "p. 12" style decimals: digit on both
                        // sides of a period is not a boundary.
                        if b == b'.'
                            && i > 0
                            && bytes[i - 1].is_ascii_digit()
                            && bytes.get(i + 2).is_some_and(|c| c.is_ascii_digit())
                        {
                            continue;
                        }
                        return Some(i + 1);
                    }
                    _ => continue,
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter() -> SentenceSplitter {
        SentenceSplitter::new(4)
    }

    #[test]
    fn yields_sentence_as_soon_as_complete() {
        let mut s = splitter();
        assert!(s.push("Seven times eight").is_empty());
        let got = s.push(" is fifty-six. Now try");
        assert_eq!(got, vec!["Seven times eight is fifty-six.".to_string()]);
        assert_eq!(s.flush(), Some("Now try".to_string()));
    }

    #[test]
    fn multiple_sentences_in_one_chunk() {
        let mut s = splitter();
        let got = s.push("Good work! Let's keep going. What is");
        assert_eq!(
            got,
            vec!["Good work!".to_string(), "Let's keep going.".to_string()]
        );
    }

    #[test]
    fn decimals_do_not_split() {
        let mut s = splitter();
        let got = s.push("Pi is about 3. 14159 rounded. Next topic ");
        // The "3. 14159" period sits between digits and is kept whole.
        assert_eq!(got, vec!["Pi is about 3. 14159 rounded.".to_string()]);
    }

    #[test]
    fn tiny_sentences_merge_forward() {
        let mut s = SentenceSplitter::new(8);
        let got = s.push("Ok. Let us move on to fractions. ");
        assert_eq!(got, vec!["Ok. Let us move on to fractions.".to_string()]);
    }

    #[test]
    fn flush_empty_is_none() {
        let mut s = splitter();
        s.push("Complete sentence. ");
        assert_eq!(s.flush(), None);
    }

    #[test]
    fn terminator_at_chunk_end_waits_for_whitespace() {
        let mut s = splitter();
        // No trailing whitespace yet; could be "3.14" continuing.
        assert!(s.push("That is correct.").is_empty());
        let got = s.push(" Nice work. ");
        assert_eq!(
            got,
            vec!["That is correct.".to_string(), "Nice work.".to_string()]
        );
    }
}
