use crate::constants::{THINK_BLOCK_CLOSE, THINK_BLOCK_OPEN, THINK_CLOSE_TAG, THINK_OPEN_TAG};

/// Streaming rewrite of `<think>`...`</think>` spans into a collapsible
/// display block. Fragments may split a marker at any byte; a trailing piece
/// that could still complete the marker currently being sought is carried
/// over to the next push instead of being emitted. Everything else passes
/// through byte for byte, with each full marker replaced by its decoration.
pub struct ThinkSplitter {
    pending: String,
    in_think: bool,
}

impl Default for ThinkSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkSplitter {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            in_think: false,
        }
    }

    /// Feeds one fragment and returns whatever is now safe to display.
    pub fn push(&mut self, fragment: &str) -> String {
        self.pending.push_str(fragment);
        let mut out = String::new();

        loop {
            let marker = if self.in_think {
                THINK_CLOSE_TAG
            } else {
                THINK_OPEN_TAG
            };

            if let Some(pos) = self.pending.find(marker) {
                let tail = self.pending.split_off(pos + marker.len());
                out.push_str(&self.pending[..pos]);
                out.push_str(if self.in_think {
                    THINK_BLOCK_CLOSE
                } else {
                    THINK_BLOCK_OPEN
                });
                self.pending = tail;
                self.in_think = !self.in_think;
                tracing::debug!(
                    target: "think_split",
                    "{} reasoning block",
                    if self.in_think { "entering" } else { "leaving" }
                );
                continue;
            }

            // No full marker. Keep the longest tail that is still a prefix of
            // the marker we are looking for; it may complete on the next push.
            let keep = longest_suffix_prefix(&self.pending, marker);
            let tail = self.pending.split_off(self.pending.len() - keep);
            out.push_str(&self.pending);
            self.pending = tail;
            break;
        }

        out
    }

    /// Drains whatever is still buffered once the stream is over. A block
    /// left open gets no synthetic closing decoration; the text simply ends.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    pub fn inside_block(&self) -> bool {
        self.in_think
    }
}

fn longest_suffix_prefix(haystack: &str, needle: &str) -> usize {
    let max = needle.len().min(haystack.len());
    for len in (1..=max).rev() {
        if haystack.ends_with(&needle[..len]) {
            return len;
        }
    }
    0
}
