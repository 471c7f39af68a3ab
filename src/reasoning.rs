// Separates reasoning blocks from answer text

use std::sync::LazyLock;

use regex::Regex;

use crate::session::Channel;

const TAGS: [(&str, &str); 2] = [("<think>", "</think>"), ("<reasoning>", "</reasoning>")];

static LEADING_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*(?:<think>(.*?)</think>|<reasoning>(.*?)</reasoning>)(.*)$")
        .expect("reasoning pattern is valid")
});

/// Splits a complete response into its leading reasoning block (if any) and
/// the answer that follows it. Both parts are trimmed.
pub fn split_reasoning(text: &str) -> (Option<String>, String) {
    match LEADING_BLOCK.captures(text) {
        Some(caps) => {
            let thinking = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().trim().to_string());
            let answer = caps.get(3).map_or("", |m| m.as_str()).trim().to_string();
            (thinking, answer)
        }
        None => (None, text.trim().to_string()),
    }
}

/// Incremental version of [`split_reasoning`] for streamed text.
///
/// Tags may arrive split over several chunks, so a trailing fragment that
/// could still become a tag is held back until the next push.
#[derive(Debug, Default)]
pub struct ThinkSplitter {
    pending: String,
    closing: Option<&'static str>,
}

impl ThinkSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_reasoning(&self) -> bool {
        self.closing.is_some()
    }

    pub fn push(&mut self, text: &str) -> Vec<(Channel, String)> {
        self.pending.push_str(text);
        let mut out = Vec::new();

        loop {
            match self.closing {
                Some(closing) => {
                    if let Some(pos) = self.pending.find(closing) {
                        self.take(pos, closing.len(), Channel::Reasoning, &mut out);
                        self.closing = None;
                        continue;
                    }
                    let keep = partial_tag_len(&self.pending, closing);
                    self.take(self.pending.len() - keep, 0, Channel::Reasoning, &mut out);
                    break;
                }
                None => {
                    let opening = TAGS
                        .iter()
                        .filter_map(|(open, close)| {
                            self.pending.find(open).map(|pos| (pos, *open, *close))
                        })
                        .min_by_key(|(pos, _, _)| *pos);

                    if let Some((pos, open, close)) = opening {
                        self.take(pos, open.len(), Channel::Response, &mut out);
                        self.closing = Some(close);
                        continue;
                    }
                    let keep = TAGS
                        .iter()
                        .map(|(open, _)| partial_tag_len(&self.pending, open))
                        .max()
                        .unwrap_or(0);
                    self.take(self.pending.len() - keep, 0, Channel::Response, &mut out);
                    break;
                }
            }
        }

        out
    }

    /// Flushes whatever is still held back, tag fragments included.
    pub fn finish(&mut self) -> Option<(Channel, String)> {
        if self.pending.is_empty() {
            return None;
        }

        let channel = if self.is_reasoning() {
            Channel::Reasoning
        } else {
            Channel::Response
        };
        Some((channel, std::mem::take(&mut self.pending)))
    }

    // Emits pending[..len] on `channel` and drops it plus `skip` tag bytes.
    fn take(&mut self, len: usize, skip: usize, channel: Channel, out: &mut Vec<(Channel, String)>) {
        let rest = self.pending.split_off(len + skip);
        self.pending.truncate(len);
        let text = std::mem::replace(&mut self.pending, rest);
        if !text.is_empty() {
            out.push((channel, text));
        }
    }
}

// Longest proper prefix of `tag` that `text` ends with.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}
