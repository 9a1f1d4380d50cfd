//! Re-split a live content stream around inline reasoning tags such as
//! `<think>…</think>`.
//!
//! Chunks can end in the middle of a tag, so the splitter holds back the
//! shortest possible ambiguous tail: the longest suffix of its buffer that
//! could still grow into a tag. Everything before that suffix is classified
//! immediately.

use thoughtline_core::config::ThinkingConfig;

use crate::error::StreamError;

/// Open and close markers, matched ASCII case-insensitively.
#[derive(Debug, Clone)]
pub struct TagSet {
    open: Vec<String>,
    close: Vec<String>,
    max_tag_len: usize,
}

impl Default for TagSet {
    fn default() -> Self {
        Self {
            open: vec!["<think>".to_string(), "<analysis>".to_string()],
            close: vec!["</think>".to_string(), "</analysis>".to_string()],
            max_tag_len: "</analysis>".len(),
        }
    }
}

impl TagSet {
    pub fn new(open: Vec<String>, close: Vec<String>) -> Result<Self, StreamError> {
        if open.is_empty() || close.is_empty() {
            return Err(StreamError::InvalidTag {
                tag: String::new(),
                reason: "at least one open and one close tag is required".to_string(),
            });
        }
        for tag in open.iter().chain(close.iter()) {
            if tag.is_empty() {
                return Err(StreamError::InvalidTag {
                    tag: tag.clone(),
                    reason: "tag is empty".to_string(),
                });
            }
            if !tag.is_ascii() {
                return Err(StreamError::InvalidTag {
                    tag: tag.clone(),
                    reason: "tag must be ASCII".to_string(),
                });
            }
        }
        let max_tag_len = open
            .iter()
            .chain(close.iter())
            .map(String::len)
            .max()
            .unwrap_or(0);
        Ok(Self {
            open,
            close,
            max_tag_len,
        })
    }

    pub fn from_config(config: &ThinkingConfig) -> Result<Self, StreamError> {
        Self::new(config.open_tags.clone(), config.close_tags.clone())
    }

    pub fn max_tag_len(&self) -> usize {
        self.max_tag_len
    }

    fn all(&self) -> impl Iterator<Item = (&str, bool)> {
        self.open
            .iter()
            .map(|t| (t.as_str(), true))
            .chain(self.close.iter().map(|t| (t.as_str(), false)))
    }

    /// Earliest complete tag in `haystack`. On an index tie the longest tag
    /// wins.
    fn find_earliest(&self, haystack: &str) -> Option<TagMatch> {
        let bytes = haystack.as_bytes();
        let mut best: Option<TagMatch> = None;
        for (tag, open) in self.all() {
            let Some(start) = find_ignore_ascii_case(bytes, tag.as_bytes()) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some(b) => start < b.start || (start == b.start && tag.len() > b.len),
            };
            if better {
                best = Some(TagMatch {
                    start,
                    len: tag.len(),
                    open,
                });
            }
        }
        best
    }

    /// Length of the longest suffix of `haystack` (shorter than any full tag
    /// can be) that is a prefix of some tag.
    fn ambiguous_suffix_len(&self, haystack: &str) -> usize {
        let bytes = haystack.as_bytes();
        let window = self.max_tag_len.saturating_sub(1).min(bytes.len());
        (1..=window)
            .rev()
            .find(|&k| {
                let suffix = &bytes[bytes.len() - k..];
                self.all().any(|(tag, _)| {
                    tag.len() >= k && tag.as_bytes()[..k].eq_ignore_ascii_case(suffix)
                })
            })
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct TagMatch {
    start: usize,
    len: usize,
    open: bool,
}

fn find_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

/// Text classified by one `push` or `flush`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitDelta {
    pub content: String,
    pub thinking: String,
}

impl SplitDelta {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.thinking.is_empty()
    }

    fn emit(&mut self, thinking: bool, text: &str) {
        if thinking {
            self.thinking.push_str(text);
        } else {
            self.content.push_str(text);
        }
    }
}

/// Stateful content/thinking splitter. One per exchange.
#[derive(Debug, Clone, Default)]
pub struct ThoughtChainSplitter {
    tags: TagSet,
    buffer: String,
    in_thinking: bool,
}

impl ThoughtChainSplitter {
    pub fn new(tags: TagSet) -> Self {
        Self {
            tags,
            buffer: String::new(),
            in_thinking: false,
        }
    }

    pub fn is_thinking(&self) -> bool {
        self.in_thinking
    }

    /// Unclassified trailing text held back for the next push.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn push(&mut self, chunk: &str) -> SplitDelta {
        self.buffer.push_str(chunk);
        let mut out = SplitDelta::default();

        while let Some(m) = self.tags.find_earliest(&self.buffer) {
            // Tags are ASCII, so both ends of a match sit on char boundaries.
            let rest = self.buffer.split_off(m.start + m.len);
            let mut head = std::mem::replace(&mut self.buffer, rest);
            head.truncate(m.start);
            out.emit(self.in_thinking, &head);
            self.in_thinking = m.open;
        }

        let keep = self.tags.ambiguous_suffix_len(&self.buffer);
        let tail = self.buffer.split_off(self.buffer.len() - keep);
        let head = std::mem::replace(&mut self.buffer, tail);
        out.emit(self.in_thinking, &head);
        out
    }

    /// Release whatever is buffered as literal text and return to content mode.
    pub fn flush(&mut self) -> SplitDelta {
        let mut out = SplitDelta::default();
        let rest = std::mem::take(&mut self.buffer);
        out.emit(self.in_thinking, &rest);
        self.in_thinking = false;
        out
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.in_thinking = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> SplitDelta {
        let mut splitter = ThoughtChainSplitter::default();
        let mut total = SplitDelta::default();
        for chunk in chunks {
            let d = splitter.push(chunk);
            total.content.push_str(&d.content);
            total.thinking.push_str(&d.thinking);
        }
        let d = splitter.flush();
        total.content.push_str(&d.content);
        total.thinking.push_str(&d.thinking);
        total
    }

    #[test]
    fn tag_split_across_three_pushes() {
        let out = run(&["Hello <thi", "nk>reasoning", "</think> world"]);
        assert_eq!(out.content, "Hello  world");
        assert_eq!(out.thinking, "reasoning");
    }

    #[test]
    fn split_points_do_not_change_output() {
        let input = "pre <THINK>step → one</think> mid <analysis>deep</Analysis> post <th";
        let whole = run(&[input]);
        assert_eq!(whole.content, "pre  mid  post <th");
        assert_eq!(whole.thinking, "step → onedeep");

        let boundaries: Vec<usize> = input.char_indices().map(|(i, _)| i).skip(1).collect();
        for &a in &boundaries {
            assert_eq!(run(&[&input[..a], &input[a..]]), whole, "split at {a}");
            for &b in boundaries.iter().filter(|&&b| b > a).step_by(7) {
                let three = run(&[&input[..a], &input[a..b], &input[b..]]);
                assert_eq!(three, whole, "split at {a},{b}");
            }
        }
    }

    /// Rebuild the original text from the splitter's output: each push's
    /// emitted text, plus the tag consumed wherever the mode flipped. Chunks
    /// are at most 7 bytes, so a push can complete at most one tag.
    fn rebuild(input: &str, chunks: &[&str]) -> String {
        let tags = TagSet::default();
        let mut splitter = ThoughtChainSplitter::default();
        let mut rebuilt = String::new();

        for chunk in chunks {
            let was_thinking = splitter.is_thinking();
            let d = splitter.push(chunk);
            let (before, after) = if was_thinking {
                (&d.thinking, &d.content)
            } else {
                (&d.content, &d.thinking)
            };
            rebuilt.push_str(before);
            if splitter.is_thinking() != was_thinking {
                let rest = input[rebuilt.len()..].to_ascii_lowercase();
                let tag_len = tags
                    .all()
                    .filter(|(tag, _)| rest.starts_with(&tag.to_ascii_lowercase()))
                    .map(|(tag, _)| tag.len())
                    .max()
                    .expect("mode flipped without a tag at this position");
                rebuilt.push_str(&input[rebuilt.len()..rebuilt.len() + tag_len]);
                rebuilt.push_str(after);
            } else {
                assert!(after.is_empty(), "text in both buckets without a tag");
            }
            assert!(input.starts_with(&rebuilt), "out of order: {rebuilt:?}");
        }

        let d = splitter.flush();
        rebuilt.push_str(&d.content);
        rebuilt.push_str(&d.thinking);
        rebuilt
    }

    #[test]
    fn output_and_tags_rebuild_the_input() {
        let input = "a < b<think>x<y </thin</THINK>c<<analysis>d</think e</Analysis>f <th";
        for size in 1..=7 {
            for offset in 0..size {
                let mut chunks = vec![&input[..offset]];
                let mut at = offset;
                while at < input.len() {
                    let end = (at + size).min(input.len());
                    chunks.push(&input[at..end]);
                    at = end;
                }
                assert_eq!(rebuild(input, &chunks), input, "size {size} offset {offset}");
            }
        }
    }

    #[test]
    fn nothing_lost_but_tags() {
        let out = run(&["a<think>b</think>c<analysis>d</analysis>e"]);
        assert_eq!(out.content, "ace");
        assert_eq!(out.thinking, "bd");
    }

    #[test]
    fn several_tags_resolve_in_one_push() {
        let mut splitter = ThoughtChainSplitter::default();
        let d = splitter.push("x<think>y</think>z<think>w");
        assert_eq!(d.content, "xz");
        assert_eq!(d.thinking, "yw");
        assert!(splitter.is_thinking());
    }

    #[test]
    fn tags_are_case_insensitive() {
        let out = run(&["<ThInK>hidden</THINK>shown"]);
        assert_eq!(out.content, "shown");
        assert_eq!(out.thinking, "hidden");
    }

    #[test]
    fn ambiguous_tail_is_held_back() {
        let mut splitter = ThoughtChainSplitter::default();
        let d = splitter.push("answer <");
        assert_eq!(d.content, "answer ");
        assert_eq!(splitter.pending(), "<");

        let d = splitter.push("b>");
        assert_eq!(d.content, "<b>");
        assert_eq!(splitter.pending(), "");
    }

    #[test]
    fn flush_releases_partial_tag_as_text() {
        let mut splitter = ThoughtChainSplitter::default();
        splitter.push("<think>still thinking </thi");
        let d = splitter.flush();
        assert_eq!(d.thinking, "</thi");
        assert!(!splitter.is_thinking());
        assert_eq!(splitter.pending(), "");
    }

    #[test]
    fn buffer_stays_shorter_than_longest_tag() {
        let mut splitter = ThoughtChainSplitter::default();
        let max = splitter.tags.max_tag_len();
        for chunk in ["<", "/", "a", "n", "a", "l", "y", "s", "i", "s", "<<<<", "</analysis"] {
            splitter.push(chunk);
            assert!(splitter.pending().len() < max);
        }
    }

    #[test]
    fn reset_returns_to_content_mode() {
        let mut splitter = ThoughtChainSplitter::default();
        splitter.push("<think>abc<");
        splitter.reset();
        assert!(!splitter.is_thinking());
        assert_eq!(splitter.push("plain").content, "plain");
    }

    #[test]
    fn longest_tag_wins_on_index_tie() {
        let tags = TagSet::new(
            vec!["<t>".to_string(), "<t>>".to_string()],
            vec!["</t>".to_string()],
        )
        .unwrap();
        let mut splitter = ThoughtChainSplitter::new(tags);
        let d = splitter.push("a<t>>b</t>c");
        assert_eq!(d.content, "ac");
        assert_eq!(d.thinking, "b");
    }

    #[test]
    fn invalid_tag_sets_are_rejected() {
        assert!(TagSet::new(vec![], vec!["</x>".to_string()]).is_err());
        assert!(TagSet::new(vec!["".to_string()], vec!["</x>".to_string()]).is_err());
        assert!(TagSet::new(vec!["<дум>".to_string()], vec!["</x>".to_string()]).is_err());
    }

    #[test]
    fn custom_tags_from_config() {
        let config = ThinkingConfig {
            open_tags: vec!["[[r]]".to_string()],
            close_tags: vec!["[[/r]]".to_string()],
        };
        let mut splitter = ThoughtChainSplitter::new(TagSet::from_config(&config).unwrap());
        let d = splitter.push("x[[R]]y[[/r]]z<think>");
        let rest = splitter.flush();
        assert_eq!(d.content + &rest.content, "xz<think>");
        assert_eq!(d.thinking, "y");
    }
}
