use memchr::{memchr, memrchr};

use super::answer::{extract_answer, strip_markup, MAX_MARKUP_TAG_LEN};

// Streaming answer filter.
//
// A small state machine fed with text deltas from the upstream model. It
// hides `<think>` reasoning, forwards the visible text of the `<answer>` span
// as it arrives, and remembers everything it saw so a fallback answer can be
// produced when the model never opened an answer span.
//
// Invariants:
// - Text is forwarded only in `InAnswer`, never inside a think span.
// - After `</answer>` nothing more is forwarded.
// - `buffer` holds only an undecided tail that may still become a tag.
// - The concatenation of forwarded fragments does not depend on how the
//   upstream text was split into deltas.

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const ANSWER_OPEN: &str = "<answer>";
const ANSWER_CLOSE: &str = "</answer>";

/// Where a think span returns to once its outermost `</think>` arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    Outside,
    Answer,
}

/// State of the answer filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    /// Before `<answer>`; text is discarded.
    Outside,
    /// Inside one or more nested `<think>` spans.
    InThink { depth: usize, resume: Resume },
    /// Inside `<answer>`; visible text is forwarded.
    InAnswer,
    /// `</answer>` was seen; the rest of the response is ignored.
    Closed,
}

/// Result of [`AnswerFilter::finish`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Answer text that was still held back waiting for a tag to resolve.
    pub tail: Option<String>,
    /// Answer recovered from the full reply when nothing was forwarded.
    pub fallback: Option<String>,
}

/// Per-request streaming filter over the model's text deltas.
#[derive(Debug)]
pub struct AnswerFilter {
    state: FilterState,
    buffer: String,
    full_text: String,
    answer_text: String,
}

/// Outcome of scanning the buffer in one state.
enum Step {
    /// Transition consumed input up to this offset; keep scanning.
    Advance(usize),
    /// Nothing more can be decided; keep the buffer from this offset.
    Hold(usize),
}

#[inline]
fn is_partial_tag(rest: &str, tags: &[&str]) -> bool {
    tags.iter()
        .any(|tag| rest.len() < tag.len() && tag.starts_with(rest))
}

/// Offset from which answer text must be held back, if any.
///
/// The last `<` is kept while it can still grow into a markup tag: no `>`
/// follows it and it is short enough to match once the `>` arrives.
fn answer_hold_point(text: &str) -> Option<usize> {
    let lt = memrchr(b'<', text.as_bytes())?;
    let tail = &text[lt..];
    if memchr(b'>', tail.as_bytes()).is_some() {
        return None;
    }
    (tail.chars().count() < MAX_MARKUP_TAG_LEN).then_some(lt)
}

impl AnswerFilter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: FilterState::Outside,
            buffer: String::new(),
            full_text: String::new(),
            answer_text: String::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> FilterState {
        self.state
    }

    /// Every delta received so far.
    #[must_use]
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Every fragment forwarded so far.
    #[must_use]
    pub fn answer_text(&self) -> &str {
        &self.answer_text
    }

    // -- public API ---------------------------------------------------------

    /// Feed a text delta and return the answer text that became visible.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        if delta.is_empty() {
            return None;
        }
        self.full_text.push_str(delta);
        if self.state == FilterState::Closed {
            return None;
        }
        self.buffer.push_str(delta);

        let mut visible = String::new();
        let mut pos = 0;
        loop {
            let step = match self.state {
                FilterState::Outside => self.scan_outside(pos),
                FilterState::InThink { depth, resume } => self.scan_think(pos, depth, resume),
                FilterState::InAnswer => self.scan_answer(pos, &mut visible),
                FilterState::Closed => Step::Hold(self.buffer.len()),
            };
            match step {
                Step::Advance(next) => pos = next,
                Step::Hold(keep_from) => {
                    self.buffer.drain(..keep_from);
                    break;
                }
            }
        }
        if self.state == FilterState::Closed {
            self.buffer.clear();
        }
        self.emit(visible)
    }

    /// Call when the upstream ends.
    ///
    /// Flushes held answer text, then decides whether a fallback answer is
    /// needed: when nothing was forwarded and the model produced any text at
    /// all, the fallback is the reply with reasoning removed.
    pub fn finish(&mut self) -> FilterOutcome {
        let held = std::mem::take(&mut self.buffer);
        // a lone `<` is prose; a longer structural prefix is an unfinished tag
        let unfinished_tag = held.len() > 1 && is_partial_tag(&held, &[ANSWER_CLOSE, THINK_OPEN]);
        let tail = if self.state == FilterState::InAnswer && !unfinished_tag {
            self.emit(strip_markup(&held))
        } else {
            None
        };
        self.state = FilterState::Closed;

        let fallback = (self.answer_text.is_empty() && !self.full_text.is_empty())
            .then(|| extract_answer(&self.full_text));
        FilterOutcome { tail, fallback }
    }

    // -- transitions --------------------------------------------------------

    fn scan_outside(&mut self, pos: usize) -> Step {
        let tags = [THINK_OPEN, ANSWER_OPEN];
        let mut i = pos;
        while let Some(rel) = memchr(b'<', &self.buffer.as_bytes()[i..]) {
            i += rel;
            let rest = &self.buffer[i..];
            if rest.starts_with(THINK_OPEN) {
                return self.enter_think(i + THINK_OPEN.len(), Resume::Outside);
            }
            if rest.starts_with(ANSWER_OPEN) {
                return self.enter_answer(i + ANSWER_OPEN.len());
            }
            if is_partial_tag(rest, &tags) {
                return Step::Hold(i);
            }
            i += 1;
        }
        Step::Hold(self.buffer.len())
    }

    fn scan_think(&mut self, pos: usize, depth: usize, resume: Resume) -> Step {
        let tags = [THINK_OPEN, THINK_CLOSE];
        let mut i = pos;
        while let Some(rel) = memchr(b'<', &self.buffer.as_bytes()[i..]) {
            i += rel;
            let rest = &self.buffer[i..];
            if rest.starts_with(THINK_OPEN) {
                self.state = FilterState::InThink {
                    depth: depth + 1,
                    resume,
                };
                return Step::Advance(i + THINK_OPEN.len());
            }
            if rest.starts_with(THINK_CLOSE) {
                return self.leave_think(i + THINK_CLOSE.len(), depth, resume);
            }
            if is_partial_tag(rest, &tags) {
                return Step::Hold(i);
            }
            i += 1;
        }
        Step::Hold(self.buffer.len())
    }

    fn scan_answer(&mut self, pos: usize, visible: &mut String) -> Step {
        let mut i = pos;
        while let Some(rel) = memchr(b'<', &self.buffer.as_bytes()[i..]) {
            i += rel;
            let rest = &self.buffer[i..];
            if rest.starts_with(ANSWER_CLOSE) {
                visible.push_str(&strip_markup(&self.buffer[pos..i]));
                return self.close_answer(i + ANSWER_CLOSE.len());
            }
            if rest.starts_with(THINK_OPEN) {
                visible.push_str(&strip_markup(&self.buffer[pos..i]));
                return self.enter_think(i + THINK_OPEN.len(), Resume::Answer);
            }
            i += 1;
        }

        let pending = &self.buffer[pos..];
        let keep_from = answer_hold_point(pending).map_or(self.buffer.len(), |hold| pos + hold);
        visible.push_str(&strip_markup(&self.buffer[pos..keep_from]));
        Step::Hold(keep_from)
    }

    fn enter_think(&mut self, next: usize, resume: Resume) -> Step {
        self.state = FilterState::InThink { depth: 1, resume };
        Step::Advance(next)
    }

    fn leave_think(&mut self, next: usize, depth: usize, resume: Resume) -> Step {
        self.state = if depth > 1 {
            FilterState::InThink {
                depth: depth - 1,
                resume,
            }
        } else {
            match resume {
                Resume::Outside => FilterState::Outside,
                Resume::Answer => FilterState::InAnswer,
            }
        };
        Step::Advance(next)
    }

    fn enter_answer(&mut self, next: usize) -> Step {
        self.state = FilterState::InAnswer;
        Step::Advance(next)
    }

    fn close_answer(&mut self, next: usize) -> Step {
        self.state = FilterState::Closed;
        Step::Advance(next)
    }

    fn emit(&mut self, visible: String) -> Option<String> {
        if visible.is_empty() {
            return None;
        }
        self.answer_text.push_str(&visible);
        Some(visible)
    }
}

impl Default for AnswerFilter {
    fn default() -> Self {
        Self::new()
    }
}
