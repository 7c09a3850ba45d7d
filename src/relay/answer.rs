use std::sync::LazyLock;

use regex_lite::Regex;

/// Longest markup tag (including both angle brackets) removed from answer text.
pub const MAX_MARKUP_TAG_LEN: usize = 64;

static THINK_SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think span regex is valid"));
static OPEN_THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*$").expect("open think regex is valid"));
static ANSWER_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<answer>(.*?)</answer>").expect("answer span regex is valid")
});
static ANSWER_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?answer>").expect("answer tag regex is valid"));
static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("<[^<>]{{0,{}}}>", MAX_MARKUP_TAG_LEN - 2))
        .expect("markup regex is valid")
});

const THINK_CLOSE: &str = "</think>";

/// Remove markup tags such as `<b>` or `</answer>` from visible text.
///
/// Only tags of at most [`MAX_MARKUP_TAG_LEN`] characters are removed, so a
/// lone `<` in prose (`3 < 5`) survives.
#[must_use]
pub fn strip_markup(text: &str) -> String {
    if !text.contains('<') {
        return text.to_string();
    }
    MARKUP_RE.replace_all(text, "").into_owned()
}

/// Pull the student-facing answer out of a complete model reply.
///
/// Complete reasoning spans are removed first. If a complete `<answer>` span
/// remains, its trimmed inner text is the answer, even when the model never
/// closed an earlier `<think>`. Otherwise a trailing unterminated `<think>` is
/// dropped along with everything after it, text before an orphan `</think>`
/// is treated as reasoning, and the rest is returned trimmed with only stray
/// answer tags removed. Other markup is kept as written.
#[must_use]
pub fn extract_answer(full: &str) -> String {
    let without_spans = THINK_SPAN_RE.replace_all(full, "");

    if let Some(inner) = ANSWER_SPAN_RE
        .captures(&without_spans)
        .and_then(|caps| caps.get(1))
    {
        return inner.as_str().trim().to_string();
    }

    let without_open = OPEN_THINK_RE.replace(&without_spans, "");
    let visible: &str = match without_open.rfind(THINK_CLOSE) {
        Some(idx) => &without_open[idx + THINK_CLOSE.len()..],
        None => without_open.as_ref(),
    };

    ANSWER_TAG_RE.replace_all(visible, "").trim().to_string()
}
