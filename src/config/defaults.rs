use super::DeltaShape;

pub(crate) fn port() -> u16 {
    3000
}
pub(crate) fn host() -> String {
    "0.0.0.0".to_string()
}
pub(crate) fn timeout() -> u64 {
    30
}
pub(crate) fn http_pool_max_idle_per_host() -> usize {
    16
}
pub(crate) fn http_pool_idle_timeout_secs() -> u64 {
    15
}
pub(crate) fn max_body_bytes() -> usize {
    // base64 images arrive inline
    10 * 1024 * 1024
}
pub(crate) fn max_tokens_general() -> u32 {
    1000
}
pub(crate) fn max_tokens_tutor() -> u32 {
    800
}
pub(crate) fn max_tokens_image() -> u32 {
    600
}
pub(crate) fn anthropic_version() -> String {
    "2023-06-01".to_string()
}
pub(crate) fn delta_shapes() -> Vec<DeltaShape> {
    vec![DeltaShape::OpenAiChat, DeltaShape::DeltaText]
}
pub(crate) fn stream_idle_timeout_secs() -> u64 {
    60
}
pub(crate) fn history_limit() -> usize {
    10
}
pub(crate) fn log_level() -> String {
    "INFO".to_string()
}

const ANSWER_FORMAT: &str = "\
Think privately inside <think></think> first. Then write the reply the student \
will see inside <answer></answer>. Only the text inside <answer> is shown.";

pub(crate) fn homepage_prompt() -> String {
    format!(
        "You are a friendly AI tutor for primary and middle school students. \
Explain things with short sentences, everyday examples and a warm tone. \
If a question is unsafe or off-topic, gently steer back to learning.\n\n{ANSWER_FORMAT}"
    )
}

pub(crate) fn course_tutor_prompt() -> String {
    format!(
        "You are the AI teaching assistant for an online course. Answer using the \
course material you are given, point the student to the relevant part of the \
lesson, and prefer hints over full solutions.\n\n{ANSWER_FORMAT}"
    )
}

pub(crate) fn canvas_coding_prompt() -> String {
    format!(
        "You help students build programs with visual blocks. Refer to blocks by \
the names shown in the toolbox, explain one step at a time, and suggest what to \
try next.\n\n{ANSWER_FORMAT}"
    )
}

pub(crate) fn image_recognition_prompt() -> String {
    "You describe pictures for young students. Use simple, vivid language and \
mention anything interesting they could learn from the image."
        .to_string()
}

pub(crate) fn encouragements() -> Vec<String> {
    [
        "Great question! Keep exploring!",
        "You're thinking like a scientist!",
        "Every question makes you smarter!",
        "Nice work, curiosity is a superpower!",
        "Keep going, you're doing great!",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
