use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SystemPrompts;

/// Used when an image request carries no prompt of its own.
pub const DEFAULT_IMAGE_PROMPT: &str =
    "Describe what is in this picture in simple, lively language a primary school student can understand.";

/// One turn of a conversation as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    fn is_conversation_turn(&self) -> bool {
        matches!(self.role.as_str(), "user" | "assistant")
    }
}

/// Which tutor surface a question comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TutorKind {
    Homepage,
    Course,
    Canvas,
}

impl TutorKind {
    /// Map the request's `type` field; anything unknown is a homepage question.
    #[must_use]
    pub fn from_request(kind: Option<&str>) -> Self {
        match kind.map(str::trim) {
            Some("course") => TutorKind::Course,
            Some("canvas") => TutorKind::Canvas,
            _ => TutorKind::Homepage,
        }
    }
}

/// Grade band of the student, used to tune the course tutor's language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeLevel {
    LowerPrimary,
    UpperPrimary,
    MiddleSchool,
}

impl GradeLevel {
    /// `"1-3"` and `"4-6"` are primary bands; a missing grade counts as
    /// `"4-6"`, any other label as middle school.
    #[must_use]
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some("1-3") => GradeLevel::LowerPrimary,
            Some("4-6") | None => GradeLevel::UpperPrimary,
            Some(_) => GradeLevel::MiddleSchool,
        }
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            GradeLevel::LowerPrimary => "primary school, grades 1-3",
            GradeLevel::UpperPrimary => "primary school, grades 4-6",
            GradeLevel::MiddleSchool => "middle school",
        }
    }
}

/// Render request context as prompt text.
///
/// Strings are used as-is; structured context is pretty-printed JSON.
#[must_use]
pub fn context_text(context: Option<&Value>) -> String {
    match context {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

#[must_use]
pub fn course_system_prompt(base: &str, course_content: &str, grade: GradeLevel) -> String {
    format!(
        "{base}\n\nCurrent course content:\n{course_content}\n\nStudent level: {}\n\n\
Answer from the course content, in language that suits this level.",
        grade.description()
    )
}

/// Canvas prompt, with the student's current blocks appended when known.
#[must_use]
pub fn canvas_system_prompt(base: &str, current_blocks: Option<&Value>) -> String {
    match current_blocks {
        None | Some(Value::Null) => base.to_string(),
        Some(blocks) => format!(
            "{base}\nThe student's current blocks:\n{}",
            context_text(Some(blocks))
        ),
    }
}

/// System prompt for a streamed question.
#[must_use]
pub fn system_prompt_for(
    kind: TutorKind,
    prompts: &SystemPrompts,
    context: Option<&Value>,
    grade: GradeLevel,
) -> String {
    match kind {
        TutorKind::Homepage => prompts.homepage.clone(),
        TutorKind::Course => {
            course_system_prompt(&prompts.course_tutor, &context_text(context), grade)
        }
        TutorKind::Canvas => prompts.canvas_coding.clone(),
    }
}

/// Keep the most recent `limit` user/assistant turns.
#[must_use]
pub fn cap_history(history: Vec<ChatMessage>, limit: usize) -> Vec<ChatMessage> {
    let mut turns: Vec<ChatMessage> = history
        .into_iter()
        .filter(ChatMessage::is_conversation_turn)
        .collect();
    if turns.len() > limit {
        turns.drain(..turns.len() - limit);
    }
    turns
}
