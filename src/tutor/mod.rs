pub mod encouragement;
pub mod prompt;

pub use encouragement::pick_encouragement;
pub use prompt::{
    canvas_system_prompt, cap_history, context_text, course_system_prompt, system_prompt_for,
    ChatMessage, GradeLevel, TutorKind, DEFAULT_IMAGE_PROMPT,
};
