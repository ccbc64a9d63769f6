use rustyline::{Config, Editor, Result};

use super::conversation_state::ConversationState;

/// Prompt text reflecting the answer mode the next question will use
pub fn generate_prompt(state: &ConversationState) -> String {
    match (state.is_learning_path_query, state.is_quiz_query) {
        (true, _) => "path> ".to_string(),
        (false, true) => "quiz> ".to_string(),
        (false, false) => "> ".to_string(),
    }
}

pub fn rl() -> Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .completion_type(rustyline::CompletionType::List)
        .build();
    Editor::with_config(config)
}
