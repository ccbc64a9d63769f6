use tracing::{debug, warn};

use super::conversation_state::{ConversationState, ConversationTurn, TurnId};
use super::learning_goals::{
    LearningGoal, ProgressPolicy, TopicCompletion, mark_topic_completed,
};

/// Every state transition the chat UI can make.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetHistory(Vec<ConversationTurn>),
    AppendTurn(ConversationTurn),
    /// Full accumulated text for the streaming tail
    ApplyStreamChunk(String),
    Finalize(TurnId),
    Fail { turn: TurnId, message: String },
    SetGenerating(bool),
    SetLearningPathQuery(bool),
    SetQuizQuery(bool),
    SetLearningGoals(Vec<LearningGoal>),
    SelectLearningGoal(Option<String>),
    MarkTopicCompleted { goal: String, topic_index: usize },
}

/// Application state owned by the chat loop. All changes go through
/// [`AppState::reduce`].
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub conversation: ConversationState,
    pub learning_goals: Vec<LearningGoal>,
    pub selected_goal: Option<String>,
    pub progress_policy: ProgressPolicy,
    last_completion: Option<TopicCompletion>,
}

impl AppState {
    pub fn new(progress_policy: ProgressPolicy) -> Self {
        Self {
            progress_policy,
            ..Self::default()
        }
    }

    pub fn reduce(&mut self, action: Action) {
        let conversation = &mut self.conversation;
        match action {
            Action::SetHistory(turns) => conversation.set_history(turns),
            Action::AppendTurn(turn) => {
                conversation.append_turn(turn);
            }
            Action::ApplyStreamChunk(text) => {
                if !conversation.apply_stream_chunk(&text) {
                    debug!("Dropped chunk, no streaming turn at the tail");
                }
            }
            Action::Finalize(id) => {
                if !conversation.finalize(id) {
                    debug!("Finalize ignored for {:?}", id);
                }
            }
            Action::Fail { turn, message } => {
                if !conversation.fail(turn, message) {
                    // Nothing streaming to fail, but never leave the flag stuck
                    conversation.is_generating = false;
                }
            }
            Action::SetGenerating(value) => conversation.is_generating = value,
            Action::SetLearningPathQuery(value) => conversation.is_learning_path_query = value,
            Action::SetQuizQuery(value) => conversation.is_quiz_query = value,
            Action::SetLearningGoals(goals) => {
                if let Some(selected) = &self.selected_goal {
                    if !goals.iter().any(|g| &g.name == selected) {
                        self.selected_goal = None;
                    }
                }
                self.learning_goals = goals;
            }
            Action::SelectLearningGoal(name) => self.selected_goal = name,
            Action::MarkTopicCompleted { goal, topic_index } => {
                let result = mark_topic_completed(
                    &mut self.learning_goals,
                    &goal,
                    topic_index,
                    &self.progress_policy,
                );
                if result == TopicCompletion::AlreadyCompleted {
                    warn!("Topic {} of {:?} is already completed", topic_index, goal);
                }
                self.last_completion = Some(result);
            }
        }
    }

    pub fn dispatch_all(&mut self, actions: impl IntoIterator<Item = Action>) {
        for action in actions {
            self.reduce(action);
        }
    }

    /// Result of the most recent `MarkTopicCompleted`
    pub fn last_completion(&self) -> Option<TopicCompletion> {
        self.last_completion
    }

    pub fn selected_goal(&self) -> Option<&LearningGoal> {
        let name = self.selected_goal.as_ref()?;
        self.learning_goals.iter().find(|g| &g.name == name)
    }
}
