use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// What a turn holds and where it is in its lifecycle.
///
/// `Streaming` is the only mutable kind; every other kind is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    #[default]
    Content,
    Streaming,
    LearningPath,
    Quiz,
    System,
    Failed,
}

/// Local identifier assigned by [`ConversationState`]; never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TurnId(u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(skip)]
    pub id: TurnId,
    pub role: TurnRole,
    #[serde(default, deserialize_with = "content_as_text")]
    pub content: String,
    #[serde(rename = "type", alias = "message_type", default)]
    pub kind: TurnKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(
        rename = "isLearningPathQuery",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_learning_path_query: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversationTurn {
    fn new(role: TurnRole, content: String, kind: TurnKind) -> Self {
        Self {
            id: TurnId::default(),
            role,
            content,
            kind,
            timestamp: Some(Utc::now().to_rfc3339()),
            is_learning_path_query: None,
            error: None,
        }
    }

    pub fn user(content: impl Into<String>, is_learning_path_query: bool) -> Self {
        let mut turn = Self::new(TurnRole::User, content.into(), TurnKind::Content);
        turn.is_learning_path_query = Some(is_learning_path_query);
        turn
    }

    /// Empty assistant turn that incoming chunks will fill
    pub fn assistant_placeholder() -> Self {
        Self::new(TurnRole::Assistant, String::new(), TurnKind::Streaming)
    }

    pub fn assistant(content: impl Into<String>, kind: TurnKind) -> Self {
        Self::new(TurnRole::Assistant, content.into(), kind)
    }

    pub fn is_streaming(&self) -> bool {
        self.kind == TurnKind::Streaming
    }
}

/// Server rows may carry structured content (learning paths are stored as
/// JSON objects). Anything that is not a string is kept as its JSON text.
fn content_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Ordered conversation turns plus the generation flags.
///
/// At most one streaming turn exists and it is always the last turn.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<ConversationTurn>,
    pub is_generating: bool,
    pub is_learning_path_query: bool,
    pub is_quiz_query: bool,
    next_id: u64,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Id of the pending streaming turn, if there is one
    pub fn streaming_turn_id(&self) -> Option<TurnId> {
        self.turns
            .last()
            .filter(|turn| turn.is_streaming())
            .map(|turn| turn.id)
    }

    fn assign_id(&mut self, turn: &mut ConversationTurn) {
        self.next_id += 1;
        turn.id = TurnId(self.next_id);
    }

    /// Replace every turn. History rows are authoritative and final, so a
    /// streaming kind coming back from the server is stored as plain content.
    pub fn set_history(&mut self, turns: Vec<ConversationTurn>) {
        self.turns = Vec::with_capacity(turns.len());
        for mut turn in turns {
            if turn.is_streaming() {
                debug!("History row arrived as streaming, storing as content");
                turn.kind = TurnKind::Content;
            }
            self.assign_id(&mut turn);
            self.turns.push(turn);
        }
    }

    /// Push a turn to the tail.
    ///
    /// Rejected while a streaming turn is pending, since the streaming turn
    /// must stay last.
    pub fn append_turn(&mut self, mut turn: ConversationTurn) -> Option<TurnId> {
        if let Some(pending) = self.streaming_turn_id() {
            warn!("Ignoring new turn while turn {:?} is still streaming", pending);
            return None;
        }

        if turn.role == TurnRole::Assistant && turn.is_streaming() {
            self.is_generating = true;
        }
        if turn.is_learning_path_query == Some(true) {
            self.is_learning_path_query = true;
        }

        self.assign_id(&mut turn);
        let id = turn.id;
        self.turns.push(turn);
        Some(id)
    }

    /// Overwrite the streaming tail with the full accumulated text.
    /// Returns false, leaving state untouched, when the tail is not streaming.
    pub fn apply_stream_chunk(&mut self, text: &str) -> bool {
        match self.turns.last_mut() {
            Some(turn) if turn.is_streaming() => {
                turn.content.clear();
                turn.content.push_str(text);
                true
            }
            _ => false,
        }
    }

    fn streaming_turn_mut(&mut self, id: TurnId) -> Option<&mut ConversationTurn> {
        self.turns
            .last_mut()
            .filter(|turn| turn.id == id && turn.is_streaming())
    }

    /// Close the streaming turn `id`. Its final kind follows the request mode.
    pub fn finalize(&mut self, id: TurnId) -> bool {
        let kind = if self.is_learning_path_query {
            TurnKind::LearningPath
        } else if self.is_quiz_query {
            TurnKind::Quiz
        } else {
            TurnKind::Content
        };

        let Some(turn) = self.streaming_turn_mut(id) else {
            return false;
        };
        turn.kind = kind;
        self.is_generating = false;
        true
    }

    /// Mark the streaming turn `id` as failed. Partial content is kept.
    pub fn fail(&mut self, id: TurnId, message: impl Into<String>) -> bool {
        let Some(turn) = self.streaming_turn_mut(id) else {
            return false;
        };
        turn.kind = TurnKind::Failed;
        turn.error = Some(message.into());
        self.is_generating = false;
        true
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.is_generating = false;
    }
}
