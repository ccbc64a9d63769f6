use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

use crate::cli::chat::conversation_state::ConversationTurn;
use crate::cli::chat::learning_goals::LearningGoal;
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::session::Session;
use crate::stream::{StreamOutcome, consume_stream};

/// Receives the accumulated answer text after every chunk
pub type ChunkFn<'a> = dyn for<'s> FnMut(&'s str) + Send + 'a;

/// One question for the tutor and the answer mode it selects.
///
/// Both flags may be set; the server gives the learning-path mode precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct AskRequest {
    pub prompt: String,
    pub quiz: bool,
    pub learning_path: bool,
}

impl AskRequest {
    pub fn new(prompt: impl Into<String>, quiz: bool, learning_path: bool) -> Self {
        Self {
            prompt: prompt.into(),
            quiz,
            learning_path,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(ChatError::EmptyPrompt);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct AskBody<'a> {
    user_prompt: &'a str,
    username: &'a str,
    #[serde(rename = "isQuiz")]
    is_quiz: bool,
    #[serde(rename = "isLearningPath")]
    is_learning_path: bool,
}

#[derive(Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<ConversationTurn>,
}

#[derive(Deserialize)]
struct GoalsResponse {
    #[serde(default)]
    learning_goals: Vec<LearningGoal>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    messages: Vec<ConversationTurn>,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
    name: Option<String>,
    #[serde(rename = "isAdmin", default)]
    is_admin: bool,
}

/// The operations the chat loop needs from the tutor service
#[async_trait]
pub trait TutorBackend: Send + Sync {
    /// Checks that can fail before anything is sent or any state changes
    fn check_ready(&self, request: &AskRequest) -> Result<()>;

    /// Ask a question.
    ///
    /// `on_start` runs once the server accepted the question, before any
    /// chunk. Errors returned without calling it (auth, empty prompt, HTTP
    /// status, transport) leave nothing for the caller to undo. `on_chunk`
    /// receives the full text so far after every chunk; `on_done` runs once
    /// when the answer completed normally. Neither runs after an error or
    /// after `cancel` fires.
    async fn ask(
        &self,
        request: &AskRequest,
        cancel: &CancellationToken,
        on_start: &mut (dyn FnMut() + Send),
        on_chunk: &mut ChunkFn<'_>,
        on_done: &mut (dyn FnMut() + Send),
    ) -> Result<StreamOutcome>;

    async fn fetch_history(&self) -> Result<Vec<ConversationTurn>>;

    /// Full-text search over the stored messages
    async fn search_messages(&self, query: &str) -> Result<Vec<ConversationTurn>>;

    async fn clear_history(&self) -> Result<()>;

    async fn fetch_learning_goals(&self) -> Result<Vec<LearningGoal>>;
}

pub struct TutorClient {
    base_url: Url,
    session: Option<Session>,
    history_limit: u32,
    client: reqwest::Client,
}

impl TutorClient {
    pub fn new(config: &Config, session: Option<Session>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            base_url: base_url(&config.api_url)?,
            session,
            history_limit: config.history_limit,
            client,
        })
    }

    pub fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .filter(|session| session.is_complete())
            .ok_or(ChatError::AuthMissing)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn user_endpoint(&self, path: &str, session: &Session) -> Result<Url> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut().append_pair("username", &session.username);
        Ok(url)
    }

    /// Exchange credentials for a session token.
    pub async fn login(config: &Config, username: &str, password: &str) -> Result<Session> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        let url = base_url(&config.api_url)?.join("auth/login")?;

        info!("Logging in as {}", username);
        let response = client
            .post(url)
            .json(&LoginBody { username, password })
            .send()
            .await?;
        let login: LoginResponse = check_status(response).await?.json().await?;

        let token = login
            .token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ChatError::Session("login response had no token".into()))?;

        Ok(Session {
            token,
            username: username.to_string(),
            name: login.name,
            is_admin: login.is_admin,
        })
    }

    pub async fn ask(
        &self,
        request: &AskRequest,
        cancel: &CancellationToken,
        on_start: &mut (dyn FnMut() + Send),
        on_chunk: &mut ChunkFn<'_>,
        on_done: &mut (dyn FnMut() + Send),
    ) -> Result<StreamOutcome> {
        self.check_ready(request)?;
        let session = self.session()?;
        let url = self.endpoint("chat/ask")?;

        let body = AskBody {
            user_prompt: &request.prompt,
            username: &session.username,
            is_quiz: request.quiz,
            is_learning_path: request.learning_path,
        };
        debug!("Sending ask request: {}", serde_json::to_string(&body)?);

        let accept = if request.learning_path {
            "application/json"
        } else {
            "text/plain"
        };
        let send = self
            .client
            .post(url)
            .bearer_auth(&session.token)
            .header(ACCEPT, accept)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(StreamOutcome::Cancelled { partial: String::new() });
            }
            response = send => response.map_err(|e| {
                error!("Chat request failed: {}", e);
                ChatError::Transport(e)
            })?,
        };
        let response = check_status(response).await?;
        on_start();

        let outcome = if request.learning_path {
            // Learning paths arrive as one document, not a stream
            let text = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(StreamOutcome::Cancelled { partial: String::new() });
                }
                text = response.text() => text.map_err(|e| {
                    error!("Failed to read learning path body: {}", e);
                    ChatError::StreamRead { message: e.to_string(), partial: String::new() }
                })?,
            };
            on_chunk(&text);
            StreamOutcome::Completed(text)
        } else {
            consume_stream(response.bytes_stream(), cancel, on_chunk).await?
        };

        if !outcome.is_cancelled() {
            on_done();
        }
        Ok(outcome)
    }

    pub async fn fetch_history(&self) -> Result<Vec<ConversationTurn>> {
        let session = self.session()?;
        let mut url = self.user_endpoint("chat/history", session)?;
        url.query_pairs_mut()
            .append_pair("limit", &self.history_limit.to_string());

        debug!("Fetching chat history: {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(&session.token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let history: HistoryResponse = check_status(response).await?.json().await?;

        debug!("Received {} history turns", history.history.len());
        Ok(history.history)
    }

    pub async fn search_messages(&self, query: &str) -> Result<Vec<ConversationTurn>> {
        let session = self.session()?;
        let mut url = self.user_endpoint("chat/search", session)?;
        url.query_pairs_mut().append_pair("query", query);

        debug!("Searching messages: {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(&session.token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let found: SearchResponse = check_status(response).await?.json().await?;

        debug!("Search matched {} messages", found.messages.len());
        Ok(found.messages)
    }

    pub async fn clear_history(&self) -> Result<()> {
        let session = self.session()?;
        let url = self.user_endpoint("chat/clear", session)?;

        let response = self
            .client
            .delete(url)
            .bearer_auth(&session.token)
            .send()
            .await?;
        check_status(response).await?;

        info!("Cleared chat history for {}", session.username);
        Ok(())
    }

    pub async fn fetch_learning_goals(&self) -> Result<Vec<LearningGoal>> {
        let session = self.session()?;
        let url = self.user_endpoint("chat/get-all-goals", session)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&session.token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let goals: GoalsResponse = check_status(response).await?.json().await?;

        debug!("Received {} learning goals", goals.learning_goals.len());
        Ok(goals.learning_goals)
    }
}

#[async_trait]
impl TutorBackend for TutorClient {
    fn check_ready(&self, request: &AskRequest) -> Result<()> {
        request.validate()?;
        self.session()?;
        Ok(())
    }

    async fn ask(
        &self,
        request: &AskRequest,
        cancel: &CancellationToken,
        on_start: &mut (dyn FnMut() + Send),
        on_chunk: &mut ChunkFn<'_>,
        on_done: &mut (dyn FnMut() + Send),
    ) -> Result<StreamOutcome> {
        TutorClient::ask(self, request, cancel, on_start, on_chunk, on_done).await
    }

    async fn fetch_history(&self) -> Result<Vec<ConversationTurn>> {
        TutorClient::fetch_history(self).await
    }

    async fn search_messages(&self, query: &str) -> Result<Vec<ConversationTurn>> {
        TutorClient::search_messages(self, query).await
    }

    async fn clear_history(&self) -> Result<()> {
        TutorClient::clear_history(self).await
    }

    async fn fetch_learning_goals(&self) -> Result<Vec<LearningGoal>> {
        TutorClient::fetch_learning_goals(self).await
    }
}

fn base_url(api_url: &str) -> Result<Url> {
    let mut base = api_url.trim_end_matches('/').to_string();
    base.push('/');
    Ok(Url::parse(&base)?)
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!("API request failed with status {}: {}", status, body);
    Err(ChatError::RequestFailed { status, body })
}
