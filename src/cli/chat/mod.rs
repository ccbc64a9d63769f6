pub mod app_state;
pub mod command;
pub mod conversation_state;
pub mod learning_goals;
pub mod prompt;
pub mod render;

use std::future::Future;
use std::io::Write;
use std::process::ExitCode;

use app_state::{Action, AppState};
use color_print::cformat;
use command::Command;
use conversation_state::{ConversationTurn, TurnId};
use eyre::{Result, bail};
use learning_goals::{ProgressPolicy, TopicCompletion};
use prompt::generate_prompt;
use render::StreamRenderer;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stream::StreamOutcome;
use crate::tutor_client::{AskRequest, TutorBackend};

const WELCOME_TEXT: &str = "
Hi, I'm your AI tutor. Ask me anything.

Things to try
• Explain recursion with a simple example.
• /path then: I want to learn Rust in four weeks.
• /quiz then: Quiz me on SQL joins.

/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
AI Tutor Chat

/history      Reload and show the conversation
/clear        Clear the conversation history
/quiz         Toggle quiz mode for the next questions
/path         Ask for a learning path with the next question
/goals        List your learning goals and their topics
/search WORDS Search your past messages
/done G T     Mark topic T of goal G as completed
/help         Show this help dialogue
/quit         Quit the application

Ctrl-C while an answer is streaming stops it, and abandons any other request.
";

/// Answer modes and progress rules a chat starts with
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub quiz: bool,
    pub learning_path: bool,
    pub progress_policy: ProgressPolicy,
}

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<String>,
    interactive: bool,
    state: AppState,
    backend: Box<dyn TutorBackend>,
    interrupt_tx: mpsc::UnboundedSender<()>,
    interrupts: mpsc::UnboundedReceiver<()>,
}

/// What the backend callbacks report while one answer is in flight
#[derive(Debug)]
enum AnswerEvent {
    Accepted,
    Text(String),
    Done,
}

/// Turns for one answer. They are appended only once the server accepted
/// the question, so a rejected request leaves the conversation untouched.
struct PendingAnswer {
    prompt: String,
    learning_path: bool,
    turn: Option<TurnId>,
}

impl PendingAnswer {
    fn new(prompt: &str, learning_path: bool) -> Self {
        Self {
            prompt: prompt.to_string(),
            learning_path,
            turn: None,
        }
    }

    fn apply(&mut self, state: &mut AppState, event: AnswerEvent) {
        match event {
            AnswerEvent::Accepted => {
                state.dispatch_all([
                    Action::AppendTurn(ConversationTurn::user(
                        self.prompt.clone(),
                        self.learning_path,
                    )),
                    Action::AppendTurn(ConversationTurn::assistant_placeholder()),
                ]);
                self.turn = state.conversation.streaming_turn_id();
            }
            AnswerEvent::Text(text) => state.reduce(Action::ApplyStreamChunk(text)),
            AnswerEvent::Done => match self.turn {
                Some(id) => state.reduce(Action::Finalize(id)),
                None => warn!("Answer completed before it was accepted"),
            },
        }
    }
}

/// Await a request unless Ctrl-C arrives first.
async fn interruptible<T>(
    interrupts: &mut mpsc::UnboundedReceiver<()>,
    request: impl Future<Output = crate::error::Result<T>>,
) -> Result<T> {
    // Presses from before this request started do not count
    while interrupts.try_recv().is_ok() {}

    tokio::select! {
        result = request => Ok(result?),
        Some(()) = interrupts.recv() => bail!("Interrupted"),
    }
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        interactive: bool,
        backend: Box<dyn TutorBackend>,
        options: ChatOptions,
    ) -> Self {
        let mut state = AppState::new(options.progress_policy);
        state.dispatch_all([
            Action::SetQuizQuery(options.quiz),
            Action::SetLearningPathQuery(options.learning_path),
        ]);

        let (interrupt_tx, interrupts) = mpsc::unbounded_channel();

        Self {
            output,
            input,
            interactive,
            state,
            backend,
            interrupt_tx,
            interrupts,
        }
    }

    /// Sender that stops the answer in flight, or abandons the pending request.
    pub fn interrupt_handle(&self) -> mpsc::UnboundedSender<()> {
        self.interrupt_tx.clone()
    }

    /// Forward Ctrl-C presses to the chat loop for the rest of the process.
    fn listen_for_ctrl_c(&self) {
        let tx = self.interrupt_handle();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{SignalKind, signal};

                let mut interrupts = match signal(SignalKind::interrupt()) {
                    Ok(interrupts) => interrupts,
                    Err(e) => {
                        warn!("Could not listen for Ctrl-C: {}", e);
                        return;
                    }
                };
                while interrupts.recv().await.is_some() {
                    if tx.send(()).is_err() {
                        break;
                    }
                }
            }

            #[cfg(not(unix))]
            {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if tx.send(()).is_err() {
                        break;
                    }
                }
            }
        });
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        self.listen_for_ctrl_c();

        if self.interactive {
            self.print_welcome()?;
            self.reload_history().await;
        }

        // Handle non-interactive mode (single query)
        if let Some(input) = self.input.take() {
            if let Err(e) = self.handle_input(&input).await {
                writeln!(self.output, "Error: {}", e)?;
                return Ok(ExitCode::FAILURE);
            }
            return Ok(ExitCode::SUCCESS);
        }

        if self.interactive {
            self.run_interactive().await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        Ok(())
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = prompt::rl()?;

        loop {
            let prompt_text = generate_prompt(&self.state.conversation);
            match rl.readline(&prompt_text) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line.as_str());

                    match self.handle_input(&line).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => writeln!(self.output, "Error: {}", e)?,
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Returns false when the user asked to quit.
    async fn handle_input(&mut self, input: &str) -> Result<bool> {
        match Command::parse(input)? {
            Command::Quit => return Ok(false),
            Command::Help => {
                writeln!(self.output, "{}", HELP_TEXT)?;
            }
            Command::Clear => {
                interruptible(&mut self.interrupts, self.backend.clear_history()).await?;
                self.state.reduce(Action::SetHistory(Vec::new()));
                writeln!(self.output, "Conversation cleared.")?;
            }
            Command::History => {
                let turns =
                    interruptible(&mut self.interrupts, self.backend.fetch_history()).await?;
                self.state.reduce(Action::SetHistory(turns));
                for turn in self.state.conversation.turns() {
                    render::render_turn(&mut *self.output, turn)?;
                }
            }
            Command::ToggleQuiz => {
                let on = !self.state.conversation.is_quiz_query;
                self.state.reduce(Action::SetQuizQuery(on));
                writeln!(self.output, "Quiz mode {}.", if on { "on" } else { "off" })?;
            }
            Command::ToggleLearningPath => {
                let on = !self.state.conversation.is_learning_path_query;
                self.state.reduce(Action::SetLearningPathQuery(on));
                writeln!(
                    self.output,
                    "Learning path mode {}.",
                    if on { "on" } else { "off" }
                )?;
            }
            Command::Goals => {
                self.refresh_goals().await?;
                render::render_goals(&mut *self.output, &self.state.learning_goals)?;
            }
            Command::Search(query) => {
                let found = interruptible(
                    &mut self.interrupts,
                    self.backend.search_messages(&query),
                )
                .await?;
                if found.is_empty() {
                    writeln!(self.output, "No messages match {:?}.", query)?;
                }
                for turn in &found {
                    render::render_turn(&mut *self.output, turn)?;
                }
            }
            Command::Done { goal, topic } => self.complete_topic(goal, topic).await?,
            Command::Ask(prompt) => self.ask(&prompt).await?,
        }

        Ok(true)
    }

    async fn reload_history(&mut self) -> bool {
        match interruptible(&mut self.interrupts, self.backend.fetch_history()).await {
            Ok(turns) => {
                self.state.reduce(Action::SetHistory(turns));
                true
            }
            Err(e) => {
                warn!("Failed to reload chat history: {}", e);
                false
            }
        }
    }

    async fn refresh_goals(&mut self) -> Result<()> {
        let goals =
            interruptible(&mut self.interrupts, self.backend.fetch_learning_goals()).await?;
        self.state.reduce(Action::SetLearningGoals(goals));
        Ok(())
    }

    async fn complete_topic(&mut self, goal: usize, topic: usize) -> Result<()> {
        if self.state.learning_goals.is_empty() {
            self.refresh_goals().await?;
        }

        let Some(name) = self
            .state
            .learning_goals
            .get(goal - 1)
            .map(|g| g.name.clone())
        else {
            bail!("No goal number {}. See /goals", goal);
        };

        self.state.dispatch_all([
            Action::SelectLearningGoal(Some(name.clone())),
            Action::MarkTopicCompleted {
                goal: name.clone(),
                topic_index: topic - 1,
            },
        ]);

        match self.state.last_completion() {
            Some(TopicCompletion::Completed { progress }) => {
                writeln!(
                    self.output,
                    "Marked topic {} of {} as completed. Progress: {:.0}%",
                    topic, name, progress
                )?;
            }
            Some(TopicCompletion::AlreadyCompleted) => {
                writeln!(self.output, "Topic {} of {} is already completed.", topic, name)?;
            }
            Some(TopicCompletion::TopicNotFound) => bail!("{} has no topic {}", name, topic),
            Some(TopicCompletion::GoalNotFound) | None => bail!("No goal named {}", name),
        }
        Ok(())
    }

    /// Stream one answer into a new assistant turn.
    async fn ask(&mut self, prompt: &str) -> Result<()> {
        let conversation = &self.state.conversation;
        if conversation.is_generating {
            bail!("An answer is still being generated");
        }

        let request = AskRequest::new(
            prompt,
            conversation.is_quiz_query,
            conversation.is_learning_path_query,
        );
        self.backend.check_ready(&request)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let start_tx = tx.clone();
        let chunk_tx = tx.clone();
        let mut on_start = move || {
            let _ = start_tx.send(AnswerEvent::Accepted);
        };
        let mut on_chunk = move |text: &str| {
            let _ = chunk_tx.send(AnswerEvent::Text(text.to_string()));
        };
        let mut on_done = move || {
            let _ = tx.send(AnswerEvent::Done);
        };

        let cancel = CancellationToken::new();
        let mut renderer = StreamRenderer::new(request.learning_path);
        let mut answer = PendingAnswer::new(prompt, request.learning_path);
        while self.interrupts.try_recv().is_ok() {}

        let result = {
            let output = &mut self.output;
            let state = &mut self.state;
            let interrupts = &mut self.interrupts;
            let ask = self.backend.ask(
                &request,
                &cancel,
                &mut on_start,
                &mut on_chunk,
                &mut on_done,
            );
            tokio::pin!(ask);

            loop {
                tokio::select! {
                    result = &mut ask => break result,
                    Some(event) = rx.recv() => {
                        answer.apply(state, event);
                        if let Some(turn) = state.conversation.last().filter(|t| t.is_streaming()) {
                            renderer.update(&mut **output, &turn.content)?;
                        }
                    }
                    Some(()) = interrupts.recv(), if !cancel.is_cancelled() => {
                        info!("Stop requested, cancelling the answer");
                        cancel.cancel();
                    }
                }
            }
        };

        // Events sent just before the ask returned
        while let Ok(event) = rx.try_recv() {
            answer.apply(&mut self.state, event);
        }

        let Some(turn_id) = answer.turn else {
            // Rejected or stopped before the server accepted the question
            return match result {
                Ok(outcome) => {
                    if outcome.is_cancelled() {
                        writeln!(self.output, "{}", cformat!("<dim>[stopped]</>"))?;
                    }
                    Ok(())
                }
                Err(e) => Err(e.into()),
            };
        };

        match result {
            Ok(StreamOutcome::Completed(text)) => {
                debug!("Answer completed with {} bytes", text.len());
                renderer.finish(&mut *self.output, self.state.conversation.last())?;
                self.state.reduce(Action::SetLearningPathQuery(false));
                self.reload_history().await;
                Ok(())
            }
            Ok(StreamOutcome::Cancelled { .. }) => {
                self.state.reduce(Action::Finalize(turn_id));
                renderer.finish(&mut *self.output, self.state.conversation.last())?;
                writeln!(self.output, "{}", cformat!("<dim>[stopped]</>"))?;
                Ok(())
            }
            Err(e) => {
                if let Some(partial) = e.partial_text() {
                    debug!("Keeping {} bytes received before the failure", partial.len());
                }
                self.state.reduce(Action::Fail {
                    turn: turn_id,
                    message: e.to_string(),
                });
                renderer.finish(&mut *self.output, self.state.conversation.last())?;
                Err(e.into())
            }
        }
    }
}
