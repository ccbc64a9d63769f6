//! Terminal rendering of turns, learning paths and goals

use std::io::Write;

use color_print::cformat;
use eyre::Result;

use super::conversation_state::{ConversationTurn, TurnKind, TurnRole};
use super::learning_goals::{LearningGoal, LearningPath};

/// Prints a streaming turn incrementally.
///
/// Accumulated text only grows, so each update prints the new suffix.
/// Learning paths are held back and rendered once the turn is final.
#[derive(Debug, Default)]
pub struct StreamRenderer {
    printed: usize,
    hold: bool,
}

impl StreamRenderer {
    pub fn new(hold: bool) -> Self {
        Self { printed: 0, hold }
    }

    pub fn update(&mut self, out: &mut dyn Write, text: &str) -> Result<()> {
        if self.hold {
            return Ok(());
        }

        if text.len() < self.printed || !text.is_char_boundary(self.printed) {
            // Text was replaced rather than extended; start a fresh line
            writeln!(out)?;
            self.printed = 0;
        }

        let new = &text[self.printed..];
        if !new.is_empty() {
            write!(out, "{}", new)?;
            out.flush()?;
            self.printed = text.len();
        }
        Ok(())
    }

    pub fn finish(&mut self, out: &mut dyn Write, turn: Option<&ConversationTurn>) -> Result<()> {
        let Some(turn) = turn else {
            return Ok(());
        };

        if self.hold {
            render_turn_body(out, turn)?;
        } else {
            self.update(out, &turn.content)?;
            writeln!(out)?;
        }

        if turn.kind == TurnKind::Failed {
            let reason = turn.error.as_deref().unwrap_or("unknown error");
            writeln!(out, "{}", cformat!("<red>[answer failed: {}]</>", reason))?;
        }
        Ok(())
    }
}

pub fn render_turn(out: &mut dyn Write, turn: &ConversationTurn) -> Result<()> {
    let label = match turn.role {
        TurnRole::User => cformat!("<bold><cyan>you</></>"),
        TurnRole::Assistant => cformat!("<bold><green>tutor</></>"),
        TurnRole::System => cformat!("<dim>system</>"),
    };
    let when = turn
        .timestamp
        .as_deref()
        .map(|ts| cformat!(" <dim>{}</>", ts))
        .unwrap_or_default();

    writeln!(out, "{}{}", label, when)?;
    render_turn_body(out, turn)?;
    if turn.kind == TurnKind::Failed {
        let reason = turn.error.as_deref().unwrap_or("unknown error");
        writeln!(out, "{}", cformat!("<red>[answer failed: {}]</>", reason))?;
    }
    writeln!(out)?;
    Ok(())
}

fn render_turn_body(out: &mut dyn Write, turn: &ConversationTurn) -> Result<()> {
    if turn.kind == TurnKind::LearningPath && turn.role == TurnRole::Assistant {
        if let Some(path) = LearningPath::parse(&turn.content) {
            return render_learning_path(out, &path);
        }
    }
    writeln!(out, "{}", turn.content)?;
    Ok(())
}

pub fn render_learning_path(out: &mut dyn Write, path: &LearningPath) -> Result<()> {
    let name = if path.name.is_empty() {
        "Learning Path"
    } else {
        &path.name
    };
    writeln!(out, "{}", cformat!("<bold>{}</>", name))?;
    writeln!(
        out,
        "Duration: {}",
        path.course_duration.as_deref().unwrap_or("N/A")
    )?;

    for (i, topic) in path.topics.iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, topic.name)?;
        if let Some(description) = topic.description.as_deref() {
            writeln!(out, "     {}", description)?;
        }
    }
    Ok(())
}

pub fn render_goals(out: &mut dyn Write, goals: &[LearningGoal]) -> Result<()> {
    if goals.is_empty() {
        writeln!(out, "No learning goals yet. Ask for a learning path with /path.")?;
        return Ok(());
    }

    for (i, goal) in goals.iter().enumerate() {
        let progress = format!("{:.0}%", goal.progress());
        writeln!(
            out,
            "{}",
            cformat!("<bold>{}. {}</> ({})", i + 1, goal.name, progress)
        )?;
        for (j, topic) in goal.topics().iter().enumerate() {
            let mark = if topic.completed { "x" } else { " " };
            writeln!(out, "   [{}] {}. {}", mark, j + 1, topic.name)?;
        }
    }
    Ok(())
}
