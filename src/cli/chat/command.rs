use eyre::{Result, bail, eyre};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    Help,
    Quit,
    Clear,
    History,
    ToggleQuiz,
    ToggleLearningPath,
    Goals,
    Search(String),
    /// 1-based goal and topic numbers, as listed by `/goals`
    Done { goal: usize, topic: usize },
}

impl Command {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let Some(rest) = input.strip_prefix('/') else {
            return Ok(Command::Ask(input.to_string()));
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let command = match name {
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "clear" => Command::Clear,
            "history" => Command::History,
            "quiz" => Command::ToggleQuiz,
            "path" => Command::ToggleLearningPath,
            "goals" => Command::Goals,
            "search" => {
                let query = rest[name.len()..].trim();
                if query.is_empty() {
                    bail!("Usage: /search <words>");
                }
                Command::Search(query.to_string())
            }
            "done" => {
                let [goal, topic] = args.as_slice() else {
                    bail!("Usage: /done <goal number> <topic number>");
                };
                Command::Done {
                    goal: parse_number(goal)?,
                    topic: parse_number(topic)?,
                }
            }
            other => bail!("Unknown command: /{}. Type /help for the list", other),
        };

        if !args.is_empty() && !matches!(command, Command::Done { .. } | Command::Search(_)) {
            bail!("/{} takes no arguments", name);
        }
        Ok(command)
    }
}

fn parse_number(value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(eyre!("Expected a number starting at 1, got {:?}", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_ask() {
        assert_eq!(
            Command::parse("  Explain recursion \n").unwrap(),
            Command::Ask("Explain recursion".into())
        );
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(Command::parse("/help").unwrap(), Command::Help);
        assert_eq!(Command::parse("/exit").unwrap(), Command::Quit);
        assert_eq!(Command::parse("/path").unwrap(), Command::ToggleLearningPath);
        assert_eq!(Command::parse("/quiz").unwrap(), Command::ToggleQuiz);
        assert_eq!(
            Command::parse("/done 1 3").unwrap(),
            Command::Done { goal: 1, topic: 3 }
        );
        assert_eq!(
            Command::parse("/search  linked   lists ").unwrap(),
            Command::Search("linked   lists".into())
        );
    }

    #[test]
    fn test_bad_commands() {
        assert!(Command::parse("/nope").is_err());
        assert!(Command::parse("/done 1").is_err());
        assert!(Command::parse("/done 0 2").is_err());
        assert!(Command::parse("/done a b").is_err());
        assert!(Command::parse("/help me").is_err());
        assert!(Command::parse("/search   ").is_err());
    }
}
