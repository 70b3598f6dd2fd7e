//! Startup input: command-line flags first, interactive prompts for the rest.

use clap::Parser;
use parley_core::error::InvalidId;
use parley_core::model::{LanguageCode, ParticipantId};
use std::io::{self, BufRead, Write};

#[derive(Parser, Debug, Default)]
#[command(version, about = "Real-time translated voice calls between two participants")]
pub struct Cli {
    /// Your participant id
    #[arg(long)]
    pub user: Option<String>,

    /// Participant to call; implies initiating
    #[arg(long, conflicts_with = "wait")]
    pub target: Option<String>,

    /// Wait for an incoming call instead of initiating
    #[arg(long)]
    pub wait: bool,

    /// Record your preferred language (for example "es") before connecting
    #[arg(long)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Initiate { target: ParticipantId },
    Wait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Startup {
    pub user: ParticipantId,
    pub role: Role,
    pub language: Option<LanguageCode>,
}

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("invalid participant id: {0}")]
    InvalidId(#[from] InvalidId),
    #[error("expected yes or no, got '{0}'")]
    NotYesNo(String),
    #[error("input closed before a value was entered")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub fn parse_yes_no(answer: &str) -> Result<bool, PromptError> {
    match answer.trim().to_lowercase().as_str() {
        "yes" | "y" => Ok(true),
        "no" | "n" => Ok(false),
        other => Err(PromptError::NotYesNo(other.to_string())),
    }
}

fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<String, PromptError> {
    write!(output, "{question}")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(PromptError::Closed);
    }
    Ok(line.trim().to_string())
}

/// Resolves who we are and what to do. Any invalid answer is an error; there
/// is no re-prompting.
pub fn resolve<R: BufRead, W: Write>(cli: Cli, input: &mut R, output: &mut W) -> Result<Startup, PromptError> {
    let user = match cli.user {
        Some(user) => user,
        None => ask(input, output, "Enter your User ID: ")?,
    };
    let user = ParticipantId::parse(&user)?;

    let initiate = if cli.target.is_some() {
        true
    } else if cli.wait {
        false
    } else {
        parse_yes_no(&ask(input, output, "Do you want to initiate a connection? (yes/no): ")?)?
    };

    let role = if initiate {
        let target = match cli.target {
            Some(target) => target,
            None => ask(input, output, "Enter Target User ID: ")?,
        };
        Role::Initiate {
            target: ParticipantId::parse(&target)?,
        }
    } else {
        Role::Wait
    };
    let language = cli
        .language
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(LanguageCode::new);
    Ok(Startup { user, role, language })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(cli: Cli, typed: &str) -> (Result<Startup, PromptError>, String) {
        let mut input = Cursor::new(typed.as_bytes().to_vec());
        let mut output = Vec::new();
        let result = resolve(cli, &mut input, &mut output);
        (result, String::from_utf8(output).unwrap())
    }

    fn id(raw: &str) -> ParticipantId {
        ParticipantId::parse(raw).unwrap()
    }

    #[test]
    fn test_yes_no_answers() {
        assert!(parse_yes_no(" YES ").unwrap());
        assert!(parse_yes_no("y").unwrap());
        assert!(!parse_yes_no("no").unwrap());
        assert!(matches!(parse_yes_no("maybe"), Err(PromptError::NotYesNo(_))));
    }

    #[test]
    fn test_fully_interactive_initiate() {
        let (result, shown) = run(Cli::default(), "alice\nyes\nbob\n");
        assert_eq!(
            result.unwrap(),
            Startup {
                user: id("alice"),
                role: Role::Initiate { target: id("bob") },
                language: None,
            }
        );
        assert!(shown.contains("Enter your User ID: "));
        assert!(shown.contains("Enter Target User ID: "));
    }

    #[test]
    fn test_interactive_wait_skips_target_prompt() {
        let (result, shown) = run(Cli::default(), "bob\nno\n");
        assert_eq!(result.unwrap().role, Role::Wait);
        assert!(!shown.contains("Target"));
    }

    #[test]
    fn test_flags_skip_prompts() {
        let cli = Cli {
            user: Some("alice".into()),
            target: Some("bob".into()),
            wait: false,
            language: Some("ES".into()),
        };
        let (result, shown) = run(cli, "");
        let startup = result.unwrap();
        assert_eq!(startup.role, Role::Initiate { target: id("bob") });
        assert_eq!(startup.language, Some(LanguageCode::new("es")));
        assert!(shown.is_empty());
    }

    #[test]
    fn test_invalid_input_is_rejected_immediately() {
        let (result, _) = run(Cli::default(), "al/ice\n");
        assert!(matches!(result, Err(PromptError::InvalidId(_))));

        let (result, _) = run(Cli::default(), "alice\nperhaps\n");
        assert!(matches!(result, Err(PromptError::NotYesNo(_))));

        let (result, _) = run(Cli::default(), "");
        assert!(matches!(result, Err(PromptError::Closed)));
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from(["parley", "--user", "alice", "--wait", "--language", "fr"]).unwrap();
        assert_eq!(cli.user.as_deref(), Some("alice"));
        assert_eq!(cli.language.as_deref(), Some("fr"));
        assert!(cli.wait);
        assert!(Cli::try_parse_from(["parley", "--target", "bob", "--wait"]).is_err());
    }
}
