//! Structured remote commands
//!
//! Commands are kept as a program plus an argument list. Quoting for the remote shell
//! happens in the transport, so values such as paths and image references are never
//! spliced into command text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("command is empty")]
    Empty,

    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),

    #[error("trailing backslash")]
    TrailingBackslash,
}

/// A command to run on the remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
    workdir: Option<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the command from `dir` on the remote side
    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Build a command from already-split words
    pub fn from_words<I, S>(words: I) -> Result<Self, CommandParseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut words = words.into_iter().map(Into::into);
        let program = words.next().ok_or(CommandParseError::Empty)?;
        if program.is_empty() {
            return Err(CommandParseError::Empty);
        }
        Ok(Self::new(program).args(words))
    }

    /// Parse a command line such as `docker compose up -d` into words
    pub fn parse(line: &str) -> Result<Self, CommandParseError> {
        Self::from_words(split_words(line)?)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn workdir(&self) -> Option<&str> {
        self.workdir.as_deref()
    }

    /// Program followed by its arguments
    pub fn words(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for word in self.words() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            if word.is_empty() || word.contains(char::is_whitespace) {
                write!(f, "{:?}", word)?;
            } else {
                f.write_str(word)?;
            }
        }
        Ok(())
    }
}

/// Split a command line into words using POSIX-like quoting rules.
///
/// Supports single quotes (literal), double quotes (with `\"`, `\\`, `\$` and `` \` ``
/// escapes) and backslash escapes outside quotes. No expansion is performed.
pub fn split_words(line: &str) -> Result<Vec<String>, CommandParseError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(CommandParseError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(CommandParseError::UnterminatedQuote('"')),
                        },
                        Some(c) => current.push(c),
                        None => return Err(CommandParseError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err(CommandParseError::TrailingBackslash),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_command() {
        let cmd = RemoteCommand::parse("docker compose up -d").unwrap();
        assert_eq!(cmd.program(), "docker");
        assert_eq!(cmd.get_args(), &["compose", "up", "-d"]);
        assert_eq!(cmd.workdir(), None);
    }

    #[test]
    fn test_split_words_quotes() {
        assert_eq!(
            split_words(r#"echo 'a b' "c \"d\"" e\ f"#).unwrap(),
            vec!["echo", "a b", "c \"d\"", "e f"]
        );
        assert_eq!(split_words("  ").unwrap(), Vec::<String>::new());
        assert_eq!(split_words("''").unwrap(), vec![""]);
    }

    #[test]
    fn test_split_words_errors() {
        assert_eq!(
            split_words("echo 'oops"),
            Err(CommandParseError::UnterminatedQuote('\''))
        );
        assert_eq!(
            split_words("echo \"oops"),
            Err(CommandParseError::UnterminatedQuote('"'))
        );
        assert_eq!(split_words("echo \\"), Err(CommandParseError::TrailingBackslash));
        assert_eq!(RemoteCommand::parse("   "), Err(CommandParseError::Empty));
    }

    #[test]
    fn test_display_quotes_words_with_spaces() {
        let cmd = RemoteCommand::new("cp")
            .arg("/srv/my app")
            .arg("/srv/backups")
            .current_dir("/srv");
        assert_eq!(cmd.to_string(), r#"cp "/srv/my app" /srv/backups"#);
    }
}
