//! Quoting for the remote POSIX shell
//!
//! ssh hands the remote side a single command string, so every word of a
//! [`RemoteCommand`] is quoted here before it leaves the process.

use launchpad_core::RemoteCommand;
use std::borrow::Cow;

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '@' | '%' | '+' | '=' | ',')
}

/// Quote a single word. Words made only of safe characters pass through unchanged.
///
/// A leading `~/` is left unquoted so the remote shell still expands it to the
/// login user's home directory.
pub fn quote(word: &str) -> Cow<'_, str> {
    if let Some(rest) = word.strip_prefix("~/") {
        return Cow::Owned(format!("~/{}", quote(rest)));
    }
    if !word.is_empty() && word.chars().all(is_safe) {
        return Cow::Borrowed(word);
    }
    // Use single quotes and escape any single quotes in the string
    Cow::Owned(format!("'{}'", word.replace('\'', "'\\''")))
}

/// Render a command as one shell command line
pub fn render(command: &RemoteCommand) -> String {
    let line = command
        .words()
        .map(quote)
        .collect::<Vec<_>>()
        .join(" ");
    match command.workdir() {
        Some(dir) => format!("cd {} && {}", quote(dir), line),
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("simple"), "simple");
        assert_eq!(quote("/opt/app-1.2/x.tar"), "/opt/app-1.2/x.tar");
        assert_eq!(quote("with space"), "'with space'");
        assert_eq!(quote("it's quoted"), "'it'\\''s quoted'");
        assert_eq!(quote(""), "''");
        assert_eq!(quote("$(reboot)"), "'$(reboot)'");
        assert_eq!(quote("a;b"), "'a;b'");
    }

    #[test]
    fn test_quote_keeps_home_expansion() {
        assert_eq!(quote("~/apps/web"), "~/apps/web");
        assert_eq!(quote("~/my apps"), "~/'my apps'");
        assert_eq!(quote("~root"), "'~root'");
    }

    #[test]
    fn test_render_with_workdir() {
        let cmd = RemoteCommand::new("docker")
            .args(["compose", "up", "-d"])
            .current_dir("/srv/my app");
        assert_eq!(render(&cmd), "cd '/srv/my app' && docker compose up -d");
    }

    #[test]
    fn test_render_never_splices_values() {
        let cmd = RemoteCommand::new("rm").args(["-rf", "/srv/app; rm -rf /"]);
        assert_eq!(render(&cmd), "rm -rf '/srv/app; rm -rf /'");
    }
}
