//! Turning raw command tokens into something the OS launcher can run.
//!
//! Two escaping dialects exist. The Windows family runs everything through
//! the command interpreter (`cmd.exe /C` or `command.com /C`) and protects
//! arguments with double quotes. The POSIX family has no interpreter prefix
//! and protects shell metacharacters with backslashes.

use crate::error::ExecError;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use sysinfo::System;
use tracing::{debug, warn};

const WINDOWS_LEGACY_PREFIX: &[&str] = &["command.com", "/C"];
const WINDOWS_PREFIX: &[&str] = &["cmd.exe", "/C"];

/// Host operating system, as far as command construction is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Windows 95/98/ME, where the interpreter is `command.com`
    WindowsLegacy,
    /// Windows NT and later
    Windows,
    Posix,
    /// Host could not be identified; treated like POSIX without a prefix
    Unknown,
}

/// Argument escaping rules of a platform family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeDialect {
    Windows,
    Posix,
}

impl Platform {
    /// Detect the platform this process runs on
    pub fn current() -> Self {
        if cfg!(windows) {
            let long_version = System::long_os_version().unwrap_or_default();
            if is_legacy_windows(&long_version) {
                Platform::WindowsLegacy
            } else {
                Platform::Windows
            }
        } else if cfg!(unix) {
            Platform::Posix
        } else {
            warn!(
                os = std::env::consts::OS,
                "Host platform could not be determined, no command prefix will be used"
            );
            Platform::Unknown
        }
    }

    pub fn dialect(&self) -> EscapeDialect {
        match self {
            Platform::WindowsLegacy | Platform::Windows => EscapeDialect::Windows,
            Platform::Posix | Platform::Unknown => EscapeDialect::Posix,
        }
    }

    /// Interpreter tokens put in front of every command
    pub fn shell_prefix(&self) -> &'static [&'static str] {
        match self {
            Platform::WindowsLegacy => WINDOWS_LEGACY_PREFIX,
            Platform::Windows => WINDOWS_PREFIX,
            Platform::Posix | Platform::Unknown => &[],
        }
    }
}

fn is_legacy_windows(long_version: &str) -> bool {
    ["Windows 95", "Windows 98", "Windows ME", "Windows Me"]
        .iter()
        .any(|name| long_version.contains(name))
}

/// Build the escaped argument vector for `raw` on `platform`.
///
/// A leading interpreter prefix already present in `raw` is removed and
/// added back once, so building twice never double-prefixes.
pub fn build(raw: &[String], platform: Platform) -> Result<Vec<String>, ExecError> {
    let prefix = platform.shell_prefix();
    let mut tokens = strip_prefix(raw, prefix);
    if tokens.is_empty() || (tokens.len() == 1 && tokens[0].trim().is_empty()) {
        return Err(ExecError::InvalidCommand("No command specified.".to_string()));
    }

    tokens = match platform.dialect() {
        EscapeDialect::Windows => escape_windows(tokens),
        EscapeDialect::Posix => escape_posix(tokens),
    };

    let mut argv: Vec<String> = prefix.iter().map(|p| p.to_string()).collect();
    argv.extend(tokens);
    Ok(argv)
}

fn strip_prefix(raw: &[String], prefix: &[&str]) -> Vec<String> {
    let mut rest = raw;
    for expected in prefix {
        match rest.split_first() {
            Some((first, tail)) if first.eq_ignore_ascii_case(expected) => rest = tail,
            _ => break,
        }
    }
    rest.to_vec()
}

// The interpreter wants every argument containing spaces quoted, and then the
// whole line after `/C` quoted once more.
fn escape_windows(tokens: Vec<String>) -> Vec<String> {
    // A single token may already be a full command line; its spaces cannot
    // be told apart from argument separators, so it is only wrapped.
    if tokens.len() == 1 {
        return vec![format!("\"{}\"", tokens[0])];
    }

    let line = tokens
        .iter()
        .map(|arg| {
            if arg.contains(' ') && !is_quoted(arg) {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    vec![format!("\"{line}\"")]
}

fn is_quoted(arg: &str) -> bool {
    let trimmed = arg.trim();
    trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"')
}

fn escape_posix(tokens: Vec<String>) -> Vec<String> {
    // A single token is taken as an already escaped command line and broken
    // up on whitespace not preceded by a backslash.
    if tokens.len() == 1 {
        return split_unescaped_whitespace(&tokens[0]);
    }
    tokens.iter().map(|token| escape_shell(token)).collect()
}

/// Split on runs of whitespace that are not escaped with a backslash
pub fn split_unescaped_whitespace(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut previous: Option<char> = None;
    for c in line.chars() {
        if c.is_whitespace() && previous != Some('\\') {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
        previous = Some(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn needs_escape(c: char) -> bool {
    matches!(
        c,
        '|' | '&'
            | ';'
            | '<'
            | '>'
            | '('
            | ')'
            | '$'
            | '`'
            | '\\'
            | '"'
            | '\''
            | ' '
            | '\t'
            | '*'
            | '?'
            | '['
            | '#'
            | '~'
            | '='
            | '%'
    )
}

/// Backslash-escape shell metacharacters and drop raw `\n` and `\r\n` line breaks.
///
/// Tokens without any metacharacter come back unchanged. An empty token
/// becomes `''` so that re-parsing keeps it as an argument.
pub fn escape_shell(token: &str) -> String {
    if token.is_empty() {
        return "''".to_string();
    }
    let mut escaped = String::with_capacity(token.len() + 8);
    let mut chars = token.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\n' => {}
            '\r' if chars.peek() == Some(&'\n') => {}
            c if needs_escape(c) => {
                escaped.push('\\');
                escaped.push(c);
            }
            c => escaped.push(c),
        }
    }
    escaped
}

/// One argument handed to the OS launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchArg {
    /// Passed through the runtime's own argument quoting
    Plain(String),
    /// Appended to the command line verbatim (only meaningful on Windows)
    Raw(String),
}

impl LaunchArg {
    pub fn as_str(&self) -> &str {
        match self {
            LaunchArg::Plain(s) | LaunchArg::Raw(s) => s,
        }
    }
}

/// A fully resolved process creation request
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub program: String,
    pub args: Vec<LaunchArg>,
    pub working_directory: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    /// Whether the child's stdin should be a pipe (otherwise it reads nothing)
    pub stdin_piped: bool,
}

impl LaunchRequest {
    /// Build `raw` for `platform` and convert the result into the launcher's form
    pub fn from_command(raw: &[String], platform: Platform) -> Result<Self, ExecError> {
        let argv = build(raw, platform)?;
        let (program, args) = match platform.dialect() {
            EscapeDialect::Windows => windows_launch_args(&argv, platform.shell_prefix().len()),
            EscapeDialect::Posix if strip_prefix(raw, platform.shell_prefix()).len() == 1 => {
                command_line_launch_args(&argv)
            }
            EscapeDialect::Posix => posix_launch_args(&argv),
        }
        .ok_or_else(|| ExecError::InvalidCommand("No command specified.".to_string()))?;

        Ok(Self {
            program,
            args,
            working_directory: None,
            env: None,
            stdin_piped: false,
        })
    }

    /// Render the request as a single line, for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(LaunchArg::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn windows_launch_args(argv: &[String], prefix_len: usize) -> Option<(String, Vec<LaunchArg>)> {
    let (program, rest) = argv.split_first()?;
    let args = rest
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            if i + 1 < prefix_len {
                LaunchArg::Plain(arg.clone())
            } else {
                LaunchArg::Raw(arg.clone())
            }
        })
        .collect();
    Some((program.clone(), args))
}

// A caller-escaped command line was only split on unescaped whitespace; each
// part loses its backslash escapes and nothing else is interpreted.
fn command_line_launch_args(parts: &[String]) -> Option<(String, Vec<LaunchArg>)> {
    let mut words = parts.iter().map(|part| unescape_backslashes(part));
    let program = words.next()?;
    Some((program, words.map(LaunchArg::Plain).collect()))
}

/// Drop every backslash that escapes the following character
pub fn unescape_backslashes(part: &str) -> String {
    let mut unescaped = String::with_capacity(part.len());
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        match (c, chars.clone().next()) {
            ('\\', Some(next)) => {
                unescaped.push(next);
                chars.next();
            }
            (c, _) => unescaped.push(c),
        }
    }
    unescaped
}

// Tokens were escaped one by one, so shell-word parsing restores them exactly.
fn posix_launch_args(argv: &[String]) -> Option<(String, Vec<LaunchArg>)> {
    let words = match shell_words::split(&argv.join(" ")) {
        Ok(words) => words,
        Err(e) => {
            debug!(error = %e, "Command line is not valid shell syntax, using tokens as given");
            argv.to_vec()
        }
    };
    let mut words = words.into_iter();
    let program = words.next()?;
    Some((program, words.map(LaunchArg::Plain).collect()))
}

/// Command tokens as the caller gave them, joined by a space
pub struct DisplayCommand<'a>(pub &'a [String]);

impl fmt::Display for DisplayCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}
