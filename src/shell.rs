use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::path::lexical_normalize;

/// Access-time policy, mirroring real filesystem mount options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTimeMode {
    /// No read/write distinction: every command updates access time.
    ReadWrite,
    /// Always update on access.
    Atime,
    /// Update only for content-reading commands (modern default).
    Relatime,
}

impl Default for AccessTimeMode {
    fn default() -> Self {
        AccessTimeMode::Relatime
    }
}

/// Shell screening configuration: dangerous substring patterns plus
/// first-token allow/block lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellConfig {
    pub dangerous_patterns: Vec<String>,
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub access_time_mode: AccessTimeMode,
}

impl ShellConfig {
    /// A sensible default policy for interactive use.
    pub fn default_policy() -> Self {
        Self {
            dangerous_patterns: vec![
                "rm -rf /".to_string(),
                "mkfs".to_string(),
                "dd if=/dev/zero".to_string(),
                ":(){".to_string(),
                "> /dev/sd".to_string(),
            ],
            allowed_commands: Vec::new(),
            blocked_commands: vec!["shutdown".to_string(), "reboot".to_string()],
            access_time_mode: AccessTimeMode::Relatime,
        }
    }
}

/// Rejects a command containing any configured dangerous pattern
/// (case-sensitive substring match). Empty or whitespace-only input is an
/// `InvalidInput`, not a security violation; the two are distinct failures.
pub fn validate_command_security(command: &str, config: &ShellConfig) -> WorkspaceResult<()> {
    if command.trim().is_empty() {
        return Err(WorkspaceError::InvalidInput(
            "Command cannot be empty".to_string(),
        ));
    }

    for pattern in &config.dangerous_patterns {
        if command.contains(pattern.as_str()) {
            return Err(WorkspaceError::ShellSecurity(format!(
                "Command contains dangerous pattern: {}",
                pattern
            )));
        }
    }

    Ok(())
}

/// Applies the allow/block lists to a command's first token. Separate from
/// the dangerous-pattern gate so callers opt in per the configured policy.
pub fn check_command_restrictions(command: &str, config: &ShellConfig) -> WorkspaceResult<()> {
    let tokens = tokenize(command)?;
    let first = tokens
        .first()
        .ok_or_else(|| WorkspaceError::InvalidInput("Command cannot be empty".to_string()))?;

    if config.blocked_commands.iter().any(|c| c == first) {
        return Err(WorkspaceError::ShellSecurity(format!(
            "Command '{}' is blocked",
            first
        )));
    }

    if !config.allowed_commands.is_empty() && !config.allowed_commands.iter().any(|c| c == first) {
        return Err(WorkspaceError::ShellSecurity(format!(
            "Command '{}' is not in the allowed list",
            first
        )));
    }

    Ok(())
}

/// Splits a command into words, honoring simple single/double quoting and
/// backslash escapes. Not a shell grammar; good enough for path extraction
/// and first-token policy lookups.
pub fn tokenize(input: &str) -> WorkspaceResult<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = ' ';
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }

        match c {
            '\\' if !in_quotes => {
                escaped = true;
            }
            '\'' | '"' if in_quotes && c == quote_char => {
                in_quotes = false;
            }
            '\'' | '"' if !in_quotes => {
                in_quotes = true;
                quote_char = c;
            }
            ' ' | '\t' | '\n' | '\r' if !in_quotes => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            _ => {
                current.push(c);
            }
        }
    }

    if !current.is_empty() {
        words.push(current);
    }

    if in_quotes {
        return Err(WorkspaceError::InvalidInput("Unclosed quote".to_string()));
    }

    Ok(words)
}

const SHELL_OPERATORS: &[&str] = &["|", ">", ">>", "<", "2>&1", "2>", "&&", "||", ";", "&"];
const REDIRECTIONS: &[&str] = &[">", ">>", "<", "2>", "2>&1"];

/// Commands that read file content; these update access time under relatime.
const CONTENT_READING_COMMANDS: &[&str] = &[
    "cat", "less", "more", "head", "tail", "grep", "awk", "sed", "sort", "uniq", "wc", "diff",
    "cmp", "file", "strings", "hexdump", "od", "xxd", "vim", "nano", "emacs", "stat",
];

/// Commands that only write or touch metadata; no atime update under relatime.
const WRITE_ORIENTED_COMMANDS: &[&str] = &[
    "echo", "touch", "cp", "mv", "tar", "mkdir", "rmdir", "rm", "chmod", "chown", "tee", "ln",
];

/// Directory listings and lookups that never read content.
const METADATA_ONLY_COMMANDS: &[&str] = &[
    "ls", "find", "du", "df", "tree", "locate", "which", "whereis", "pwd", "dirname", "basename",
];

/// Heuristically extracts workspace paths a command might touch. Tokens that
/// are shell operators or flags are skipped; the rest count as candidate
/// paths when they are absolute, contain a separator, or carry an extension.
/// Relative candidates resolve against `cwd` and only workspace-rooted
/// results are returned. Best effort by design: command substitution and
/// other full-grammar constructs may be over- or under-extracted.
pub fn extract_file_paths_from_command(
    command: &str,
    workspace_root: &str,
    cwd: Option<&str>,
) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    if command.trim().is_empty() {
        return paths;
    }

    // Fall back to whitespace splitting when quoting is unbalanced.
    let tokens = match tokenize(command) {
        Ok(t) => t,
        Err(_) => command.split_whitespace().map(|s| s.to_string()).collect(),
    };
    if tokens.len() < 2 {
        return paths;
    }

    let cwd = cwd.unwrap_or(workspace_root);
    let root = lexical_normalize(workspace_root);
    let mut after_redirection = false;

    for token in &tokens[1..] {
        if SHELL_OPERATORS.contains(&token.as_str()) {
            after_redirection = REDIRECTIONS.contains(&token.as_str());
            continue;
        }
        if token.starts_with('-') {
            after_redirection = false;
            continue;
        }

        // A redirection target is a path regardless of its shape.
        let looks_like_path = after_redirection
            || token.starts_with('/')
            || token.contains('/')
            || token.rfind('.').map(|i| i > 0).unwrap_or(false);
        after_redirection = false;

        if !looks_like_path {
            continue;
        }

        let absolute = if token.starts_with('/') {
            lexical_normalize(token)
        } else {
            lexical_normalize(&format!("{}/{}", cwd, token))
        };

        if absolute == root || absolute.starts_with(&format!("{}/", root)) {
            paths.insert(absolute);
        }
    }

    paths
}

/// Decides whether executing a command should update the simulated access
/// time of the files it reads, consulting the configured mode. Unknown
/// commands update conservatively under relatime.
pub fn should_update_access_time(command_name: &str, mode: AccessTimeMode) -> bool {
    match mode {
        AccessTimeMode::ReadWrite | AccessTimeMode::Atime => true,
        AccessTimeMode::Relatime => {
            if CONTENT_READING_COMMANDS.contains(&command_name) {
                true
            } else if WRITE_ORIENTED_COMMANDS.contains(&command_name)
                || METADATA_ONLY_COMMANDS.contains(&command_name)
            {
                false
            } else {
                true
            }
        }
    }
}

/// Identifies the canonical primary command of a compound line for policy
/// lookups: the last simple command after `;`, `&&`, `||` and pipelines,
/// with `git <subcommand>` kept as a unit.
pub fn identify_primary_command(command: &str) -> String {
    let mut segment = command.trim();
    if let Some(idx) = segment.rfind(';') {
        segment = segment[idx + 1..].trim();
    }
    for sep in ["&&", "||"] {
        if let Some(idx) = segment.rfind(sep) {
            segment = segment[idx + sep.len()..].trim();
        }
    }
    if let Some(idx) = segment.rfind('|') {
        segment = segment[idx + 1..].trim();
    }

    let tokens = match tokenize(segment) {
        Ok(t) => t,
        Err(_) => return String::new(),
    };
    match tokens.as_slice() {
        [] => String::new(),
        [first, second, ..] if first == "git" => format!("git {}", second),
        [first, ..] => first.clone(),
    }
}
