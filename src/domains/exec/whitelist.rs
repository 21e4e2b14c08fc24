//! Command whitelist evaluation.
//!
//! A command is allowed when, after shell-style tokenization and
//! lower-casing, it either
//!
//! - equals a whitelist entry token for token,
//! - extends an entry with arguments that only use `[a-z0-9-_./]`, or
//! - is exactly a Python interpreter followed by one script path that
//!   resolves inside the workspace.
//!
//! Tokenization never involves a shell, so `;`, `&&`, `|`, backticks and
//! `$(...)` can only ever appear inside ordinary tokens, which then fail the
//! comparisons above.

use percent_encoding::percent_decode_str;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

use crate::core::security::PathGuard;

/// Interpreters accepted by the script-execution rule.
const SCRIPT_INTERPRETERS: &[&str] = &["python", "python3"];

/// Extensions accepted by the script-execution rule.
const SCRIPT_EXTENSIONS: &[&str] = &[".sh", ".py", ".pl", ".rb", ".bash"];

/// Split a command line into argv tokens using shell quoting rules.
pub fn tokenize(command: &str) -> Result<Vec<String>, shell_words::ParseError> {
    shell_words::split(command)
}

fn normalize(tokens: &[String]) -> Vec<String> {
    tokens.iter().map(|t| t.to_lowercase()).collect()
}

fn is_safe_argument(arg: &str) -> bool {
    !arg.is_empty()
        && arg
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '/'))
}

/// One allowed command or command prefix, stored normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistEntry {
    tokens: Vec<String>,
}

impl WhitelistEntry {
    /// Normalize a configured command string.
    ///
    /// Returns `None` for blank entries and entries with broken quoting.
    pub fn parse(raw: &str) -> Option<Self> {
        let tokens = tokenize(raw.trim()).ok()?;
        if tokens.is_empty() {
            return None;
        }
        Some(Self {
            tokens: normalize(&tokens),
        })
    }

    /// The normalized tokens of this entry.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// Which rule admitted a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitelistDecision {
    Exact,
    Prefix,
    Script,
    Denied,
}

impl WhitelistDecision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Self::Denied)
    }
}

/// On-disk whitelist format.
#[derive(Debug, Deserialize)]
struct WhitelistFile {
    #[serde(default)]
    allowed_commands: Vec<String>,
}

/// Read and normalize a whitelist file.
///
/// A missing or malformed file yields an empty list: everything is denied,
/// but the service still starts.
pub fn read_whitelist_file(path: &Path) -> Vec<WhitelistEntry> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            error!("Whitelist {:?} could not be read ({}); all commands will be denied", path, e);
            return Vec::new();
        }
    };

    let file: WhitelistFile = match serde_json::from_str(&raw) {
        Ok(file) => file,
        Err(e) => {
            error!("Invalid JSON in whitelist {:?} ({}); all commands will be denied", path, e);
            return Vec::new();
        }
    };

    parse_entries(file.allowed_commands.iter().map(String::as_str))
}

fn parse_entries<'a>(commands: impl IntoIterator<Item = &'a str>) -> Vec<WhitelistEntry> {
    commands
        .into_iter()
        .filter_map(|raw| {
            let entry = WhitelistEntry::parse(raw);
            if entry.is_none() {
                warn!("Skipping unusable whitelist entry: {:?}", raw);
            }
            entry
        })
        .collect()
}

/// The set of commands callers may run.
///
/// Entries are fixed at construction; replacing them is always an explicit
/// [`reload`](Self::reload) call.
#[derive(Debug)]
pub struct CommandWhitelist {
    entries: RwLock<Arc<Vec<WhitelistEntry>>>,
    guard: Arc<PathGuard>,
}

impl CommandWhitelist {
    /// Create a whitelist from already-normalized entries.
    pub fn new(entries: Vec<WhitelistEntry>, guard: Arc<PathGuard>) -> Self {
        Self {
            entries: RwLock::new(Arc::new(entries)),
            guard,
        }
    }

    /// Create a whitelist from raw command strings.
    pub fn from_commands<'a>(
        commands: impl IntoIterator<Item = &'a str>,
        guard: Arc<PathGuard>,
    ) -> Self {
        Self::new(parse_entries(commands), guard)
    }

    /// Create a whitelist from a JSON file (see [`read_whitelist_file`]).
    pub fn load_from_file(path: &Path, guard: Arc<PathGuard>) -> Self {
        let entries = read_whitelist_file(path);
        info!("Loaded {} whitelisted command(s) from {:?}", entries.len(), path);
        Self::new(entries, guard)
    }

    /// Snapshot of the current entries.
    pub fn entries(&self) -> Arc<Vec<WhitelistEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace all entries.
    pub fn reload(&self, entries: Vec<WhitelistEntry>) {
        let count = entries.len();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(entries);
        info!("Whitelist reloaded with {} command(s)", count);
    }

    /// Replace all entries with the contents of a JSON file.
    pub fn reload_from_file(&self, path: &Path) -> usize {
        let entries = read_whitelist_file(path);
        let count = entries.len();
        self.reload(entries);
        count
    }

    /// Whether `command` may be executed.
    pub fn is_allowed(&self, command: &str) -> bool {
        self.evaluate(command).is_allowed()
    }

    /// Decide which rule, if any, admits `command`.
    pub fn evaluate(&self, command: &str) -> WhitelistDecision {
        let original = match tokenize(command.trim()) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => return WhitelistDecision::Denied,
            Err(e) => {
                debug!("Command could not be tokenized: {}", e);
                return WhitelistDecision::Denied;
            }
        };
        let parts = normalize(&original);

        let entries = self.entries();
        for entry in entries.iter() {
            let allowed = entry.tokens();

            if parts.as_slice() == allowed {
                return WhitelistDecision::Exact;
            }

            if parts.len() > allowed.len()
                && parts.starts_with(allowed)
                && parts[allowed.len()..].iter().all(|arg| is_safe_argument(arg))
            {
                return WhitelistDecision::Prefix;
            }
        }

        if self.is_workspace_script(&parts, &original) {
            return WhitelistDecision::Script;
        }

        WhitelistDecision::Denied
    }

    fn is_workspace_script(&self, parts: &[String], original: &[String]) -> bool {
        // Exactly `<interpreter> <script>`; interpreter flags such as `-c`
        // would run code that never touches the checked path.
        let ([interpreter, script], [_, script_path]) = (parts, original) else {
            return false;
        };

        if !SCRIPT_INTERPRETERS.contains(&interpreter.as_str())
            || !SCRIPT_EXTENSIONS.iter().any(|ext| script.ends_with(ext))
        {
            return false;
        }

        // The guard percent-decodes but the process receives the literal
        // token, so both must name the same path.
        if !percent_decode_str(script_path).eq(script_path.bytes()) {
            warn!("Script execution denied: percent-encoded path {:?}", script_path);
            return false;
        }

        match self.guard.resolve(script_path) {
            Ok(resolved) => {
                debug!("Script {:?} resolved inside the workspace", resolved);
                true
            }
            Err(e) => {
                warn!("Script execution denied: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn whitelist(commands: &[&str]) -> CommandWhitelist {
        let guard = Arc::new(PathGuard::lexical("/work").unwrap());
        CommandWhitelist::from_commands(commands.iter().copied(), guard)
    }

    #[test]
    fn test_exact_match() {
        let wl = whitelist(&["ls -la"]);
        assert_eq!(wl.evaluate("ls -la"), WhitelistDecision::Exact);
        assert_eq!(wl.evaluate("  LS   -LA "), WhitelistDecision::Exact);
    }

    #[test]
    fn test_prefix_with_safe_arguments() {
        let wl = whitelist(&["ls -la"]);
        assert_eq!(wl.evaluate("ls -la /tmp"), WhitelistDecision::Prefix);
        assert_eq!(wl.evaluate("ls -la src/core ./docs"), WhitelistDecision::Prefix);
    }

    #[test]
    fn test_prefix_with_unsafe_arguments_denied() {
        let wl = whitelist(&["ls -la"]);
        assert!(!wl.is_allowed("ls -la $HOME"));
        assert!(!wl.is_allowed("ls -la 'my dir'"));
        assert!(!wl.is_allowed("ls -la foo*"));
        assert!(!wl.is_allowed("ls -la a|b"));
    }

    #[test]
    fn test_chained_commands_denied() {
        let wl = whitelist(&["ls -la"]);
        assert!(!wl.is_allowed("ls -la; rm -rf /"));
        assert!(!wl.is_allowed("ls -la && rm -rf /"));
        assert!(!wl.is_allowed("ls -la `rm -rf /`"));
        assert!(!wl.is_allowed("ls -la $(rm -rf /)"));
    }

    #[test]
    fn test_shorter_or_different_command_denied() {
        let wl = whitelist(&["ls -la"]);
        assert!(!wl.is_allowed("ls"));
        assert!(!wl.is_allowed("cat -la"));
        assert!(!wl.is_allowed("rm -rf /"));
        assert!(!wl.is_allowed(""));
        assert!(!wl.is_allowed("   "));
    }

    #[test]
    fn test_quoted_tokens_compared_as_units() {
        let wl = whitelist(&["echo 'hello world'"]);
        assert!(wl.is_allowed("echo \"hello world\""));
        assert!(!wl.is_allowed("echo hello world"));
    }

    #[test]
    fn test_unbalanced_quotes_denied() {
        let wl = whitelist(&["echo"]);
        assert!(!wl.is_allowed("echo 'unterminated"));
    }

    #[test]
    fn test_script_inside_workspace_allowed() {
        let wl = whitelist(&[]);
        assert_eq!(wl.evaluate("python3 scripts/job.py"), WhitelistDecision::Script);
        assert_eq!(wl.evaluate("python /work/tools/run.sh"), WhitelistDecision::Script);
    }

    #[test]
    fn test_script_outside_workspace_denied() {
        let wl = whitelist(&[]);
        assert!(!wl.is_allowed("python3 ../escape.py"));
        assert!(!wl.is_allowed("python3 /etc/evil.py"));
        assert!(!wl.is_allowed("python3 /workspace2/evil.py"));
        assert!(!wl.is_allowed("python3 bad%ff.py"));
    }

    #[test]
    fn test_percent_encoded_script_path_denied() {
        let wl = whitelist(&[]);
        // Decodes to a path inside the root, but the OS sees the literal one
        assert!(!wl.is_allowed("python3 a%2fb/../../outside.py"));
        assert!(!wl.is_allowed("python3 my%20job.py"));
    }

    #[test]
    fn test_script_rule_rejects_extra_arguments() {
        let wl = whitelist(&[]);
        assert!(!wl.is_allowed("python3 -c 'import os' job.py"));
        assert!(!wl.is_allowed("python3 -m http.server job.py"));
        assert!(!wl.is_allowed("python3 other.py job.py"));
        assert_eq!(wl.evaluate("python3 job.py"), WhitelistDecision::Script);
    }

    #[test]
    fn test_script_rule_requires_interpreter_and_extension() {
        let wl = whitelist(&[]);
        assert!(!wl.is_allowed("bash job.sh"));
        assert!(!wl.is_allowed("python3 job.txt"));
        assert!(!wl.is_allowed("python3"));
    }

    #[test]
    fn test_blank_and_broken_entries_skipped() {
        let wl = whitelist(&["", "   ", "echo 'broken", "pwd"]);
        assert_eq!(wl.entries().len(), 1);
        assert!(wl.is_allowed("pwd"));
    }

    #[test]
    fn test_empty_whitelist_denies_everything() {
        let wl = whitelist(&[]);
        assert!(!wl.is_allowed("ls"));
        assert!(!wl.is_allowed("pwd"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("whitelist.json");
        fs::write(&path, r#"{"allowed_commands": ["ls -la", "git status"]}"#).unwrap();

        let guard = Arc::new(PathGuard::new(temp_dir.path()).unwrap());
        let wl = CommandWhitelist::load_from_file(&path, guard);
        assert_eq!(wl.entries().len(), 2);
        assert!(wl.is_allowed("git status"));
    }

    #[test]
    fn test_missing_or_malformed_file_degrades_to_empty() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.json");
        assert!(read_whitelist_file(&missing).is_empty());

        let malformed = temp_dir.path().join("malformed.json");
        fs::write(&malformed, "{ not json").unwrap();
        assert!(read_whitelist_file(&malformed).is_empty());

        let wrong_shape = temp_dir.path().join("wrong.json");
        fs::write(&wrong_shape, r#"{"allowed_commands": "ls"}"#).unwrap();
        assert!(read_whitelist_file(&wrong_shape).is_empty());
    }

    #[test]
    fn test_reload_is_explicit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("whitelist.json");
        fs::write(&path, r#"{"allowed_commands": ["ls"]}"#).unwrap();

        let guard = Arc::new(PathGuard::new(temp_dir.path()).unwrap());
        let wl = CommandWhitelist::load_from_file(&path, guard);

        fs::write(&path, r#"{"allowed_commands": ["pwd"]}"#).unwrap();
        // Changing the file alone has no effect
        assert!(wl.is_allowed("ls"));
        assert!(!wl.is_allowed("pwd"));

        assert_eq!(wl.reload_from_file(&path), 1);
        assert!(!wl.is_allowed("ls"));
        assert!(wl.is_allowed("pwd"));
    }
}
