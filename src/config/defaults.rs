use std::path::PathBuf;

pub fn default_max_iterations() -> u32 {
    50
}

pub fn default_iteration_delay_ms() -> u64 {
    2000
}

pub fn default_task_retry_count() -> u32 {
    1
}

pub fn default_kill_grace_ms() -> u64 {
    100
}

pub fn default_plans_dir() -> PathBuf {
    PathBuf::from("docs/plans")
}

pub fn default_claude_binary() -> PathBuf {
    // Check common install location first
    if let Some(home) = std::env::var_os("HOME") {
        let local_path = PathBuf::from(home).join(".claude/local/claude");
        if local_path.exists() {
            return local_path;
        }
    }
    // Fall back to PATH lookup
    PathBuf::from("claude")
}

pub fn default_claude_error_patterns() -> Vec<String> {
    vec!["You've hit your limit".to_string()]
}

pub fn default_claude_help_command() -> String {
    "claude /usage".to_string()
}

pub fn default_codex_binary() -> PathBuf {
    PathBuf::from("codex")
}

pub fn default_codex_error_patterns() -> Vec<String> {
    vec![
        "Rate limit reached".to_string(),
        "You've hit your usage limit".to_string(),
    ]
}

pub fn default_codex_help_command() -> String {
    "codex /status".to_string()
}

pub fn default_true() -> bool {
    true
}
