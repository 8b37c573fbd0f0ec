use crate::error::ExecutorError;

/// Scans accumulated output for configured literal error strings such as
/// rate-limit messages.
#[derive(Debug, Clone, Default)]
pub struct PatternScanner {
    patterns: Vec<String>,
    help_command: String,
}

impl PatternScanner {
    pub fn new(patterns: Vec<String>, help_command: String) -> Self {
        let patterns = patterns
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect();
        Self {
            patterns,
            help_command,
        }
    }

    /// First configured pattern contained in `output` (case-sensitive).
    pub fn find<'a>(&'a self, output: &str) -> Option<&'a str> {
        self.patterns
            .iter()
            .map(String::as_str)
            .find(|pattern| output.contains(pattern))
    }

    pub fn check(&self, output: &str) -> Option<ExecutorError> {
        self.find(output).map(|pattern| ExecutorError::PatternMatched {
            pattern: pattern.to_string(),
            help_command: self.help_command.clone(),
        })
    }
}
