use std::path::Path;
use tracing::{debug, warn};

const TASK: &str = include_str!("../../prompts/task.md");
const REVIEW_FIRST: &str = include_str!("../../prompts/review_first.md");
const REVIEW_SECOND: &str = include_str!("../../prompts/review_second.md");
const CODEX: &str = include_str!("../../prompts/codex.md");
const CODEX_EVAL: &str = include_str!("../../prompts/codex_eval.md");
const FINALIZE: &str = include_str!("../../prompts/finalize.md");
const PLAN: &str = include_str!("../../prompts/plan.md");

/// Prompt templates for every phase. Placeholders look like `{{PLAN_FILE}}`.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub task: String,
    pub review_first: String,
    pub review_second: String,
    pub codex: String,
    pub codex_eval: String,
    pub finalize: String,
    pub plan: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self::embedded()
    }
}

impl Prompts {
    pub fn embedded() -> Self {
        Self {
            task: TASK.to_string(),
            review_first: REVIEW_FIRST.to_string(),
            review_second: REVIEW_SECOND.to_string(),
            codex: CODEX.to_string(),
            codex_eval: CODEX_EVAL.to_string(),
            finalize: FINALIZE.to_string(),
            plan: PLAN.to_string(),
        }
    }

    /// Embedded prompts, with any `<name>.md` found in `dir` taking precedence.
    pub fn load(dir: &Path) -> Self {
        let mut prompts = Self::embedded();
        for (name, slot) in [
            ("task", &mut prompts.task),
            ("review_first", &mut prompts.review_first),
            ("review_second", &mut prompts.review_second),
            ("codex", &mut prompts.codex),
            ("codex_eval", &mut prompts.codex_eval),
            ("finalize", &mut prompts.finalize),
            ("plan", &mut prompts.plan),
        ] {
            let path = dir.join(format!("{}.md", name));
            match std::fs::read_to_string(&path) {
                Ok(content) if !content.trim().is_empty() => {
                    debug!("Using prompt override {:?}", path);
                    *slot = content;
                }
                Ok(_) => warn!("Prompt override {:?} is empty, using built-in", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to read prompt override {:?}: {}", path, e),
            }
        }
        prompts
    }
}

/// Substitute `{{KEY}}` placeholders. Unknown placeholders are left alone.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}
