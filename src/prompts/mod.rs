//! System prompt assembly and environment context.
//!
//! The prompt is layered: a static core (overridable through
//! `RUDDER_SYSTEM_MD`), the project prompt (`PROJECT.md`), a short
//! environment summary, and hierarchical memory (global, project, session
//! files). [`EnvironmentCollector`] additionally builds the richer
//! first-message context parts for hosts that want them.

use crate::config::AgentConfig;
use crate::types::{AgentError, Part, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Environment variable overriding the core system prompt.
///
/// `1`/`true` selects `~/.rudder/system.md`; any other non-empty value is
/// treated as a path. `0`/`false`/unset keeps the built-in prompt.
pub const SYSTEM_MD_ENV: &str = "RUDDER_SYSTEM_MD";

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an interactive assistant with access to tools. Work the problem to \
completion: prefer acting through tools over guessing, verify results before \
reporting them, and try an alternative approach when one fails.

Core behaviors:
- Use the declared tools for anything that touches the user's environment; \
never fabricate tool output.
- Keep responses grounded in what the tools actually returned.
- When a task needs several steps, carry them out in sequence without asking \
for permission between steps the user already approved.
- Stop and hand control back to the user when the request is complete or \
genuinely ambiguous.";

/// Builds the system prompt for a session.
pub struct PromptManager {
    config: Arc<AgentConfig>,
}

impl PromptManager {
    /// Create a prompt manager over the agent configuration.
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self { config }
    }

    /// Assemble the full system prompt: core (or override), project
    /// prompt, environment summary, language hint, and memory suffix.
    pub fn core_system_prompt(&self) -> Result<String> {
        let mut prompt = self.base_prompt()?;

        if let Some((source, project)) = self.load_project_prompt() {
            prompt.push_str("\n\n# Project configuration\n# Source: ");
            prompt.push_str(&source);
            prompt.push_str("\n\n");
            prompt.push_str(&project);
        }

        let working_dir = self.config.workspace.working_dir();
        prompt.push_str(&format!(
            "\n\nSystem: {}\nWorking directory: {}",
            std::env::consts::OS,
            working_dir.display()
        ));

        if let Some(language) = &self.config.agent.language {
            prompt.push_str(&format!(
                "\nRespond in {language} with accurate technical terminology."
            ));
        }

        let memory = self.load_hierarchical_memory();
        if !memory.trim().is_empty() {
            prompt.push_str("\n\n---\n\n");
            prompt.push_str(memory.trim());
        }

        Ok(prompt)
    }

    fn base_prompt(&self) -> Result<String> {
        let override_value = std::env::var(SYSTEM_MD_ENV).unwrap_or_default();
        let normalized = override_value.trim().to_lowercase();

        if normalized.is_empty() || normalized == "0" || normalized == "false" {
            return Ok(DEFAULT_SYSTEM_PROMPT.to_string());
        }

        let path = if normalized == "1" || normalized == "true" {
            config_dir().join("system.md")
        } else {
            PathBuf::from(override_value)
        };

        std::fs::read_to_string(&path).map_err(|_| {
            AgentError::Configuration(format!(
                "System prompt file not found: {}",
                path.display()
            ))
        })
    }

    fn load_project_prompt(&self) -> Option<(String, String)> {
        let path = self.config.workspace.working_dir().join("PROJECT.md");
        let content = std::fs::read_to_string(&path).ok()?;
        if content.trim().is_empty() {
            return None;
        }
        debug!(path = %path.display(), "Loaded project prompt");
        Some((path.display().to_string(), content))
    }

    /// Concatenate memory files from all scopes (global, project, session)
    /// with source markers. Missing files are skipped.
    pub fn load_hierarchical_memory(&self) -> String {
        let working_dir = self.config.workspace.working_dir();
        let mut files: Vec<PathBuf> = Vec::new();
        if let Some(home) = home_dir() {
            files.push(home.join(".rudder/MEMORY.md"));
        }
        files.push(working_dir.join("RUDDER.md"));
        files.push(working_dir.join(".rudder/session.md"));

        let mut memory = String::new();
        for path in files {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            if content.trim().is_empty() {
                continue;
            }
            memory.push_str(&format!("--- Memory from: {} ---\n", path.display()));
            memory.push_str(content.trim());
            memory.push_str("\n\n");
        }
        memory
    }
}

/// Collects environment context parts for session bootstrap.
pub struct EnvironmentCollector {
    config: Arc<AgentConfig>,
}

impl EnvironmentCollector {
    /// Create a collector over the agent configuration.
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self { config }
    }

    /// Build the environment context: date, platform, working directory,
    /// a bounded project-structure listing, and git info when present.
    pub fn collect(&self) -> Vec<Part> {
        let working_dir = self.config.workspace.working_dir();
        let today = Local::now().format("%A, %B %d, %Y");

        let mut context = format!(
            "Setting up the session context.\n\
             Today's date is {today}.\n\
             Operating system: {}\n\
             Working directory: {}",
            std::env::consts::OS,
            working_dir.display()
        );

        let listing = folder_glance(&working_dir, 20);
        if !listing.is_empty() {
            context.push_str("\n\n## Directory contents\n");
            context.push_str(&listing);
        }

        let mut parts = vec![Part::text(context)];
        if let Some(git) = git_summary(&working_dir) {
            parts.push(Part::text(git));
        }
        parts
    }
}

/// Top-level entries of a directory, directories first, capped.
fn folder_glance(dir: &Path, limit: usize) -> String {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return String::new();
    };

    let mut names: Vec<(bool, String)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                return None;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            Some((is_dir, name))
        })
        .collect();

    names.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    let total = names.len();

    let mut out = String::new();
    for (is_dir, name) in names.into_iter().take(limit) {
        if is_dir {
            out.push_str(&format!("- {name}/\n"));
        } else {
            out.push_str(&format!("- {name}\n"));
        }
    }
    if total > limit {
        out.push_str(&format!("... and {} more entries\n", total - limit));
    }
    out
}

/// Current branch from `.git/HEAD`, if the directory is a repository.
fn git_summary(dir: &Path) -> Option<String> {
    let head = std::fs::read_to_string(dir.join(".git/HEAD")).ok()?;
    let branch = head
        .trim()
        .strip_prefix("ref: refs/heads/")
        .unwrap_or("(detached)");
    Some(format!("Git repository on branch: {branch}"))
}

fn config_dir() -> PathBuf {
    home_dir()
        .map(|home| home.join(".rudder"))
        .unwrap_or_else(|| PathBuf::from(".rudder"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
