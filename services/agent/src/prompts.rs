//! Prompt loading.
//!
//! Prompts are markdown files in one directory, keyed by file stem.

use anyhow::Context;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const INSTRUCTIONS_PROMPT: &str = "instructions";
pub const GREETING_PROMPT: &str = "greeting";

/// The two prompts a session needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    /// The persona handed to the engine when a session is built.
    pub instructions: String,
    /// Steers the opening reply.
    pub greeting: String,
}

impl Prompts {
    pub fn load(prompts_path: &Path) -> anyhow::Result<Self> {
        let mut prompts = load_prompts(prompts_path)
            .with_context(|| format!("Failed to read prompts from {}", prompts_path.display()))?;
        let mut take = |key: &str| {
            prompts
                .remove(key)
                .map(|p| p.trim().to_string())
                .with_context(|| format!("{key}.md not found in prompts directory"))
        };
        Ok(Self {
            instructions: take(INSTRUCTIONS_PROMPT)?,
            greeting: take(GREETING_PROMPT)?,
        })
    }
}

/// Reads every `*.md` file in `prompts_path`.
pub fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rumi-prompts-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_loads_markdown_prompts_by_stem() {
        let dir = scratch_dir("stems");
        fs::write(dir.join("instructions.md"), "You are Rumi.\n").unwrap();
        fs::write(dir.join("greeting.md"), "Say hi.").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let prompts = load_prompts(&dir).unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts["instructions"], "You are Rumi.\n");

        let loaded = Prompts::load(&dir).unwrap();
        assert_eq!(loaded.instructions, "You are Rumi.");
        assert_eq!(loaded.greeting, "Say hi.");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_greeting_is_an_error() {
        let dir = scratch_dir("missing");
        fs::write(dir.join("instructions.md"), "You are Rumi.").unwrap();

        let err = Prompts::load(&dir).unwrap_err();
        assert!(err.to_string().contains("greeting.md"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = std::env::temp_dir().join("rumi-prompts-does-not-exist");
        assert!(Prompts::load(&dir).is_err());
    }

    #[test]
    fn test_shipped_prompts_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("prompts");
        let prompts = Prompts::load(&dir).unwrap();
        assert!(prompts.instructions.contains("Rumi"));
        assert!(!prompts.greeting.is_empty());
    }
}
