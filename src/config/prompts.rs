//! Prompt templates for Klipp.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub extraction: ExtractionPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Prompts for per-video clip extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionPrompts {
    pub system: String,
    pub user: String,
}

impl Default for ExtractionPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a video search relevance expert. The video you are given has already been judged relevant to the user's query by an upstream retrieval stage. Your task is to find the best moments inside it.

Given the user's query and the video's timestamped transcript:
1. Identify 1 to 3 clips (time ranges) that best answer the query
2. Aim for clips roughly 30 to 60 seconds long
3. Tag each clip "exact" if it directly addresses the query, or "related" if it covers an adjacent concept
4. Write a brief snippet explaining why the clip is relevant

Respond with a JSON object in exactly this shape:
{"clips": [{"start_time_seconds": 120.0, "end_time_seconds": 165.0, "snippet": "Explains how B-frames reduce bitrate", "relevance": "exact"}]}

Rules:
- Clip boundaries must come from the transcript timestamps
- Return at least 1 and at most 3 clips
- Never invent timestamps outside the transcript"#
                .to_string(),

            user: r#"User Query: "{{query}}"

Video Title: {{title}}
Description: {{description}}
Topics: {{topics}}
Chapters:
{{chapters}}

Timestamped Transcript:
{{transcript}}

Find the 1 to 3 clips from this video that best answer the query."#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&std::collections::HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let extraction_path = custom_path.join("extraction.toml");
            if extraction_path.exists() {
                let content = std::fs::read_to_string(&extraction_path)?;
                prompts.extraction = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(
        &self,
        template: &str,
        vars: &std::collections::HashMap<String, String>,
    ) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(!prompts.extraction.system.is_empty());
        assert!(prompts.extraction.user.contains("{{query}}"));
        assert!(prompts.extraction.user.contains("{{transcript}}"));
    }

    #[test]
    fn test_render_template() {
        let template = "Hello {{name}}, you have {{count}} messages.";
        let mut vars = std::collections::HashMap::new();
        vars.insert("name".to_string(), "Alice".to_string());
        vars.insert("count".to_string(), "5".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Hello Alice, you have 5 messages.");
    }

    #[test]
    fn test_provided_vars_override_custom() {
        let mut prompts = Prompts::default();
        prompts
            .variables
            .insert("query".to_string(), "from-config".to_string());

        let mut vars = std::collections::HashMap::new();
        vars.insert("query".to_string(), "from-call".to_string());

        let result = prompts.render_with_custom("{{query}}", &vars);
        assert_eq!(result, "from-call");
    }
}
