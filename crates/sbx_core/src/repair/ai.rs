//! Source repair delegated to a text-generation backend.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use sbx_runner::SandboxProvider;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::CoreResult;
use crate::template::ENTRY_FILE;
use crate::types::ClassifiedError;

const SYSTEM_PROMPT: &str = r#"You repair a single-file React component that fails to build or render inside a Vite sandbox.

Rules:
- Return the COMPLETE corrected contents of src/App.jsx, not a diff.
- Keep the component's behavior and styling; change only what the errors require.
- The file must keep exactly one `export default`.
- Do not import local files or stylesheets; styling uses Tailwind utility classes.
- Only import npm packages that are already imported or are well-known and published.

Respond with a JSON object and nothing else:
{"code": "<full file contents>", "explanation": "<one sentence describing the fix>"}"#;

/// Request sent to a [`TextGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPrompt {
    pub system: String,
    pub source: String,
    pub errors: Vec<String>,
}

impl RepairPrompt {
    /// The user turn: errors first, then the full source.
    pub fn user_message(&self) -> String {
        let errors = self
            .errors
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{}. {}", i + 1, e))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "The sandbox reported these errors:\n{}\n\nCurrent {}:\n```jsx\n{}\n```",
            errors, ENTRY_FILE, self.source
        )
    }
}

/// Text returned by a [`TextGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedText {
    pub text: String,
    pub tokens_used: u64,
}

/// A request/response text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &RepairPrompt) -> CoreResult<GeneratedText>;

    /// Short label used in logs.
    fn name(&self) -> &str {
        "llm"
    }
}

/// Outcome of one AI repair call. `source` is the original on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiRepairOutcome {
    pub success: bool,
    pub source: String,
    pub explanation: Option<String>,
    pub tokens_used: u64,
}

/// Strictly-typed response body.
#[derive(Debug, Deserialize)]
struct RepairPayload {
    code: String,
    #[serde(default)]
    explanation: Option<String>,
}

/// Source extracted from a generator response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRepair {
    pub code: String,
    pub explanation: Option<String>,
}

pub struct AiRepairer {
    generator: Arc<dyn TextGenerator>,
    fence: Regex,
    code_field: Regex,
}

impl AiRepairer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            fence: Regex::new(r"(?s)^\s*```[\w+-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").expect("valid fence pattern"),
            code_field: Regex::new(r#""code"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid code field pattern"),
        }
    }

    /// Ask the generator for a rewrite of the entry file and write it back.
    ///
    /// Never fails; every problem yields `success = false`.
    pub async fn repair(&self, provider: &dyn SandboxProvider, errors: &[ClassifiedError]) -> AiRepairOutcome {
        let source = match provider.read_file(ENTRY_FILE).await {
            Ok(source) => source,
            Err(e) => {
                warn!("AI repair could not read {}: {}", ENTRY_FILE, e);
                return Self::failed(String::new(), 0);
            }
        };

        let prompt = RepairPrompt {
            system: SYSTEM_PROMPT.to_string(),
            source: source.clone(),
            errors: errors.iter().map(|e| e.message.clone()).collect(),
        };

        info!("Requesting AI repair from {} for {} error(s)", self.generator.name(), errors.len());
        let generated = match self.generator.generate(&prompt).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!("AI repair request failed: {}", e);
                return Self::failed(source, 0);
            }
        };
        let tokens = generated.tokens_used;

        let Some(parsed) = self.parse_response(&generated.text) else {
            warn!("AI repair response contained no usable source");
            return Self::failed(source, tokens);
        };
        if parsed.code.trim() == source.trim() {
            warn!("AI repair returned the source unchanged");
            return Self::failed(source, tokens);
        }

        if let Err(e) = provider.write_file(ENTRY_FILE, &parsed.code).await {
            warn!("AI repair could not write {}: {}", ENTRY_FILE, e);
            return Self::failed(source, tokens);
        }

        debug!("AI repair used {} tokens", tokens);
        AiRepairOutcome {
            success: true,
            source: parsed.code,
            explanation: parsed.explanation,
            tokens_used: tokens,
        }
    }

    fn failed(source: String, tokens_used: u64) -> AiRepairOutcome {
        AiRepairOutcome {
            success: false,
            source,
            explanation: None,
            tokens_used,
        }
    }

    /// Extract the replacement source from a response.
    ///
    /// Tries strict JSON, then salvages the `code` field, then accepts a bare
    /// component. Anything else, and any empty result, is rejected.
    pub fn parse_response(&self, text: &str) -> Option<ParsedRepair> {
        let body = self.strip_fence(text);

        let parsed = if body.trim_start().starts_with('{') {
            match serde_json::from_str::<RepairPayload>(body.trim()) {
                Ok(payload) => Some(ParsedRepair {
                    code: payload.code,
                    explanation: payload.explanation,
                }),
                Err(e) => {
                    debug!("Strict parse of AI response failed: {}", e);
                    self.salvage_code(&body)
                }
            }
        } else if body.contains("export default") {
            Some(ParsedRepair {
                code: body.clone(),
                explanation: None,
            })
        } else {
            None
        };

        let parsed = parsed?;
        let code = self.strip_fence(&parsed.code);
        if code.trim().is_empty() {
            return None;
        }
        Some(ParsedRepair {
            code: ensure_trailing_newline(code),
            explanation: parsed.explanation.filter(|e| !e.trim().is_empty()),
        })
    }

    fn strip_fence(&self, text: &str) -> String {
        match self.fence.captures(text) {
            Some(caps) => caps[1].to_string(),
            None => text.to_string(),
        }
    }

    fn salvage_code(&self, body: &str) -> Option<ParsedRepair> {
        let raw = self.code_field.captures(body)?.get(1)?.as_str();
        // Models often emit literal control characters inside the string.
        let escaped = raw.replace('\n', "\\n").replace('\r', "\\r").replace('\t', "\\t");
        let code: String = serde_json::from_str(&format!("\"{}\"", escaped)).ok()?;
        Some(ParsedRepair {
            code,
            explanation: None,
        })
    }
}

fn ensure_trailing_newline(mut code: String) -> String {
    if !code.ends_with('\n') {
        code.push('\n');
    }
    code
}
