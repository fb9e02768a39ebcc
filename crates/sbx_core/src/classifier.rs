//! Maps raw diagnostics onto the error taxonomy.
//!
//! The rule table is ordered and the first matching rule wins.

use regex::{Captures, Regex};

use crate::packages::normalize_specifier;
use crate::types::{ClassifiedError, ErrorCategory, FixTier};

type SuggestionFn = fn(&Captures) -> Option<String>;

/// One row of the classification table.
struct ClassifierRule {
    pattern: Regex,
    category: ErrorCategory,
    tier: FixTier,
    suggest: Option<SuggestionFn>,
}

/// Ordered pattern table from raw text to category and fixability.
pub struct ErrorClassifier {
    rules: Vec<ClassifierRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolver and bundler wordings for an import that does not resolve.
pub(crate) const UNRESOLVED_IMPORT: &str =
    r"(?:Cannot find module|Can't resolve|[Ff]ailed to resolve import|Could not resolve)";

impl ErrorClassifier {
    pub fn new() -> Self {
        use ErrorCategory::*;
        use FixTier::*;

        let table: Vec<(String, ErrorCategory, FixTier, Option<SuggestionFn>)> = vec![
            // Local files cannot be installed; the source itself is wrong.
            (format!(r#"{UNRESOLVED_IMPORT}\s+['"](?:\.{{1,2}}/|/)[^'"]*['"]"#), MissingImport, Ai, None),
            (format!(r#"{UNRESOLVED_IMPORT}\s+['"]([^'"]+)['"]"#), MissingPackage, Auto, Some(suggest_install)),
            (
                r"\b([A-Za-z_$][\w$]*) is not defined".to_string(),
                MissingImport,
                Auto,
                Some(suggest_import),
            ),
            (
                r"(?i)out of memory|heap limit|\bENOMEM\b|allocation failed".to_string(),
                RuntimeError,
                User,
                None,
            ),
            (r"SyntaxError|Unexpected token|Unterminated".to_string(), SyntaxError, Ai, None),
            (r"TypeError|\bTS\d{4}\b".to_string(), TypeError, Ai, None),
            (r"ReferenceError|Uncaught|RangeError".to_string(), RuntimeError, Ai, None),
            (r"(?i)\btimed? ?out\b|ETIMEDOUT".to_string(), Timeout, Ai, None),
            (
                r"(?i)ECONNREFUSED|docker daemon|container \S+ is not running|no such container"
                    .to_string(),
                ProviderError,
                User,
                None,
            ),
        ];

        let rules = table
            .into_iter()
            .filter_map(|(pattern, category, tier, suggest)| {
                Regex::new(&pattern).ok().map(|pattern| ClassifierRule {
                    pattern,
                    category,
                    tier,
                    suggest,
                })
            })
            .collect();

        Self { rules }
    }

    /// Classify one raw message. Unmatched text is `unknown`, tier `ai`.
    pub fn classify(&self, message: &str) -> ClassifiedError {
        let text = message.trim();
        let text = if text.is_empty() { "Unknown error" } else { text };

        for rule in &self.rules {
            if let Some(caps) = rule.pattern.captures(text) {
                let mut error = ClassifiedError::new(rule.category, rule.tier, text);
                if let Some(suggestion) = rule.suggest.and_then(|suggest| suggest(&caps)) {
                    error = error.with_suggestion(suggestion);
                }
                return error;
            }
        }
        ClassifiedError::new(ErrorCategory::Unknown, FixTier::Ai, text)
    }

    pub fn classify_all<S: AsRef<str>>(&self, messages: &[S]) -> Vec<ClassifiedError> {
        messages.iter().map(|m| self.classify(m.as_ref())).collect()
    }

    /// The package a `missing-package` error asks for.
    pub fn missing_package(&self, error: &ClassifiedError) -> Option<String> {
        if error.category != ErrorCategory::MissingPackage {
            return None;
        }
        if let Some(name) = error
            .suggestion
            .as_deref()
            .and_then(|s| s.strip_prefix("npm install "))
        {
            return Some(name.trim().to_string());
        }
        self.rules
            .iter()
            .filter(|rule| rule.category == ErrorCategory::MissingPackage)
            .find_map(|rule| rule.pattern.captures(&error.message))
            .and_then(|caps| caps.get(1).and_then(|m| normalize_specifier(m.as_str())))
    }

    /// The identifier a `missing-import` error reports as undefined.
    pub fn undefined_identifier(&self, error: &ClassifiedError) -> Option<String> {
        if error.category != ErrorCategory::MissingImport {
            return None;
        }
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.category == ErrorCategory::MissingImport && rule.suggest.is_some())?;
        rule.pattern
            .captures(&error.message)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

fn suggest_install(caps: &Captures) -> Option<String> {
    let specifier = caps.get(1)?.as_str();
    normalize_specifier(specifier).map(|name| format!("npm install {}", name))
}

fn suggest_import(caps: &Captures) -> Option<String> {
    let identifier = caps.get(1)?.as_str();
    crate::repair::autofix::import_for(identifier).map(|stmt| format!("Add `{}`", stmt))
}

/// Stable sort by tier: `auto`, then `ai`, then `user`.
pub fn prioritize_errors(errors: &[ClassifiedError]) -> Vec<ClassifiedError> {
    let mut sorted = errors.to_vec();
    sorted.sort_by_key(|e| e.fixable);
    sorted
}

pub fn can_auto_fix(errors: &[ClassifiedError]) -> bool {
    errors.iter().any(|e| e.fixable == FixTier::Auto)
}

pub fn needs_ai_repair(errors: &[ClassifiedError]) -> bool {
    errors.iter().any(|e| e.fixable == FixTier::Ai)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &str) -> ClassifiedError {
        ErrorClassifier::new().classify(message)
    }

    #[test]
    fn test_rule_table_compiles() {
        assert_eq!(ErrorClassifier::new().rules.len(), 9);
    }

    #[test]
    fn test_missing_package_with_suggestion() {
        let error = classify("Error: Cannot find module 'left-pad'");
        assert_eq!(error.category, ErrorCategory::MissingPackage);
        assert_eq!(error.fixable, FixTier::Auto);
        assert_eq!(error.suggestion.as_deref(), Some("npm install left-pad"));

        let error = classify(r#"[vite] Failed to resolve import "@tanstack/react-query/devtools" from "src/App.jsx""#);
        assert_eq!(error.suggestion.as_deref(), Some("npm install @tanstack/react-query"));
    }

    #[test]
    fn test_relative_import_is_not_a_package() {
        let error = classify("Could not resolve './components/Header' from src/App.jsx");
        assert_eq!(error.category, ErrorCategory::MissingImport);
        assert_eq!(error.fixable, FixTier::Ai);
        assert!(error.suggestion.is_none());
    }

    #[test]
    fn test_first_match_wins() {
        // Both the undefined-identifier and ReferenceError rules match.
        let error = classify("ReferenceError: useState is not defined");
        assert_eq!(error.category, ErrorCategory::MissingImport);
        assert_eq!(error.fixable, FixTier::Auto);
        assert!(error.suggestion.unwrap().contains("from 'react'"));
    }

    #[test]
    fn test_table_categories() {
        let cases = [
            ("FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory", ErrorCategory::RuntimeError, FixTier::User),
            ("SyntaxError: Unexpected token '<'", ErrorCategory::SyntaxError, FixTier::Ai),
            ("src/App.tsx(3,7): error TS2322: Type 'string' is not assignable", ErrorCategory::TypeError, FixTier::Ai),
            ("TypeError: items.map is not a function", ErrorCategory::TypeError, FixTier::Ai),
            ("Uncaught Error: boom", ErrorCategory::RuntimeError, FixTier::Ai),
            ("Timeout after 5000ms", ErrorCategory::Timeout, FixTier::Ai),
            ("connect ECONNREFUSED 127.0.0.1:5173", ErrorCategory::ProviderError, FixTier::User),
            ("Cannot connect to the Docker daemon at unix:///var/run/docker.sock", ErrorCategory::ProviderError, FixTier::User),
            ("something odd happened", ErrorCategory::Unknown, FixTier::Ai),
        ];
        for (message, category, tier) in cases {
            let error = classify(message);
            assert_eq!((error.category, error.fixable), (category, tier), "{message}");
        }
    }

    #[test]
    fn test_empty_message_is_categorized() {
        let error = classify("   ");
        assert_eq!(error.category, ErrorCategory::Unknown);
        assert!(!error.message.is_empty());
    }

    #[test]
    fn test_missing_package_extraction() {
        let classifier = ErrorClassifier::new();
        let mut error = classifier.classify("Can't resolve 'lodash/debounce' in '/app/src'");
        assert_eq!(classifier.missing_package(&error).as_deref(), Some("lodash"));

        error.suggestion = None;
        assert_eq!(classifier.missing_package(&error).as_deref(), Some("lodash"));

        let other = classifier.classify("SyntaxError: x");
        assert_eq!(classifier.missing_package(&other), None);
    }

    #[test]
    fn test_undefined_identifier() {
        let classifier = ErrorClassifier::new();
        let error = classifier.classify("useEffect is not defined");
        assert_eq!(classifier.undefined_identifier(&error).as_deref(), Some("useEffect"));
    }

    #[test]
    fn test_prioritize_is_stable() {
        let errors = vec![
            ClassifiedError::new(ErrorCategory::RuntimeError, FixTier::User, "u1"),
            ClassifiedError::new(ErrorCategory::SyntaxError, FixTier::Ai, "a1"),
            ClassifiedError::new(ErrorCategory::MissingPackage, FixTier::Auto, "p1"),
            ClassifiedError::new(ErrorCategory::TypeError, FixTier::Ai, "a2"),
            ClassifiedError::new(ErrorCategory::MissingImport, FixTier::Auto, "p2"),
        ];
        let once = prioritize_errors(&errors);
        let messages: Vec<_> = once.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["p1", "p2", "a1", "a2", "u1"]);
        assert_eq!(prioritize_errors(&once), once);
    }

    #[test]
    fn test_existence_checks() {
        let auto = ClassifiedError::new(ErrorCategory::MissingPackage, FixTier::Auto, "x");
        let user = ClassifiedError::new(ErrorCategory::RuntimeError, FixTier::User, "y");
        assert!(can_auto_fix(&[auto.clone(), user.clone()]));
        assert!(!needs_ai_repair(&[auto, user.clone()]));
        assert!(!can_auto_fix(&[user]));
        assert!(!can_auto_fix(&[]));
    }
}
