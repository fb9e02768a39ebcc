//! Deterministic source and dependency fixes.

use std::sync::Arc;

use regex::Regex;
use sbx_runner::SandboxProvider;
use tracing::{debug, info, warn};

use crate::classifier::ErrorClassifier;
use crate::packages::PackageDetector;
use crate::template::ENTRY_FILE;
use crate::types::{ClassifiedError, ErrorCategory, FixTier};

/// Identifiers with a well-known import.
const KNOWN_IMPORTS: &[(&str, &str)] = &[
    ("React", "import React from 'react';"),
    ("useState", "import { useState } from 'react';"),
    ("useEffect", "import { useEffect } from 'react';"),
    ("useRef", "import { useRef } from 'react';"),
    ("useMemo", "import { useMemo } from 'react';"),
    ("useCallback", "import { useCallback } from 'react';"),
    ("useContext", "import { useContext } from 'react';"),
    ("useReducer", "import { useReducer } from 'react';"),
    ("useLayoutEffect", "import { useLayoutEffect } from 'react';"),
    ("useId", "import { useId } from 'react';"),
    ("createContext", "import { createContext } from 'react';"),
    ("forwardRef", "import { forwardRef } from 'react';"),
    ("memo", "import { memo } from 'react';"),
    ("lazy", "import { lazy } from 'react';"),
    ("Suspense", "import { Suspense } from 'react';"),
    ("Fragment", "import { Fragment } from 'react';"),
];

/// Utility classes that do not exist, and the nearest valid class.
const INVALID_CLASSES: &[(&str, &str)] = &[
    ("bg-gray-750", "bg-gray-700"),
    ("bg-gray-850", "bg-gray-800"),
    ("bg-slate-750", "bg-slate-700"),
    ("bg-slate-850", "bg-slate-800"),
    ("text-gray-750", "text-gray-700"),
    ("text-gray-850", "text-gray-800"),
    ("border-gray-750", "border-gray-700"),
    ("border-gray-850", "border-gray-800"),
    ("shadow-3xl", "shadow-2xl"),
    ("rounded-4xl", "rounded-3xl"),
    ("text-10xl", "text-9xl"),
];

pub fn import_for(identifier: &str) -> Option<&'static str> {
    KNOWN_IMPORTS
        .iter()
        .find(|(name, _)| *name == identifier)
        .map(|(_, stmt)| *stmt)
}

/// What the auto-fixer changed and what it could not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoFixOutcome {
    pub fixes_applied: Vec<String>,
    pub unresolved: Vec<ClassifiedError>,
}

impl AutoFixOutcome {
    pub fn success(&self) -> bool {
        self.unresolved.is_empty()
    }
}

pub struct AutoFixer {
    classifier: Arc<ErrorClassifier>,
    detector: Arc<PackageDetector>,
    invalid_classes: Vec<(Regex, &'static str, &'static str)>,
    default_export: Regex,
    bare_default_export: Regex,
    stylesheet_import: Regex,
}

impl AutoFixer {
    pub fn new(classifier: Arc<ErrorClassifier>, detector: Arc<PackageDetector>) -> Self {
        let invalid_classes = INVALID_CLASSES
            .iter()
            .filter_map(|(bad, good)| {
                let pattern = format!(r"(^|[\s:'`\x22]){}([\s'`\x22]|$)", regex::escape(bad));
                Regex::new(&pattern).ok().map(|re| (re, *bad, *good))
            })
            .collect();

        Self {
            classifier,
            detector,
            invalid_classes,
            default_export: Regex::new(r"(?m)^[ \t]*export\s+default\b[ \t]*").expect("valid export pattern"),
            bare_default_export: Regex::new(r"(?m)^[ \t]*export\s+default\s+[A-Za-z_$][\w$]*[ \t]*;?[ \t]*(?:\r?\n|$)")
                .expect("valid export pattern"),
            stylesheet_import: Regex::new(
                r#"(?m)^[ \t]*import\s+(?:[\w${}\s,*]+\s+from\s+)?['"](\.{1,2}/[^'"]+\.(?:css|scss|sass|less))['"];?[ \t]*\r?\n?"#,
            )
            .expect("valid stylesheet pattern"),
        }
    }

    /// Fix every `auto`-tier error, then run the blanket source pass.
    pub async fn fix(&self, provider: &dyn SandboxProvider, errors: &[ClassifiedError]) -> AutoFixOutcome {
        let mut outcome = AutoFixOutcome::default();

        let original = match provider.read_file(ENTRY_FILE).await {
            Ok(source) => source,
            Err(e) => {
                warn!("Auto-fix could not read {}: {}", ENTRY_FILE, e);
                outcome.unresolved = errors.to_vec();
                return outcome;
            }
        };
        let mut source = original.clone();

        let mut installs: Vec<(String, ClassifiedError)> = Vec::new();
        let mut import_fixes: Vec<(String, ClassifiedError)> = Vec::new();

        for error in errors {
            if error.fixable != FixTier::Auto {
                outcome.unresolved.push(error.clone());
                continue;
            }
            match error.category {
                ErrorCategory::MissingPackage => match self.installable_package(error) {
                    Some(name) => {
                        if !installs.iter().any(|(n, _)| *n == name) {
                            installs.push((name, error.clone()));
                        }
                    }
                    None => outcome.unresolved.push(error.clone()),
                },
                ErrorCategory::MissingImport => {
                    let statement = self
                        .classifier
                        .undefined_identifier(error)
                        .and_then(|ident| import_for(&ident).map(|stmt| (ident, stmt)));
                    match statement {
                        Some((ident, stmt)) if !source.contains(stmt) => {
                            source = add_import(&source, stmt);
                            import_fixes.push((format!("Added import for {}", ident), error.clone()));
                        }
                        _ => outcome.unresolved.push(error.clone()),
                    }
                }
                _ => outcome.unresolved.push(error.clone()),
            }
        }

        if !installs.is_empty() {
            let names: Vec<String> = installs.iter().map(|(n, _)| n.clone()).collect();
            info!("Installing missing packages: {}", names.join(", "));
            let result = provider.install_packages(&names).await;
            if result.success {
                outcome
                    .fixes_applied
                    .extend(names.iter().map(|n| format!("Installed {}", n)));
                if let Err(e) = provider.restart_dev_server().await {
                    warn!("Dev server restart after install failed: {}", e);
                }
            } else {
                warn!("Package install failed: {}", result.stderr.trim());
                outcome.unresolved.extend(installs.into_iter().map(|(_, e)| e));
            }
        }

        let (fixed, blanket) = self.apply_blanket_fixes(&source);
        source = fixed;

        if source != original {
            match provider.write_file(ENTRY_FILE, &source).await {
                Ok(()) => {
                    outcome.fixes_applied.extend(import_fixes.into_iter().map(|(fix, _)| fix));
                    outcome.fixes_applied.extend(blanket);
                }
                Err(e) => {
                    warn!("Auto-fix could not write {}: {}", ENTRY_FILE, e);
                    outcome.unresolved.extend(import_fixes.into_iter().map(|(_, e)| e));
                }
            }
        }

        debug!(
            "Auto-fix applied {} fix(es), {} error(s) unresolved",
            outcome.fixes_applied.len(),
            outcome.unresolved.len()
        );
        outcome
    }

    fn installable_package(&self, error: &ClassifiedError) -> Option<String> {
        let name = self.classifier.missing_package(error)?;
        if !self.detector.is_valid_name(&name) {
            warn!("Refusing to install malformed package name '{}'", name);
            return None;
        }
        if self.detector.is_excluded(&name) {
            debug!("'{}' is bundled or built in; not installing", name);
            return None;
        }
        Some(name)
    }

    /// Source fixes applied regardless of the reported errors.
    pub fn apply_blanket_fixes(&self, source: &str) -> (String, Vec<String>) {
        let mut fixes = Vec::new();
        let mut text = source.to_string();

        for (pattern, bad, good) in &self.invalid_classes {
            // Matches share delimiters, so repeat until stable.
            let mut replaced = false;
            while pattern.is_match(&text) {
                text = pattern
                    .replace_all(&text, |caps: &regex::Captures| format!("{}{}{}", &caps[1], good, &caps[2]))
                    .into_owned();
                replaced = true;
            }
            if replaced {
                fixes.push(format!("Replaced {} with {}", bad, good));
            }
        }

        let (deduped, removed) = self.keep_last_default_export(&text);
        if removed > 0 {
            text = deduped;
            fixes.push(format!("Removed {} duplicate default export(s)", removed));
        }

        let stylesheets: Vec<String> = self
            .stylesheet_import
            .captures_iter(&text)
            .map(|caps| caps[1].to_string())
            .collect();
        if !stylesheets.is_empty() {
            text = self.stylesheet_import.replace_all(&text, "").into_owned();
            fixes.extend(stylesheets.into_iter().map(|s| format!("Removed stylesheet import {}", s)));
        }

        (text, fixes)
    }

    fn keep_last_default_export(&self, source: &str) -> (String, usize) {
        let starts: Vec<usize> = self.default_export.find_iter(source).map(|m| m.start()).collect();
        if starts.len() < 2 {
            return (source.to_string(), 0);
        }

        let keep_from = starts[starts.len() - 1];
        let (head, tail) = source.split_at(keep_from);
        // `export default Name;` lines go away entirely; declarations lose the keyword.
        let head = self.bare_default_export.replace_all(head, "");
        let head = self.default_export.replace_all(&head, "");
        (format!("{}{}", head, tail), starts.len() - 1)
    }
}

/// Insert `statement` after the last import, or at the top. Idempotent.
pub fn add_import(source: &str, statement: &str) -> String {
    if source.contains(statement) {
        return source.to_string();
    }

    let lines: Vec<&str> = source.lines().collect();
    let mut last_import_end = None;
    let mut in_import = false;
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("import ") || trimmed.starts_with("import{") {
            in_import = true;
        }
        if in_import
            && (trimmed.contains(" from ")
                || trimmed.starts_with("import '")
                || trimmed.starts_with("import \"")
                || trimmed.trim_end().ends_with(';'))
        {
            last_import_end = Some(idx);
            in_import = false;
        }
    }

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    match last_import_end {
        Some(end) => {
            out.extend_from_slice(&lines[..=end]);
            out.push(statement);
            out.extend_from_slice(&lines[end + 1..]);
        }
        None => {
            out.push(statement);
            out.extend_from_slice(&lines);
        }
    }

    let mut result = out.join("\n");
    if source.ends_with('\n') {
        result.push('\n');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_runner::{CommandResult, MockProvider};

    fn fixer() -> AutoFixer {
        AutoFixer::new(Arc::new(ErrorClassifier::new()), Arc::new(PackageDetector::new()))
    }

    #[test]
    fn test_add_import_after_last_import() {
        let source = "import React from 'react';\nimport {\n  Camera,\n} from 'lucide-react';\n\nexport default function App() {}\n";
        let fixed = add_import(source, "import { useState } from 'react';");
        assert_eq!(
            fixed,
            "import React from 'react';\nimport {\n  Camera,\n} from 'lucide-react';\nimport { useState } from 'react';\n\nexport default function App() {}\n"
        );
    }

    #[test]
    fn test_add_import_at_top_and_idempotent() {
        let source = "export default function App() { const [a] = useState(0); }";
        let once = add_import(source, "import { useState } from 'react';");
        assert!(once.starts_with("import { useState } from 'react';\nexport default"));

        let twice = add_import(&once, "import { useState } from 'react';");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_blanket_replaces_invalid_classes() {
        let source = r#"<div className="bg-gray-750 hover:bg-gray-750 p-4 shadow-3xl">x</div>"#;
        let (fixed, fixes) = fixer().apply_blanket_fixes(source);
        assert_eq!(fixed, r#"<div className="bg-gray-700 hover:bg-gray-700 p-4 shadow-2xl">x</div>"#);
        assert_eq!(fixes.len(), 2);

        let (untouched, none) = fixer().apply_blanket_fixes(r#"<div className="bg-gray-7500">"#);
        assert_eq!(untouched, r#"<div className="bg-gray-7500">"#);
        assert!(none.is_empty());
    }

    #[test]
    fn test_blanket_keeps_last_default_export() {
        let source = "export default function Old() { return null; }\n\nfunction App() { return <div />; }\nexport default Old;\nexport default App;\n";
        let (fixed, fixes) = fixer().apply_blanket_fixes(source);
        assert_eq!(
            fixed,
            "function Old() { return null; }\n\nfunction App() { return <div />; }\nexport default App;\n"
        );
        assert_eq!(fixes, vec!["Removed 2 duplicate default export(s)"]);
    }

    #[test]
    fn test_blanket_drops_stylesheet_imports() {
        let source = "import React from 'react';\nimport './App.css';\nimport styles from '../theme.module.scss';\nimport 'leaflet/dist/leaflet.css';\n";
        let (fixed, fixes) = fixer().apply_blanket_fixes(source);
        assert_eq!(fixed, "import React from 'react';\nimport 'leaflet/dist/leaflet.css';\n");
        assert_eq!(fixes.len(), 2);
    }

    #[test]
    fn test_clean_source_is_unchanged() {
        let source = "import React from 'react';\nexport default function App() { return <p className=\"bg-gray-700\" />; }\n";
        let (fixed, fixes) = fixer().apply_blanket_fixes(source);
        assert_eq!(fixed, source);
        assert!(fixes.is_empty());
    }

    #[tokio::test]
    async fn test_fix_installs_and_imports() {
        let mock = MockProvider::new().with_file(
            "/app/src/App.jsx",
            "export default function App() { const [n] = useState(0); return n; }\n",
        );
        mock.create().await.unwrap();

        let classifier = ErrorClassifier::new();
        let errors = vec![
            classifier.classify("Error: Cannot find module 'left-pad'"),
            classifier.classify("useState is not defined"),
        ];
        let outcome = fixer().fix(&mock, &errors).await;

        assert!(outcome.success(), "{:?}", outcome.unresolved);
        assert!(outcome.fixes_applied.contains(&"Installed left-pad".to_string()));
        assert!(outcome.fixes_applied.contains(&"Added import for useState".to_string()));
        assert!(mock
            .file("/app/src/App.jsx")
            .unwrap()
            .starts_with("import { useState } from 'react';"));
        assert_eq!(mock.command_count("npm install"), 1);
        assert_eq!(mock.command_count("nohup npm run dev"), 1);
    }

    #[tokio::test]
    async fn test_fix_leaves_non_auto_and_failed_installs() {
        let mock = MockProvider::new()
            .with_file("/app/src/App.jsx", "export default () => null;\n")
            .on_command("npm install", CommandResult::failed(1, "404 Not Found"));
        mock.create().await.unwrap();

        let classifier = ErrorClassifier::new();
        let errors = vec![
            classifier.classify("Cannot find module 'no-such-pkg'"),
            classifier.classify("SyntaxError: Unexpected token"),
            classifier.classify("Cannot find module 'Bad Name'"),
        ];
        let outcome = fixer().fix(&mock, &errors).await;

        assert!(!outcome.success());
        assert_eq!(outcome.unresolved.len(), 3);
        assert!(outcome.fixes_applied.is_empty());
        assert!(!mock.was_called("write_file"));
    }
}
