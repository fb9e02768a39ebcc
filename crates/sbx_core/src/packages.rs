//! Static detection of npm dependencies referenced by generated source.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use tracing::debug;

use crate::template::BUNDLED_PACKAGES;

const MAX_NAME_LENGTH: usize = 214;

const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "cluster", "crypto", "dgram", "dns", "events", "fs",
    "http", "http2", "https", "module", "net", "os", "path", "perf_hooks", "process",
    "querystring", "readline", "stream", "string_decoder", "timers", "tls", "tty", "url",
    "util", "v8", "vm", "worker_threads", "zlib",
];

/// Shorthand names models tend to emit, mapped to the published package.
const ALIASES: &[(&str, &str)] = &[
    ("lucide", "lucide-react"),
    ("headlessui", "@headlessui/react"),
    ("heroicons", "@heroicons/react"),
    ("framer", "framer-motion"),
    ("react-router", "react-router-dom"),
];

/// Finds the packages a source file needs installed.
pub struct PackageDetector {
    patterns: Vec<Regex>,
    name_pattern: Regex,
    aliases: HashMap<&'static str, &'static str>,
    excluded: HashSet<&'static str>,
}

impl Default for PackageDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageDetector {
    pub fn new() -> Self {
        let patterns = [
            // import x from 'a'; import { x } from "a"; import 'a';
            r#"\bimport\s+(?:[\w$*{}\s,]+?\s+from\s+)?['"]([^'"\n]+)['"]"#,
            r#"\bexport\s+(?:\*(?:\s+as\s+[\w$]+)?|\{[^}]*\})\s+from\s+['"]([^'"\n]+)['"]"#,
            r#"\brequire\(\s*['"]([^'"\n]+)['"]\s*\)"#,
            r#"\bimport\(\s*['"]([^'"\n]+)['"]\s*\)"#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();

        let mut excluded: HashSet<&'static str> = NODE_BUILTINS.iter().copied().collect();
        excluded.extend(BUNDLED_PACKAGES.iter().copied());

        Self {
            patterns,
            name_pattern: Regex::new(r"^(?:@[a-z0-9\-~][a-z0-9\-._~]*/)?[a-z0-9\-~][a-z0-9\-._~]*$")
                .expect("valid package name pattern"),
            aliases: ALIASES.iter().copied().collect(),
            excluded,
        }
    }

    /// De-duplicated package names in order of first reference.
    pub fn detect(&self, source: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = Vec::new();
        for pattern in &self.patterns {
            for caps in pattern.captures_iter(source) {
                if let Some(m) = caps.get(1) {
                    found.push((m.start(), m.as_str().to_string()));
                }
            }
        }
        found.sort_by_key(|(pos, _)| *pos);

        let mut seen = HashSet::new();
        let mut packages = Vec::new();
        for (_, specifier) in found {
            let Some(name) = normalize_specifier(&specifier) else {
                continue;
            };
            let name = self
                .aliases
                .get(name.as_str())
                .map(|real| real.to_string())
                .unwrap_or(name);

            if self.excluded.contains(name.as_str()) {
                continue;
            }
            if !self.is_valid_name(&name) {
                debug!("Ignoring malformed package name: {}", name);
                continue;
            }
            if seen.insert(name.clone()) {
                packages.push(name);
            }
        }
        packages
    }

    /// Lowercase, npm-safe characters, at most 214 bytes.
    pub fn is_valid_name(&self, name: &str) -> bool {
        !name.is_empty() && name.len() <= MAX_NAME_LENGTH && self.name_pattern.is_match(name)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }
}

/// Reduce a module specifier to its package name.
///
/// Relative, absolute, `node:` and URL specifiers have no package.
pub fn normalize_specifier(specifier: &str) -> Option<String> {
    let spec = specifier.trim();
    if spec.is_empty()
        || spec.starts_with('.')
        || spec.starts_with('/')
        || spec.starts_with("node:")
        || spec.contains("://")
    {
        return None;
    }

    let mut segments = spec.split('/');
    let first = segments.next()?;
    if let Some(scope) = first.strip_prefix('@') {
        let name = segments.next()?;
        if scope.is_empty() || name.is_empty() {
            return None;
        }
        Some(format!("@{}/{}", scope, name))
    } else {
        Some(first.to_string())
    }
}
