//! The Vite + React application template every sandbox starts from.

use std::collections::HashMap;

use regex::Regex;

/// Path of the component generated source is written to.
pub const ENTRY_FILE: &str = "src/App.jsx";

/// Packages already declared by the template's `package.json`.
pub const BUNDLED_PACKAGES: &[&str] = &[
    "react",
    "react-dom",
    "vite",
    "@vitejs/plugin-react",
];

const PACKAGE_JSON: &str = r#"{
  "name": "{{app_name}}",
  "private": true,
  "version": "0.0.0",
  "type": "module",
  "scripts": {
    "dev": "vite",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "react": "^18.3.1",
    "react-dom": "^18.3.1"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "^4.3.1",
    "vite": "^5.4.0"
  }
}
"#;

const VITE_CONFIG: &str = r#"import { defineConfig } from 'vite';
import react from '@vitejs/plugin-react';

export default defineConfig({
  plugins: [react()],
  server: {
    host: '0.0.0.0',
    port: {{dev_port}},
    strictPort: true,
  },
  test: {
    environment: 'jsdom',
    globals: true,
  },
});
"#;

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>{{app_name}}</title>
    <script src="https://cdn.tailwindcss.com"></script>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>
"#;

const MAIN_JSX: &str = r#"import React from 'react';
import ReactDOM from 'react-dom/client';
import App from './App.jsx';

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
);
"#;

const PLACEHOLDER_APP: &str = r#"export default function App() {
  return <div>Loading...</div>;
}
"#;

/// A rendered template file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    pub path: String,
    pub content: String,
}

/// Renders the template files with `{{variable}}` substitution.
pub struct SandboxTemplate {
    variable_pattern: Regex,
    variables: HashMap<String, String>,
}

impl SandboxTemplate {
    pub fn new(app_name: &str, dev_port: u16) -> Self {
        let mut variables = HashMap::new();
        variables.insert("app_name".to_string(), sanitize_app_name(app_name));
        variables.insert("dev_port".to_string(), dev_port.to_string());
        Self {
            variable_pattern: Regex::new(r"\{\{([a-zA-Z_][a-zA-Z0-9_]*)\}\}").expect("valid variable pattern"),
            variables,
        }
    }

    /// All template files, in the order they are written.
    pub fn files(&self) -> Vec<TemplateFile> {
        [
            ("package.json", PACKAGE_JSON),
            ("vite.config.js", VITE_CONFIG),
            ("index.html", INDEX_HTML),
            ("src/main.jsx", MAIN_JSX),
            (ENTRY_FILE, PLACEHOLDER_APP),
        ]
        .into_iter()
        .map(|(path, raw)| TemplateFile {
            path: path.to_string(),
            content: self.render(raw),
        })
        .collect()
    }

    fn render(&self, content: &str) -> String {
        self.variable_pattern
            .replace_all(content, |caps: &regex::Captures| {
                self.variables
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// npm package names are lowercase and URL-safe.
fn sanitize_app_name(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "sandbox-app".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_renders_variables() {
        let template = SandboxTemplate::new("My Tool!", 5173);
        let files = template.files();
        assert_eq!(files.len(), 5);

        let package = files.iter().find(|f| f.path == "package.json").unwrap();
        assert!(package.content.contains("\"name\": \"my-tool\""));
        // The provider passes host and port when it launches the dev server.
        assert!(package.content.contains("\"dev\": \"vite\","));
        assert!(!package.content.contains("--port"));

        let vite = files.iter().find(|f| f.path == "vite.config.js").unwrap();
        assert!(vite.content.contains("port: 5173,"));

        for file in &files {
            assert!(!file.content.contains("{{"), "{} left unrendered", file.path);
        }
    }

    #[test]
    fn test_entry_file_is_last() {
        let files = SandboxTemplate::new("x", 3000).files();
        assert_eq!(files.last().unwrap().path, ENTRY_FILE);
    }

    #[test]
    fn test_bundled_packages_match_package_json() {
        let files = SandboxTemplate::new("x", 3000).files();
        let package: serde_json::Value = serde_json::from_str(&files[0].content).unwrap();
        for name in BUNDLED_PACKAGES {
            let declared = package["dependencies"].get(*name).is_some()
                || package["devDependencies"].get(*name).is_some();
            assert!(declared, "{name} not declared");
        }
    }

    #[test]
    fn test_sanitize_app_name() {
        assert_eq!(sanitize_app_name("Todo App"), "todo-app");
        assert_eq!(sanitize_app_name("!!!"), "sandbox-app");
    }
}
