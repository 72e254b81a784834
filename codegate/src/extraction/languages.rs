//! Per-language tree-sitter configuration for import extraction. The shape
//! follows the grammar-table style: a static config per language with the
//! grammar constructor and the query that captures import statements.

use crate::packages::types::Ecosystem;

#[derive(Clone)]
pub struct TSLanguageConfig {
    /// Names this config answers to, e.g. ["python", "py"]
    pub language_ids: &'static [&'static str],

    /// Extensions that classify a file: rs, js, py, ...
    pub file_extensions: &'static [&'static str],

    /// tree-sitter grammar for this language
    pub grammar: fn() -> tree_sitter::Language,

    /// The ecosystem imports in this language resolve against
    pub ecosystem: Ecosystem,

    /// Query capturing whole import statements as @import
    pub import_query: &'static str,
}

impl TSLanguageConfig {
    pub fn get_language(&self) -> Option<&'static str> {
        self.language_ids.first().copied()
    }

    /// Parses the source and returns the text of every captured import
    /// statement, in document order.
    pub fn capture_import_statements(&self, source: &str) -> Vec<String> {
        let mut parser = tree_sitter::Parser::new();
        if parser.set_language((self.grammar)()).is_err() {
            return Vec::new();
        }
        let Some(tree) = parser.parse(source, None) else {
            return Vec::new();
        };
        let Ok(query) = tree_sitter::Query::new((self.grammar)(), self.import_query) else {
            return Vec::new();
        };
        let mut cursor = tree_sitter::QueryCursor::new();
        let mut statements = Vec::new();
        for found in cursor.matches(&query, tree.root_node(), source.as_bytes()) {
            for capture in found.captures {
                let range = capture.node.byte_range();
                if let Some(text) = source.get(range) {
                    statements.push(text.to_owned());
                }
            }
        }
        statements
    }
}

pub fn python_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["python", "py"],
        file_extensions: &["py"],
        grammar: tree_sitter_python::language,
        ecosystem: Ecosystem::Pypi,
        import_query: "[(import_statement) (import_from_statement)] @import",
    }
}

pub fn go_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["go", "golang"],
        file_extensions: &["go"],
        grammar: tree_sitter_go::language,
        ecosystem: Ecosystem::Go,
        import_query: "(import_declaration) @import",
    }
}

pub fn java_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["java"],
        file_extensions: &["java"],
        grammar: tree_sitter_java::language,
        ecosystem: Ecosystem::Maven,
        import_query: "(import_declaration) @import",
    }
}

pub fn javascript_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["javascript", "js", "jsx", "node"],
        file_extensions: &["js", "jsx", "mjs", "cjs"],
        grammar: tree_sitter_javascript::language,
        ecosystem: Ecosystem::Npm,
        import_query: "(import_statement) @import",
    }
}

pub fn typescript_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["typescript", "ts", "tsx"],
        file_extensions: &["ts", "tsx"],
        grammar: tree_sitter_typescript::language_typescript,
        ecosystem: Ecosystem::Npm,
        import_query: "(import_statement) @import",
    }
}

pub fn rust_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["rust", "rs"],
        file_extensions: &["rs"],
        grammar: tree_sitter_rust::language,
        ecosystem: Ecosystem::Crates,
        import_query: "[(use_declaration) (extern_crate_declaration)] @import",
    }
}

pub struct TSLanguageParsing {
    configs: Vec<TSLanguageConfig>,
}

impl TSLanguageParsing {
    pub fn init() -> Self {
        Self {
            configs: vec![
                python_language_config(),
                go_language_config(),
                java_language_config(),
                javascript_language_config(),
                typescript_language_config(),
                rust_language_config(),
            ],
        }
    }

    pub fn for_language(&self, language: &str) -> Option<&TSLanguageConfig> {
        let folded = language.to_lowercase();
        self.configs
            .iter()
            .find(|config| config.language_ids.contains(&folded.as_str()))
    }

    pub fn for_file_path(&self, path: &str) -> Option<&TSLanguageConfig> {
        let extension = path.rsplit('.').next()?.to_lowercase();
        self.configs
            .iter()
            .find(|config| config.file_extensions.contains(&extension.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_by_language_and_extension() {
        let parsing = TSLanguageParsing::init();
        assert_eq!(
            parsing.for_language("Python").and_then(|c| c.get_language()),
            Some("python")
        );
        assert_eq!(
            parsing
                .for_file_path("src/lib.rs")
                .and_then(|c| c.get_language()),
            Some("rust")
        );
        assert!(parsing.for_language("cobol").is_none());
    }

    #[test]
    fn python_statements_are_captured() {
        let config = python_language_config();
        let statements =
            config.capture_import_statements("import requests\nfrom flask import Flask\nx = 1\n");
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("import requests"));
        assert!(statements[1].starts_with("from flask"));
    }

    #[test]
    fn go_import_block_is_one_statement() {
        let config = go_language_config();
        let code = "package main\n\nimport (\n\t\"fmt\"\n\t\"github.com/gin-gonic/gin\"\n)\n";
        let statements = config.capture_import_statements(code);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("gin-gonic"));
    }

    #[test]
    fn rust_use_declarations_are_captured() {
        let config = rust_language_config();
        let statements = config
            .capture_import_statements("use serde::Serialize;\nextern crate rand;\nfn x() {}\n");
        assert_eq!(statements.len(), 2);
    }
}
