//! Turns captured import statements into package identifiers. Each
//! ecosystem has its own naming shape: pypi/crates take the root segment,
//! npm keeps scopes, go keeps the whole module path, maven the group id.

use lazy_static::lazy_static;
use regex::Regex;

use crate::packages::types::{Ecosystem, ExtractedPackage, PackageLocation};

use super::languages::TSLanguageConfig;

lazy_static! {
    static ref QUOTED: Regex = Regex::new(r#""([^"]+)"|'([^']+)'"#).unwrap();
    static ref REQUIRE_CALL: Regex =
        Regex::new(r#"require\(\s*["']([^"']+)["']\s*\)"#).unwrap();
}

const RUST_BUILTIN_ROOTS: &[&str] = &["crate", "self", "super", "std", "core", "alloc"];
const PYTHON_STDLIB_HINTS: &[&str] = &[
    "os", "sys", "re", "json", "math", "time", "typing", "pathlib", "collections", "itertools",
    "functools", "subprocess", "datetime", "logging", "unittest", "abc", "io",
];

fn quoted_strings(statement: &str) -> Vec<String> {
    QUOTED
        .captures_iter(statement)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_owned())
        })
        .collect()
}

fn python_packages(statement: &str) -> Vec<String> {
    let statement = statement.trim();
    let mut names = Vec::new();
    if let Some(rest) = statement.strip_prefix("from ") {
        if let Some(module) = rest.split_whitespace().next() {
            names.push(module.to_owned());
        }
    } else if let Some(rest) = statement.strip_prefix("import ") {
        for part in rest.split(',') {
            if let Some(module) = part.split_whitespace().next() {
                names.push(module.to_owned());
            }
        }
    }
    names
        .into_iter()
        .filter(|name| !name.starts_with('.'))
        .map(|name| {
            name.split('.')
                .next()
                .unwrap_or_default()
                .trim()
                .to_owned()
        })
        .filter(|root| !root.is_empty() && !PYTHON_STDLIB_HINTS.contains(&root.as_str()))
        .collect()
}

fn go_packages(statement: &str) -> Vec<String> {
    quoted_strings(statement)
        .into_iter()
        // stdlib imports have no dot in the first path segment
        .filter(|path| {
            path.split('/')
                .next()
                .map(|root| root.contains('.'))
                .unwrap_or(false)
        })
        .collect()
}

fn java_packages(statement: &str) -> Vec<String> {
    let body = statement
        .trim()
        .trim_start_matches("import")
        .trim_start_matches(" static")
        .trim()
        .trim_end_matches(';');
    let segments: Vec<&str> = body.split('.').collect();
    if segments.len() < 2 || segments[0] == "java" || segments[0] == "javax" {
        return Vec::new();
    }
    vec![format!("{}.{}", segments[0], segments[1])]
}

fn npm_package_name(source: &str) -> Option<String> {
    if source.starts_with('.') || source.starts_with('/') || source.starts_with("node:") {
        return None;
    }
    let mut segments = source.split('/');
    let first = segments.next()?;
    if first.starts_with('@') {
        let second = segments.next()?;
        Some(format!("{}/{}", first, second))
    } else {
        Some(first.to_owned())
    }
}

fn javascript_packages(statement: &str) -> Vec<String> {
    quoted_strings(statement)
        .into_iter()
        .filter_map(|source| npm_package_name(&source))
        .collect()
}

fn rust_packages(statement: &str) -> Vec<String> {
    let body = statement
        .trim()
        .trim_start_matches("pub ")
        .trim_start_matches("use ")
        .trim_start_matches("extern crate ")
        .trim_end_matches(';');
    let root = body
        .split("::")
        .next()
        .unwrap_or_default()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_start_matches("r#");
    if root.is_empty()
        || root.starts_with('{')
        || RUST_BUILTIN_ROOTS.contains(&root)
    {
        return Vec::new();
    }
    vec![root.replace('_', "-")]
}

/// Runs the language's import query over the snippet and maps every
/// captured statement into package identifiers.
pub fn extract_imports(config: &TSLanguageConfig, source: &str) -> Vec<ExtractedPackage> {
    let mut names: Vec<String> = Vec::new();
    for statement in config.capture_import_statements(source) {
        names.extend(match config.ecosystem {
            Ecosystem::Pypi => python_packages(&statement),
            Ecosystem::Go => go_packages(&statement),
            Ecosystem::Maven => java_packages(&statement),
            Ecosystem::Npm => javascript_packages(&statement),
            Ecosystem::Crates => rust_packages(&statement),
        });
    }
    // commonjs requires are not import statements, scan the raw source
    if config.ecosystem == Ecosystem::Npm {
        for caps in REQUIRE_CALL.captures_iter(source) {
            if let Some(name) = npm_package_name(&caps[1]) {
                names.push(name);
            }
        }
    }
    names
        .into_iter()
        .map(|name| ExtractedPackage::new(config.ecosystem, name, PackageLocation::CodeImport))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::languages;

    #[test]
    fn python_roots_are_taken_and_stdlib_skipped() {
        let config = languages::python_language_config();
        let found = extract_imports(
            &config,
            "import os\nimport requests.sessions\nfrom invokehttp import do\n",
        );
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["requests", "invokehttp"]);
    }

    #[test]
    fn go_stdlib_is_skipped_module_paths_kept() {
        let config = languages::go_language_config();
        let found = extract_imports(
            &config,
            "package main\nimport (\n\t\"fmt\"\n\t\"github.com/gin-gonic/gin\"\n)\n",
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "github.com/gin-gonic/gin");
    }

    #[test]
    fn java_group_id_is_extracted() {
        let config = languages::java_language_config();
        let found = extract_imports(
            &config,
            "import com.google.gson.Gson;\nimport java.util.List;\nclass A {}\n",
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "com.google");
    }

    #[test]
    fn npm_scopes_and_requires_are_kept() {
        let config = languages::javascript_language_config();
        let found = extract_imports(
            &config,
            "import express from 'express';\nimport { z } from '@scope/zod/sub';\nconst x = require('lodash/fp');\n",
        );
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"express"));
        assert!(names.contains(&"@scope/zod"));
        assert!(names.contains(&"lodash"));
    }

    #[test]
    fn rust_roots_are_normalized_to_crate_names() {
        let config = languages::rust_language_config();
        let found = extract_imports(
            &config,
            "use serde_json::Value;\nuse std::fmt;\nextern crate rand;\n",
        );
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["serde-json", "rand"]);
    }

    #[test]
    fn relative_js_imports_are_ignored() {
        let config = languages::javascript_language_config();
        let found = extract_imports(&config, "import x from './local';\n");
        assert!(found.is_empty());
    }
}
