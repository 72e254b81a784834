//! Language-aware extraction of package identifiers from message content:
//! fenced code blocks are parsed with the matching grammar, manifest files
//! with a line-level fallback.

pub mod fenced;
pub mod imports;
pub mod languages;
pub mod manifest;

use crate::packages::types::ExtractedPackage;

use fenced::CodeSnippet;
use languages::TSLanguageParsing;

#[derive(Debug, Default)]
pub struct Extraction {
    pub snippets: Vec<CodeSnippet>,
    pub packages: Vec<ExtractedPackage>,
}

pub struct CodeExtractor {
    parsing: TSLanguageParsing,
}

impl CodeExtractor {
    pub fn new() -> Self {
        Self {
            parsing: TSLanguageParsing::init(),
        }
    }

    /// Walks one text blob: every fenced block is routed either to the
    /// manifest parser (by filename) or to the import extractor (by
    /// language), and the identifiers are deduplicated in order.
    pub fn extract_from_text(&self, text: &str) -> Extraction {
        let mut extraction = Extraction::default();
        for snippet in fenced::parse_fenced_blocks(text) {
            if let Some(kind) = snippet
                .filename()
                .and_then(manifest::ManifestKind::from_filename)
            {
                extraction
                    .packages
                    .extend(manifest::parse_manifest(kind, snippet.code()));
            } else if let Some(config) = self.config_for_snippet(&snippet) {
                extraction
                    .packages
                    .extend(imports::extract_imports(config, snippet.code()));
            }
            extraction.snippets.push(snippet);
        }
        extraction.packages.sort_by(|a, b| {
            (a.ecosystem.as_str(), &a.name).cmp(&(b.ecosystem.as_str(), &b.name))
        });
        extraction.packages.dedup();
        extraction
    }

    fn config_for_snippet(&self, snippet: &CodeSnippet) -> Option<&languages::TSLanguageConfig> {
        if let Some(language) = snippet.language() {
            if let Some(config) = self.parsing.for_language(language) {
                return Some(config);
            }
        }
        snippet
            .filename()
            .and_then(|filename| self.parsing.for_file_path(filename))
    }
}

impl Default for CodeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::types::{Ecosystem, PackageLocation};

    #[test]
    fn python_imports_inside_fences_are_extracted() {
        let extractor = CodeExtractor::new();
        let text = "try this:\n```python\nimport requests\nfrom invokehttp import client\n```\n";
        let extraction = extractor.extract_from_text(text);
        let names: Vec<&str> = extraction
            .packages
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert!(names.contains(&"requests"));
        assert!(names.contains(&"invokehttp"));
        assert!(extraction
            .packages
            .iter()
            .all(|p| p.ecosystem == Ecosystem::Pypi
                && p.location == PackageLocation::CodeImport));
    }

    #[test]
    fn manifest_block_goes_through_the_manifest_parser() {
        let extractor = CodeExtractor::new();
        let text = "```text requirements.txt\nrequests==2.31.0\nflask>=2\n```";
        let extraction = extractor.extract_from_text(text);
        assert_eq!(extraction.packages.len(), 2);
        assert!(extraction
            .packages
            .iter()
            .all(|p| p.location == PackageLocation::Manifest));
    }

    #[test]
    fn duplicate_identifiers_are_deduplicated() {
        let extractor = CodeExtractor::new();
        let text = "```python\nimport requests\nimport requests\n```";
        let extraction = extractor.extract_from_text(text);
        assert_eq!(extraction.packages.len(), 1);
    }

    #[test]
    fn prose_without_fences_extracts_nothing() {
        let extractor = CodeExtractor::new();
        let extraction = extractor.extract_from_text("how do I sort a list in python?");
        assert!(extraction.packages.is_empty());
        assert!(extraction.snippets.is_empty());
    }
}
