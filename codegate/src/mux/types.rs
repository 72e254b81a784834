use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use llm_client::clients::types::RequestKind;

#[derive(Error, Debug)]
pub enum MuxRuleError {
    #[error("filename matcher `{0}` is not a valid glob")]
    BadGlob(String),

    #[error("request type matcher `{0}` is not a known request kind")]
    BadRequestKind(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuxMatcherType {
    CatchAll,
    FilenameMatch,
    RequestTypeMatch,
}

impl MuxMatcherType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MuxMatcherType::CatchAll => "catch_all",
            MuxMatcherType::FilenameMatch => "filename_match",
            MuxMatcherType::RequestTypeMatch => "request_type_match",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "catch_all" => Some(MuxMatcherType::CatchAll),
            "filename_match" => Some(MuxMatcherType::FilenameMatch),
            "request_type_match" => Some(MuxMatcherType::RequestTypeMatch),
            _ => None,
        }
    }
}

/// One routing rule. The matcher payload is kept as the raw string the API
/// accepts; filename globs are compiled once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxRule {
    provider_endpoint_id: String,
    model_name: String,
    matcher_type: MuxMatcherType,
    #[serde(default)]
    matcher: String,
    #[serde(skip)]
    compiled_glob: Option<GlobMatcher>,
    #[serde(skip)]
    request_kind: Option<RequestKind>,
}

impl MuxRule {
    pub fn new(
        provider_endpoint_id: String,
        model_name: String,
        matcher_type: MuxMatcherType,
        matcher: String,
    ) -> Result<Self, MuxRuleError> {
        let mut rule = Self {
            provider_endpoint_id,
            model_name,
            matcher_type,
            matcher,
            compiled_glob: None,
            request_kind: None,
        };
        rule.compile()?;
        Ok(rule)
    }

    pub fn catch_all(provider_endpoint_id: String, model_name: String) -> Self {
        Self {
            provider_endpoint_id,
            model_name,
            matcher_type: MuxMatcherType::CatchAll,
            matcher: String::new(),
            compiled_glob: None,
            request_kind: None,
        }
    }

    /// Rebuilds the derived matcher state; needed after deserialization
    /// since the compiled pieces do not travel.
    pub fn compile(&mut self) -> Result<(), MuxRuleError> {
        match self.matcher_type {
            MuxMatcherType::CatchAll => {}
            MuxMatcherType::FilenameMatch => {
                let glob = Glob::new(&self.matcher)
                    .map_err(|_| MuxRuleError::BadGlob(self.matcher.clone()))?;
                self.compiled_glob = Some(glob.compile_matcher());
            }
            MuxMatcherType::RequestTypeMatch => {
                self.request_kind = Some(match self.matcher.as_str() {
                    "chat" => RequestKind::Chat,
                    "fim" => RequestKind::Fim,
                    "completion" => RequestKind::Completion,
                    "embeddings" => RequestKind::Embeddings,
                    other => return Err(MuxRuleError::BadRequestKind(other.to_owned())),
                });
            }
        }
        Ok(())
    }

    pub fn provider_endpoint_id(&self) -> &str {
        &self.provider_endpoint_id
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn matcher_type(&self) -> MuxMatcherType {
        self.matcher_type
    }

    pub fn matcher(&self) -> &str {
        &self.matcher
    }

    pub fn matches(&self, kind: RequestKind, filenames: &[String]) -> bool {
        match self.matcher_type {
            MuxMatcherType::CatchAll => true,
            MuxMatcherType::FilenameMatch => match &self.compiled_glob {
                Some(glob) => filenames.iter().any(|name| glob.is_match(name)),
                None => false,
            },
            MuxMatcherType::RequestTypeMatch => self.request_kind == Some(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_all_matches_anything() {
        let rule = MuxRule::catch_all("ep".into(), "m".into());
        assert!(rule.matches(RequestKind::Chat, &[]));
        assert!(rule.matches(RequestKind::Fim, &["src/a.py".into()]));
    }

    #[test]
    fn filename_glob_matches_extracted_paths() {
        let rule = MuxRule::new(
            "ep".into(),
            "m".into(),
            MuxMatcherType::FilenameMatch,
            "**/*.py".into(),
        )
        .expect("glob compiles");
        assert!(rule.matches(RequestKind::Chat, &["app/main.py".into()]));
        assert!(!rule.matches(RequestKind::Chat, &["main.go".into()]));
    }

    #[test]
    fn request_type_matcher_is_kind_exact() {
        let rule = MuxRule::new(
            "ep".into(),
            "m".into(),
            MuxMatcherType::RequestTypeMatch,
            "fim".into(),
        )
        .expect("kind parses");
        assert!(rule.matches(RequestKind::Fim, &[]));
        assert!(!rule.matches(RequestKind::Chat, &[]));
    }

    #[test]
    fn bad_matcher_payloads_are_rejected() {
        assert!(MuxRule::new(
            "ep".into(),
            "m".into(),
            MuxMatcherType::FilenameMatch,
            "[".into()
        )
        .is_err());
        assert!(MuxRule::new(
            "ep".into(),
            "m".into(),
            MuxMatcherType::RequestTypeMatch,
            "speech".into()
        )
        .is_err());
    }
}
