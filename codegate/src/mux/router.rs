//! Rule evaluation. The router works over an immutable snapshot of the
//! workspace's rule list and the endpoint table, so no lock is held while
//! rules run.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use llm_client::clients::types::{GatewayRequest, RequestKind};
use llm_client::fim;

use crate::workspace::types::{ProviderEndpoint, Workspace};

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("no mux rule matches the request")]
    NoRuleMatches,

    #[error("rule references unknown provider endpoint `{0}`")]
    UnknownEndpoint(String),

    #[error("no provider endpoint of kind `{0}` is configured")]
    UnknownProvider(String),
}

/// The concrete destination a request resolved to.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    endpoint: ProviderEndpoint,
    model: String,
}

impl ResolvedRoute {
    pub fn new(endpoint: ProviderEndpoint, model: String) -> Self {
        Self { endpoint, model }
    }

    pub fn endpoint(&self) -> &ProviderEndpoint {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

lazy_static! {
    // ```python title=app/main.py  |  ```rust filename="lib.rs"
    static ref FENCE_FILENAME: Regex = Regex::new(
        r#"```[A-Za-z0-9_+\-]*[ \t]+(?:title=|filename=|file:)?"?([A-Za-z0-9_./\-]+\.[A-Za-z0-9]+)"?"#
    )
    .unwrap();
    // comment-style path hints near the top of FIM prompts: `# Path: src/x.py`
    static ref PATH_HINT: Regex =
        Regex::new(r"(?m)^(?:#|//|--)\s*(?:Path|File|Filename):\s*(\S+\.[A-Za-z0-9]+)\s*$")
            .unwrap();
}

/// File paths heuristically pulled from code-block headers and FIM prompt
/// path hints; the filename matcher runs over these.
pub fn extract_filenames(request: &GatewayRequest) -> Vec<String> {
    let mut filenames = Vec::new();
    request.visit_text(|text| {
        for caps in FENCE_FILENAME.captures_iter(text) {
            filenames.push(caps[1].to_owned());
        }
        for caps in PATH_HINT.captures_iter(text) {
            filenames.push(caps[1].to_owned());
        }
        if request.kind() == RequestKind::Fim {
            if let Some(parts) = fim::split(text) {
                for caps in PATH_HINT.captures_iter(parts.prefix()) {
                    filenames.push(caps[1].to_owned());
                }
            }
        }
    });
    filenames.sort();
    filenames.dedup();
    filenames
}

pub struct MuxRouter;

impl MuxRouter {
    /// Evaluates the workspace rules top to bottom; the first match wins.
    pub fn resolve(
        workspace: &Workspace,
        endpoints: &[ProviderEndpoint],
        request: &GatewayRequest,
    ) -> Result<ResolvedRoute, RouteError> {
        let filenames = extract_filenames(request);
        for rule in workspace.mux_rules() {
            if !rule.matches(request.kind(), &filenames) {
                continue;
            }
            let endpoint = endpoints
                .iter()
                .find(|endpoint| endpoint.id() == rule.provider_endpoint_id())
                .ok_or_else(|| {
                    RouteError::UnknownEndpoint(rule.provider_endpoint_id().to_owned())
                })?;
            return Ok(ResolvedRoute::new(
                endpoint.clone(),
                rule.model_name().to_owned(),
            ));
        }
        Err(RouteError::NoRuleMatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::types::{MuxMatcherType, MuxRule};
    use crate::workspace::types::{ProviderEndpoint, Workspace};
    use llm_client::clients::types::GatewayMessage;
    use llm_client::provider::{ProviderAuth, ProviderKind};

    fn endpoint(id: &str) -> ProviderEndpoint {
        ProviderEndpoint::new(
            id.to_owned(),
            format!("ep-{}", id),
            ProviderKind::Ollama,
            "http://localhost:11434".to_owned(),
            ProviderAuth::None,
        )
    }

    fn request_with_text(text: &str) -> GatewayRequest {
        GatewayRequest::new(
            RequestKind::Chat,
            "anything".to_owned(),
            vec![GatewayMessage::user(text)],
        )
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut workspace = Workspace::new("w1".into(), "w1".into());
        workspace.set_mux_rules(vec![
            MuxRule::new(
                "a".into(),
                "model-a".into(),
                MuxMatcherType::RequestTypeMatch,
                "chat".into(),
            )
            .unwrap(),
            MuxRule::catch_all("b".into(), "model-b".into()),
        ]);
        let endpoints = vec![endpoint("a"), endpoint("b")];
        let route =
            MuxRouter::resolve(&workspace, &endpoints, &request_with_text("hello")).unwrap();
        assert_eq!(route.endpoint().id(), "a");
        assert_eq!(route.model(), "model-a");
    }

    #[test]
    fn no_rule_yields_no_route() {
        let workspace = Workspace::new("w1".into(), "w1".into());
        let err = MuxRouter::resolve(&workspace, &[], &request_with_text("hello")).unwrap_err();
        assert!(matches!(err, RouteError::NoRuleMatches));
    }

    #[test]
    fn filename_rule_reads_fence_headers() {
        let mut workspace = Workspace::new("w1".into(), "w1".into());
        workspace.set_mux_rules(vec![
            MuxRule::new(
                "py".into(),
                "model-py".into(),
                MuxMatcherType::FilenameMatch,
                "**/*.py".into(),
            )
            .unwrap(),
            MuxRule::catch_all("other".into(), "model-x".into()),
        ]);
        let endpoints = vec![endpoint("py"), endpoint("other")];
        let request =
            request_with_text("```python title=app/main.py\nimport os\n```\nfix this please");
        let route = MuxRouter::resolve(&workspace, &endpoints, &request).unwrap();
        assert_eq!(route.model(), "model-py");
    }

    #[test]
    fn path_hint_comment_is_extracted() {
        let filenames =
            extract_filenames(&request_with_text("# Path: src/handlers/login.go\nfunc x() {}"));
        assert_eq!(filenames, vec!["src/handlers/login.go".to_owned()]);
    }

    #[test]
    fn rule_referencing_missing_endpoint_errors() {
        let mut workspace = Workspace::new("w1".into(), "w1".into());
        workspace.set_mux_rules(vec![MuxRule::catch_all("ghost".into(), "m".into())]);
        let err =
            MuxRouter::resolve(&workspace, &[], &request_with_text("hello")).unwrap_err();
        assert!(matches!(err, RouteError::UnknownEndpoint(id) if id == "ghost"));
    }
}
