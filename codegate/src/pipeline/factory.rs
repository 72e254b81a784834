//! Builds the canonical step chains. The request chain is assembled once
//! at startup; the response chain is stateful and built fresh per request.

use std::collections::HashMap;
use std::sync::Arc;

use llm_client::provider::ProviderKind;

use crate::extraction::CodeExtractor;
use crate::packages::index::PackageIndex;
use crate::redaction::pii::PiiRecognizer;
use crate::redaction::signatures::SignatureStore;
use crate::redaction::store::SubstitutionStore;

use super::engine::{RequestPipeline, ResponsePipeline};
use super::output::{notice::NoticeStep, persist::PersistStep, unredact::UnredactStep};
use super::steps::{
    mux::MuxResolve, packages::MaliciousPackageCheck, pii::PiiRedact, secrets::SecretRedact,
    snippets::CodeSnippetExtract, system_prompt::SystemPromptInject,
};

/// Request side, in canonical order: extract, package policy, secret
/// redaction, pii redaction, system prompt, mux resolve. Normalize-in and
/// normalize-out bracket the chain at the webserver boundary.
pub fn request_pipeline(
    extractor: Arc<CodeExtractor>,
    package_index: Arc<PackageIndex>,
    signatures: &'static SignatureStore,
    recognizer: Arc<dyn PiiRecognizer>,
    provider_urls: HashMap<ProviderKind, String>,
) -> RequestPipeline {
    RequestPipeline::new(vec![
        Arc::new(CodeSnippetExtract::new(extractor)),
        Arc::new(MaliciousPackageCheck::new(package_index)),
        Arc::new(SecretRedact::new(signatures)),
        Arc::new(PiiRedact::new(recognizer)),
        Arc::new(SystemPromptInject),
        Arc::new(MuxResolve::new(provider_urls)),
    ])
}

/// Response side: restore literals, prepend the notice, persist outputs.
pub fn response_pipeline(store: Arc<SubstitutionStore>) -> ResponsePipeline {
    ResponsePipeline::new(vec![
        Box::new(UnredactStep::new(store)),
        Box::new(NoticeStep::new()),
        Box::new(PersistStep::new()),
    ])
}
