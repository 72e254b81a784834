//! MaliciousPackageCheck: resolve every extracted identifier against the
//! vector index, record alerts, and short-circuit with a synthetic answer
//! when the user is asking about a malicious package.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;

use llm_client::clients::types::{GatewayRequest, GatewayResponse};

use crate::db::audit::AlertTrigger;
use crate::packages::index::PackageIndex;
use crate::packages::types::{
    Ecosystem, ExtractedPackage, PackageLocation, PackageRecord, PackageStatus,
};
use crate::pipeline::types::{PipelineContext, RequestStep, StepOutcome};

pub const BLOCK_NOTICE: &str =
    "CodeGate detected one or more malicious, deprecated or archived packages.";

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[A-Za-z0-9][A-Za-z0-9._\-]{2,}").unwrap();
}

pub struct MaliciousPackageCheck {
    index: Arc<PackageIndex>,
}

impl MaliciousPackageCheck {
    pub fn new(index: Arc<PackageIndex>) -> Self {
        Self { index }
    }

    fn trigger_for(status: PackageStatus) -> Option<AlertTrigger> {
        match status {
            PackageStatus::Malicious => Some(AlertTrigger::MaliciousPackage),
            PackageStatus::Deprecated => Some(AlertTrigger::DeprecatedPackage),
            PackageStatus::Archived => Some(AlertTrigger::ArchivedPackage),
            PackageStatus::Ok => None,
        }
    }

    /// Free-text mentions: every word-ish token of the last user turn is
    /// probed against the index across ecosystems.
    fn free_text_hits(&self, request: &GatewayRequest) -> Vec<ExtractedPackage> {
        let Some(text) = request.last_user_text() else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        let mut seen = HashSet::new();
        for token in WORD.find_iter(&text) {
            let token = token.as_str();
            for ecosystem in [
                Ecosystem::Pypi,
                Ecosystem::Npm,
                Ecosystem::Crates,
                Ecosystem::Go,
                Ecosystem::Maven,
            ] {
                if let Some(record) = self.index.exact(token, ecosystem) {
                    if record.status.is_flagged()
                        && seen.insert((ecosystem, record.name.clone()))
                    {
                        hits.push(ExtractedPackage::new(
                            ecosystem,
                            record.name.clone(),
                            PackageLocation::FreeText,
                        ));
                    }
                }
            }
        }
        hits
    }

    fn block_reply(flagged: &[(ExtractedPackage, PackageRecord)], model: &str) -> GatewayResponse {
        let mut message = String::from(BLOCK_NOTICE);
        message.push_str("\n\n");
        for (extracted, record) in flagged {
            message.push_str(&format!(
                "- **{}** ({}): {} {}\n",
                extracted.name,
                extracted.ecosystem,
                record.status.as_str(),
                record.insight_url()
            ));
        }
        GatewayResponse::new(message, model.to_owned())
            .with_finish_reason(Some("stop".to_owned()))
    }
}

#[async_trait]
impl RequestStep for MaliciousPackageCheck {
    fn name(&self) -> &'static str {
        "malicious-package-check"
    }

    async fn run(&self, request: GatewayRequest, ctx: &mut PipelineContext) -> StepOutcome {
        let mut candidates = ctx.extracted_packages().to_vec();
        candidates.extend(self.free_text_hits(&request));

        let mut flagged: Vec<(ExtractedPackage, PackageRecord)> = Vec::new();
        let mut seen = HashSet::new();
        for candidate in candidates {
            let Some(found) = self.index.lookup(&candidate.name, candidate.ecosystem) else {
                continue;
            };
            if !found.record.status.is_flagged() {
                continue;
            }
            if !seen.insert((candidate.ecosystem, found.record.name.clone())) {
                continue;
            }
            if let Some(trigger) = Self::trigger_for(found.record.status) {
                ctx.alert_on_string(
                    trigger,
                    candidate.name.clone(),
                    Some(found.record.insight_url()),
                );
            }
            flagged.push((candidate, found.record));
        }

        if flagged.is_empty() {
            return StepOutcome::Continue(request);
        }

        // the short-circuit fires only for assistance requests about a
        // malicious package: a free-text mention of the flagged name, with
        // at least one resolving to malicious
        let any_malicious = flagged
            .iter()
            .any(|(_, record)| record.status == PackageStatus::Malicious);
        let asked_about = flagged
            .iter()
            .any(|(extracted, _)| extracted.location == PackageLocation::FreeText);
        if any_malicious && asked_about {
            info!(
                count = flagged.len(),
                "blocking request about malicious packages"
            );
            return StepOutcome::ReplyNow(Self::block_reply(&flagged, request.model()));
        }
        StepOutcome::Continue(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::RouteMode;
    use crate::redaction::store::SubstitutionStore;
    use crate::workspace::registry::WorkspaceRegistry;
    use llm_client::clients::types::{GatewayMessage, RequestKind};

    fn index() -> Arc<PackageIndex> {
        Arc::new(PackageIndex::with_records(
            vec![
                PackageRecord::new(Ecosystem::Pypi, "invokehttp", PackageStatus::Malicious),
                PackageRecord::new(Ecosystem::Npm, "left-pad", PackageStatus::Deprecated),
            ],
            0.85,
        ))
    }

    async fn ctx() -> PipelineContext {
        let pool = crate::db::sqlite::init_in_memory().await.expect("db");
        let registry = WorkspaceRegistry::load(Arc::new(pool)).await.expect("load");
        PipelineContext::new(
            registry.snapshot(),
            Arc::new(SubstitutionStore::new()),
            RouteMode::Mux,
            None,
        )
    }

    fn chat(text: &str) -> GatewayRequest {
        GatewayRequest::new(
            RequestKind::Chat,
            "qwen2.5-coder".to_owned(),
            vec![GatewayMessage::user(text)],
        )
    }

    #[tokio::test]
    async fn asking_about_malicious_package_short_circuits() {
        let step = MaliciousPackageCheck::new(index());
        let mut ctx = ctx().await;
        match step.run(chat("Is it safe to use invokehttp?"), &mut ctx).await {
            StepOutcome::ReplyNow(response) => {
                assert!(response.message().contains(BLOCK_NOTICE));
                assert!(response.message().contains(
                    "https://www.insight.stacklok.com/report/pypi/invokehttp?utm_source=codegate"
                ));
            }
            _ => panic!("expected short-circuit"),
        }
        assert_eq!(ctx.alerts().len(), 1);
    }

    #[tokio::test]
    async fn import_only_hit_alerts_but_continues() {
        let step = MaliciousPackageCheck::new(index());
        let mut ctx = ctx().await;
        ctx.set_extracted_packages(vec![ExtractedPackage::new(
            Ecosystem::Pypi,
            "invokehttp",
            PackageLocation::CodeImport,
        )]);
        match step.run(chat("please fix my tests"), &mut ctx).await {
            StepOutcome::Continue(_) => {}
            _ => panic!("expected continue"),
        }
        assert_eq!(ctx.alerts().len(), 1);
        assert_eq!(
            ctx.alerts()[0].trigger_type,
            AlertTrigger::MaliciousPackage
        );
    }

    #[tokio::test]
    async fn deprecated_mention_alone_does_not_block() {
        let step = MaliciousPackageCheck::new(index());
        let mut ctx = ctx().await;
        match step.run(chat("should I still use left-pad?"), &mut ctx).await {
            StepOutcome::Continue(_) => {}
            _ => panic!("expected continue"),
        }
        assert_eq!(ctx.alerts().len(), 1);
    }

    #[tokio::test]
    async fn clean_request_passes_untouched() {
        let step = MaliciousPackageCheck::new(index());
        let mut ctx = ctx().await;
        match step.run(chat("how do I write a for loop?"), &mut ctx).await {
            StepOutcome::Continue(_) => {}
            _ => panic!("expected continue"),
        }
        assert!(ctx.alerts().is_empty());
    }
}
