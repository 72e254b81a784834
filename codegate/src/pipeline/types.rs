use std::sync::Arc;

use async_trait::async_trait;

use llm_client::clients::types::{GatewayRequest, GatewayResponse, StreamChunk};
use llm_client::provider::{ProviderAuth, ProviderKind};

use crate::db::audit::{AlertRecord, AlertTrigger};
use crate::db::sqlite::SqlDb;
use crate::mux::router::ResolvedRoute;
use crate::packages::types::ExtractedPackage;
use crate::redaction::store::SubstitutionStore;
use crate::workspace::registry::RegistrySnapshot;
use crate::workspace::types::Workspace;

/// How the request entered the gateway: a provider-prefixed route pins the
/// upstream kind, the mux entry leaves routing to the workspace rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    Fixed(ProviderKind),
    Mux,
}

/// Client-visible failure classes; the webserver maps these to statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Route,
    Auth,
    Upstream,
    Internal,
}

/// What one request step decided.
pub enum StepOutcome {
    /// Mutate and proceed.
    Continue(GatewayRequest),
    /// Skip the upstream entirely and stream this reply back.
    ReplyNow(GatewayResponse),
    /// Translate to a client-visible error.
    Fail(FailureKind, String),
}

/// What the whole request chain settled into.
pub enum PipelineVerdict {
    Forward(GatewayRequest),
    Reply(GatewayResponse),
    Fail(FailureKind, String),
}

/// Everything a step may read or effect. The workspace is captured at
/// pipeline entry; in-flight requests never observe later activations.
pub struct PipelineContext {
    prompt_id: String,
    snapshot: Arc<RegistrySnapshot>,
    workspace: Workspace,
    store: Arc<SubstitutionStore>,
    route_mode: RouteMode,
    client_auth: Option<ProviderAuth>,
    db: Option<SqlDb>,
    resolved_route: Option<ResolvedRoute>,
    alerts: Vec<AlertRecord>,
    extracted_packages: Vec<ExtractedPackage>,
    secret_redactions: usize,
    pii_redactions: usize,
}

impl PipelineContext {
    pub fn new(
        snapshot: Arc<RegistrySnapshot>,
        store: Arc<SubstitutionStore>,
        route_mode: RouteMode,
        db: Option<SqlDb>,
    ) -> Self {
        let workspace = snapshot.active_workspace().clone();
        Self {
            prompt_id: uuid::Uuid::new_v4().to_string(),
            snapshot,
            workspace,
            store,
            route_mode,
            client_auth: None,
            db,
            resolved_route: None,
            alerts: Vec::new(),
            extracted_packages: Vec::new(),
            secret_redactions: 0,
            pii_redactions: 0,
        }
    }

    pub fn with_client_auth(mut self, auth: Option<ProviderAuth>) -> Self {
        self.client_auth = auth;
        self
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub fn snapshot(&self) -> &RegistrySnapshot {
        &self.snapshot
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn store(&self) -> &Arc<SubstitutionStore> {
        &self.store
    }

    pub fn route_mode(&self) -> RouteMode {
        self.route_mode
    }

    pub fn client_auth(&self) -> Option<&ProviderAuth> {
        self.client_auth.as_ref()
    }

    pub fn db(&self) -> Option<&SqlDb> {
        self.db.as_ref()
    }

    pub fn resolved_route(&self) -> Option<&ResolvedRoute> {
        self.resolved_route.as_ref()
    }

    pub fn set_resolved_route(&mut self, route: ResolvedRoute) {
        self.resolved_route = Some(route);
    }

    pub fn alerts(&self) -> &[AlertRecord] {
        &self.alerts
    }

    pub fn push_alert(&mut self, alert: AlertRecord) {
        self.alerts.push(alert);
    }

    pub fn alert_on_string(
        &mut self,
        trigger: AlertTrigger,
        trigger_string: String,
        category: Option<String>,
    ) {
        let alert =
            AlertRecord::for_trigger_string(&self.prompt_id, trigger, trigger_string, category);
        self.alerts.push(alert);
    }

    pub fn extracted_packages(&self) -> &[ExtractedPackage] {
        &self.extracted_packages
    }

    pub fn set_extracted_packages(&mut self, packages: Vec<ExtractedPackage>) {
        self.extracted_packages = packages;
    }

    pub fn secret_redactions(&self) -> usize {
        self.secret_redactions
    }

    pub fn add_secret_redactions(&mut self, count: usize) {
        self.secret_redactions += count;
    }

    pub fn pii_redactions(&self) -> usize {
        self.pii_redactions
    }

    pub fn add_pii_redactions(&mut self, count: usize) {
        self.pii_redactions += count;
    }

    /// The synthetic leading notice, present only when something was
    /// redacted on the way in.
    pub fn redaction_notice(&self) -> Option<String> {
        let secrets = self.secret_redactions;
        let pii = self.pii_redactions;
        if secrets == 0 && pii == 0 {
            return None;
        }
        let mut notice = String::from("**CodeGate prevented ");
        if secrets > 0 {
            notice.push_str(&format!("{} secret(s)", secrets));
            if pii > 0 {
                notice.push_str(&format!(" and {} personal data value(s)", pii));
            }
        } else {
            notice.push_str(&format!("{} personal data value(s)", pii));
        }
        notice.push_str(" from being leaked by redacting them.**\n\n");
        Some(notice)
    }
}

/// One request-side inspection step.
#[async_trait]
pub trait RequestStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// A panicking redaction step must abort the request before any byte
    /// reaches the upstream; other steps fail locally and are skipped.
    fn aborts_on_panic(&self) -> bool {
        false
    }

    async fn run(&self, request: GatewayRequest, ctx: &mut PipelineContext) -> StepOutcome;
}

/// One response-side step. Stateful per request: a step may absorb chunks
/// into internal buffers and release them later.
pub trait ResponseStep: Send {
    fn name(&self) -> &'static str;

    fn run(&mut self, chunk: StreamChunk, ctx: &mut PipelineContext) -> Vec<StreamChunk>;

    /// End of stream: release anything still buffered.
    fn flush(&mut self, _ctx: &mut PipelineContext) -> Vec<StreamChunk> {
        Vec::new()
    }
}
