use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use llm_client::provider::{ProviderAuth, ProviderKind, UpstreamTarget};

use crate::mux::types::MuxRule;

/// The built-in workspace that always exists and can never be archived or
/// deleted.
pub const DEFAULT_WORKSPACE_NAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceState {
    Active,
    Archived,
}

impl WorkspaceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceState::Active => "active",
            WorkspaceState::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(WorkspaceState::Active),
            "archived" => Some(WorkspaceState::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    id: String,
    name: String,
    state: WorkspaceState,
    custom_instructions: Option<String>,
    mux_rules: Vec<MuxRule>,
    created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            state: WorkspaceState::Active,
            custom_instructions: None,
            mux_rules: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    pub fn set_state(&mut self, state: WorkspaceState) {
        self.state = state;
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_WORKSPACE_NAME
    }

    pub fn is_archived(&self) -> bool {
        self.state == WorkspaceState::Archived
    }

    pub fn custom_instructions(&self) -> Option<&str> {
        self.custom_instructions.as_deref()
    }

    pub fn set_custom_instructions(&mut self, instructions: Option<String>) {
        self.custom_instructions = instructions;
    }

    pub fn mux_rules(&self) -> &[MuxRule] {
        &self.mux_rules
    }

    pub fn set_mux_rules(&mut self, rules: Vec<MuxRule>) {
        self.mux_rules = rules;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn set_created_at(&mut self, created_at: DateTime<Utc>) {
        self.created_at = created_at;
    }
}

/// A configured upstream. Global, referenced from mux rules by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    id: String,
    name: String,
    kind: ProviderKind,
    base_url: String,
    auth: ProviderAuth,
}

impl ProviderEndpoint {
    pub fn new(
        id: String,
        name: String,
        kind: ProviderKind,
        base_url: String,
        auth: ProviderAuth,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            base_url,
            auth,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &ProviderAuth {
        &self.auth
    }

    pub fn upstream_target(&self) -> UpstreamTarget {
        UpstreamTarget::new(self.base_url.clone(), self.auth.clone())
    }
}

/// The single current session; its active workspace scopes routing and the
/// substitution store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: String,
    active_workspace_id: String,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: String, active_workspace_id: String) -> Self {
        Self {
            id,
            active_workspace_id,
            updated_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn active_workspace_id(&self) -> &str {
        &self.active_workspace_id
    }

    pub fn activate(&mut self, workspace_id: String) {
        self.active_workspace_id = workspace_id;
        self.updated_at = Utc::now();
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
