//! The registry owns all workspaces, provider endpoints and the single
//! current session. Reads go through an immutable snapshot swapped under a
//! read-mostly pointer; mutations persist to sqlite first, then rebuild the
//! snapshot. Activation is serialized on its own mutex.

use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::info;

use crate::db::{self, sqlite::SqlDb, DbError};
use crate::mux::types::{MuxRule, MuxRuleError};

use super::types::{
    ProviderEndpoint, Session, Workspace, WorkspaceState, DEFAULT_WORKSPACE_NAME,
};

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("workspace `{0}` not found")]
    NotFound(String),

    #[error("workspace name `{0}` is already taken")]
    NameTaken(String),

    #[error("workspace name must not be empty")]
    EmptyName,

    #[error("the default workspace cannot be modified this way")]
    DefaultImmutable,

    #[error("workspace `{0}` is archived")]
    Archived(String),

    #[error("workspace `{0}` must be archived before hard deletion")]
    NotArchived(String),

    #[error("provider endpoint `{0}` not found")]
    EndpointNotFound(String),

    #[error("provider endpoint `{0}` is referenced by mux rules")]
    EndpointInUse(String),

    #[error("invalid mux rule: {0}")]
    Rule(#[from] MuxRuleError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// An immutable view of the registry taken at request entry. In-flight
/// requests keep working against the snapshot they started with.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    workspaces: Vec<Workspace>,
    endpoints: Vec<ProviderEndpoint>,
    session: Session,
}

impl RegistrySnapshot {
    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    pub fn endpoints(&self) -> &[ProviderEndpoint] {
        &self.endpoints
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn workspace_by_name(&self, name: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.name() == name)
    }

    pub fn workspace_by_id(&self, id: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.id() == id)
    }

    pub fn endpoint_by_id(&self, id: &str) -> Option<&ProviderEndpoint> {
        self.endpoints.iter().find(|e| e.id() == id)
    }

    pub fn endpoint_by_kind(
        &self,
        kind: llm_client::provider::ProviderKind,
    ) -> Option<&ProviderEndpoint> {
        self.endpoints.iter().find(|e| e.kind() == kind)
    }

    /// The workspace the current session routes through. Falls back to the
    /// default workspace, which always exists.
    pub fn active_workspace(&self) -> &Workspace {
        self.workspace_by_id(self.session.active_workspace_id())
            .filter(|workspace| !workspace.is_archived())
            .or_else(|| self.workspace_by_name(DEFAULT_WORKSPACE_NAME))
            .expect("default workspace must exist")
    }
}

pub struct WorkspaceRegistry {
    db: SqlDb,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    activation_lock: tokio::sync::Mutex<()>,
}

impl WorkspaceRegistry {
    /// Loads registry state, creating the default workspace and the session
    /// row on first run.
    pub async fn load(db: SqlDb) -> Result<Self, WorkspaceError> {
        let mut workspaces = db::workspaces::load_workspaces(&db).await?;
        if !workspaces.iter().any(|w| w.name() == DEFAULT_WORKSPACE_NAME) {
            let default = Workspace::new(
                uuid::Uuid::new_v4().to_string(),
                DEFAULT_WORKSPACE_NAME.to_owned(),
            );
            db::workspaces::upsert_workspace(&db, &default).await?;
            workspaces.push(default);
            info!("created the built-in default workspace");
        }
        let default_id = workspaces
            .iter()
            .find(|w| w.name() == DEFAULT_WORKSPACE_NAME)
            .map(|w| w.id().to_owned())
            .expect("default just ensured");

        let session = match db::workspaces::load_session(&db).await? {
            Some(session) => session,
            None => {
                let session = Session::new(uuid::Uuid::new_v4().to_string(), default_id);
                db::workspaces::save_session(&db, &session).await?;
                session
            }
        };
        let endpoints = db::workspaces::load_endpoints(&db).await?;

        Ok(Self {
            db,
            snapshot: RwLock::new(Arc::new(RegistrySnapshot {
                workspaces,
                endpoints,
                session,
            })),
            activation_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().expect("registry poisoned").clone()
    }

    async fn rebuild(&self) -> Result<(), WorkspaceError> {
        let workspaces = db::workspaces::load_workspaces(&self.db).await?;
        let endpoints = db::workspaces::load_endpoints(&self.db).await?;
        let session = db::workspaces::load_session(&self.db)
            .await?
            .expect("session row must exist after load");
        let next = Arc::new(RegistrySnapshot {
            workspaces,
            endpoints,
            session,
        });
        *self.snapshot.write().expect("registry poisoned") = next;
        Ok(())
    }

    pub async fn create_workspace(&self, name: &str) -> Result<Workspace, WorkspaceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WorkspaceError::EmptyName);
        }
        if self.snapshot().workspace_by_name(name).is_some() {
            return Err(WorkspaceError::NameTaken(name.to_owned()));
        }
        let workspace = Workspace::new(uuid::Uuid::new_v4().to_string(), name.to_owned());
        db::workspaces::upsert_workspace(&self.db, &workspace).await?;
        self.rebuild().await?;
        Ok(workspace)
    }

    pub async fn rename_workspace(
        &self,
        name: &str,
        new_name: &str,
    ) -> Result<Workspace, WorkspaceError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(WorkspaceError::EmptyName);
        }
        let snapshot = self.snapshot();
        let workspace = snapshot
            .workspace_by_name(name)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_owned()))?;
        if workspace.is_default() {
            return Err(WorkspaceError::DefaultImmutable);
        }
        if name != new_name && snapshot.workspace_by_name(new_name).is_some() {
            return Err(WorkspaceError::NameTaken(new_name.to_owned()));
        }
        let mut updated = workspace.clone();
        updated.set_name(new_name.to_owned());
        db::workspaces::upsert_workspace(&self.db, &updated).await?;
        self.rebuild().await?;
        Ok(updated)
    }

    pub async fn set_custom_instructions(
        &self,
        name: &str,
        instructions: Option<String>,
    ) -> Result<Workspace, WorkspaceError> {
        let snapshot = self.snapshot();
        let workspace = snapshot
            .workspace_by_name(name)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_owned()))?;
        let mut updated = workspace.clone();
        updated.set_custom_instructions(instructions);
        db::workspaces::upsert_workspace(&self.db, &updated).await?;
        self.rebuild().await?;
        Ok(updated)
    }

    pub async fn set_mux_rules(
        &self,
        name: &str,
        rules: Vec<MuxRule>,
    ) -> Result<Workspace, WorkspaceError> {
        let snapshot = self.snapshot();
        let workspace = snapshot
            .workspace_by_name(name)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_owned()))?;
        for rule in &rules {
            if snapshot.endpoint_by_id(rule.provider_endpoint_id()).is_none() {
                return Err(WorkspaceError::EndpointNotFound(
                    rule.provider_endpoint_id().to_owned(),
                ));
            }
        }
        db::workspaces::replace_mux_rules(&self.db, workspace.id(), &rules).await?;
        self.rebuild().await?;
        let snapshot = self.snapshot();
        Ok(snapshot
            .workspace_by_name(name)
            .cloned()
            .expect("workspace survives rule update"))
    }

    /// Archive is the soft delete: recoverable until hard-deleted. The
    /// default workspace is immune; archiving the active workspace drops
    /// the session back to default.
    pub async fn archive_workspace(&self, name: &str) -> Result<(), WorkspaceError> {
        let _guard = self.activation_lock.lock().await;
        let snapshot = self.snapshot();
        let workspace = snapshot
            .workspace_by_name(name)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_owned()))?;
        if workspace.is_default() {
            return Err(WorkspaceError::DefaultImmutable);
        }
        let mut updated = workspace.clone();
        updated.set_state(WorkspaceState::Archived);
        db::workspaces::upsert_workspace(&self.db, &updated).await?;
        if snapshot.session().active_workspace_id() == workspace.id() {
            let default_id = snapshot
                .workspace_by_name(DEFAULT_WORKSPACE_NAME)
                .expect("default workspace must exist")
                .id()
                .to_owned();
            let mut session = snapshot.session().clone();
            session.activate(default_id);
            db::workspaces::save_session(&self.db, &session).await?;
        }
        self.rebuild().await?;
        Ok(())
    }

    pub async fn recover_workspace(&self, name: &str) -> Result<(), WorkspaceError> {
        let snapshot = self.snapshot();
        let workspace = snapshot
            .workspace_by_name(name)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_owned()))?;
        let mut updated = workspace.clone();
        updated.set_state(WorkspaceState::Active);
        db::workspaces::upsert_workspace(&self.db, &updated).await?;
        self.rebuild().await?;
        Ok(())
    }

    pub async fn hard_delete_workspace(&self, name: &str) -> Result<(), WorkspaceError> {
        let snapshot = self.snapshot();
        let workspace = snapshot
            .workspace_by_name(name)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_owned()))?;
        if workspace.is_default() {
            return Err(WorkspaceError::DefaultImmutable);
        }
        if !workspace.is_archived() {
            return Err(WorkspaceError::NotArchived(name.to_owned()));
        }
        db::workspaces::delete_workspace(&self.db, workspace.id()).await?;
        self.rebuild().await?;
        Ok(())
    }

    /// Serialized on the activation mutex; concurrent activations are
    /// applied one at a time and the session row always reflects the last.
    pub async fn activate_workspace(&self, name: &str) -> Result<Session, WorkspaceError> {
        let _guard = self.activation_lock.lock().await;
        let snapshot = self.snapshot();
        let workspace = snapshot
            .workspace_by_name(name)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_owned()))?;
        if workspace.is_archived() {
            return Err(WorkspaceError::Archived(name.to_owned()));
        }
        let mut session = snapshot.session().clone();
        session.activate(workspace.id().to_owned());
        db::workspaces::save_session(&self.db, &session).await?;
        self.rebuild().await?;
        Ok(session)
    }

    pub async fn upsert_endpoint(
        &self,
        endpoint: ProviderEndpoint,
    ) -> Result<ProviderEndpoint, WorkspaceError> {
        db::workspaces::upsert_endpoint(&self.db, &endpoint).await?;
        self.rebuild().await?;
        Ok(endpoint)
    }

    pub async fn delete_endpoint(&self, endpoint_id: &str) -> Result<(), WorkspaceError> {
        let snapshot = self.snapshot();
        if snapshot.endpoint_by_id(endpoint_id).is_none() {
            return Err(WorkspaceError::EndpointNotFound(endpoint_id.to_owned()));
        }
        let referenced = snapshot.workspaces().iter().any(|workspace| {
            workspace
                .mux_rules()
                .iter()
                .any(|rule| rule.provider_endpoint_id() == endpoint_id)
        });
        if referenced {
            return Err(WorkspaceError::EndpointInUse(endpoint_id.to_owned()));
        }
        db::workspaces::delete_endpoint(&self.db, endpoint_id).await?;
        self.rebuild().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite;
    use llm_client::provider::{ProviderAuth, ProviderKind};

    async fn registry() -> WorkspaceRegistry {
        let pool = sqlite::init_in_memory().await.expect("db");
        WorkspaceRegistry::load(Arc::new(pool)).await.expect("load")
    }

    #[tokio::test]
    async fn default_workspace_exists_and_is_active() {
        let registry = registry().await;
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.active_workspace().name(), DEFAULT_WORKSPACE_NAME);
    }

    #[tokio::test]
    async fn default_workspace_cannot_be_archived_or_deleted() {
        let registry = registry().await;
        assert!(matches!(
            registry.archive_workspace(DEFAULT_WORKSPACE_NAME).await,
            Err(WorkspaceError::DefaultImmutable)
        ));
        assert!(matches!(
            registry.hard_delete_workspace(DEFAULT_WORKSPACE_NAME).await,
            Err(WorkspaceError::DefaultImmutable)
        ));
        assert_eq!(
            registry.snapshot().active_workspace().name(),
            DEFAULT_WORKSPACE_NAME
        );
    }

    #[tokio::test]
    async fn activation_switches_the_single_session() {
        let registry = registry().await;
        registry.create_workspace("w1").await.expect("create");
        registry.activate_workspace("w1").await.expect("activate");
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.active_workspace().name(), "w1");
        // still exactly one session
        assert_eq!(snapshot.session().active_workspace_id().is_empty(), false);
    }

    #[tokio::test]
    async fn archive_recover_hard_delete_lifecycle() {
        let registry = registry().await;
        registry.create_workspace("w1").await.expect("create");
        registry.activate_workspace("w1").await.expect("activate");

        // hard delete before archive is rejected
        assert!(matches!(
            registry.hard_delete_workspace("w1").await,
            Err(WorkspaceError::NotArchived(_))
        ));

        registry.archive_workspace("w1").await.expect("archive");
        // archiving the active workspace falls back to default
        assert_eq!(
            registry.snapshot().active_workspace().name(),
            DEFAULT_WORKSPACE_NAME
        );

        registry.recover_workspace("w1").await.expect("recover");
        assert!(!registry
            .snapshot()
            .workspace_by_name("w1")
            .unwrap()
            .is_archived());

        registry.archive_workspace("w1").await.expect("archive");
        registry.hard_delete_workspace("w1").await.expect("delete");
        assert!(registry.snapshot().workspace_by_name("w1").is_none());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let registry = registry().await;
        registry.create_workspace("w1").await.expect("create");
        assert!(matches!(
            registry.create_workspace("w1").await,
            Err(WorkspaceError::NameTaken(_))
        ));
        assert!(matches!(
            registry.create_workspace("  ").await,
            Err(WorkspaceError::EmptyName)
        ));
    }

    #[tokio::test]
    async fn endpoint_referenced_by_rules_cannot_be_deleted() {
        let registry = registry().await;
        let endpoint = ProviderEndpoint::new(
            "ep1".into(),
            "local-ollama".into(),
            ProviderKind::Ollama,
            "http://localhost:11434".into(),
            ProviderAuth::None,
        );
        registry.upsert_endpoint(endpoint).await.expect("endpoint");
        registry.create_workspace("w1").await.expect("create");
        registry
            .set_mux_rules(
                "w1",
                vec![crate::mux::types::MuxRule::catch_all(
                    "ep1".into(),
                    "qwen2.5-coder:1.5b".into(),
                )],
            )
            .await
            .expect("rules");
        assert!(matches!(
            registry.delete_endpoint("ep1").await,
            Err(WorkspaceError::EndpointInUse(_))
        ));
    }

    #[tokio::test]
    async fn rules_referencing_unknown_endpoint_are_rejected() {
        let registry = registry().await;
        registry.create_workspace("w1").await.expect("create");
        let result = registry
            .set_mux_rules(
                "w1",
                vec![crate::mux::types::MuxRule::catch_all(
                    "ghost".into(),
                    "m".into(),
                )],
            )
            .await;
        assert!(matches!(result, Err(WorkspaceError::EndpointNotFound(_))));
    }
}
