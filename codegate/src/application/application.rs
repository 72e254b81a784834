// This is where we define the core application and how the shared state is
// wired together at startup.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use llm_client::broker::LLMBroker;

use crate::db::sqlite::{self, SqlDb};
use crate::extraction::CodeExtractor;
use crate::packages::index::PackageIndex;
use crate::pipeline::engine::RequestPipeline;
use crate::pipeline::factory;
use crate::proxy::ca::CertificateAuthority;
use crate::proxy::leaf::LeafCache;
use crate::redaction::pii::{PatternEntityRecognizer, PiiRecognizer};
use crate::redaction::signatures::SignatureStore;
use crate::redaction::store::SubstitutionStore;
use crate::workspace::registry::WorkspaceRegistry;

use super::config::configuration::Configuration;
use super::logging::tracing::tracing_subscribe;

static LOGGER_INSTALLED: OnceCell<bool> = OnceCell::new();

/// Per-session substitution stores. The store dies with its session.
pub struct SessionStores {
    stores: DashMap<String, Arc<SubstitutionStore>>,
}

impl SessionStores {
    pub fn new() -> Self {
        Self {
            stores: DashMap::new(),
        }
    }

    pub fn for_session(&self, session_id: &str) -> Arc<SubstitutionStore> {
        self.stores
            .entry(session_id.to_owned())
            .or_insert_with(|| Arc::new(SubstitutionStore::new()))
            .clone()
    }

    pub fn end_session(&self, session_id: &str) {
        if let Some((_, store)) = self.stores.remove(session_id) {
            store.clear();
        }
    }
}

impl Default for SessionStores {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct Application {
    // Arc here because it is shared by every connection task and is the
    // consistent state for the gateway
    pub config: Arc<Configuration>,
    pub sql: SqlDb,
    pub registry: Arc<WorkspaceRegistry>,
    pub signatures: &'static SignatureStore,
    pub pii_recognizer: Arc<dyn PiiRecognizer>,
    pub session_stores: Arc<SessionStores>,
    pub package_index: Arc<PackageIndex>,
    pub extractor: Arc<CodeExtractor>,
    pub llm_broker: Arc<LLMBroker>,
    pub request_pipeline: Arc<RequestPipeline>,
    pub certificate_authority: Arc<CertificateAuthority>,
    pub leaf_cache: Arc<LeafCache>,
    pub prompts: Arc<HashMap<String, String>>,
}

impl Application {
    pub async fn initialize(config: Configuration) -> anyhow::Result<Self> {
        debug!(?config, "configuration after loading");
        let config = Arc::new(config);

        let sql: SqlDb = Arc::new(sqlite::init(&config.db_path).await?);
        let registry = Arc::new(WorkspaceRegistry::load(sql.clone()).await?);
        let package_index = Arc::new(
            PackageIndex::load(&config.vec_db_path, config.vec_similarity_floor).await?,
        );
        let extractor = Arc::new(CodeExtractor::new());
        let signatures = SignatureStore::global();
        let pii_recognizer: Arc<dyn PiiRecognizer> = Arc::new(PatternEntityRecognizer);
        let prompts = Arc::new(config.load_prompts()?);

        let request_pipeline = Arc::new(factory::request_pipeline(
            extractor.clone(),
            package_index.clone(),
            signatures,
            pii_recognizer.clone(),
            config.provider_urls.clone(),
        ));

        let certificate_authority = Arc::new(CertificateAuthority::load_or_generate(
            &config.ca_cert,
            &config.ca_key,
        )?);
        let leaf_cache = Arc::new(LeafCache::new());

        Ok(Self {
            config,
            sql,
            registry,
            signatures,
            pii_recognizer,
            session_stores: Arc::new(SessionStores::new()),
            package_index,
            extractor,
            llm_broker: Arc::new(LLMBroker::new()),
            request_pipeline,
            certificate_authority,
            leaf_cache,
            prompts,
        })
    }

    pub fn install_logging(config: &Configuration) {
        if let Some(true) = LOGGER_INSTALLED.get() {
            return;
        }

        if !tracing_subscribe(config) {
            warn!("failed to install tracing_subscriber, one is probably already set");
        }

        if color_eyre::install().is_err() {
            warn!("failed to install color-eyre, probably installed already");
        }

        let _ = LOGGER_INSTALLED.set(true);
    }

    /// The substitution store scoped to the current session.
    pub fn current_session_store(&self) -> Arc<SubstitutionStore> {
        let snapshot = self.registry.snapshot();
        self.session_stores.for_session(snapshot.session().id())
    }
}
