//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cretoai_acl::{
    AclError, Actions, AclEngine, AclStores, Authorization, AuthorizationId, AuthorizationQuery,
    AuthorizationStore, EngineConfig, Grant, IdentityId, InMemoryAclStore, NewAuthorization,
    Resource, ResourceEnumerator, RoleRules, SecurityIdentity, StoreConfig,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ALICE: &str = "user:alice";
pub const ADMIN: &str = "user:admin";
pub const MALLORY: &str = "user:mallory";

/// Edit rights on one article
#[derive(Debug, Clone)]
pub struct ArticleEditorRole {
    pub article_id: String,
}

impl ArticleEditorRole {
    pub fn new(article_id: impl Into<String>) -> Self {
        Self {
            article_id: article_id.into(),
        }
    }
}

impl RoleRules for ArticleEditorRole {
    fn kind(&self) -> &str {
        "article_editor"
    }

    fn authorizations(&self, identity: &IdentityId) -> Vec<Grant> {
        vec![Grant::new(
            identity.clone(),
            Resource::entity("Article", self.article_id.as_str()).unwrap(),
            Actions::VIEW | Actions::EDIT,
        )]
    }

    fn payload(&self) -> serde_json::Value {
        json!({ "article_id": self.article_id })
    }
}

/// Full rights on every article, plus viewing every comment
#[derive(Debug, Clone, Default)]
pub struct AdministratorRole;

impl RoleRules for AdministratorRole {
    fn kind(&self) -> &str {
        "administrator"
    }

    fn authorizations(&self, identity: &IdentityId) -> Vec<Grant> {
        vec![
            Grant::new(
                identity.clone(),
                Resource::class("Article").unwrap(),
                Actions::all(),
            ),
            Grant::new(
                identity.clone(),
                Resource::class("Comment").unwrap(),
                Actions::VIEW,
            ),
        ]
    }
}

/// Rules that hand their authorizations to somebody else
#[derive(Debug, Clone)]
pub struct ForeignRole {
    pub target: IdentityId,
}

impl RoleRules for ForeignRole {
    fn kind(&self) -> &str {
        "foreign"
    }

    fn authorizations(&self, _identity: &IdentityId) -> Vec<Grant> {
        vec![Grant::new(
            self.target.clone(),
            Resource::class("Article").unwrap(),
            Actions::VIEW,
        )]
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        enable_cache: false,
        ..Default::default()
    }
}

pub fn article(id: &str) -> Resource {
    Resource::entity("Article", id).unwrap()
}

/// Engine over a fresh in-memory store with the standard identities
pub async fn setup(config: EngineConfig) -> (AclEngine, Arc<InMemoryAclStore>) {
    setup_with_store(config, StoreConfig::default()).await
}

pub async fn setup_with_store(
    config: EngineConfig,
    store_config: StoreConfig,
) -> (AclEngine, Arc<InMemoryAclStore>) {
    init_tracing();

    let store = Arc::new(InMemoryAclStore::with_config(store_config));
    let engine = AclEngine::new(config, AclStores::shared(store.clone())).unwrap();

    for id in [ALICE, ADMIN, MALLORY] {
        engine
            .register_identity(SecurityIdentity::new(id))
            .await
            .unwrap();
    }

    (engine, store)
}

/// Failure scripted for the next write that contains a cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Commit the first `n` drafts, then fail
    FailAfter(usize),
    /// Let another writer materialize the first cascade, then write
    ConcurrentCascade,
}

/// Authorization store over an in-memory store, with slow reads and
/// scripted write failures
pub struct FaultyStore {
    inner: Arc<InMemoryAclStore>,
    fault: Mutex<Option<Fault>>,
    read_delay: Mutex<Option<Duration>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryAclStore>) -> Self {
        Self {
            inner,
            fault: Mutex::new(None),
            read_delay: Mutex::new(None),
        }
    }

    pub fn inject(&self, fault: Fault) {
        *self.fault.lock().unwrap() = Some(fault);
    }

    /// Whether the scripted fault has fired
    pub fn fault_consumed(&self) -> bool {
        self.fault.lock().unwrap().is_none()
    }

    /// Sleep after every `find`, once its rows have been read
    pub fn delay_reads(&self, delay: Option<Duration>) {
        *self.read_delay.lock().unwrap() = delay;
    }

    fn take_fault(&self, drafts: &[NewAuthorization]) -> Option<Fault> {
        if drafts.iter().all(NewAuthorization::is_root) {
            return None;
        }
        self.fault.lock().unwrap().take()
    }

    fn read_delay(&self) -> Option<Duration> {
        *self.read_delay.lock().unwrap()
    }
}

#[async_trait]
impl AuthorizationStore for FaultyStore {
    async fn bulk_insert(
        &self,
        drafts: Vec<NewAuthorization>,
    ) -> cretoai_acl::Result<Vec<Authorization>> {
        match self.take_fault(&drafts) {
            None => self.inner.bulk_insert(drafts).await,
            Some(Fault::FailAfter(n)) => {
                let committed: Vec<NewAuthorization> = drafts.into_iter().take(n).collect();
                self.inner.bulk_insert(committed).await?;
                Err(AclError::DatabaseError("connection reset".to_string()))
            }
            Some(Fault::ConcurrentCascade) => {
                if let Some(first) = drafts.iter().find(|draft| !draft.is_root()) {
                    self.inner.bulk_insert(vec![first.clone()]).await?;
                }
                self.inner.bulk_insert(drafts).await
            }
        }
    }

    async fn find(&self, query: &AuthorizationQuery) -> cretoai_acl::Result<Vec<Authorization>> {
        let rows = self.inner.find(query).await?;
        if let Some(delay) = self.read_delay() {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }

    async fn find_children(
        &self,
        parents: &[AuthorizationId],
    ) -> cretoai_acl::Result<Vec<Authorization>> {
        self.inner.find_children(parents).await
    }

    async fn delete_subtrees(&self, ids: &[AuthorizationId]) -> cretoai_acl::Result<usize> {
        self.inner.delete_subtrees(ids).await
    }

    async fn delete_for_resource(&self, resource: &Resource) -> cretoai_acl::Result<usize> {
        self.inner.delete_for_resource(resource).await
    }
}

/// Engine whose authorization writes and reads go through a [`FaultyStore`]
pub async fn setup_faulty(
    config: EngineConfig,
) -> (AclEngine, Arc<InMemoryAclStore>, Arc<FaultyStore>) {
    init_tracing();

    let store = Arc::new(InMemoryAclStore::new());
    let faulty = Arc::new(FaultyStore::new(store.clone()));
    let enumerator: Arc<dyn ResourceEnumerator> = store.clone();
    let stores = AclStores {
        identities: store.clone(),
        roles: store.clone(),
        authorizations: faulty.clone(),
        enumerator,
    };
    let engine = AclEngine::new(config, stores).unwrap();

    for id in [ALICE, ADMIN, MALLORY] {
        engine
            .register_identity(SecurityIdentity::new(id))
            .await
            .unwrap();
    }

    (engine, store, faulty)
}
