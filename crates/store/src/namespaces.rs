//! Namespace existence cache and on-demand provisioning.
//!
//! The cache is approximate: it is filled by one full list, grows as the
//! runtime creates namespaces, and never drops names on its own. Namespaces
//! removed out-of-band stay "known" until `invalidate` or `refresh`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kuberun_core::DEFAULT_NAMESPACE;
use kuberun_kubehub::{templates, ClientResult, ClusterClient, Labels, NativeKind, NativeObject};
use metrics::counter;
use rustc_hash::FxHashSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Name of the default network policy attached to provisioned namespaces.
pub const INGRESS_POLICY: &str = "ingress";

#[derive(Debug, Default)]
pub struct NamespaceCache {
    names: FxHashSet<String>,
    populated_at: Option<DateTime<Utc>>,
}

impl NamespaceCache {
    pub fn new() -> Self { Self::default() }

    pub fn is_populated(&self) -> bool { self.populated_at.is_some() }

    pub fn populated_at(&self) -> Option<DateTime<Utc>> { self.populated_at }

    pub fn populate<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.names = names.into_iter().collect();
        self.populated_at = Some(Utc::now());
    }

    pub fn contains(&self, name: &str) -> bool { self.names.contains(name) }

    /// Record a namespace the runtime created. An unpopulated cache stays unpopulated.
    pub fn insert(&mut self, name: &str) -> bool {
        if !self.is_populated() {
            return false;
        }
        self.names.insert(name.to_string())
    }

    /// Drop everything; the next lookup re-lists.
    pub fn invalidate(&mut self) {
        self.names.clear();
        self.populated_at = None;
    }

    pub fn len(&self) -> usize { self.names.len() }

    pub fn is_empty(&self) -> bool { self.names.is_empty() }
}

/// Checks and provisions namespaces. Provisioning is serialized by the cache mutex.
pub struct NamespaceManager {
    client: Arc<dyn ClusterClient>,
    cache: Mutex<NamespaceCache>,
}

impl NamespaceManager {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self { Self { client, cache: Mutex::new(NamespaceCache::new()) } }

    async fn populate(&self, cache: &mut NamespaceCache) -> ClientResult<()> {
        debug!("populating namespace cache");
        let items = self.client.list(NativeKind::Namespace, None, &Labels::new()).await?;
        cache.populate(items.iter().map(|o| o.name().to_string()));
        debug!(count = cache.len(), "populated namespace cache");
        Ok(())
    }

    async fn exists_locked(&self, cache: &mut NamespaceCache, name: &str) -> ClientResult<bool> {
        if !cache.is_populated() {
            self.populate(cache).await?;
        }
        Ok(cache.contains(name))
    }

    async fn auto_create_locked(&self, cache: &mut NamespaceCache, name: &str, owner: &str) -> ClientResult<()> {
        counter!("kuberun_namespace_autocreate_total", 1u64);
        let ns = NativeObject::Namespace(templates::namespace(name, owner));
        match self.client.create(&ns, None).await {
            Ok(_) => info!(ns = %name, "namespace created"),
            Err(e) if e.is_already_exists() => debug!(ns = %name, error = %e, "ignoring already-exists for namespace"),
            Err(e) => return Err(e),
        }
        cache.insert(name);

        let mut allowed = Labels::new();
        allowed.insert("owner".into(), owner.to_string());
        let policy = NativeObject::NetworkPolicy(templates::network_policy(INGRESS_POLICY, name, &allowed, owner));
        match self.client.create(&policy, Some(name)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => {
                debug!(ns = %name, "ingress policy already present");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Whether `name` is known to exist, listing all namespaces on first use.
    /// A failed list leaves the cache unpopulated so the next call retries.
    pub async fn exists(&self, name: &str) -> ClientResult<bool> {
        let mut cache = self.cache.lock().await;
        self.exists_locked(&mut cache, name).await
    }

    /// Create `name` and its default ingress policy; an existing namespace is not an error.
    pub async fn auto_create(&self, name: &str, owner: &str) -> ClientResult<()> {
        let mut cache = self.cache.lock().await;
        self.auto_create_locked(&mut cache, name, owner).await
    }

    /// Provision `name` unless it is `default` or already known.
    pub async fn ensure(&self, name: &str, owner: &str) -> ClientResult<()> {
        if name == DEFAULT_NAMESPACE {
            return Ok(());
        }
        let mut cache = self.cache.lock().await;
        match self.exists_locked(&mut cache, name).await {
            Ok(true) => Ok(()),
            Ok(false) => self.auto_create_locked(&mut cache, name, owner).await.map_err(|e| {
                warn!(ns = %name, error = %e, "error creating namespace");
                e
            }),
            Err(e) => {
                warn!(ns = %name, error = %e, "error checking namespace exists");
                Err(e)
            }
        }
    }

    /// Re-list namespaces now.
    pub async fn refresh(&self) -> ClientResult<()> {
        let mut cache = self.cache.lock().await;
        cache.invalidate();
        self.populate(&mut cache).await
    }

    pub async fn invalidate(&self) { self.cache.lock().await.invalidate(); }

    pub async fn populated_at(&self) -> Option<DateTime<Utc>> { self.cache.lock().await.populated_at() }
}
