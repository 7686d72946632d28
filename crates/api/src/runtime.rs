use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kuberun_core::prelude::*;
use kuberun_core::{sanitize, CreateOptions, DeleteOptions, LogsOptions, ReadOptions, RuntimeOptions, UpdateOptions};
use kuberun_kubehub::templates;
use kuberun_kubehub::{ClientResult, ClusterClient, Collections, KubeClusterClient, Labels, NativeKind, NativeObject};
use kuberun_ops::{replay, LogStream, ServiceLogs};
use kuberun_store::{correlate, Correlated, NamespaceManager};
use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::locks::KeyedLocks;
use crate::workload;
use crate::Runtime;

/// Runtime over a cluster API.
pub struct KubeRuntime {
    client: Arc<dyn ClusterClient>,
    options: ArcSwap<RuntimeOptions>,
    namespaces: NamespaceManager,
    locks: KeyedLocks,
    running: AtomicBool,
}

impl KubeRuntime {
    pub fn new(client: Arc<dyn ClusterClient>, options: RuntimeOptions) -> Self {
        Self {
            namespaces: NamespaceManager::new(client.clone()),
            client,
            options: ArcSwap::from_pointee(options),
            locks: KeyedLocks::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Connect with the ambient kubeconfig and `KUBERUN_*` options.
    pub async fn connect() -> anyhow::Result<Self> {
        let client = KubeClusterClient::try_default().await?;
        Ok(Self::new(Arc::new(client), RuntimeOptions::from_env()))
    }

    pub fn options(&self) -> Arc<RuntimeOptions> { self.options.load_full() }

    pub fn namespaces(&self) -> &NamespaceManager { &self.namespaces }

    /// Lock key over the sanitized identity, matching the objects it guards.
    fn lock_key(namespace: &str, name: &str, version: &str) -> String {
        format!("{}/{}/{}", namespace, sanitize(name), sanitize(version))
    }

    /// List and join everything matching `selector` in `namespace`.
    async fn services(&self, namespace: &str, selector: &Labels) -> ClientResult<Vec<Correlated>> {
        let ns = Some(namespace);
        let (services, deployments, pods) = futures::try_join!(
            self.client.list(NativeKind::Service, ns, selector),
            self.client.list(NativeKind::Deployment, ns, selector),
            self.client.list(NativeKind::Pod, ns, selector),
        )?;
        let all: Collections = services.into_iter().chain(deployments).chain(pods).collect();
        Ok(correlate(&all.services, &all.deployments, &all.pods))
    }

    async fn create_service(&self, svc: &Service, opts: CreateOptions) -> RuntimeResult<()> {
        let defaults = self.options.load_full();
        let mut svc = svc.clone();
        if !opts.source.is_empty() {
            svc.source = opts.source.clone();
        } else if svc.source.is_empty() {
            svc.source = defaults.source.clone();
        }
        let type_tag = if opts.r#type.is_empty() { defaults.r#type.clone() } else { opts.r#type.clone() };
        let image = if opts.image.is_empty() { defaults.image.clone() } else { opts.image.clone() };
        let namespace = sanitize(&opts.namespace);

        let _guard = self.locks.lock(&Self::lock_key(&namespace, &svc.name, &svc.version)).await;
        self.namespaces.ensure(&namespace, &defaults.owner).await?;

        let credentials = if opts.secrets.is_empty() {
            None
        } else {
            let name = workload::create_credentials(&*self.client, &svc, &namespace, &opts.secrets).await.map_err(|e| {
                warn!(service = %svc.name, error = %e, "error generating auth credentials");
                e
            })?;
            Some((name, opts.secrets.keys().cloned().collect()))
        };

        let spec = workload::spec_for(&svc, &namespace, &type_tag, &image, &defaults.owner, credentials);
        workload::start(&*self.client, &spec).await?;
        info!(service = %svc.name, version = %svc.version, ns = %namespace, "service created");
        Ok(())
    }

    async fn read_services(&self, opts: ReadOptions) -> RuntimeResult<Vec<Service>> {
        let mut selector = Labels::new();
        if let Some(name) = opts.service.as_deref().filter(|s| !s.is_empty()) {
            selector.insert("name".into(), sanitize(name));
        }
        if let Some(version) = opts.version.as_deref().filter(|s| !s.is_empty()) {
            selector.insert("version".into(), sanitize(version));
        }
        if let Some(t) = opts.r#type.as_deref().filter(|s| !s.is_empty()) {
            selector.insert("type".into(), t.to_string());
        }
        let namespace = sanitize(&opts.namespace);
        let found = self.services(&namespace, &selector).await?;
        debug!(ns = %namespace, count = found.len(), "read services");
        Ok(found.into_iter().map(|c| c.service).collect())
    }

    /// Lock every matched service, then re-resolve under the locks. A service
    /// that appears in between is left for the next update.
    async fn update_service(&self, svc: &Service, opts: UpdateOptions) -> RuntimeResult<()> {
        let namespace = sanitize(&opts.namespace);
        let mut selector = Labels::new();
        if !svc.name.is_empty() {
            selector.insert("name".into(), sanitize(&svc.name));
        }
        if !svc.version.is_empty() {
            selector.insert("version".into(), sanitize(&svc.version));
        }

        let key_of = |c: &Correlated| Self::lock_key(&namespace, &c.service.name, &c.service.version);
        let keys: Vec<String> = self.services(&namespace, &selector).await?.iter().map(key_of).collect();
        let _guards = self.locks.lock_all(keys.clone()).await;

        let updated = chrono::Utc::now().timestamp().to_string();
        for found in self.services(&namespace, &selector).await? {
            if !keys.contains(&key_of(&found)) {
                debug!(service = %found.service.name, version = %found.service.version, "appeared during update; skipping");
                continue;
            }
            let Some(mut dep) = found.native_deployment else {
                warn!(service = %found.service.name, version = %found.service.version, "no deployment to update");
                continue;
            };
            stamp(&mut dep, &svc.metadata, &updated);
            self.client.update(&NativeObject::Deployment(dep), Some(&namespace)).await?;
            info!(service = %found.service.name, version = %found.service.version, ns = %namespace, "service updated");
        }
        Ok(())
    }

    async fn delete_service(&self, svc: &Service, opts: DeleteOptions) -> RuntimeResult<()> {
        let namespace = sanitize(&opts.namespace);
        let _guard = self.locks.lock(&Self::lock_key(&namespace, &svc.name, &svc.version)).await;

        let secret = kuberun_core::credentials_name(&svc.name, &svc.version);
        if let Err(e) = self.client.delete(NativeKind::Secret, Some(&namespace), &secret).await {
            if !e.is_not_found() {
                warn!(service = %svc.name, secret = %secret, error = %e, "error cleaning up credentials");
            }
        }
        workload::stop(&*self.client, &namespace, svc).await?;
        info!(service = %svc.name, version = %svc.version, ns = %namespace, "service deleted");
        Ok(())
    }

    async fn service_logs(&self, svc: &Service, opts: LogsOptions) -> RuntimeResult<LogStream> {
        let cap = self.options.load().log_queue_cap;
        let logs = ServiceLogs::new(self.client.clone(), &svc.name, &opts, cap);
        if logs.follows() {
            return Ok(logs.stream().await?);
        }
        let records = logs.read().await.map_err(|e| {
            error!(service = %svc.name, error = %e, "error reading logs");
            e
        })?;
        Ok(replay(records, cap))
    }
}

/// Provenance annotations written on create; an update never overwrites them.
const PROVENANCE: [&str; 3] = ["name", "version", "source"];

/// Merge `metadata` into the deployment annotations and stamp `updated` on the
/// pod template, which makes the cluster roll the workload.
fn stamp(dep: &mut Deployment, metadata: &Metadata, updated: &str) {
    let annotations = dep.metadata.annotations.get_or_insert_with(Default::default);
    for (k, v) in metadata {
        if !PROVENANCE.contains(&k.as_str()) {
            annotations.insert(k.clone(), v.clone());
        }
    }
    if let Some(spec) = dep.spec.as_mut() {
        let template = spec.template.metadata.get_or_insert_with(Default::default);
        template.annotations.get_or_insert_with(Default::default).insert("updated".into(), updated.to_string());
    }
}

fn kind_of(resource: &dyn Resource) -> RuntimeResult<ResourceKind> { resource.kind().parse() }

fn record(verb: &'static str, kind: ResourceKind) {
    counter!("kuberun_ops_total", 1u64, "verb" => verb, "kind" => kind.as_str());
}

#[async_trait]
impl Runtime for KubeRuntime {
    async fn init(&self, options: RuntimeOptions) -> RuntimeResult<()> {
        debug!(type_tag = %options.r#type, owner = %options.owner, "runtime options replaced");
        self.options.store(Arc::new(options));
        Ok(())
    }

    async fn create(&self, resource: &dyn Resource, opts: CreateOptions) -> RuntimeResult<()> {
        let kind = kind_of(resource)?;
        record("create", kind);
        let owner = self.options.load().owner.clone();
        match kind {
            ResourceKind::Namespace => {
                let ns = downcast::<Namespace>(resource)?;
                let name = sanitize(&ns.name);
                if name == DEFAULT_NAMESPACE {
                    return Ok(());
                }
                Ok(self.namespaces.auto_create(&name, &owner).await?)
            }
            ResourceKind::NetworkPolicy => {
                let np = downcast::<NetworkPolicy>(resource)?;
                let policy = templates::network_policy(&np.name, &np.namespace, &np.allowed_labels, &owner);
                self.client.create(&NativeObject::NetworkPolicy(policy), Some(&np.namespace)).await?;
                Ok(())
            }
            ResourceKind::Service => self.create_service(downcast::<Service>(resource)?, opts).await,
        }
    }

    async fn read(&self, opts: ReadOptions) -> RuntimeResult<Vec<Service>> { self.read_services(opts).await }

    async fn update(&self, resource: &dyn Resource, opts: UpdateOptions) -> RuntimeResult<()> {
        let kind = kind_of(resource)?;
        record("update", kind);
        match kind {
            ResourceKind::Namespace => {
                downcast::<Namespace>(resource)?;
                Ok(())
            }
            ResourceKind::NetworkPolicy => {
                let np = downcast::<NetworkPolicy>(resource)?;
                let owner = self.options.load().owner.clone();
                let policy = templates::network_policy(&np.name, &np.namespace, &np.allowed_labels, &owner);
                self.client.update(&NativeObject::NetworkPolicy(policy), Some(&np.namespace)).await?;
                Ok(())
            }
            ResourceKind::Service => self.update_service(downcast::<Service>(resource)?, opts).await,
        }
    }

    async fn delete(&self, resource: &dyn Resource, opts: DeleteOptions) -> RuntimeResult<()> {
        let kind = kind_of(resource)?;
        record("delete", kind);
        match kind {
            ResourceKind::Namespace => {
                let ns = downcast::<Namespace>(resource)?;
                let result = self.client.delete(NativeKind::Namespace, None, &sanitize(&ns.name)).await;
                self.namespaces.invalidate().await;
                Ok(result?)
            }
            ResourceKind::NetworkPolicy => {
                let np = downcast::<NetworkPolicy>(resource)?;
                self.client.delete(NativeKind::NetworkPolicy, Some(&np.namespace), &np.name).await?;
                Ok(())
            }
            ResourceKind::Service => self.delete_service(downcast::<Service>(resource)?, opts).await,
        }
    }

    async fn logs(&self, resource: &dyn Resource, opts: LogsOptions) -> RuntimeResult<Option<LogStream>> {
        let kind = kind_of(resource)?;
        record("logs", kind);
        match kind {
            ResourceKind::Namespace | ResourceKind::NetworkPolicy => Ok(None),
            ResourceKind::Service => Ok(Some(self.service_logs(downcast::<Service>(resource)?, opts).await?)),
        }
    }

    async fn start(&self) -> RuntimeResult<()> {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("runtime started");
        }
        Ok(())
    }

    async fn stop(&self) -> RuntimeResult<()> {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("runtime stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }

    fn name(&self) -> &'static str { "kubernetes" }
}
