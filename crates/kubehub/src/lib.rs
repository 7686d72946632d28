//! Kuberun kubehub: the cluster API client seam and native object templates.
//!
//! Everything the runtime does against the control plane goes through
//! [`ClusterClient`]. [`KubeClusterClient`] talks to a real API server through
//! kube-rs; [`MemoryClusterClient`] keeps objects in RAM for tests.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

mod kube_client;
mod memory;
pub mod templates;

pub use kube_client::KubeClusterClient;
pub use memory::{MemoryClusterClient, Verb};

/// Label selector: every pair must match.
pub type Labels = BTreeMap<String, String>;

/// Native object kinds the runtime reads or writes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NativeKind {
    Namespace,
    NetworkPolicy,
    Service,
    Deployment,
    Pod,
    Secret,
}

impl NativeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NativeKind::Namespace => "namespace",
            NativeKind::NetworkPolicy => "networkpolicy",
            NativeKind::Service => "service",
            NativeKind::Deployment => "deployment",
            NativeKind::Pod => "pod",
            NativeKind::Secret => "secret",
        }
    }

    pub fn namespaced(&self) -> bool { !matches!(self, NativeKind::Namespace) }
}

impl fmt::Display for NativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A typed orchestrator object.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeObject {
    Namespace(Namespace),
    NetworkPolicy(NetworkPolicy),
    Service(Service),
    Deployment(Deployment),
    Pod(Pod),
    Secret(Secret),
}

impl NativeObject {
    pub fn kind(&self) -> NativeKind {
        match self {
            NativeObject::Namespace(_) => NativeKind::Namespace,
            NativeObject::NetworkPolicy(_) => NativeKind::NetworkPolicy,
            NativeObject::Service(_) => NativeKind::Service,
            NativeObject::Deployment(_) => NativeKind::Deployment,
            NativeObject::Pod(_) => NativeKind::Pod,
            NativeObject::Secret(_) => NativeKind::Secret,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            NativeObject::Namespace(o) => &o.metadata,
            NativeObject::NetworkPolicy(o) => &o.metadata,
            NativeObject::Service(o) => &o.metadata,
            NativeObject::Deployment(o) => &o.metadata,
            NativeObject::Pod(o) => &o.metadata,
            NativeObject::Secret(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            NativeObject::Namespace(o) => &mut o.metadata,
            NativeObject::NetworkPolicy(o) => &mut o.metadata,
            NativeObject::Service(o) => &mut o.metadata,
            NativeObject::Deployment(o) => &mut o.metadata,
            NativeObject::Pod(o) => &mut o.metadata,
            NativeObject::Secret(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str { self.metadata().name.as_deref().unwrap_or("") }

    /// True when every selector pair is present in the object's labels.
    pub fn matches(&self, selector: &Labels) -> bool {
        let labels = self.metadata().labels.as_ref();
        selector.iter().all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

/// Split a mixed list into the typed collections the correlator joins.
#[derive(Debug, Clone, Default)]
pub struct Collections {
    pub services: Vec<Service>,
    pub deployments: Vec<Deployment>,
    pub pods: Vec<Pod>,
}

impl Collections {
    pub fn push(&mut self, obj: NativeObject) {
        match obj {
            NativeObject::Service(s) => self.services.push(s),
            NativeObject::Deployment(d) => self.deployments.push(d),
            NativeObject::Pod(p) => self.pods.push(p),
            _ => {}
        }
    }
}

impl FromIterator<NativeObject> for Collections {
    fn from_iter<I: IntoIterator<Item = NativeObject>>(iter: I) -> Self {
        let mut c = Collections::default();
        for o in iter { c.push(o); }
        c
    }
}

/// Render a selector as `k1=v1,k2=v2`.
pub fn label_selector(labels: &Labels) -> String {
    labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

/// Pod log request parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodLogParams {
    pub follow: bool,
    pub tail_lines: Option<i64>,
    pub since_seconds: Option<i64>,
    pub container: Option<String>,
}

/// Errors from the cluster API, classified by status code and reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("serde: {0}")]
    Serde(String),
    #[error("unsupported {0} operation on {1}")]
    Unsupported(&'static str, NativeKind),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool { matches!(self, ClientError::NotFound(_)) }
    pub fn is_already_exists(&self) -> bool { matches!(self, ClientError::AlreadyExists(_)) }
}

impl From<kube::Error> for ClientError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 404 || ae.reason == "NotFound" => ClientError::NotFound(ae.message),
            kube::Error::Api(ae) if ae.reason == "AlreadyExists" => ClientError::AlreadyExists(ae.message),
            kube::Error::Api(ae) => ClientError::Api { code: ae.code, reason: ae.reason, message: ae.message },
            kube::Error::SerdeError(e) => ClientError::Serde(e.to_string()),
            other => ClientError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self { ClientError::Serde(e.to_string()) }
}

impl From<ClientError> for kuberun_core::RuntimeError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::NotFound(m) => kuberun_core::RuntimeError::NotFound(m),
            ClientError::AlreadyExists(m) => kuberun_core::RuntimeError::AlreadyExists(m),
            other => kuberun_core::RuntimeError::Upstream(other.to_string()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Raw log bytes from a followed pod.
pub type LogByteStream = BoxStream<'static, ClientResult<Bytes>>;

/// Control-plane collaborator. `namespace` is ignored for cluster-scoped kinds;
/// `None` on a namespaced kind means all namespaces for reads.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list(&self, kind: NativeKind, namespace: Option<&str>, selector: &Labels) -> ClientResult<Vec<NativeObject>>;

    async fn get(&self, kind: NativeKind, namespace: Option<&str>, name: &str) -> ClientResult<NativeObject>;

    async fn create(&self, object: &NativeObject, namespace: Option<&str>) -> ClientResult<NativeObject>;

    /// Replace an existing object with `object` (matched by kind + name).
    async fn update(&self, object: &NativeObject, namespace: Option<&str>) -> ClientResult<NativeObject>;

    async fn delete(&self, kind: NativeKind, namespace: Option<&str>, name: &str) -> ClientResult<()>;

    /// Fetch the current log text of a pod.
    async fn pod_logs(&self, namespace: &str, pod: &str, params: &PodLogParams) -> ClientResult<String>;

    /// Follow a pod's log; the returned stream ends when the pod's log closes.
    async fn pod_log_stream(&self, namespace: &str, pod: &str, params: &PodLogParams) -> ClientResult<LogByteStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled(labels: &[(&str, &str)]) -> NativeObject {
        let mut pod = Pod::default();
        pod.metadata.name = Some("p".into());
        pod.metadata.labels = Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
        NativeObject::Pod(pod)
    }

    #[test]
    fn selector_matches_subset() {
        let obj = labelled(&[("name", "api"), ("version", "v1")]);
        let mut sel = Labels::new();
        assert!(obj.matches(&sel));
        sel.insert("name".into(), "api".into());
        assert!(obj.matches(&sel));
        sel.insert("version".into(), "v2".into());
        assert!(!obj.matches(&sel));
    }

    #[test]
    fn label_selector_renders_pairs() {
        let mut sel = Labels::new();
        sel.insert("version".into(), "v1".into());
        sel.insert("name".into(), "api".into());
        assert_eq!(label_selector(&sel), "name=api,version=v1");
        assert_eq!(label_selector(&Labels::new()), "");
    }

    #[test]
    fn client_errors_map_to_runtime_taxonomy() {
        use kuberun_core::RuntimeError;
        assert_eq!(RuntimeError::from(ClientError::NotFound("x".into())), RuntimeError::NotFound("x".into()));
        assert!(matches!(RuntimeError::from(ClientError::Transport("boom".into())), RuntimeError::Upstream(_)));
    }

    #[test]
    fn kube_api_errors_are_classified_by_reason() {
        let ae = kube::error::ErrorResponse { status: "Failure".into(), message: "namespaces \"ns1\" already exists".into(), reason: "AlreadyExists".into(), code: 409 };
        assert!(ClientError::from(kube::Error::Api(ae)).is_already_exists());
        let ae = kube::error::ErrorResponse { status: "Failure".into(), message: "gone".into(), reason: "NotFound".into(), code: 404 };
        assert!(ClientError::from(kube::Error::Api(ae)).is_not_found());
        let ae = kube::error::ErrorResponse { status: "Failure".into(), message: "conflict".into(), reason: "Conflict".into(), code: 409 };
        assert!(matches!(ClientError::from(kube::Error::Api(ae)), ClientError::Api { code: 409, .. }));
    }
}
