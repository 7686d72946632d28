//! Kuberun core types: resources, lifecycle status, options and errors.

#![forbid(unsafe_code)]

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod naming;
pub mod options;
pub mod status;

pub use naming::{credentials_name, object_name, sanitize};
pub use options::{CreateOptions, DeleteOptions, LogsOptions, ReadOptions, RuntimeOptions, UpdateOptions};
pub use status::{transform_status, ServiceStatus};

/// Namespace that always exists and never goes through provisioning.
pub const DEFAULT_NAMESPACE: &str = "default";

/// String map used for labels, annotations and service metadata.
pub type Metadata = BTreeMap<String, String>;

/// Kinds accepted on the public surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Namespace,
    NetworkPolicy,
    Service,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::NetworkPolicy => "networkpolicy",
            ResourceKind::Service => "service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ResourceKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "namespace" => Ok(ResourceKind::Namespace),
            "networkpolicy" => Ok(ResourceKind::NetworkPolicy),
            "service" => Ok(ResourceKind::Service),
            _ => Err(RuntimeError::InvalidResource),
        }
    }
}

/// A value handed to the runtime's CRUD surface.
///
/// `kind()` is the declared kind tag; the dispatcher resolves it and then
/// downcasts through `as_any()` to the concrete shape for that kind.
pub trait Resource: Send + Sync {
    fn kind(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

/// Downcast a resource to the shape expected for its kind.
pub fn downcast<T: Any>(resource: &dyn Resource) -> RuntimeResult<&T> {
    resource.as_any().downcast_ref::<T>().ok_or(RuntimeError::InvalidResource)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Namespace {
    pub name: String,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into() } }
}

impl Resource for Namespace {
    fn kind(&self) -> &str { ResourceKind::Namespace.as_str() }
    fn as_any(&self) -> &dyn Any { self }
}

/// Ingress policy admitting traffic only from namespaces carrying `allowed_labels`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkPolicy {
    pub name: String,
    pub namespace: String,
    pub allowed_labels: Metadata,
}

impl NetworkPolicy {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, allowed_labels: Metadata) -> Self {
        Self { name: name.into(), namespace: namespace.into(), allowed_labels }
    }
}

impl Resource for NetworkPolicy {
    fn kind(&self) -> &str { ResourceKind::NetworkPolicy.as_str() }
    fn as_any(&self) -> &dyn Any { self }
}

/// Logical service: one name+version workload, however many native objects back it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Service {
    pub name: String,
    pub version: String,
    pub source: String,
    pub metadata: Metadata,
    pub status: ServiceStatus,
}

impl Service {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into(), ..Default::default() }
    }

    /// Identity used when correlating native objects.
    pub fn key(&self) -> (&str, &str) { (&self.name, &self.version) }

    /// Opaque start marker recorded during correlation.
    pub fn started_at(&self) -> Option<&str> { self.metadata.get("started").map(String::as_str) }
}

impl Resource for Service {
    fn kind(&self) -> &str { ResourceKind::Service.as_str() }
    fn as_any(&self) -> &dyn Any { self }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum RuntimeError {
    #[error("invalid resource")]
    InvalidResource,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("upstream: {0}")]
    Upstream(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

pub mod prelude {
    pub use super::{
        downcast, Metadata, Namespace, NetworkPolicy, Resource, ResourceKind, RuntimeError, RuntimeResult, Service,
        ServiceStatus, DEFAULT_NAMESPACE,
    };
}
