//! Instance-wide and per-call option bundles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_NAMESPACE;

/// Default type tag labelling managed workloads.
pub const DEFAULT_TYPE: &str = "service";
/// Default ownership marker value on provisioned namespaces and policies.
pub const DEFAULT_OWNER: &str = "kuberun";

/// Instance-wide configuration; call-level options fall back to these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Value of the `type` label on managed workloads
    pub r#type: String,
    /// Fallback image when a create call does not name one
    pub image: String,
    /// Fallback source reference
    pub source: String,
    /// Value of the `owner` label on provisioned namespaces and policies
    pub owner: String,
    /// Capacity of the record channel behind a log stream
    pub log_queue_cap: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            r#type: DEFAULT_TYPE.to_string(),
            image: String::new(),
            source: String::new(),
            owner: DEFAULT_OWNER.to_string(),
            log_queue_cap: 1024,
        }
    }
}

impl RuntimeOptions {
    /// Build from `KUBERUN_*` environment variables, defaulting anything unset or malformed.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            r#type: std::env::var("KUBERUN_TYPE").ok().filter(|s| !s.is_empty()).unwrap_or(d.r#type),
            image: std::env::var("KUBERUN_IMAGE").unwrap_or(d.image),
            source: std::env::var("KUBERUN_SOURCE").unwrap_or(d.source),
            owner: std::env::var("KUBERUN_OWNER").ok().filter(|s| !s.is_empty()).unwrap_or(d.owner),
            log_queue_cap: std::env::var("KUBERUN_LOG_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).filter(|n| *n > 0).unwrap_or(d.log_queue_cap),
        }
    }

    pub fn with_type(mut self, t: impl Into<String>) -> Self { self.r#type = t.into(); self }
    pub fn with_image(mut self, image: impl Into<String>) -> Self { self.image = image.into(); self }
    pub fn with_source(mut self, source: impl Into<String>) -> Self { self.source = source.into(); self }
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self { self.owner = owner.into(); self }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateOptions {
    pub namespace: String,
    /// Empty means "use the instance type tag"
    pub r#type: String,
    /// Empty means "use the instance image"
    pub image: String,
    /// Empty means "keep the service's own source, else the instance source"
    pub source: String,
    pub secrets: BTreeMap<String, String>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            r#type: String::new(),
            image: String::new(),
            source: String::new(),
            secrets: BTreeMap::new(),
        }
    }
}

impl CreateOptions {
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self { self.namespace = ns.into(); self }
    pub fn with_type(mut self, t: impl Into<String>) -> Self { self.r#type = t.into(); self }
    pub fn with_image(mut self, image: impl Into<String>) -> Self { self.image = image.into(); self }
    pub fn with_source(mut self, source: impl Into<String>) -> Self { self.source = source.into(); self }
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }
}

/// Filters for `read`; each set field narrows the label selector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadOptions {
    pub namespace: String,
    pub service: Option<String>,
    pub version: Option<String>,
    pub r#type: Option<String>,
}

impl Default for ReadOptions {
    fn default() -> Self { Self { namespace: DEFAULT_NAMESPACE.to_string(), service: None, version: None, r#type: None } }
}

impl ReadOptions {
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self { self.namespace = ns.into(); self }
    pub fn with_service(mut self, name: impl Into<String>) -> Self { self.service = Some(name.into()); self }
    pub fn with_version(mut self, version: impl Into<String>) -> Self { self.version = Some(version.into()); self }
    pub fn with_type(mut self, t: impl Into<String>) -> Self { self.r#type = Some(t.into()); self }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateOptions {
    pub namespace: String,
}

impl Default for UpdateOptions {
    fn default() -> Self { Self { namespace: DEFAULT_NAMESPACE.to_string() } }
}

impl UpdateOptions {
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self { self.namespace = ns.into(); self }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteOptions {
    pub namespace: String,
}

impl Default for DeleteOptions {
    fn default() -> Self { Self { namespace: DEFAULT_NAMESPACE.to_string() } }
}

impl DeleteOptions {
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self { self.namespace = ns.into(); self }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogsOptions {
    pub namespace: String,
    /// Follow the live tail instead of replaying history
    pub stream: bool,
    /// Tail last n lines per pod
    pub count: Option<i64>,
    /// Only records newer than this many seconds
    pub since: Option<i64>,
}

impl Default for LogsOptions {
    fn default() -> Self { Self { namespace: DEFAULT_NAMESPACE.to_string(), stream: false, count: None, since: None } }
}

impl LogsOptions {
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self { self.namespace = ns.into(); self }
    pub fn with_stream(mut self, stream: bool) -> Self { self.stream = stream; self }
    pub fn with_count(mut self, count: i64) -> Self { self.count = Some(count); self }
    pub fn with_since(mut self, secs: i64) -> Self { self.since = Some(secs); self }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_default_namespace() {
        assert_eq!(CreateOptions::default().namespace, DEFAULT_NAMESPACE);
        assert_eq!(ReadOptions::default().namespace, DEFAULT_NAMESPACE);
        assert_eq!(UpdateOptions::default().namespace, DEFAULT_NAMESPACE);
        assert_eq!(DeleteOptions::default().namespace, DEFAULT_NAMESPACE);
        assert!(!LogsOptions::default().stream);
    }

    #[test]
    fn runtime_defaults() {
        let o = RuntimeOptions::default();
        assert_eq!(o.r#type, DEFAULT_TYPE);
        assert_eq!(o.owner, DEFAULT_OWNER);
        assert!(o.image.is_empty());
    }

    #[test]
    fn builders_set_fields() {
        let c = CreateOptions::default().with_namespace("ns1").with_secret("token", "abc").with_image("img:1");
        assert_eq!(c.namespace, "ns1");
        assert_eq!(c.secrets.get("token").map(String::as_str), Some("abc"));
        assert_eq!(c.image, "img:1");
        let r = ReadOptions::default().with_service("api").with_type("service");
        assert_eq!(r.service.as_deref(), Some("api"));
        assert!(r.version.is_none());
    }
}
