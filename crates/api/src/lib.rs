//! Kuberun public API: the runtime surface frontends depend on.
//!
//! `Runtime` is the stable trait; `KubeRuntime` is the in-process
//! implementation backed by any `ClusterClient`.

#![forbid(unsafe_code)]

use async_trait::async_trait;

pub use kuberun_core::prelude::*;
pub use kuberun_core::{CreateOptions, DeleteOptions, LogsOptions, ReadOptions, RuntimeOptions, UpdateOptions};
pub use kuberun_ops::{LogRecord, LogStream};

mod locks;
mod runtime;
mod workload;

pub use runtime::KubeRuntime;

/// CRUD and logs over logical services, namespaces and network policies.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Replace instance-wide options; later calls observe the new values.
    async fn init(&self, options: RuntimeOptions) -> RuntimeResult<()>;
    async fn create(&self, resource: &dyn Resource, opts: CreateOptions) -> RuntimeResult<()>;
    async fn read(&self, opts: ReadOptions) -> RuntimeResult<Vec<Service>>;
    async fn update(&self, resource: &dyn Resource, opts: UpdateOptions) -> RuntimeResult<()>;
    async fn delete(&self, resource: &dyn Resource, opts: DeleteOptions) -> RuntimeResult<()>;
    /// `Ok(None)` for kinds that have no logs.
    async fn logs(&self, resource: &dyn Resource, opts: LogsOptions) -> RuntimeResult<Option<LogStream>>;
    async fn start(&self) -> RuntimeResult<()>;
    async fn stop(&self) -> RuntimeResult<()>;
    fn is_running(&self) -> bool;
    fn name(&self) -> &'static str;
}
