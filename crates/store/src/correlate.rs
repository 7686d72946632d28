//! Three-way join of Service, Deployment and Pod listings keyed by name+version.
//!
//! Precedence is explicit: pod state > deployment condition > service only.
//! The result does not depend on the order of any input list.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kuberun_core::{transform_status, Service as LogicalService, ServiceStatus};
use rustc_hash::FxHashMap;
use tracing::debug;

/// A logical service plus the native objects it was derived from.
#[derive(Debug, Clone)]
pub struct Correlated {
    pub service: LogicalService,
    pub native_service: Service,
    /// Present when an adapter-managed deployment matched
    pub native_deployment: Option<Deployment>,
}

fn label<'a>(meta: &'a ObjectMeta, key: &str) -> &'a str {
    meta.labels.as_ref().and_then(|l| l.get(key)).map(String::as_str).unwrap_or("")
}

/// `name` and `version` labels, compared as a pair so `a`+`bc` never meets `ab`+`c`.
type JoinKey<'a> = (&'a str, &'a str);

fn join_key(meta: &ObjectMeta) -> JoinKey<'_> { (label(meta, "name"), label(meta, "version")) }

fn object_name(meta: &ObjectMeta) -> &str { meta.name.as_deref().unwrap_or("") }

fn rfc3339(t: &Time) -> String { t.0.to_rfc3339() }

/// Pod-level view: `None` when the pod reports no container status.
fn pod_state(pod: &Pod) -> Option<(ServiceStatus, Option<&Time>)> {
    let status = pod.status.as_ref()?;
    let container = status.container_statuses.as_ref()?.first()?;
    let mut derived = transform_status(status.phase.as_deref().unwrap_or(""));
    let state = container.state.as_ref();
    let started = state.and_then(|s| s.running.as_ref()).and_then(|r| r.started_at.as_ref());
    if state.and_then(|s| s.waiting.as_ref()).is_some() {
        derived = ServiceStatus::Starting;
    }
    Some((derived, started))
}

fn apply_deployment(entry: &mut Correlated, dep: &Deployment) {
    let mut annotations = dep.metadata.annotations.clone().unwrap_or_default();
    let svc = &mut entry.service;
    svc.name = annotations.remove("name").unwrap_or_default();
    svc.version = annotations.remove("version").unwrap_or_default();
    svc.source = annotations.remove("source").unwrap_or_default();
    svc.metadata.extend(annotations);

    let first = dep.status.as_ref().and_then(|s| s.conditions.as_ref()).and_then(|c| c.first());
    match first {
        Some(cond) => {
            svc.status = transform_status(&cond.type_);
            if let Some(t) = cond.last_update_time.as_ref() {
                svc.metadata.insert("started".into(), rfc3339(t));
            }
        }
        None => svc.status = ServiceStatus::Unknown,
    }
    entry.native_deployment = Some(dep.clone());
}

fn apply_pods(entry: &mut Correlated, pods: &[&Pod]) {
    let mut best: Option<ServiceStatus> = None;
    let mut latest: Option<&Time> = None;
    for pod in pods {
        let Some((status, started)) = pod_state(pod) else {
            debug!(pod = %object_name(&pod.metadata), "pod has no container status; skipping");
            continue;
        };
        if best.map_or(true, |b| status.rank() > b.rank()) {
            best = Some(status);
        }
        if let Some(t) = started {
            if latest.map_or(true, |l| t.0 > l.0) {
                latest = Some(t);
            }
        }
    }
    if let Some(status) = best {
        entry.service.status = status;
    }
    if let Some(t) = latest {
        entry.service.metadata.insert("started".into(), rfc3339(t));
    }
}

/// Join label-filtered listings into logical services.
///
/// Only deployments that match a Service and carry a `name` annotation are
/// adapter-managed; only their pods refine status. Duplicate keys resolve to
/// the lexicographically smallest object name so input order never matters.
pub fn correlate(services: &[Service], deployments: &[Deployment], pods: &[Pod]) -> Vec<Correlated> {
    let mut by_key: FxHashMap<JoinKey<'_>, Correlated> = FxHashMap::default();

    for ksvc in services {
        let key = join_key(&ksvc.metadata);
        if let Some(existing) = by_key.get(&key) {
            if object_name(&existing.native_service.metadata) <= object_name(&ksvc.metadata) {
                continue;
            }
        }
        let mut svc = LogicalService::new(label(&ksvc.metadata, "name"), label(&ksvc.metadata, "version"));
        let spec = ksvc.spec.as_ref();
        let ip = spec.and_then(|s| s.cluster_ip.as_deref()).unwrap_or("");
        let address = match spec.and_then(|s| s.ports.as_ref()).and_then(|p| p.first()) {
            Some(port) => format!("{}:{}", ip, port.port),
            None => ip.to_string(),
        };
        svc.metadata.insert("address".into(), address);
        svc.metadata.insert("type".into(), label(&ksvc.metadata, "type").to_string());
        if let Some(annotations) = ksvc.metadata.annotations.as_ref() {
            svc.metadata.extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        by_key.insert(key, Correlated { service: svc, native_service: ksvc.clone(), native_deployment: None });
    }

    let mut managed: Vec<&Deployment> = deployments
        .iter()
        .filter(|d| d.metadata.annotations.as_ref().map_or(false, |a| a.contains_key("name")))
        .collect();
    managed.sort_by(|a, b| object_name(&a.metadata).cmp(object_name(&b.metadata)));

    let mut pods_by_key: FxHashMap<JoinKey<'_>, Vec<&Pod>> = FxHashMap::default();
    for pod in pods {
        pods_by_key.entry(join_key(&pod.metadata)).or_default().push(pod);
    }

    for dep in managed {
        let key = join_key(&dep.metadata);
        let Some(entry) = by_key.get_mut(&key) else { continue };
        if entry.native_deployment.is_some() {
            continue;
        }
        apply_deployment(entry, dep);
        if let Some(matching) = pods_by_key.get(&key) {
            apply_pods(entry, matching);
        }
    }

    by_key.into_values().collect()
}
