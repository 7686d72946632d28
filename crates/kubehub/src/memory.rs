use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;

use crate::{ClientError, ClientResult, ClusterClient, Labels, LogByteStream, NativeKind, NativeObject, PodLogParams};

/// Client verbs, used to target injected failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    List,
    Get,
    Create,
    Update,
    Delete,
    Logs,
}

type ObjKey = (NativeKind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjKey, NativeObject>,
    faults: HashMap<(Verb, NativeKind), ClientError>,
    logs: HashMap<(String, String), Vec<String>>,
    calls: HashMap<(Verb, NativeKind), usize>,
    next_version: u64,
}

/// In-memory control plane: objects keyed by (kind, namespace, name).
///
/// Cluster-scoped objects live under the empty namespace. Failures can be
/// injected per (verb, kind) and stay active until cleared.
#[derive(Default)]
pub struct MemoryClusterClient {
    state: Mutex<State>,
}

impl MemoryClusterClient {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the map is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(kind: NativeKind, namespace: Option<&str>, name: &str) -> ObjKey {
        let ns = if kind.namespaced() { namespace.unwrap_or("").to_string() } else { String::new() };
        (kind, ns, name.to_string())
    }

    fn enter(&self, verb: Verb, kind: NativeKind) -> Result<MutexGuard<'_, State>, ClientError> {
        let mut st = self.lock();
        *st.calls.entry((verb, kind)).or_default() += 1;
        if let Some(err) = st.faults.get(&(verb, kind)) {
            return Err(err.clone());
        }
        Ok(st)
    }

    /// Make every `verb` on `kind` fail with `err` until `clear_fault`.
    pub fn fail(&self, verb: Verb, kind: NativeKind, err: ClientError) { self.lock().faults.insert((verb, kind), err); }

    pub fn clear_fault(&self, verb: Verb, kind: NativeKind) { self.lock().faults.remove(&(verb, kind)); }

    /// Number of `verb` calls made against `kind`, failed ones included.
    pub fn calls(&self, verb: Verb, kind: NativeKind) -> usize { self.lock().calls.get(&(verb, kind)).copied().unwrap_or(0) }

    /// Seed an object directly, bypassing faults and existence checks.
    pub fn insert(&self, object: NativeObject) {
        let ns = object.metadata().namespace.clone();
        let key = Self::key(object.kind(), ns.as_deref(), object.name());
        self.lock().objects.insert(key, object);
    }

    /// Remove an object out-of-band; returns whether it existed.
    pub fn remove(&self, kind: NativeKind, namespace: Option<&str>, name: &str) -> bool {
        self.lock().objects.remove(&Self::key(kind, namespace, name)).is_some()
    }

    pub fn contains(&self, kind: NativeKind, namespace: Option<&str>, name: &str) -> bool {
        self.lock().objects.contains_key(&Self::key(kind, namespace, name))
    }

    pub fn object(&self, kind: NativeKind, namespace: Option<&str>, name: &str) -> Option<NativeObject> {
        self.lock().objects.get(&Self::key(kind, namespace, name)).cloned()
    }

    pub fn count(&self, kind: NativeKind) -> usize { self.lock().objects.keys().filter(|(k, _, _)| *k == kind).count() }

    /// Seed a pod (if absent) and the log lines it reports.
    pub fn set_pod_logs(&self, namespace: &str, pod: &str, labels: &Labels, lines: &[&str]) {
        let mut st = self.lock();
        let key = Self::key(NativeKind::Pod, Some(namespace), pod);
        st.objects.entry(key).or_insert_with(|| {
            let mut p = Pod::default();
            p.metadata.name = Some(pod.to_string());
            p.metadata.namespace = Some(namespace.to_string());
            p.metadata.labels = Some(labels.clone());
            NativeObject::Pod(p)
        });
        st.logs.insert((namespace.to_string(), pod.to_string()), lines.iter().map(|l| l.to_string()).collect());
    }

    fn tail(lines: &[String], params: &PodLogParams) -> Vec<String> {
        let skip = match params.tail_lines {
            Some(n) if n >= 0 && (n as usize) < lines.len() => lines.len() - n as usize,
            _ => 0,
        };
        lines[skip..].to_vec()
    }
}

#[async_trait]
impl ClusterClient for MemoryClusterClient {
    async fn list(&self, kind: NativeKind, namespace: Option<&str>, selector: &Labels) -> ClientResult<Vec<NativeObject>> {
        let st = self.enter(Verb::List, kind)?;
        let out = st
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && (!kind.namespaced() || namespace.map_or(true, |want| want == ns.as_str())))
            .filter(|(_, o)| o.matches(selector))
            .map(|(_, o)| o.clone())
            .collect();
        Ok(out)
    }

    async fn get(&self, kind: NativeKind, namespace: Option<&str>, name: &str) -> ClientResult<NativeObject> {
        let st = self.enter(Verb::Get, kind)?;
        st.objects
            .get(&Self::key(kind, namespace, name))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{} \"{}\" not found", kind, name)))
    }

    async fn create(&self, object: &NativeObject, namespace: Option<&str>) -> ClientResult<NativeObject> {
        let kind = object.kind();
        let mut st = self.enter(Verb::Create, kind)?;
        let key = Self::key(kind, namespace, object.name());
        if st.objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists(format!("{} \"{}\" already exists", kind, object.name())));
        }
        st.next_version += 1;
        let mut stored = object.clone();
        let meta = stored.metadata_mut();
        if kind.namespaced() { meta.namespace = namespace.map(str::to_string); }
        meta.resource_version = Some(st.next_version.to_string());
        st.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, object: &NativeObject, namespace: Option<&str>) -> ClientResult<NativeObject> {
        let kind = object.kind();
        let mut st = self.enter(Verb::Update, kind)?;
        let key = Self::key(kind, namespace, object.name());
        if !st.objects.contains_key(&key) {
            return Err(ClientError::NotFound(format!("{} \"{}\" not found", kind, object.name())));
        }
        st.next_version += 1;
        let mut stored = object.clone();
        let meta = stored.metadata_mut();
        if kind.namespaced() { meta.namespace = namespace.map(str::to_string); }
        meta.resource_version = Some(st.next_version.to_string());
        st.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, kind: NativeKind, namespace: Option<&str>, name: &str) -> ClientResult<()> {
        let mut st = self.enter(Verb::Delete, kind)?;
        match st.objects.remove(&Self::key(kind, namespace, name)) {
            Some(_) => Ok(()),
            None => Err(ClientError::NotFound(format!("{} \"{}\" not found", kind, name))),
        }
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, params: &PodLogParams) -> ClientResult<String> {
        let st = self.enter(Verb::Logs, NativeKind::Pod)?;
        if !st.objects.contains_key(&Self::key(NativeKind::Pod, Some(namespace), pod)) {
            return Err(ClientError::NotFound(format!("pod \"{}\" not found", pod)));
        }
        let lines = st.logs.get(&(namespace.to_string(), pod.to_string())).map(|l| Self::tail(l, params)).unwrap_or_default();
        Ok(lines.iter().map(|l| format!("{}\n", l)).collect())
    }

    async fn pod_log_stream(&self, namespace: &str, pod: &str, params: &PodLogParams) -> ClientResult<LogByteStream> {
        let text = self.pod_logs(namespace, pod, params).await?;
        let chunks: Vec<ClientResult<Bytes>> = if text.is_empty() { Vec::new() } else { vec![Ok(Bytes::from(text))] };
        Ok(futures::stream::iter(chunks).boxed())
    }
}
