use std::fmt::Debug;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{label_selector, ClientError, ClientResult, ClusterClient, Labels, LogByteStream, NativeKind, NativeObject, PodLogParams};

/// `ClusterClient` backed by a kube-rs client.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    stream_cap: usize,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        let stream_cap = std::env::var("KUBERUN_LOG_STREAM_CAP").ok().and_then(|s| s.parse().ok()).unwrap_or(64);
        Self { client, stream_cap }
    }

    /// Connect using the inferred kubeconfig / in-cluster environment.
    pub async fn try_default() -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        info!("cluster client connected");
        Ok(Self::new(client))
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn namespaces(&self) -> Api<Namespace> { Api::all(self.client.clone()) }
}

async fn list_in<K>(api: Api<K>, lp: &ListParams) -> ClientResult<Vec<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    Ok(api.list(lp).await?.items)
}

async fn create_in<K>(api: Api<K>, obj: &K) -> ClientResult<K>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    Ok(api.create(&PostParams::default(), obj).await?)
}

async fn replace_in<K>(api: Api<K>, name: &str, obj: &K) -> ClientResult<K>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    Ok(api.replace(name, &PostParams::default(), obj).await?)
}

async fn delete_in<K>(api: Api<K>, name: &str) -> ClientResult<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    let _ = api.delete(name, &DeleteParams::default()).await?;
    Ok(())
}

/// Forward reader chunks until the reader ends, errors, or `stop` resolves.
async fn forward_log_bytes<S>(stream: S, tx: mpsc::Sender<ClientResult<bytes::Bytes>>, mut stop: oneshot::Receiver<()>)
where
    S: futures::Stream<Item = std::io::Result<bytes::Bytes>>,
{
    futures::pin_mut!(stream);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            next = stream.next() => {
                let Some(next) = next else { break };
                let item = next.map_err(|e| ClientError::Transport(e.to_string()));
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed { break; }
            }
        }
    }
}

fn to_log_params(params: &PodLogParams) -> LogParams {
    LogParams {
        follow: params.follow,
        tail_lines: params.tail_lines,
        since_seconds: params.since_seconds,
        container: params.container.clone(),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list(&self, kind: NativeKind, namespace: Option<&str>, selector: &Labels) -> ClientResult<Vec<NativeObject>> {
        let lp = if selector.is_empty() { ListParams::default() } else { ListParams::default().labels(&label_selector(selector)) };
        debug!(kind = %kind, ns = ?namespace, selector = %label_selector(selector), "list");
        let out = match kind {
            NativeKind::Namespace => list_in(self.namespaces(), &lp).await?.into_iter().map(NativeObject::Namespace).collect(),
            NativeKind::NetworkPolicy => list_in(self.namespaced::<NetworkPolicy>(namespace), &lp).await?.into_iter().map(NativeObject::NetworkPolicy).collect(),
            NativeKind::Service => list_in(self.namespaced::<Service>(namespace), &lp).await?.into_iter().map(NativeObject::Service).collect(),
            NativeKind::Deployment => list_in(self.namespaced::<Deployment>(namespace), &lp).await?.into_iter().map(NativeObject::Deployment).collect(),
            NativeKind::Pod => list_in(self.namespaced::<Pod>(namespace), &lp).await?.into_iter().map(NativeObject::Pod).collect(),
            NativeKind::Secret => list_in(self.namespaced::<Secret>(namespace), &lp).await?.into_iter().map(NativeObject::Secret).collect(),
        };
        Ok(out)
    }

    async fn get(&self, kind: NativeKind, namespace: Option<&str>, name: &str) -> ClientResult<NativeObject> {
        let obj = match kind {
            NativeKind::Namespace => NativeObject::Namespace(self.namespaces().get(name).await?),
            NativeKind::NetworkPolicy => NativeObject::NetworkPolicy(self.namespaced::<NetworkPolicy>(namespace).get(name).await?),
            NativeKind::Service => NativeObject::Service(self.namespaced::<Service>(namespace).get(name).await?),
            NativeKind::Deployment => NativeObject::Deployment(self.namespaced::<Deployment>(namespace).get(name).await?),
            NativeKind::Pod => NativeObject::Pod(self.namespaced::<Pod>(namespace).get(name).await?),
            NativeKind::Secret => NativeObject::Secret(self.namespaced::<Secret>(namespace).get(name).await?),
        };
        Ok(obj)
    }

    async fn create(&self, object: &NativeObject, namespace: Option<&str>) -> ClientResult<NativeObject> {
        debug!(kind = %object.kind(), name = %object.name(), ns = ?namespace, "create");
        let created = match object {
            NativeObject::Namespace(o) => NativeObject::Namespace(create_in(self.namespaces(), o).await?),
            NativeObject::NetworkPolicy(o) => NativeObject::NetworkPolicy(create_in(self.namespaced(namespace), o).await?),
            NativeObject::Service(o) => NativeObject::Service(create_in(self.namespaced(namespace), o).await?),
            NativeObject::Deployment(o) => NativeObject::Deployment(create_in(self.namespaced(namespace), o).await?),
            NativeObject::Secret(o) => NativeObject::Secret(create_in(self.namespaced(namespace), o).await?),
            NativeObject::Pod(_) => return Err(ClientError::Unsupported("create", NativeKind::Pod)),
        };
        Ok(created)
    }

    async fn update(&self, object: &NativeObject, namespace: Option<&str>) -> ClientResult<NativeObject> {
        let name = object.name().to_string();
        debug!(kind = %object.kind(), name = %name, ns = ?namespace, "update");
        let updated = match object {
            NativeObject::Namespace(o) => NativeObject::Namespace(replace_in(self.namespaces(), &name, o).await?),
            NativeObject::NetworkPolicy(o) => NativeObject::NetworkPolicy(replace_in(self.namespaced(namespace), &name, o).await?),
            NativeObject::Service(o) => NativeObject::Service(replace_in(self.namespaced(namespace), &name, o).await?),
            NativeObject::Deployment(o) => NativeObject::Deployment(replace_in(self.namespaced(namespace), &name, o).await?),
            NativeObject::Secret(o) => NativeObject::Secret(replace_in(self.namespaced(namespace), &name, o).await?),
            NativeObject::Pod(_) => return Err(ClientError::Unsupported("update", NativeKind::Pod)),
        };
        Ok(updated)
    }

    async fn delete(&self, kind: NativeKind, namespace: Option<&str>, name: &str) -> ClientResult<()> {
        debug!(kind = %kind, name = %name, ns = ?namespace, "delete");
        match kind {
            NativeKind::Namespace => delete_in(self.namespaces(), name).await,
            NativeKind::NetworkPolicy => delete_in(self.namespaced::<NetworkPolicy>(namespace), name).await,
            NativeKind::Service => delete_in(self.namespaced::<Service>(namespace), name).await,
            NativeKind::Deployment => delete_in(self.namespaced::<Deployment>(namespace), name).await,
            NativeKind::Pod => delete_in(self.namespaced::<Pod>(namespace), name).await,
            NativeKind::Secret => delete_in(self.namespaced::<Secret>(namespace), name).await,
        }
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, params: &PodLogParams) -> ClientResult<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut lp = to_log_params(params);
        lp.follow = false;
        Ok(api.logs(pod, &lp).await?)
    }

    async fn pod_log_stream(&self, namespace: &str, pod: &str, params: &PodLogParams) -> ClientResult<LogByteStream> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut lp = to_log_params(params);
        lp.follow = true;

        // The reader borrows the Api, so it lives inside its own task and hands bytes out over a channel.
        let (tx, rx) = mpsc::channel::<ClientResult<bytes::Bytes>>(self.stream_cap);
        let (open_tx, open_rx) = oneshot::channel::<ClientResult<()>>();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let pod_name = pod.to_string();
        tokio::spawn(async move {
            use tokio_util::{compat::FuturesAsyncReadCompatExt, io::ReaderStream};
            let reader = match api.log_stream(&pod_name, &lp).await {
                Ok(r) => r,
                Err(e) => {
                    let _ = open_tx.send(Err(e.into()));
                    return;
                }
            };
            let _ = open_tx.send(Ok(()));
            forward_log_bytes(ReaderStream::new(reader.compat()), tx, stop_rx).await;
            debug!(pod = %pod_name, "pod log stream closed");
        });

        match open_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(pod = %pod, "log stream task ended before opening");
                return Err(ClientError::Transport("log stream task aborted".into()));
            }
        }
        // Dropping the stream drops `stop_tx`, which ends the reader task.
        let stream = futures::stream::unfold((rx, stop_tx), |(mut rx, stop_tx)| async move {
            let item = rx.recv().await?;
            Some((item, (rx, stop_tx)))
        });
        Ok(stream.boxed())
    }
}
