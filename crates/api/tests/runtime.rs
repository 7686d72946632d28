use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use kuberun_api::*;
use kuberun_kubehub::{ClientError, Labels, MemoryClusterClient, NativeKind, NativeObject, Verb};

struct Bogus(&'static str);

impl Resource for Bogus {
    fn kind(&self) -> &str { self.0 }
    fn as_any(&self) -> &dyn Any { self }
}

fn runtime() -> (Arc<MemoryClusterClient>, KubeRuntime) {
    let client = Arc::new(MemoryClusterClient::new());
    let rt = KubeRuntime::new(client.clone(), RuntimeOptions::default());
    (client, rt)
}

fn deployment(client: &MemoryClusterClient, ns: &str, name: &str) -> k8s_openapi::api::apps::v1::Deployment {
    match client.object(NativeKind::Deployment, Some(ns), name) {
        Some(NativeObject::Deployment(d)) => d,
        other => panic!("expected deployment {}/{}, got {:?}", ns, name, other),
    }
}

async fn drain(mut stream: LogStream) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(Some(rec)) = tokio::time::timeout(Duration::from_secs(1), stream.recv()).await {
        out.push(rec.message);
    }
    out
}

#[tokio::test]
async fn unknown_kind_is_rejected_on_every_verb() {
    let (client, rt) = runtime();
    let r = Bogus("configmap");
    assert_eq!(rt.create(&r, CreateOptions::default()).await, Err(RuntimeError::InvalidResource));
    assert_eq!(rt.update(&r, UpdateOptions::default()).await, Err(RuntimeError::InvalidResource));
    assert_eq!(rt.delete(&r, DeleteOptions::default()).await, Err(RuntimeError::InvalidResource));
    assert!(matches!(rt.logs(&r, LogsOptions::default()).await, Err(RuntimeError::InvalidResource)));
    assert_eq!(client.calls(Verb::Create, NativeKind::Deployment), 0);
}

#[tokio::test]
async fn mislabeled_shape_is_rejected() {
    let (_client, rt) = runtime();
    let r = Bogus("service");
    assert_eq!(rt.create(&r, CreateOptions::default()).await, Err(RuntimeError::InvalidResource));
    assert_eq!(rt.delete(&r, DeleteOptions::default()).await, Err(RuntimeError::InvalidResource));
}

#[tokio::test]
async fn create_in_new_namespace_provisions_everything() {
    let (client, rt) = runtime();
    let svc = Service::new("api", "v1");
    let opts = CreateOptions::default().with_namespace("ns1").with_secret("token", "s3cret").with_image("img:1");
    rt.create(&svc, opts).await.expect("create");

    assert!(client.contains(NativeKind::Namespace, None, "ns1"));
    assert!(client.contains(NativeKind::NetworkPolicy, Some("ns1"), "ingress"));
    assert!(client.contains(NativeKind::Service, Some("ns1"), "api-v1"));

    match client.object(NativeKind::Secret, Some("ns1"), "api-v1-credentials") {
        Some(NativeObject::Secret(s)) => {
            let data = s.data.unwrap_or_default();
            assert_eq!(data.get("token").map(|b| b.0.as_slice()), Some(&b"s3cret"[..]));
        }
        other => panic!("missing credentials: {:?}", other),
    }

    let dep = deployment(&client, "ns1", "api-v1");
    let annotations = dep.metadata.annotations.unwrap_or_default();
    assert_eq!(annotations.get("name").map(String::as_str), Some("api"));
    assert_eq!(annotations.get("owner").map(String::as_str), Some("kuberun"));
    let pod = dep.spec.and_then(|s| s.template.spec).expect("pod spec");
    let container = &pod.containers[0];
    assert_eq!(container.image.as_deref(), Some("img:1"));
    let env = container.env.clone().unwrap_or_default();
    assert_eq!(env.len(), 1);
    assert_eq!(env[0].name, "TOKEN");
}

#[tokio::test]
async fn default_namespace_skips_provisioning() {
    let (client, rt) = runtime();
    rt.create(&Service::new("api", "v1"), CreateOptions::default()).await.expect("create");
    assert_eq!(client.calls(Verb::List, NativeKind::Namespace), 0);
    assert_eq!(client.calls(Verb::Create, NativeKind::Namespace), 0);
    assert!(client.contains(NativeKind::Deployment, Some("default"), "api-v1"));
}

#[tokio::test]
async fn namespace_lookup_failure_aborts_create() {
    let (client, rt) = runtime();
    client.fail(Verb::List, NativeKind::Namespace, ClientError::Transport("connection refused".into()));
    let err = rt.create(&Service::new("api", "v1"), CreateOptions::default().with_namespace("ns1")).await.expect_err("fails");
    assert!(matches!(err, RuntimeError::Upstream(_)));
    assert_eq!(client.count(NativeKind::Deployment), 0);
}

#[tokio::test]
async fn concurrent_creates_provision_namespace_once() {
    let (client, rt) = runtime();
    let rt = Arc::new(rt);
    let mut tasks = Vec::new();
    for name in ["a", "b", "c"] {
        let rt = rt.clone();
        tasks.push(tokio::spawn(async move {
            rt.create(&Service::new(name, "v1"), CreateOptions::default().with_namespace("shared")).await
        }));
    }
    for t in tasks {
        t.await.expect("join").expect("create");
    }
    assert_eq!(client.calls(Verb::Create, NativeKind::Namespace), 1);
    assert_eq!(client.count(NativeKind::Deployment), 3);
}

#[tokio::test]
async fn namespace_create_is_idempotent() {
    let (client, rt) = runtime();
    rt.create(&Namespace::new("team-a"), CreateOptions::default()).await.expect("first");
    rt.create(&Namespace::new("team-a"), CreateOptions::default()).await.expect("second");
    assert_eq!(client.count(NativeKind::Namespace), 1);
    assert_eq!(client.count(NativeKind::NetworkPolicy), 1);
}

#[tokio::test]
async fn namespace_delete_invalidates_cache() {
    let (client, rt) = runtime();
    rt.create(&Service::new("api", "v1"), CreateOptions::default().with_namespace("ns1")).await.expect("create");
    assert!(rt.namespaces().populated_at().await.is_some());
    rt.delete(&Namespace::new("ns1"), DeleteOptions::default()).await.expect("delete");
    assert!(rt.namespaces().populated_at().await.is_none());
    assert!(!client.contains(NativeKind::Namespace, None, "ns1"));
}

#[tokio::test]
async fn network_policy_crud() {
    let (client, rt) = runtime();
    let mut allowed = Metadata::new();
    allowed.insert("team".into(), "payments".into());
    let np = NetworkPolicy::new("allow-payments", "ns1", allowed);
    rt.create(&np, CreateOptions::default()).await.expect("create");
    assert!(client.contains(NativeKind::NetworkPolicy, Some("ns1"), "allow-payments"));
    rt.update(&np, UpdateOptions::default()).await.expect("update");
    rt.delete(&np, DeleteOptions::default()).await.expect("delete");
    assert!(!client.contains(NativeKind::NetworkPolicy, Some("ns1"), "allow-payments"));
}

#[tokio::test]
async fn read_filters_by_labels() {
    let (_client, rt) = runtime();
    rt.create(&Service::new("a", "v1"), CreateOptions::default()).await.expect("a");
    rt.create(&Service::new("b", "v1"), CreateOptions::default()).await.expect("b");

    let mut all = rt.read(ReadOptions::default()).await.expect("read");
    all.sort_by(|x, y| x.name.cmp(&y.name));
    assert_eq!(all.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    assert!(all.iter().all(|s| s.version == "v1"));

    let only_a = rt.read(ReadOptions::default().with_service("a")).await.expect("read a");
    assert_eq!(only_a.len(), 1);
    assert!(rt.read(ReadOptions::default().with_version("v2")).await.expect("read v2").is_empty());
    assert!(rt.read(ReadOptions::default().with_namespace("elsewhere")).await.expect("read other").is_empty());
}

#[tokio::test]
async fn update_stamps_deployment() {
    let (client, rt) = runtime();
    rt.create(&Service::new("api", "v1"), CreateOptions::default()).await.expect("create");

    let mut svc = Service::new("api", "v1");
    svc.metadata.insert("team".into(), "payments".into());
    rt.update(&svc, UpdateOptions::default()).await.expect("update");

    let dep = deployment(&client, "default", "api-v1");
    let annotations = dep.metadata.annotations.clone().unwrap_or_default();
    assert_eq!(annotations.get("team").map(String::as_str), Some("payments"));
    let tmpl = dep.spec.and_then(|s| s.template.metadata).and_then(|m| m.annotations).unwrap_or_default();
    assert!(tmpl.get("updated").is_some_and(|v| v.parse::<i64>().is_ok()));
}

#[tokio::test]
async fn updated_metadata_is_visible_to_read() {
    let (_client, rt) = runtime();
    rt.create(&Service::new("api", "v1"), CreateOptions::default().with_source("github.com/acme/api")).await.expect("create");

    let mut svc = Service::new("api", "v1");
    svc.metadata.insert("team".into(), "payments".into());
    svc.metadata.insert("source".into(), "elsewhere".into());
    rt.update(&svc, UpdateOptions::default()).await.expect("update");

    let found = rt.read(ReadOptions::default().with_service("api")).await.expect("read");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].metadata.get("team").map(String::as_str), Some("payments"));
    assert_eq!(found[0].source, "github.com/acme/api");
    assert_eq!(found[0].name, "api");
}

#[tokio::test]
async fn versionless_update_touches_every_version() {
    let (client, rt) = runtime();
    rt.create(&Service::new("api", "v1"), CreateOptions::default()).await.expect("v1");
    rt.create(&Service::new("api", "v2"), CreateOptions::default()).await.expect("v2");
    rt.create(&Service::new("web", "v1"), CreateOptions::default()).await.expect("web");

    let mut svc = Service::new("api", "");
    svc.metadata.insert("team".into(), "payments".into());
    rt.update(&svc, UpdateOptions::default()).await.expect("update");

    assert_eq!(client.calls(Verb::Update, NativeKind::Deployment), 2);
    let web = deployment(&client, "default", "web-v1");
    assert!(!web.metadata.annotations.unwrap_or_default().contains_key("team"));
}

#[tokio::test]
async fn update_without_deployment_is_skipped() {
    let (client, rt) = runtime();
    rt.create(&Service::new("api", "v1"), CreateOptions::default()).await.expect("create");
    client.remove(NativeKind::Deployment, Some("default"), "api-v1");
    rt.update(&Service::new("api", "v1"), UpdateOptions::default()).await.expect("update");
    assert_eq!(client.calls(Verb::Update, NativeKind::Deployment), 0);
}

#[tokio::test]
async fn delete_removes_workload_and_credentials() {
    let (client, rt) = runtime();
    let svc = Service::new("api", "v1");
    rt.create(&svc, CreateOptions::default().with_secret("token", "x")).await.expect("create");
    rt.delete(&svc, DeleteOptions::default()).await.expect("delete");
    assert_eq!(client.count(NativeKind::Deployment), 0);
    assert_eq!(client.count(NativeKind::Service), 0);
    assert_eq!(client.count(NativeKind::Secret), 0);
}

#[tokio::test]
async fn delete_missing_is_not_found() {
    let (_client, rt) = runtime();
    let err = rt.delete(&Service::new("ghost", "v1"), DeleteOptions::default()).await.expect_err("missing");
    assert!(matches!(err, RuntimeError::NotFound(_)));
}

#[tokio::test]
async fn logs_replay_and_stream() {
    let (client, rt) = runtime();
    let mut labels = Labels::new();
    labels.insert("name".into(), "api".into());
    client.set_pod_logs("default", "api-0", &labels, &["started", "ready"]);
    let svc = Service::new("api", "v1");

    let replayed = rt.logs(&svc, LogsOptions::default()).await.expect("logs").expect("stream");
    assert_eq!(drain(replayed).await, vec!["started", "ready"]);

    let tail = rt.logs(&svc, LogsOptions::default().with_count(1)).await.expect("logs").expect("stream");
    assert_eq!(drain(tail).await, vec!["ready"]);

    let live = rt.logs(&svc, LogsOptions::default().with_stream(true)).await.expect("logs").expect("stream");
    assert_eq!(drain(live).await, vec!["started", "ready"]);
}

#[tokio::test]
async fn logs_for_non_service_kinds_are_absent() {
    let (_client, rt) = runtime();
    assert!(rt.logs(&Namespace::new("ns1"), LogsOptions::default()).await.expect("ns").is_none());
}

#[tokio::test]
async fn log_read_failure_surfaces() {
    let (client, rt) = runtime();
    client.fail(Verb::List, NativeKind::Pod, ClientError::Transport("boom".into()));
    let res = rt.logs(&Service::new("api", "v1"), LogsOptions::default()).await;
    assert!(matches!(res, Err(RuntimeError::Upstream(_))));
}

#[tokio::test]
async fn init_swaps_defaults_and_lifecycle_toggles() {
    let (client, rt) = runtime();
    assert_eq!(rt.name(), "kubernetes");
    rt.start().await.expect("start");
    assert!(rt.is_running());
    rt.init(RuntimeOptions::default().with_image("img:2").with_source("github.com/acme/api")).await.expect("init");
    rt.create(&Service::new("api", "v1"), CreateOptions::default()).await.expect("create");
    rt.create(&Service::new("web", "v1"), CreateOptions::default().with_source("github.com/acme/web")).await.expect("create web");
    let web = deployment(&client, "default", "web-v1");
    assert_eq!(web.metadata.annotations.unwrap_or_default().get("source").map(String::as_str), Some("github.com/acme/web"));
    let dep = deployment(&client, "default", "api-v1");
    assert_eq!(dep.metadata.annotations.unwrap_or_default().get("source").map(String::as_str), Some("github.com/acme/api"));
    let image = dep.spec.and_then(|s| s.template.spec).and_then(|p| p.containers[0].image.clone());
    assert_eq!(image.as_deref(), Some("img:2"));
    rt.stop().await.expect("stop");
    assert!(!rt.is_running());
}
