//! Credentials and the Deployment/Service pair behind a logical service.

use std::collections::BTreeMap;

use kuberun_core::{credentials_name, object_name, sanitize, Service};
use kuberun_kubehub::templates::{self, WorkloadSpec};
use kuberun_kubehub::{ClientResult, ClusterClient, Labels, NativeKind, NativeObject};
use tracing::debug;

/// Create the opaque credentials secret for `svc` in `namespace`; returns its name.
pub async fn create_credentials(client: &dyn ClusterClient, svc: &Service, namespace: &str, secrets: &BTreeMap<String, String>) -> ClientResult<String> {
    let name = credentials_name(&svc.name, &svc.version);
    let secret = templates::credentials_secret(&name, namespace, secrets);
    client.create(&NativeObject::Secret(secret), Some(namespace)).await?;
    debug!(service = %svc.name, secret = %name, "generated credentials");
    Ok(name)
}

/// Render the workload for `svc`.
pub fn spec_for(svc: &Service, namespace: &str, type_tag: &str, image: &str, owner: &str, credentials: Option<(String, Vec<String>)>) -> WorkloadSpec {
    let mut labels = Labels::new();
    labels.insert("name".into(), sanitize(&svc.name));
    labels.insert("version".into(), sanitize(&svc.version));
    labels.insert("type".into(), type_tag.to_string());

    let mut annotations = svc.metadata.clone();
    annotations.insert("name".into(), svc.name.clone());
    annotations.insert("version".into(), svc.version.clone());
    annotations.insert("source".into(), svc.source.clone());
    annotations.insert("owner".into(), owner.to_string());

    WorkloadSpec {
        object_name: object_name(&svc.name, &svc.version),
        namespace: namespace.to_string(),
        labels,
        annotations,
        image: image.to_string(),
        credentials,
    }
}

/// Create the Deployment, then the Service.
pub async fn start(client: &dyn ClusterClient, spec: &WorkloadSpec) -> ClientResult<()> {
    let ns = Some(spec.namespace.as_str());
    client.create(&NativeObject::Deployment(spec.deployment()), ns).await?;
    client.create(&NativeObject::Service(spec.service()), ns).await?;
    Ok(())
}

/// Delete the Deployment, then the Service.
pub async fn stop(client: &dyn ClusterClient, namespace: &str, svc: &Service) -> ClientResult<()> {
    let name = object_name(&svc.name, &svc.version);
    client.delete(NativeKind::Deployment, Some(namespace), &name).await?;
    client.delete(NativeKind::Service, Some(namespace), &name).await?;
    Ok(())
}
