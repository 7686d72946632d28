//! Builders for the native objects the runtime writes.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, Namespace, PodSpec, PodTemplateSpec, Secret, SecretKeySelector, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::ByteString;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::Labels;

/// Port every managed workload listens on.
pub const SERVICE_PORT: i32 = 8080;

fn one(k: &str, v: &str) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert(k.to_string(), v.to_string());
    m
}

/// Namespace stamped with the ownership marker.
pub fn namespace(name: &str, owner: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta { name: Some(name.to_string()), labels: Some(one("owner", owner)), ..Default::default() },
        ..Default::default()
    }
}

/// Ingress-only policy over every pod in `namespace`, admitting traffic only
/// from namespaces whose labels include all of `allowed_labels`.
pub fn network_policy(name: &str, namespace: &str, allowed_labels: &Labels, owner: &str) -> NetworkPolicy {
    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(one("owner", owner)),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector::default(),
            policy_types: Some(vec!["Ingress".to_string()]),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer {
                    namespace_selector: Some(LabelSelector { match_labels: Some(allowed_labels.clone()), ..Default::default() }),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Opaque secret holding the raw values; `ByteString` base64-encodes them on the wire.
pub fn credentials_secret(name: &str, namespace: &str, secrets: &BTreeMap<String, String>) -> Secret {
    Secret {
        metadata: ObjectMeta { name: Some(name.to_string()), namespace: Some(namespace.to_string()), ..Default::default() },
        type_: Some("Opaque".to_string()),
        data: Some(secrets.iter().map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec()))).collect()),
        ..Default::default()
    }
}

/// Environment variable name a secret key is exposed under.
pub fn secret_env_name(key: &str) -> String {
    key.chars().map(|c| if c == '-' || c == '.' { '_' } else { c.to_ascii_uppercase() }).collect()
}

/// Everything needed to render the Deployment/Service pair for one logical service.
#[derive(Debug, Clone, Default)]
pub struct WorkloadSpec {
    /// Sanitized object name shared by the Deployment and Service
    pub object_name: String,
    pub namespace: String,
    /// Selector labels: `name`, `version`, `type`
    pub labels: Labels,
    /// Provenance and caller metadata stamped on the Deployment
    pub annotations: BTreeMap<String, String>,
    pub image: String,
    /// Credentials secret and the keys it holds
    pub credentials: Option<(String, Vec<String>)>,
}

impl WorkloadSpec {
    fn selector(&self) -> BTreeMap<String, String> {
        self.labels.iter().filter(|(k, _)| k.as_str() == "name" || k.as_str() == "version").map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn deployment(&self) -> Deployment {
        let env = self.credentials.as_ref().map(|(secret, keys)| {
            keys.iter()
                .map(|key| EnvVar {
                    name: secret_env_name(key),
                    value_from: Some(EnvVarSource {
                        secret_key_ref: Some(SecretKeySelector { name: Some(secret.clone()), key: key.clone(), optional: None }),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .collect::<Vec<_>>()
        });
        let container_name = self.labels.get("name").cloned().unwrap_or_else(|| self.object_name.clone());
        Deployment {
            metadata: ObjectMeta {
                name: Some(self.object_name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                annotations: Some(self.annotations.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector { match_labels: Some(self.selector()), ..Default::default() },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta { labels: Some(self.labels.clone()), annotations: Some(BTreeMap::new()), ..Default::default() }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: container_name,
                            image: if self.image.is_empty() { None } else { Some(self.image.clone()) },
                            env,
                            ports: Some(vec![ContainerPort { container_port: SERVICE_PORT, name: Some("service-port".into()), ..Default::default() }]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn service(&self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(self.object_name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".into()),
                selector: Some(self.selector()),
                ports: Some(vec![ServicePort {
                    name: Some("service-port".into()),
                    port: SERVICE_PORT,
                    target_port: Some(IntOrString::Int(SERVICE_PORT)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
