//! Kuberun store: client-side correlation of native objects into logical
//! services, and the namespace existence cache.

#![forbid(unsafe_code)]

mod correlate;
mod namespaces;

pub use correlate::{correlate, Correlated};
pub use namespaces::{NamespaceCache, NamespaceManager, INGRESS_POLICY};
