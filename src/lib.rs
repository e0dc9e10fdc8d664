pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod memory_registry;
pub mod poller;
pub mod reconciler;
pub mod registry_client;
pub mod resources;
pub mod secrets;
pub mod server;
pub mod supergraph_config;

pub use config::Settings;
pub use dispatcher::{ClientFactory, CustomResourceDispatcher, HttpClientFactory, Services};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleEvent, LifecycleResponse, RequestType, ResourceManager};
pub use memory_registry::{CompositionOutcome, InMemoryRegistry, RegistryCall};
pub use poller::VariantReadinessPoller;
pub use reconciler::{ReconcileReport, SubgraphReconciler};
pub use registry_client::{RegistryApi, RegistryClient};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired subgraph entry: the SDL it contributes and where the router reaches it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubgraphSpec {
    pub sdl: String,
    pub url: String,
}

/// Subgraph name -> spec, ordered so iteration and revisions are deterministic.
pub type SubgraphSet = BTreeMap<String, SubgraphSpec>;

/// Variant name -> subgraphs the variant should carry.
pub type DesiredState = BTreeMap<String, SubgraphSet>;

/// A subgraph as currently recorded by the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedSubgraph {
    pub sdl: String,
    pub url: Option<String>,
}

/// Variant name -> subgraph name -> observed subgraph.
pub type ObservedState = BTreeMap<String, BTreeMap<String, ObservedSubgraph>>;

/// One entry of a publish call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphInput {
    pub name: String,
    pub sdl: String,
    pub url: String,
}

impl SubgraphInput {
    pub fn new(name: impl Into<String>, spec: &SubgraphSpec) -> Self {
        SubgraphInput {
            name: name.into(),
            sdl: spec.sdl.clone(),
            url: spec.url.clone(),
        }
    }
}

/// Outcome of the most recent composition of a variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantStatus {
    pub url: Option<String>,
    pub composition: CompositionStatus,
}
