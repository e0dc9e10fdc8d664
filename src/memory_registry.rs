use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{
    CompositionStatus, Error, ObservedState, ObservedSubgraph, RegistryApi, Result, SubgraphInput,
    VariantStatus,
};

/// How the simulated registry resolves composition after a publish or removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositionOutcome {
    Succeed,
    Fail,
    Never,
    /// Report pending for this many status polls, then complete.
    AfterPolls(u32),
}

/// Every call made against an [`InMemoryRegistry`], in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryCall {
    PrimaryAccountId,
    CreateGraph {
        account_id: String,
        graph_id: String,
    },
    UpdateGraphTitle {
        graph_id: String,
        title: String,
    },
    UpdateGraphVisibility {
        graph_id: String,
        hidden: bool,
    },
    DeleteGraph {
        graph_id: String,
    },
    ObservedState {
        graph_id: String,
    },
    DeleteVariant {
        graph_id: String,
        variant: String,
    },
    DeleteSubgraph {
        graph_id: String,
        variant: String,
        subgraph: String,
    },
    PublishSubgraph {
        graph_id: String,
        variant: String,
        revision: String,
        subgraph: String,
    },
    PublishSubgraphs {
        graph_id: String,
        variant: String,
        revision: String,
        subgraphs: Vec<String>,
    },
    VariantStatus {
        graph_id: String,
        variant: String,
    },
}

impl RegistryCall {
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            RegistryCall::PrimaryAccountId
                | RegistryCall::ObservedState { .. }
                | RegistryCall::VariantStatus { .. }
        )
    }
}

#[derive(Clone, Debug)]
struct GraphRecord {
    title: String,
    hidden: bool,
    variants: BTreeMap<String, VariantRecord>,
}

#[derive(Clone, Debug)]
struct VariantRecord {
    subgraphs: BTreeMap<String, ObservedSubgraph>,
    composition: CompositionStatus,
    polls_until_complete: u32,
    revision: Option<String>,
}

impl VariantRecord {
    fn empty() -> Self {
        VariantRecord {
            subgraphs: BTreeMap::new(),
            composition: CompositionStatus::Pending,
            polls_until_complete: 0,
            revision: None,
        }
    }

    fn compose(&mut self, outcome: CompositionOutcome) {
        let (composition, polls) = match outcome {
            CompositionOutcome::Succeed => (CompositionStatus::Completed, 0),
            CompositionOutcome::Fail => (CompositionStatus::Failed, 0),
            CompositionOutcome::Never => (CompositionStatus::Pending, 0),
            CompositionOutcome::AfterPolls(n) if n == 0 => (CompositionStatus::Completed, 0),
            CompositionOutcome::AfterPolls(n) => (CompositionStatus::Pending, n),
        };
        self.composition = composition;
        self.polls_until_complete = polls;
    }
}

struct State {
    account_id: Option<String>,
    graphs: BTreeMap<String, GraphRecord>,
    composition: CompositionOutcome,
    failing_variants: BTreeSet<String>,
    calls: Vec<RegistryCall>,
}

/// Registry held in process memory.
#[derive(Clone)]
pub struct InMemoryRegistry {
    state: Arc<RwLock<State>>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn router_url(graph_id: &str, variant: &str) -> String {
    format!("https://{}--{}.apollographos.net/graphql", variant, graph_id)
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        InMemoryRegistry {
            state: Arc::new(RwLock::new(State {
                account_id: None,
                graphs: BTreeMap::new(),
                composition: CompositionOutcome::Succeed,
                failing_variants: BTreeSet::new(),
                calls: Vec::new(),
            })),
        }
    }

    pub async fn set_account(&self, account_id: impl Into<String>) {
        self.state.write().await.account_id = Some(account_id.into());
    }

    pub async fn set_composition(&self, outcome: CompositionOutcome) {
        self.state.write().await.composition = outcome;
    }

    /// Make every delete touching `variant` (the variant itself or its subgraphs) fail.
    pub async fn fail_deletes_in(&self, variant: impl Into<String>) {
        self.state
            .write()
            .await
            .failing_variants
            .insert(variant.into());
    }

    pub async fn seed_graph(&self, graph_id: impl Into<String>, title: impl Into<String>) {
        self.state.write().await.graphs.insert(
            graph_id.into(),
            GraphRecord {
                title: title.into(),
                hidden: false,
                variants: BTreeMap::new(),
            },
        );
    }

    /// Seed a variant whose last composition completed; the graph must exist.
    pub async fn seed_variant(&self, graph_id: &str, variant: &str, subgraphs: &[(&str, &str)]) {
        let mut state = self.state.write().await;
        if let Some(graph) = state.graphs.get_mut(graph_id) {
            let mut record = VariantRecord::empty();
            for (name, sdl) in subgraphs {
                record.subgraphs.insert(
                    name.to_string(),
                    ObservedSubgraph {
                        sdl: sdl.to_string(),
                        url: None,
                    },
                );
            }
            record.composition = CompositionStatus::Completed;
            graph.variants.insert(variant.to_string(), record);
        }
    }

    pub async fn calls(&self) -> Vec<RegistryCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn mutations(&self) -> Vec<RegistryCall> {
        self.calls()
            .await
            .into_iter()
            .filter(RegistryCall::is_mutation)
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.write().await.calls.clear();
    }

    /// Current variants and subgraphs of a graph, without journaling a call.
    pub async fn snapshot(&self, graph_id: &str) -> Option<ObservedState> {
        let state = self.state.read().await;
        state.graphs.get(graph_id).map(observed_of)
    }

    pub async fn graph_title(&self, graph_id: &str) -> Option<String> {
        let state = self.state.read().await;
        state.graphs.get(graph_id).map(|graph| graph.title.clone())
    }

    pub async fn graph_hidden(&self, graph_id: &str) -> Option<bool> {
        let state = self.state.read().await;
        state.graphs.get(graph_id).map(|graph| graph.hidden)
    }

    pub async fn variant_revision(&self, graph_id: &str, variant: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .graphs
            .get(graph_id)
            .and_then(|graph| graph.variants.get(variant))
            .and_then(|record| record.revision.clone())
    }
}

fn observed_of(graph: &GraphRecord) -> ObservedState {
    graph
        .variants
        .iter()
        .map(|(name, record)| (name.clone(), record.subgraphs.clone()))
        .collect()
}

fn missing_graph(graph_id: &str) -> Error {
    Error::not_found(format!("Graph {} does not exist", graph_id))
}

impl State {
    fn graph_mut(&mut self, graph_id: &str) -> Result<&mut GraphRecord> {
        self.graphs
            .get_mut(graph_id)
            .ok_or_else(|| missing_graph(graph_id))
    }

    fn publish(
        &mut self,
        graph_id: &str,
        variant: &str,
        revision: &str,
        subgraphs: &[SubgraphInput],
    ) -> Result<()> {
        let outcome = self.composition;
        let graph = self.graph_mut(graph_id)?;
        let record = graph
            .variants
            .entry(variant.to_string())
            .or_insert_with(VariantRecord::empty);
        for subgraph in subgraphs {
            record.subgraphs.insert(
                subgraph.name.clone(),
                ObservedSubgraph {
                    sdl: subgraph.sdl.clone(),
                    url: Some(subgraph.url.clone()),
                },
            );
        }
        record.revision = Some(revision.to_string());
        record.compose(outcome);
        Ok(())
    }
}

#[async_trait]
impl RegistryApi for InMemoryRegistry {
    async fn primary_account_id(&self) -> Result<String> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::PrimaryAccountId);
        state
            .account_id
            .clone()
            .ok_or_else(|| Error::not_found("Could not find primary account ID"))
    }

    async fn create_graph(
        &self,
        account_id: &str,
        graph_id: &str,
        title: &str,
        hidden_from_uninvited_non_admin: bool,
    ) -> Result<String> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::CreateGraph {
            account_id: account_id.to_string(),
            graph_id: graph_id.to_string(),
        });
        if state.graphs.contains_key(graph_id) {
            return Err(Error::registry(format!(
                "Graph id {} is already taken",
                graph_id
            )));
        }
        state.graphs.insert(
            graph_id.to_string(),
            GraphRecord {
                title: title.to_string(),
                hidden: hidden_from_uninvited_non_admin,
                variants: BTreeMap::new(),
            },
        );
        Ok(graph_id.to_string())
    }

    async fn update_graph_title(&self, graph_id: &str, title: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::UpdateGraphTitle {
            graph_id: graph_id.to_string(),
            title: title.to_string(),
        });
        state.graph_mut(graph_id)?.title = title.to_string();
        Ok(())
    }

    async fn update_graph_visibility(
        &self,
        graph_id: &str,
        hidden_from_uninvited_non_admin: bool,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::UpdateGraphVisibility {
            graph_id: graph_id.to_string(),
            hidden: hidden_from_uninvited_non_admin,
        });
        state.graph_mut(graph_id)?.hidden = hidden_from_uninvited_non_admin;
        Ok(())
    }

    async fn delete_graph(&self, graph_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::DeleteGraph {
            graph_id: graph_id.to_string(),
        });
        state
            .graphs
            .remove(graph_id)
            .map(|_| ())
            .ok_or_else(|| missing_graph(graph_id))
    }

    async fn observed_state(&self, graph_id: &str) -> Result<ObservedState> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::ObservedState {
            graph_id: graph_id.to_string(),
        });
        state
            .graphs
            .get(graph_id)
            .map(observed_of)
            .ok_or_else(|| missing_graph(graph_id))
    }

    async fn delete_variant(&self, graph_id: &str, variant: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::DeleteVariant {
            graph_id: graph_id.to_string(),
            variant: variant.to_string(),
        });
        if state.failing_variants.contains(variant) {
            return Err(Error::registry(format!(
                "Variant {} is already being deleted",
                variant
            )));
        }
        state
            .graph_mut(graph_id)?
            .variants
            .remove(variant)
            .map(|_| ())
            .ok_or_else(|| {
                Error::not_found(format!(
                    "Variant {} of graph {} does not exist",
                    variant, graph_id
                ))
            })
    }

    async fn delete_subgraph(&self, graph_id: &str, variant: &str, subgraph: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::DeleteSubgraph {
            graph_id: graph_id.to_string(),
            variant: variant.to_string(),
            subgraph: subgraph.to_string(),
        });
        if state.failing_variants.contains(variant) {
            return Err(Error::registry(format!(
                "Could not remove subgraph {} from {}",
                subgraph, variant
            )));
        }
        let outcome = state.composition;
        let graph = state.graph_mut(graph_id)?;
        if let Some(record) = graph.variants.get_mut(variant) {
            if record.subgraphs.remove(subgraph).is_some() {
                record.compose(outcome);
            }
        }
        Ok(())
    }

    async fn publish_subgraph(
        &self,
        graph_id: &str,
        variant: &str,
        revision: &str,
        subgraph: &SubgraphInput,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::PublishSubgraph {
            graph_id: graph_id.to_string(),
            variant: variant.to_string(),
            revision: revision.to_string(),
            subgraph: subgraph.name.clone(),
        });
        state.publish(graph_id, variant, revision, std::slice::from_ref(subgraph))
    }

    async fn publish_subgraphs(
        &self,
        graph_id: &str,
        variant: &str,
        revision: &str,
        subgraphs: &[SubgraphInput],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::PublishSubgraphs {
            graph_id: graph_id.to_string(),
            variant: variant.to_string(),
            revision: revision.to_string(),
            subgraphs: subgraphs.iter().map(|s| s.name.clone()).collect(),
        });
        state.publish(graph_id, variant, revision, subgraphs)
    }

    async fn variant_status(&self, graph_id: &str, variant: &str) -> Result<Option<VariantStatus>> {
        let mut state = self.state.write().await;
        state.calls.push(RegistryCall::VariantStatus {
            graph_id: graph_id.to_string(),
            variant: variant.to_string(),
        });
        let graph = state.graph_mut(graph_id)?;
        let Some(record) = graph.variants.get_mut(variant) else {
            return Ok(None);
        };
        if record.polls_until_complete > 0 {
            record.polls_until_complete -= 1;
            if record.polls_until_complete == 0 {
                record.composition = CompositionStatus::Completed;
            }
            return Ok(Some(VariantStatus {
                url: None,
                composition: CompositionStatus::Pending,
            }));
        }
        let url = match record.composition {
            CompositionStatus::Completed => Some(router_url(graph_id, variant)),
            _ => None,
        };
        Ok(Some(VariantStatus {
            url,
            composition: record.composition,
        }))
    }
}
