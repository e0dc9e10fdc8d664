use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    DesiredState, ObservedSubgraph, RegistryApi, Result, SubgraphInput, SubgraphSet,
};

const REVISION_LEN: usize = 16;

/// Revision over `(name, sdl)` pairs. Each field is length-prefixed so no
/// two different inputs hash the same stream.
pub fn content_revision<'a>(subgraphs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut hasher = Sha256::new();
    for (name, sdl) in subgraphs {
        for field in [name, sdl] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
    }
    hex::encode(hasher.finalize())[..REVISION_LEN].to_string()
}

/// Fresh revision for every whole-variant publish, so a reverted change is
/// still a new change to the registry.
pub fn random_revision() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct VariantPlan {
    pub stale: Vec<String>,
    pub publish: Vec<SubgraphInput>,
}

impl VariantPlan {
    pub fn is_empty(&self) -> bool {
        self.stale.is_empty() && self.publish.is_empty()
    }
}

pub fn plan_variant(
    observed: Option<&BTreeMap<String, ObservedSubgraph>>,
    desired: &SubgraphSet,
) -> VariantPlan {
    let stale = observed
        .map(|subgraphs| {
            subgraphs
                .keys()
                .filter(|name| !desired.contains_key(*name))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let publish = desired
        .iter()
        .filter(|(name, spec)| {
            observed
                .and_then(|subgraphs| subgraphs.get(*name))
                .is_none_or(|existing| existing.sdl != spec.sdl)
        })
        .map(|(name, spec)| SubgraphInput::new(name.clone(), spec))
        .collect();

    VariantPlan { stale, publish }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub deleted_variants: Vec<String>,
    /// (variant, subgraph)
    pub deleted_subgraphs: Vec<(String, String)>,
    /// variant -> subgraphs carried by that variant's publish call
    pub published: BTreeMap<String, Vec<String>>,
    pub failed_deletes: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.deleted_variants.is_empty()
            && self.deleted_subgraphs.is_empty()
            && self.published.is_empty()
            && self.failed_deletes == 0
    }
}

// Registry calls are issued one at a time: concurrent publishes against a
// variant can leave its composition inconsistent.
pub struct SubgraphReconciler {
    registry: Arc<dyn RegistryApi>,
}

impl SubgraphReconciler {
    pub fn new(registry: Arc<dyn RegistryApi>) -> Self {
        SubgraphReconciler { registry }
    }

    /// Converge every variant of `graph_id` onto `desired`.
    ///
    /// Variants absent from `desired` are deleted. Fails with
    /// [`crate::Error::NotFound`] if the graph does not exist.
    pub async fn synchronize(
        &self,
        graph_id: &str,
        revision: &str,
        desired: &DesiredState,
    ) -> Result<ReconcileReport> {
        let observed = self.registry.observed_state(graph_id).await?;
        let mut report = ReconcileReport::default();

        for variant in observed.keys().filter(|name| !desired.contains_key(*name)) {
            match self.registry.delete_variant(graph_id, variant).await {
                Ok(()) => {
                    info!(graph_id = %graph_id, variant = %variant, "deleted variant");
                    report.deleted_variants.push(variant.clone());
                }
                Err(e) => {
                    warn!(graph_id = %graph_id, variant = %variant, error = %e, "failed to delete variant, skipping");
                    report.failed_deletes += 1;
                }
            }
        }

        for (variant, subgraphs) in desired {
            let plan = plan_variant(observed.get(variant), subgraphs);
            self.apply(graph_id, revision, variant, plan, &mut report)
                .await?;
        }

        summarize(graph_id, &report);
        Ok(report)
    }

    /// Converge a single variant; other variants of the graph are left alone.
    pub async fn synchronize_variant(
        &self,
        graph_id: &str,
        revision: &str,
        variant: &str,
        subgraphs: &SubgraphSet,
    ) -> Result<ReconcileReport> {
        let observed = self.registry.observed_state(graph_id).await?;
        let mut report = ReconcileReport::default();

        let plan = plan_variant(observed.get(variant), subgraphs);
        self.apply(graph_id, revision, variant, plan, &mut report)
            .await?;

        summarize(graph_id, &report);
        Ok(report)
    }

    async fn apply(
        &self,
        graph_id: &str,
        revision: &str,
        variant: &str,
        plan: VariantPlan,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        for subgraph in plan.stale {
            match self
                .registry
                .delete_subgraph(graph_id, variant, &subgraph)
                .await
            {
                Ok(()) => {
                    info!(graph_id = %graph_id, variant = %variant, subgraph = %subgraph, "removed subgraph");
                    report.deleted_subgraphs.push((variant.to_string(), subgraph));
                }
                Err(e) => {
                    warn!(graph_id = %graph_id, variant = %variant, subgraph = %subgraph, error = %e, "failed to remove subgraph, skipping");
                    report.failed_deletes += 1;
                }
            }
        }

        if plan.publish.is_empty() {
            return Ok(());
        }

        self.registry
            .publish_subgraphs(graph_id, variant, revision, &plan.publish)
            .await?;
        let names: Vec<String> = plan.publish.into_iter().map(|s| s.name).collect();
        info!(
            graph_id = %graph_id,
            variant = %variant,
            revision = %revision,
            subgraphs = ?names,
            "published subgraphs"
        );
        report.published.insert(variant.to_string(), names);
        Ok(())
    }
}

fn summarize(graph_id: &str, report: &ReconcileReport) {
    if report.failed_deletes > 0 {
        warn!(
            graph_id = %graph_id,
            failed_deletes = report.failed_deletes,
            "reconcile finished with skipped deletes"
        );
    } else if report.is_noop() {
        info!(graph_id = %graph_id, "registry already up to date");
    }
}
