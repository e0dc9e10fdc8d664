use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::{CompositionStatus, Error, RegistryApi, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5 * 60);

/// Waits for a variant's composition to settle.
pub struct VariantReadinessPoller {
    registry: Arc<dyn RegistryApi>,
    interval: Duration,
    max_wait: Duration,
}

impl VariantReadinessPoller {
    pub fn new(registry: Arc<dyn RegistryApi>) -> Self {
        VariantReadinessPoller {
            registry,
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Url of the variant once its latest composition completed.
    pub async fn get_url(&self, graph_id: &str, variant: &str) -> Result<String> {
        self.get_url_within(graph_id, variant, self.max_wait).await
    }

    pub async fn get_url_within(
        &self,
        graph_id: &str,
        variant: &str,
        max_wait: Duration,
    ) -> Result<String> {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let status = self.registry.variant_status(graph_id, variant).await?;

            if let Some(status) = status {
                match status.composition {
                    CompositionStatus::Completed => {
                        if let Some(url) = status.url.filter(|url| !url.is_empty()) {
                            info!(graph_id = %graph_id, variant = %variant, url = %url, attempt, "variant is ready");
                            return Ok(url);
                        }
                    }
                    CompositionStatus::Failed => {
                        return Err(Error::CompositionFailed {
                            graph_id: graph_id.to_string(),
                            variant: variant.to_string(),
                        });
                    }
                    CompositionStatus::Pending => {}
                }
            }

            if started.elapsed() >= max_wait {
                return Err(Error::Timeout {
                    graph_id: graph_id.to_string(),
                    variant: variant.to_string(),
                });
            }

            debug!(graph_id = %graph_id, variant = %variant, attempt, "variant not ready, polling again");
            sleep(self.interval).await;
        }
    }
}
