use crate::config::EgressConfig;
use crate::egress::{build_client, EgressAddr};
use rand::seq::SliceRandom;
use reqwest::StatusCode;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Classifies an egress point as live or dead
pub trait Prober: Send + Sync + Clone + 'static {
    /// Returns true if a request through `addr` reached a liveness target
    fn probe(&self, addr: &EgressAddr) -> impl Future<Output = bool> + Send;
}

/// Probes egress points with a bounded GET against a random liveness target
///
/// HTTP 200 counts as live. Errors, timeouts and any other status count as a
/// failed attempt; a point is dead once `max_retries` attempts fail.
#[derive(Debug, Clone)]
pub struct HttpProber {
    targets: Arc<Vec<String>>,
    timeout: Duration,
    max_retries: u32,
}

impl HttpProber {
    pub fn new(targets: Vec<String>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            targets: Arc::new(targets),
            timeout,
            max_retries,
        }
    }

    pub fn from_config(config: &EgressConfig) -> Self {
        Self::new(
            config.probe_targets.clone(),
            config.probe_timeout(),
            config.max_retries,
        )
    }

    fn pick_target(&self) -> Option<String> {
        self.targets.choose(&mut rand::thread_rng()).cloned()
    }
}

impl Prober for HttpProber {
    async fn probe(&self, addr: &EgressAddr) -> bool {
        let client = match build_client(addr, self.timeout) {
            Ok(client) => client,
            Err(e) => {
                debug!(egress = %addr, error = %e, "Could not build probe client");
                return false;
            }
        };

        for attempt in 1..=self.max_retries {
            let Some(target) = self.pick_target() else {
                return false;
            };

            match client.get(&target).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    debug!(egress = %addr, target = %target, attempt, "Probe succeeded");
                    return true;
                }
                Ok(response) => {
                    debug!(
                        egress = %addr,
                        target = %target,
                        attempt,
                        status = response.status().as_u16(),
                        "Probe rejected"
                    );
                }
                Err(e) => {
                    debug!(egress = %addr, target = %target, attempt, error = %e, "Probe failed");
                }
            }
        }

        false
    }
}
