use crate::config::EgressConfig;
use crate::egress::{EgressAddr, EgressPoint, HttpProber, Prober};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mutable pool state, guarded by a single mutex
#[derive(Debug)]
struct PoolState {
    valid: Vec<EgressPoint>,
    queue: VecDeque<EgressPoint>,
    last_refresh: Option<DateTime<Utc>>,
}

impl PoolState {
    fn install(&mut self, valid: Vec<EgressPoint>) {
        self.queue = valid.iter().cloned().collect();
        self.valid = valid;
        self.last_refresh = Some(Utc::now());
    }

    fn probed_valid(&self) -> usize {
        self.valid.iter().filter(|p| p.is_probed_valid()).count()
    }
}

struct PoolInner<P> {
    config: EgressConfig,
    prober: P,
    state: Mutex<PoolState>,
    low_water: Notify,
}

/// Snapshot of the pool for status output
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub valid: Vec<EgressPoint>,
    pub queued: usize,
    pub candidates: usize,
    pub include_direct: bool,
    pub probe_targets: Vec<String>,
    pub refresh_interval: Duration,
    pub min_valid: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Egress Pool ===")?;
        writeln!(f, "Valid points:     {}", self.valid.len())?;
        writeln!(f, "Lease queue:      {}", self.queued)?;
        writeln!(
            f,
            "Candidates:       {}{}",
            self.candidates,
            if self.include_direct { " + direct" } else { "" }
        )?;
        writeln!(f, "Probe targets:    {}", self.probe_targets.join(", "))?;
        writeln!(
            f,
            "Refresh interval: {}s (min valid {})",
            self.refresh_interval.as_secs(),
            self.min_valid
        )?;
        match self.last_refresh {
            Some(at) => writeln!(f, "Last refresh:     {}", at.format("%Y-%m-%d %H:%M:%S"))?,
            None => writeln!(f, "Last refresh:     never")?,
        }
        for point in &self.valid {
            writeln!(f, "  - {}", point)?;
        }
        Ok(())
    }
}

/// Thread-safe pool of egress points
///
/// Cloning is cheap; clones share the same pool.
pub struct EgressPool<P = HttpProber> {
    inner: Arc<PoolInner<P>>,
}

impl<P> Clone for EgressPool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl EgressPool<HttpProber> {
    /// Creates a pool that probes with HTTP requests
    pub fn from_config(config: EgressConfig) -> Self {
        let prober = HttpProber::from_config(&config);
        Self::new(config, prober)
    }
}

impl<P: Prober> EgressPool<P> {
    /// Creates a pool holding only the direct route
    ///
    /// Call [`initialize`](Self::initialize) to probe the candidates.
    ///
    /// # Arguments
    ///
    /// * `config` - Candidates, probe targets and refresh settings
    /// * `prober` - Liveness check run against each candidate
    pub fn new(config: EgressConfig, prober: P) -> Self {
        let direct = EgressPoint::direct();
        let state = PoolState {
            valid: vec![direct.clone()],
            queue: VecDeque::from([direct]),
            last_refresh: None,
        };

        Self {
            inner: Arc::new(PoolInner {
                config,
                prober,
                state: Mutex::new(state),
                low_water: Notify::new(),
            }),
        }
    }

    /// Probes all candidates and installs the first valid set
    ///
    /// # Returns
    ///
    /// The number of points in the valid set, at least one
    pub async fn initialize(&self) -> usize {
        info!(
            candidates = self.inner.config.candidates.len(),
            "Initializing egress pool"
        );
        self.refresh().await
    }

    /// Re-probes every candidate and swaps in the new valid set
    ///
    /// Probing runs without holding the pool lock, so leases keep being
    /// served from the previous set.
    ///
    /// # Returns
    ///
    /// The size of the new valid set; the direct route when nothing passed
    pub async fn refresh(&self) -> usize {
        let config = &self.inner.config;

        let valid = if config.candidates.is_empty() {
            debug!("No egress candidates configured, using direct route");
            vec![EgressPoint::direct()]
        } else {
            let mut valid = self.probe_candidates().await;
            if valid.is_empty() {
                warn!("No egress candidate passed probing, falling back to direct route");
                valid.push(EgressPoint::direct());
            }
            valid
        };

        let count = valid.len();
        self.inner.state.lock().await.install(valid);
        info!(valid = count, "Egress pool refreshed");
        count
    }

    fn candidates(&self) -> Vec<EgressAddr> {
        let config = &self.inner.config;
        let mut addrs = Vec::with_capacity(config.candidates.len() + 1);
        if config.include_direct {
            addrs.push(EgressAddr::Direct);
        }
        for url in &config.candidates {
            let addr = EgressAddr::Proxy(url.clone());
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        addrs
    }

    async fn probe_candidates(&self) -> Vec<EgressPoint> {
        let mut probes = JoinSet::new();
        for (index, addr) in self.candidates().into_iter().enumerate() {
            let prober = self.inner.prober.clone();
            probes.spawn(async move {
                let ok = prober.probe(&addr).await;
                (index, addr, ok)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Probe task failed"),
            }
        }

        // Keep candidate order so the lease rotation is stable across refreshes
        results.sort_by_key(|(index, _, _)| *index);

        results
            .into_iter()
            .filter_map(|(_, addr, ok)| {
                let mut point = EgressPoint::new(addr);
                point.record_probe(ok);
                if ok {
                    debug!(egress = %point.addr, "Egress point valid");
                    Some(point)
                } else {
                    debug!(egress = %point.addr, "Egress point invalid");
                    None
                }
            })
            .collect()
    }

    /// Leases the next egress point in round-robin order
    ///
    /// Falls back to the direct route when the queue is empty or the pool
    /// lock cannot be acquired within the lease timeout.
    ///
    /// # Returns
    ///
    /// The leased point, which stays in the rotation
    pub async fn lease(&self) -> EgressPoint {
        let lease_timeout = self.inner.config.lease_timeout();
        match tokio::time::timeout(lease_timeout, self.inner.state.lock()).await {
            Ok(mut state) => match state.queue.pop_front() {
                Some(point) => {
                    state.queue.push_back(point.clone());
                    point
                }
                None => EgressPoint::direct(),
            },
            Err(_) => {
                warn!(
                    timeout_ms = lease_timeout.as_millis() as u64,
                    "Egress pool busy, leasing direct route"
                );
                EgressPoint::direct()
            }
        }
    }

    /// Removes a failed point from the valid set and the lease queue
    ///
    /// The direct route is never removed. When the last point goes, direct
    /// takes its place. Wakes the refresher when fewer than `min-valid`
    /// probed points remain.
    ///
    /// # Arguments
    ///
    /// * `addr` - The point whose request failed at the transport level
    pub async fn mark_invalid(&self, addr: &EgressAddr) {
        if addr.is_direct() {
            debug!("Ignoring invalidation of the direct route");
            return;
        }

        let mut state = self.inner.state.lock().await;
        let before = state.valid.len();
        state.valid.retain(|p| &p.addr != addr);
        state.queue.retain(|p| &p.addr != addr);

        if state.valid.len() == before {
            return;
        }

        warn!(egress = %addr, remaining = state.valid.len(), "Egress point marked invalid");

        if state.valid.is_empty() {
            warn!("Egress pool exhausted, falling back to direct route");
            let direct = EgressPoint::direct();
            state.valid.push(direct.clone());
            state.queue.push_back(direct);
        }

        if state.probed_valid() < self.inner.config.min_valid {
            self.inner.low_water.notify_one();
        }
    }

    /// Number of points currently in the valid set
    pub async fn valid_count(&self) -> usize {
        self.inner.state.lock().await.valid.len()
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock().await;
        let config = &self.inner.config;
        PoolStatus {
            valid: state.valid.clone(),
            queued: state.queue.len(),
            candidates: config.candidates.len(),
            include_direct: config.include_direct,
            probe_targets: config.probe_targets.clone(),
            refresh_interval: config.refresh_interval(),
            min_valid: config.min_valid,
            last_refresh: state.last_refresh,
        }
    }

    /// Starts the background refresher
    ///
    /// The task refreshes every `refresh-interval`, or immediately when
    /// [`mark_invalid`](Self::mark_invalid) drops the pool below
    /// `min-valid`. It stops when `cancel` fires.
    ///
    /// # Arguments
    ///
    /// * `cancel` - Token that stops the task
    ///
    /// # Returns
    ///
    /// A handle used to shut the task down and wait for it
    pub fn spawn_refresher(&self, cancel: CancellationToken) -> RefreshTask {
        let pool = self.clone();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let interval = pool.inner.config.refresh_interval();
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        debug!("Scheduled egress refresh");
                    }
                    () = pool.inner.low_water.notified() => {
                        info!("Egress pool below minimum, refreshing early");
                    }
                }

                tokio::select! {
                    () = token.cancelled() => break,
                    _ = pool.refresh() => {}
                }
            }
            debug!("Egress refresher stopped");
        });

        RefreshTask { cancel, handle }
    }
}

/// Handle to a running refresher
pub struct RefreshTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshTask {
    /// Cancels the refresher and waits for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Egress refresher did not shut down cleanly");
        }
    }
}
