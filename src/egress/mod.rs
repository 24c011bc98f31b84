//! Egress pool management
//!
//! This module keeps a set of network egress points (proxies, plus the
//! direct route) that are known to reach the target host:
//!
//! - `EgressPoint`: an address with its liveness and last probe time
//! - `Prober` / `HttpProber`: liveness probing through a point
//! - `EgressPool`: thread-safe round-robin leasing, invalidation and a
//!   cancellable background refresher
//!
//! The pool is never empty. When every candidate fails it degrades to the
//! direct route.

mod point;
mod pool;
mod probe;

pub use point::{EgressAddr, EgressPoint, Liveness};
pub use pool::{EgressPool, PoolStatus, RefreshTask};
pub use probe::{HttpProber, Prober};

use reqwest::{Client, Proxy};
use std::time::Duration;

/// Builds an HTTP client that sends every request through `addr`
///
/// Used both for liveness probes and for page fetches so the two take the
/// same network path.
pub fn build_client(addr: &EgressAddr, timeout: Duration) -> Result<Client, reqwest::Error> {
    let builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true);

    let builder = match addr {
        EgressAddr::Direct => builder.no_proxy(),
        EgressAddr::Proxy(url) => builder.proxy(Proxy::all(url.as_str())?),
    };

    builder.build()
}
