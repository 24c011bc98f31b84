//! Request pacing, failure backoff and identity rotation
//!
//! - `BackoffPolicy` turns successes and failures into `PacingDecision`s
//! - `IdentityRotator` picks the user agent for each request
//!
//! Both take an injected seed so a crawl's waits and identities can be
//! reproduced exactly.

mod identity;
mod policy;

pub use identity::IdentityRotator;
pub use policy::{BackoffPolicy, PacingDecision};
