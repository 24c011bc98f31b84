use chrono::{DateTime, Utc};
use std::fmt;

/// Network path a request is sent through
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EgressAddr {
    /// No proxy
    Direct,

    /// Proxy URL (http://, https:// or socks5://)
    Proxy(String),
}

impl EgressAddr {
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct)
    }
}

impl fmt::Display for EgressAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Proxy(url) => f.write_str(url),
        }
    }
}

/// Result of the most recent liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Untested,
    Valid,
    Invalid,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Untested => "untested",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// An egress point together with its probe history
#[derive(Debug, Clone)]
pub struct EgressPoint {
    pub addr: EgressAddr,
    pub liveness: Liveness,
    pub last_tested: Option<DateTime<Utc>>,
}

impl EgressPoint {
    pub fn new(addr: EgressAddr) -> Self {
        Self {
            addr,
            liveness: Liveness::Untested,
            last_tested: None,
        }
    }

    /// The unprobed direct route the pool falls back to
    pub fn direct() -> Self {
        Self::new(EgressAddr::Direct)
    }

    pub fn proxy(url: impl Into<String>) -> Self {
        Self::new(EgressAddr::Proxy(url.into()))
    }

    /// Records a probe outcome
    pub fn record_probe(&mut self, valid: bool) {
        self.liveness = if valid {
            Liveness::Valid
        } else {
            Liveness::Invalid
        };
        self.last_tested = Some(Utc::now());
    }

    pub fn is_direct(&self) -> bool {
        self.addr.is_direct()
    }

    /// True for points that passed a probe (the fallback direct route does not count)
    pub fn is_probed_valid(&self) -> bool {
        self.liveness == Liveness::Valid
    }
}

impl fmt::Display for EgressPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.addr, self.liveness)?;
        if let Some(tested) = self.last_tested {
            write!(f, ", tested {}", tested.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(())
    }
}
