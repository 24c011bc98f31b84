use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Desktop browser user agents used when none are configured
const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0",
];

/// Picks the user agent sent with each request
///
/// Rotation happens on demand (after failures) and on a fixed cadence of
/// page fetches.
#[derive(Debug)]
pub struct IdentityRotator {
    agents: Vec<String>,
    rng: StdRng,
    current: usize,
    rotate_every: u32,
    fetches_since_rotation: u32,
    rotations: u64,
}

impl IdentityRotator {
    /// Creates a rotator over `agents`, falling back to the built-in list
    ///
    /// `rotate_every` is the fetch cadence; 0 disables cadence rotation.
    pub fn new(agents: &[String], rotate_every: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let agents: Vec<String> = if agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
        } else {
            agents.to_vec()
        };

        let mut rotator = Self {
            agents,
            rng,
            current: 0,
            rotate_every,
            fetches_since_rotation: 0,
            rotations: 0,
        };
        rotator.current = rotator.rng.gen_range(0..rotator.agents.len());
        rotator
    }

    /// The user agent to send with the next request
    pub fn current(&self) -> &str {
        &self.agents[self.current]
    }

    /// Switches to a different user agent (when more than one is available)
    pub fn rotate(&mut self) -> &str {
        if self.agents.len() > 1 {
            // Draw from the other agents so a rotation always changes identity
            let offset = self.rng.gen_range(1..self.agents.len());
            self.current = (self.current + offset) % self.agents.len();
        }
        self.fetches_since_rotation = 0;
        self.rotations += 1;
        debug!(user_agent = %self.agents[self.current], "Rotated identity");
        self.current()
    }

    /// Records an upcoming fetch, rotating when the cadence is due
    pub fn tick(&mut self) -> &str {
        if self.rotate_every > 0 {
            if self.fetches_since_rotation >= self.rotate_every {
                self.rotate();
            }
            self.fetches_since_rotation += 1;
        }
        self.current()
    }

    /// Total rotations so far, on demand and on cadence
    pub fn rotations(&self) -> u64 {
        self.rotations
    }
}
