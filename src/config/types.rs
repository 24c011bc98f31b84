use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sluice
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetEntry>,
}

/// Logged-in session sent with every page request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Host root used to build list and comment page URLs
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Raw `Cookie` header value
    #[serde(default)]
    pub cookie: String,

    /// `Referer` header; defaults to the base URL when absent
    #[serde(default)]
    pub referer: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cookie: String::new(),
            referer: None,
        }
    }
}

/// Stream bounds and per-request behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// Hard cap on post list pages per target
    #[serde(default = "default_max_pages")]
    pub max_list_pages: u32,

    /// Hard cap on comment pages per post
    #[serde(default = "default_max_pages")]
    pub max_comment_pages: u32,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Rotate the user agent every N page fetches (0 disables the cadence)
    #[serde(default = "default_rotate_every")]
    pub rotate_identity_every: u32,

    /// Whether to open a comment stream for each post
    #[serde(default = "default_true")]
    pub crawl_comments: bool,
}

impl CrawlConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_list_pages: default_max_pages(),
            max_comment_pages: default_max_pages(),
            request_timeout: default_request_timeout(),
            rotate_identity_every: default_rotate_every(),
            crawl_comments: true,
        }
    }
}

/// One entry of the global wait schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GlobalWaitEntry {
    /// Page count after which this entry forces a pause
    pub pages: u32,

    /// Pause length (seconds)
    pub wait: u64,
}

/// Backoff and pacing thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PacingConfig {
    /// Lower bound of the random page gap between long pauses
    #[serde(default = "default_min_page_gap")]
    pub min_page_gap: u32,

    /// Upper bound of the random page gap between long pauses
    #[serde(default = "default_max_page_gap")]
    pub max_page_gap: u32,

    /// Lower bound of the short wait after each page (seconds)
    #[serde(default = "default_min_wait")]
    pub min_wait: f64,

    /// Upper bound of the short wait after each page (seconds)
    #[serde(default = "default_max_wait")]
    pub max_wait: f64,

    /// Consecutive failures that trigger a rotate-and-long-wait
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,

    /// Lower bound of the long wait after repeated failures (seconds)
    #[serde(default = "default_min_failure_wait")]
    pub min_failure_wait: f64,

    /// Upper bound of the long wait after repeated failures (seconds)
    #[serde(default = "default_max_failure_wait")]
    pub max_failure_wait: f64,

    /// Fixed seed for reproducible pacing; entropy-seeded when absent
    #[serde(default)]
    pub seed: Option<u64>,

    /// Global wait schedule, consumed round-robin
    #[serde(default = "default_global_wait")]
    pub global_wait: Vec<GlobalWaitEntry>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_page_gap: default_min_page_gap(),
            max_page_gap: default_max_page_gap(),
            min_wait: default_min_wait(),
            max_wait: default_max_wait(),
            max_consecutive_failures: default_max_failures(),
            min_failure_wait: default_min_failure_wait(),
            max_failure_wait: default_max_failure_wait(),
            seed: None,
            global_wait: default_global_wait(),
        }
    }
}

/// Egress pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EgressConfig {
    /// Proxy URLs to probe (http://, https:// or socks5://)
    #[serde(default)]
    pub candidates: Vec<String>,

    /// Treat the direct route as a regular, probed candidate
    #[serde(default)]
    pub include_direct: bool,

    /// Liveness targets; one is chosen at random per probe attempt
    #[serde(default = "default_probe_targets")]
    pub probe_targets: Vec<String>,

    /// Probe timeout (seconds)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,

    /// Probe attempts per point per refresh cycle
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Refresh interval (seconds)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Refresh immediately when fewer valid points remain
    #[serde(default = "default_min_valid")]
    pub min_valid: usize,

    /// Maximum time a lease waits for the pool lock (milliseconds)
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,
}

impl EgressConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            include_direct: false,
            probe_targets: default_probe_targets(),
            probe_timeout: default_probe_timeout(),
            max_retries: default_max_retries(),
            refresh_interval: default_refresh_interval(),
            min_valid: default_min_valid(),
            lease_timeout_ms: default_lease_timeout_ms(),
        }
    }
}

/// Client identity configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IdentityConfig {
    /// User agents to rotate through; a built-in browser list when empty
    #[serde(default)]
    pub user_agents: Vec<String>,
}

/// Output backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Csv,
    Sqlite,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Root directory for CSV output (one sub-directory per target)
    #[serde(default = "default_output_directory")]
    pub directory: String,

    /// Enabled sinks
    #[serde(default = "default_write_mode")]
    pub write_mode: Vec<WriteMode>,

    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            write_mode: default_write_mode(),
            database_path: default_database_path(),
        }
    }
}

/// A top-level resource to crawl (a user id)
#[derive(Debug, Clone, Deserialize)]
pub struct TargetEntry {
    pub id: String,
}

fn default_base_url() -> String {
    "https://weibo.cn".to_string()
}

fn default_max_pages() -> u32 {
    2
}

fn default_request_timeout() -> u64 {
    15
}

fn default_rotate_every() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_min_page_gap() -> u32 {
    1
}

fn default_max_page_gap() -> u32 {
    5
}

fn default_min_wait() -> f64 {
    6.0
}

fn default_max_wait() -> f64 {
    10.0
}

fn default_max_failures() -> u32 {
    3
}

fn default_min_failure_wait() -> f64 {
    300.0
}

fn default_max_failure_wait() -> f64 {
    600.0
}

fn default_global_wait() -> Vec<GlobalWaitEntry> {
    vec![
        GlobalWaitEntry {
            pages: 1000,
            wait: 3600,
        },
        GlobalWaitEntry {
            pages: 500,
            wait: 2000,
        },
    ]
}

fn default_probe_targets() -> Vec<String> {
    vec!["https://weibo.cn".to_string(), "https://weibo.com".to_string()]
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_min_valid() -> usize {
    1
}

fn default_lease_timeout_ms() -> u64 {
    1000
}

fn default_output_directory() -> String {
    "weibo".to_string()
}

fn default_write_mode() -> Vec<WriteMode> {
    vec![WriteMode::Csv]
}

fn default_database_path() -> String {
    "weibo/weibo.db".to_string()
}
