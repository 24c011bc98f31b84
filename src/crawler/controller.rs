//! Paced crawl controller - drives pagination streams
//!
//! Each resource (user id) gets a post list stream. For every post the list
//! yields, a comment stream is opened and run to completion before the next
//! post (depth-first). Every stream walks the `StreamState` machine:
//!
//! ```text
//! Start -> FetchPage -> ParseOk -> Pace -> FetchPage ... -> Done
//!                    -> ParseEmpty -> Done
//!                    -> FetchError -> FetchPage (same page)
//! ```
//!
//! A failed fetch never advances the page, so the delivered pages of a
//! stream are always `1..=k` without gaps or repeats.

use crate::config::{Config, CrawlConfig, SessionConfig};
use crate::crawler::extractor::{CommentPageExtractor, ListPageExtractor, PageExtractor, ParsedPage};
use crate::crawler::fetcher::{FetchError, Fetcher, PageRequest};
use crate::egress::{EgressAddr, EgressPool, HttpProber, Prober};
use crate::output::{CrawlStats, ParentRef, Record, RecordBatch, RunStatus, Sink};
use crate::pacing::{BackoffPolicy, IdentityRotator, PacingDecision};
use crate::state::{CrawlCursor, StreamKind, StreamState};
use crate::{Result, SluiceError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one stream
#[derive(Debug, Clone)]
pub struct StreamReport {
    pub kind: StreamKind,
    pub resource_id: String,
    pub parent: Option<ParentRef>,
    /// Pages fetched successfully, in order
    pub pages: Vec<u32>,
    pub total_pages: Option<u32>,
    /// Item numbers handed out (including items that failed to parse)
    pub items_numbered: u64,
    /// Whether the stream ended on a page with no items
    pub ended_empty: bool,
}

/// Result of a full crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub streams: Vec<StreamReport>,
    pub stats: CrawlStats,
}

impl CrawlReport {
    /// Reports for one stream kind, in crawl order
    pub fn streams_of(&self, kind: StreamKind) -> impl Iterator<Item = &StreamReport> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }
}

/// Why a fetch did not produce a usable page
#[derive(Debug)]
enum FetchFailure {
    /// No response; the egress point may be at fault
    Transport { error: FetchError, egress: EgressAddr },

    /// The host answered with something other than 200
    HostRejected { status: u16 },
}

/// One pagination sequence and its cursor
struct Stream {
    kind: StreamKind,
    resource_id: String,
    parent: Option<ParentRef>,
    cursor: CrawlCursor,
    state: StreamState,
    ended_empty: bool,
}

impl Stream {
    fn new(kind: StreamKind, resource_id: &str, parent: Option<ParentRef>, max_pages: u32) -> Self {
        Self {
            kind,
            resource_id: resource_id.to_string(),
            parent,
            cursor: CrawlCursor::new(max_pages),
            state: StreamState::Start,
            ended_empty: false,
        }
    }

    fn transition(&mut self, next: StreamState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SluiceError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    fn url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match (&self.kind, &self.parent) {
            (StreamKind::Comments, Some(parent)) => format!(
                "{}/comment/{}?page={}",
                base,
                parent.post_id,
                self.cursor.page()
            ),
            _ => format!("{}/{}?page={}", base, self.resource_id, self.cursor.page()),
        }
    }

    fn label(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{} comments of {}", self.resource_id, parent.post_id),
            None => format!("{} posts", self.resource_id),
        }
    }

    fn into_report(self) -> StreamReport {
        StreamReport {
            kind: self.kind,
            resource_id: self.resource_id,
            parent: self.parent,
            pages: self.cursor.delivered_pages().to_vec(),
            total_pages: self.cursor.total_pages(),
            items_numbered: self.cursor.numbers_claimed(),
            ended_empty: self.ended_empty,
        }
    }
}

/// Sequential, paced crawler over post lists and comment threads
pub struct Controller<F, S, P = HttpProber> {
    crawl: CrawlConfig,
    session: SessionConfig,
    fetcher: F,
    sink: S,
    pool: EgressPool<P>,
    policy: BackoffPolicy,
    identity: IdentityRotator,
    list_extractor: Box<dyn PageExtractor>,
    comment_extractor: Box<dyn PageExtractor>,
    stats: CrawlStats,
    reports: Vec<StreamReport>,
}

impl<F: Fetcher, S: Sink, P: Prober> Controller<F, S, P> {
    /// Creates a controller with the HTML extractors
    ///
    /// The pool should already be initialized; the controller only leases
    /// from it and reports failures back.
    pub fn new(config: &Config, fetcher: F, sink: S, pool: EgressPool<P>) -> Self {
        let identity = IdentityRotator::new(
            &config.identity.user_agents,
            config.crawl.rotate_identity_every,
            config.pacing.seed.map(|seed| seed.wrapping_add(1)),
        );

        Self {
            crawl: config.crawl.clone(),
            session: config.session.clone(),
            fetcher,
            sink,
            pool,
            policy: BackoffPolicy::new(&config.pacing),
            identity,
            list_extractor: Box::new(ListPageExtractor),
            comment_extractor: Box::new(CommentPageExtractor),
            stats: CrawlStats::new(),
            reports: Vec::new(),
        }
    }

    /// Replaces the page extractors
    pub fn with_extractors(
        mut self,
        list: impl PageExtractor + 'static,
        comments: impl PageExtractor + 'static,
    ) -> Self {
        self.list_extractor = Box::new(list);
        self.comment_extractor = Box::new(comments);
        self
    }

    pub fn stats(&self) -> &CrawlStats {
        &self.stats
    }

    /// Crawls every resource in order, then finishes the sink
    ///
    /// # Arguments
    ///
    /// * `resources` - User ids to crawl, in order
    ///
    /// # Returns
    ///
    /// The per-stream reports and the crawl statistics. On error the sink is
    /// closed as failed before the error is returned.
    pub async fn run(&mut self, resources: &[String]) -> Result<CrawlReport> {
        let outcome = self.crawl_all(resources).await;
        self.stats.identity_rotations = self.identity.rotations();

        if let Err(e) = outcome {
            if let Err(close_error) = self.sink.finish(RunStatus::Failed) {
                warn!(error = %close_error, "Failed to close sink after crawl error");
            }
            return Err(e);
        }

        self.sink.finish(RunStatus::Completed)?;

        info!(
            resources = self.stats.resources,
            pages = self.stats.pages_fetched,
            records = self.stats.items_written,
            "Crawl complete"
        );

        Ok(CrawlReport {
            streams: std::mem::take(&mut self.reports),
            stats: self.stats.clone(),
        })
    }

    /// Closes the sink for a crawl stopped from outside `run`
    pub fn interrupt(&mut self) -> Result<()> {
        self.stats.identity_rotations = self.identity.rotations();
        self.sink.finish(RunStatus::Interrupted)?;
        info!(
            resources = self.stats.resources,
            pages = self.stats.pages_fetched,
            "Crawl interrupted"
        );
        Ok(())
    }

    async fn crawl_all(&mut self, resources: &[String]) -> Result<()> {
        if resources.is_empty() {
            return Err(SluiceError::NoTargets);
        }

        for resource_id in resources {
            self.crawl_resource(resource_id).await?;
            self.stats.resources += 1;
        }
        Ok(())
    }

    async fn crawl_resource(&mut self, resource_id: &str) -> Result<()> {
        info!(resource = %resource_id, "Crawling resource");

        let decision = self.policy.begin_resource(self.crawl.max_list_pages);
        if let PacingDecision::LongWait(wait) = decision {
            info!(wait_secs = wait.as_secs(), "Pausing before next resource");
            self.stats.long_waits += 1;
        }
        self.apply(decision).await;

        let mut posts = Stream::new(
            StreamKind::Posts,
            resource_id,
            None,
            self.crawl.max_list_pages,
        );
        self.sink.start_stream(StreamKind::Posts, resource_id, None)?;

        while let Some(batch) = self.next_batch(&mut posts).await? {
            self.deliver(&batch)?;

            if !self.crawl.crawl_comments {
                continue;
            }

            for record in &batch.records {
                let parent = ParentRef {
                    post_id: record.item.id.clone(),
                    post_number: record.number,
                };
                self.crawl_comments(resource_id, parent).await?;
            }
        }

        self.finish_stream(posts);
        Ok(())
    }

    async fn crawl_comments(&mut self, resource_id: &str, parent: ParentRef) -> Result<()> {
        let mut comments = Stream::new(
            StreamKind::Comments,
            resource_id,
            Some(parent),
            self.crawl.max_comment_pages,
        );
        self.sink
            .start_stream(StreamKind::Comments, resource_id, comments.parent.as_ref())?;

        while let Some(batch) = self.next_batch(&mut comments).await? {
            self.deliver(&batch)?;
        }

        self.finish_stream(comments);
        Ok(())
    }

    fn deliver(&mut self, batch: &RecordBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.sink.write(batch)?;
        self.stats.items_written += batch.len() as u64;
        Ok(())
    }

    fn finish_stream(&mut self, stream: Stream) {
        info!(
            stream = %stream.label(),
            pages = stream.cursor.delivered_pages().len(),
            items = stream.cursor.numbers_claimed(),
            "Stream done"
        );
        self.stats.streams += 1;
        self.reports.push(stream.into_report());
    }

    /// Drives `stream` until it yields the next page of records or finishes
    async fn next_batch(&mut self, stream: &mut Stream) -> Result<Option<RecordBatch>> {
        loop {
            match stream.state {
                StreamState::Start => {
                    debug!(stream = %stream.label(), "Stream start");
                    self.policy.begin_stream();
                    stream.transition(StreamState::FetchPage)?;
                }
                StreamState::FetchPage => match self.fetch(stream).await {
                    Ok(body) => {
                        let parsed = self.extractor(stream.kind).parse(&body);
                        stream.cursor.observe_total_pages(parsed.total_pages);
                        stream.cursor.record_delivered();
                        self.stats.pages_fetched += 1;

                        if parsed.is_empty() {
                            warn!(
                                stream = %stream.label(),
                                page = stream.cursor.page(),
                                "No items on page, ending stream"
                            );
                            self.stats.empty_pages += 1;
                            stream.ended_empty = true;
                            stream.transition(StreamState::ParseEmpty)?;
                        } else {
                            stream.transition(StreamState::ParseOk)?;
                            let batch = self.number_items(stream, parsed);
                            info!(
                                stream = %stream.label(),
                                page = stream.cursor.page(),
                                limit = stream.cursor.effective_limit(),
                                items = batch.len(),
                                "Fetched page"
                            );
                            return Ok(Some(batch));
                        }
                    }
                    Err(failure) => {
                        stream.transition(StreamState::FetchError)?;
                        self.handle_failure(stream, failure).await;
                    }
                },
                StreamState::FetchError => stream.transition(StreamState::FetchPage)?,
                StreamState::ParseEmpty => stream.transition(StreamState::Done)?,
                StreamState::ParseOk => {
                    stream.transition(StreamState::Pace)?;
                    self.pace().await;
                }
                StreamState::Pace => {
                    if stream.cursor.advance() {
                        stream.transition(StreamState::FetchPage)?;
                    } else {
                        stream.transition(StreamState::Done)?;
                    }
                }
                StreamState::Done => return Ok(None),
            }
        }
    }

    fn extractor(&self, kind: StreamKind) -> &dyn PageExtractor {
        match kind {
            StreamKind::Posts => self.list_extractor.as_ref(),
            StreamKind::Comments => self.comment_extractor.as_ref(),
        }
    }

    /// Fetches the stream's current page through a leased egress point
    async fn fetch(&mut self, stream: &Stream) -> std::result::Result<String, FetchFailure> {
        let user_agent = self.identity.tick().to_string();
        let egress = self.pool.lease().await;

        let request = PageRequest {
            url: stream.url(&self.session.base_url),
            user_agent,
            egress: egress.addr.clone(),
            timeout: self.crawl.request_timeout(),
            headers: self.session_headers(),
        };

        debug!(url = %request.url, egress = %request.egress, "Fetching page");

        match self.fetcher.get(&request).await {
            Ok(response) if response.is_ok() => Ok(response.body),
            Ok(response) => Err(FetchFailure::HostRejected {
                status: response.status,
            }),
            Err(error) => Err(FetchFailure::Transport {
                error,
                egress: egress.addr,
            }),
        }
    }

    fn session_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(2);
        if !self.session.cookie.is_empty() {
            headers.push(("Cookie".to_string(), self.session.cookie.clone()));
        }
        let referer = self
            .session
            .referer
            .clone()
            .unwrap_or_else(|| self.session.base_url.clone());
        headers.push(("Referer".to_string(), referer));
        headers
    }

    /// Assigns item numbers and builds the batch for the current page
    ///
    /// Duplicates are skipped without consuming a number. Items that fail to
    /// parse consume one so later numbers stay stable.
    fn number_items(&mut self, stream: &mut Stream, parsed: ParsedPage) -> RecordBatch {
        let page = stream.cursor.page();
        let mut records = Vec::with_capacity(parsed.items.len());

        for slot in parsed.items {
            match slot {
                Ok(item) => {
                    if !stream.cursor.mark_seen(&item.id) {
                        debug!(item = %item.id, "Skipping duplicate item");
                        self.stats.duplicates_skipped += 1;
                        continue;
                    }
                    records.push(Record {
                        kind: stream.kind,
                        resource_id: stream.resource_id.clone(),
                        parent: stream.parent.clone(),
                        number: stream.cursor.claim_number(),
                        page,
                        item,
                    });
                }
                Err(e) => {
                    let number = stream.cursor.claim_number();
                    warn!(stream = %stream.label(), page, number, error = %e, "Skipping item");
                    self.stats.parse_errors += 1;
                }
            }
        }

        RecordBatch {
            kind: stream.kind,
            resource_id: stream.resource_id.clone(),
            parent: stream.parent.clone(),
            page,
            records,
        }
    }

    async fn handle_failure(&mut self, stream: &Stream, failure: FetchFailure) {
        self.stats.fetch_failures += 1;

        match &failure {
            FetchFailure::Transport { error, egress } => {
                warn!(
                    stream = %stream.label(),
                    page = stream.cursor.page(),
                    egress = %egress,
                    error = %error,
                    "Fetch failed"
                );
                if error.is_egress_fault() && !egress.is_direct() {
                    self.pool.mark_invalid(egress).await;
                    self.stats.egress_invalidations += 1;
                }
            }
            FetchFailure::HostRejected { status } => {
                warn!(
                    stream = %stream.label(),
                    page = stream.cursor.page(),
                    status,
                    "Host rejected request"
                );
            }
        }

        let decision = self.policy.on_failure();
        if let PacingDecision::RotateAndLongWait(wait) = decision {
            warn!(
                wait_secs = wait.as_secs(),
                "Repeated failures, rotating identity and pausing"
            );
            self.stats.long_waits += 1;
        }
        self.apply(decision).await;
    }

    async fn pace(&mut self) {
        let decision = self.policy.on_success();
        if let PacingDecision::LongWait(wait) = decision {
            info!(wait_secs = wait.as_secs(), "Long pause");
            self.stats.long_waits += 1;
        }
        self.apply(decision).await;
    }

    async fn apply(&mut self, decision: PacingDecision) {
        if decision.rotates_identity() {
            self.identity.rotate();
        }
        self.sleep(decision.delay()).await;
    }

    async fn sleep(&mut self, wait: Duration) {
        if wait.is_zero() {
            return;
        }
        debug!(wait_ms = wait.as_millis() as u64, "Waiting");
        self.stats.time_waited += wait;
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EgressConfig, GlobalWaitEntry};
    use crate::crawler::fetcher::PageResponse;
    use crate::output::{SinkError, SinkResult};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    type Outcome = std::result::Result<PageResponse, FetchError>;

    /// Serves scripted outcomes per URL; unscripted URLs get an empty page
    #[derive(Clone, Default)]
    struct ScriptedFetcher {
        script: Arc<Mutex<HashMap<String, VecDeque<Outcome>>>>,
        log: Arc<Mutex<Vec<PageRequest>>>,
    }

    impl ScriptedFetcher {
        fn respond(&self, url: &str, outcome: Outcome) -> &Self {
            self.script
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(outcome);
            self
        }

        fn requested_urls(&self) -> Vec<String> {
            self.log.lock().unwrap().iter().map(|r| r.url.clone()).collect()
        }

        fn requests(&self) -> Vec<PageRequest> {
            self.log.lock().unwrap().clone()
        }
    }

    impl Fetcher for ScriptedFetcher {
        async fn get(&self, request: &PageRequest) -> std::result::Result<PageResponse, FetchError> {
            self.log.lock().unwrap().push(request.clone());
            let next = self
                .script
                .lock()
                .unwrap()
                .get_mut(&request.url)
                .and_then(|queue| queue.pop_front());
            next.unwrap_or_else(|| ok("<html><body></body></html>".to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        batches: Arc<Mutex<Vec<RecordBatch>>>,
        started: Arc<Mutex<Vec<(StreamKind, Option<String>)>>>,
        finished: Arc<Mutex<Option<RunStatus>>>,
        reject_writes: bool,
    }

    impl RecordingSink {
        fn status(&self) -> Option<RunStatus> {
            *self.finished.lock().unwrap()
        }

        fn labels(&self) -> Vec<String> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .flat_map(|b| b.records.iter().map(|r| r.label()))
                .collect()
        }
    }

    impl Sink for RecordingSink {
        fn start_stream(
            &mut self,
            kind: StreamKind,
            _resource_id: &str,
            parent: Option<&ParentRef>,
        ) -> SinkResult<()> {
            self.started
                .lock()
                .unwrap()
                .push((kind, parent.map(|p| p.post_id.clone())));
            Ok(())
        }

        fn write(&mut self, batch: &RecordBatch) -> SinkResult<()> {
            if self.reject_writes {
                return Err(SinkError::Write("disk full".to_string()));
            }
            self.batches.lock().unwrap().push(batch.clone());
            Ok(())
        }

        fn finish(&mut self, status: RunStatus) -> SinkResult<()> {
            *self.finished.lock().unwrap() = Some(status);
            Ok(())
        }
    }

    #[derive(Clone)]
    struct AlwaysLive;

    impl Prober for AlwaysLive {
        async fn probe(&self, _addr: &EgressAddr) -> bool {
            true
        }
    }

    const BASE: &str = "https://m.example.com";

    fn ok(body: String) -> Outcome {
        Ok(PageResponse { status: 200, body })
    }

    fn status(code: u16) -> Outcome {
        Ok(PageResponse {
            status: code,
            body: String::new(),
        })
    }

    /// Builds a page of `div.c` items; ids starting with '!' have no content
    fn page(prefix: &str, ids: &[&str], total: u32) -> String {
        let mut html = String::from("<html><body>");
        for id in ids {
            match id.strip_prefix('!') {
                Some(broken) => html.push_str(&format!(
                    r#"<div class="c" id="{}{}"><div>removed</div></div>"#,
                    prefix, broken
                )),
                None => html.push_str(&format!(
                    r#"<div class="c" id="{}{}"><span class="ctt">text {}</span></div>"#,
                    prefix, id, id
                )),
            }
        }
        html.push_str(&format!(
            r#"<div id="pagelist"><input name="mp" value="{}" /></div></body></html>"#,
            total
        ));
        html
    }

    fn list_url(user: &str, n: u32) -> String {
        format!("{}/{}?page={}", BASE, user, n)
    }

    fn comment_url(post: &str, n: u32) -> String {
        format!("{}/comment/{}?page={}", BASE, post, n)
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.session.base_url = BASE.to_string();
        config.session.cookie = "SUB=abc".to_string();
        config.crawl.max_list_pages = 3;
        config.crawl.max_comment_pages = 2;
        config.crawl.crawl_comments = false;
        config.crawl.rotate_identity_every = 0;
        config.pacing.min_wait = 1.0;
        config.pacing.max_wait = 2.0;
        config.pacing.min_page_gap = 100;
        config.pacing.max_page_gap = 100;
        config.pacing.global_wait = vec![GlobalWaitEntry {
            pages: 100,
            wait: 60,
        }];
        config.pacing.seed = Some(7);
        config.identity.user_agents =
            vec!["ua-1".to_string(), "ua-2".to_string(), "ua-3".to_string()];
        config
    }

    async fn pool(candidates: &[&str]) -> EgressPool<AlwaysLive> {
        let config = EgressConfig {
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
            ..EgressConfig::default()
        };
        let pool = EgressPool::new(config, AlwaysLive);
        pool.initialize().await;
        pool
    }

    async fn run(
        config: &Config,
        fetcher: &ScriptedFetcher,
        sink: &RecordingSink,
        pool: EgressPool<AlwaysLive>,
    ) -> CrawlReport {
        let mut controller = Controller::new(config, fetcher.clone(), sink.clone(), pool);
        controller.run(&["100".to_string()]).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_page_ends_stream() {
        let fetcher = ScriptedFetcher::default();
        fetcher
            .respond(&list_url("100", 1), ok(page("M_", &["A", "B"], 10)))
            .respond(&list_url("100", 2), ok(page("M_", &[], 10)));
        let sink = RecordingSink::default();

        let report = run(&test_config(), &fetcher, &sink, pool(&[]).await).await;

        let posts = &report.streams[0];
        assert_eq!(posts.pages, vec![1, 2]);
        assert!(posts.ended_empty);
        assert_eq!(
            fetcher.requested_urls(),
            vec![list_url("100", 1), list_url("100", 2)]
        );
        assert_eq!(report.stats.empty_pages, 1);
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        assert_eq!(sink.status(), Some(RunStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_stops_at_page_limit() {
        let fetcher = ScriptedFetcher::default();
        for n in 1..=3 {
            let id = format!("P{}", n);
            fetcher.respond(&list_url("100", n), ok(page("M_", &[id.as_str()], 2)));
        }
        let sink = RecordingSink::default();

        let report = run(&test_config(), &fetcher, &sink, pool(&[]).await).await;

        // The host reports 2 pages, below the configured 3
        assert_eq!(report.streams[0].pages, vec![1, 2]);
        assert_eq!(report.streams[0].total_pages, Some(2));
        assert!(!report.streams[0].ended_empty);
        assert_eq!(fetcher.requested_urls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_retry_same_page() {
        let fetcher = ScriptedFetcher::default();
        fetcher
            .respond(&list_url("100", 1), Err(FetchError::Timeout))
            .respond(&list_url("100", 1), ok(page("M_", &["A"], 5)))
            .respond(&list_url("100", 2), status(500))
            .respond(&list_url("100", 2), status(429))
            .respond(&list_url("100", 2), ok(page("M_", &["B"], 5)))
            .respond(&list_url("100", 3), ok(page("M_", &["C"], 5)));
        let sink = RecordingSink::default();

        let report = run(&test_config(), &fetcher, &sink, pool(&[]).await).await;

        assert_eq!(report.streams[0].pages, vec![1, 2, 3]);
        assert_eq!(report.stats.fetch_failures, 3);
        assert_eq!(sink.labels(), vec!["1", "2", "3"]);

        let urls = fetcher.requested_urls();
        assert_eq!(urls.len(), 6);
        assert_eq!(urls.iter().filter(|u| **u == list_url("100", 2)).count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_numbers_survive_parse_errors_and_duplicates() {
        let fetcher = ScriptedFetcher::default();
        fetcher
            .respond(&list_url("100", 1), ok(page("M_", &["A", "!X", "B"], 2)))
            .respond(&list_url("100", 2), ok(page("M_", &["B", "C"], 2)));
        let sink = RecordingSink::default();

        let report = run(&test_config(), &fetcher, &sink, pool(&[]).await).await;

        let numbered: Vec<(String, u64)> = sink
            .batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.records.iter().map(|r| (r.item.id.clone(), r.number)))
            .collect();
        assert_eq!(
            numbered,
            vec![
                ("A".to_string(), 1),
                ("B".to_string(), 3),
                ("C".to_string(), 4)
            ]
        );
        assert_eq!(report.stats.parse_errors, 1);
        assert_eq!(report.stats.duplicates_skipped, 1);
        assert_eq!(report.streams[0].items_numbered, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_comment_streams_run_depth_first() {
        let mut config = test_config();
        config.crawl.crawl_comments = true;

        let fetcher = ScriptedFetcher::default();
        fetcher
            .respond(&list_url("100", 1), ok(page("M_", &["P1", "P2"], 1)))
            .respond(&comment_url("P1", 1), ok(page("C_", &["1", "2"], 2)))
            .respond(&comment_url("P1", 2), ok(page("C_", &["3"], 2)))
            .respond(&comment_url("P2", 1), ok(page("C_", &["4"], 1)));
        let sink = RecordingSink::default();

        let report = run(&config, &fetcher, &sink, pool(&[]).await).await;

        assert_eq!(
            fetcher.requested_urls(),
            vec![
                list_url("100", 1),
                comment_url("P1", 1),
                comment_url("P1", 2),
                comment_url("P2", 1),
            ]
        );
        assert_eq!(sink.labels(), vec!["1", "2", "1-1", "1-2", "1-3", "2-1"]);

        let kinds: Vec<StreamKind> = report.streams.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![StreamKind::Comments, StreamKind::Comments, StreamKind::Posts]
        );
        assert_eq!(report.streams_of(StreamKind::Comments).count(), 2);
        assert_eq!(
            *sink.started.lock().unwrap(),
            vec![
                (StreamKind::Posts, None),
                (StreamKind::Comments, Some("P1".to_string())),
                (StreamKind::Comments, Some("P2".to_string())),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_invalidates_egress() {
        let proxies = ["http://10.0.0.1:8080", "http://10.0.0.2:8080"];
        let egress = pool(&proxies).await;

        let fetcher = ScriptedFetcher::default();
        fetcher
            .respond(
                &list_url("100", 1),
                Err(FetchError::Connect("refused".to_string())),
            )
            .respond(&list_url("100", 1), ok(page("M_", &["A"], 1)));
        let sink = RecordingSink::default();

        let report = run(&test_config(), &fetcher, &sink, egress.clone()).await;

        assert_eq!(report.stats.egress_invalidations, 1);
        assert_eq!(egress.valid_count().await, 1);

        let requests = fetcher.requests();
        assert_eq!(requests[0].egress, EgressAddr::Proxy(proxies[0].to_string()));
        assert_eq!(requests[1].egress, EgressAddr::Proxy(proxies[1].to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_rejection_rotates_identity_only() {
        let egress = pool(&["http://10.0.0.1:8080", "http://10.0.0.2:8080"]).await;

        let fetcher = ScriptedFetcher::default();
        fetcher
            .respond(&list_url("100", 1), status(403))
            .respond(&list_url("100", 1), ok(page("M_", &["A"], 1)));
        let sink = RecordingSink::default();

        let report = run(&test_config(), &fetcher, &sink, egress.clone()).await;

        assert_eq!(report.stats.egress_invalidations, 0);
        assert_eq!(egress.valid_count().await, 2);

        let requests = fetcher.requests();
        assert_ne!(requests[0].user_agent, requests[1].user_agent);
        assert!(report.stats.identity_rotations >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_trigger_long_pause() {
        let mut config = test_config();
        config.pacing.max_consecutive_failures = 3;

        let fetcher = ScriptedFetcher::default();
        for _ in 0..3 {
            fetcher.respond(&list_url("100", 1), Err(FetchError::Timeout));
        }
        fetcher.respond(&list_url("100", 1), ok(page("M_", &["A"], 1)));
        let sink = RecordingSink::default();

        let started = tokio::time::Instant::now();
        let report = run(&config, &fetcher, &sink, pool(&[]).await).await;

        assert_eq!(report.stats.long_waits, 1);
        assert_eq!(report.stats.fetch_failures, 3);
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert_eq!(report.streams[0].pages, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_headers_sent() {
        let fetcher = ScriptedFetcher::default();
        fetcher.respond(&list_url("100", 1), ok(page("M_", &["A"], 1)));
        let sink = RecordingSink::default();

        run(&test_config(), &fetcher, &sink, pool(&[]).await).await;

        let request = &fetcher.requests()[0];
        assert!(request
            .headers
            .contains(&("Cookie".to_string(), "SUB=abc".to_string())));
        assert!(request
            .headers
            .contains(&("Referer".to_string(), BASE.to_string())));
        assert!(request.user_agent.starts_with("ua-"));
    }

    #[tokio::test]
    async fn test_no_targets_is_an_error() {
        let fetcher = ScriptedFetcher::default();
        let sink = RecordingSink::default();
        let mut controller =
            Controller::new(&test_config(), fetcher, sink.clone(), pool(&[]).await);
        assert!(matches!(controller.run(&[]).await, Err(SluiceError::NoTargets)));
        assert_eq!(sink.status(), Some(RunStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_error_closes_run_as_failed() {
        let fetcher = ScriptedFetcher::default();
        fetcher.respond(&list_url("100", 1), ok(page("M_", &["A"], 1)));
        let sink = RecordingSink {
            reject_writes: true,
            ..RecordingSink::default()
        };

        let mut controller =
            Controller::new(&test_config(), fetcher, sink.clone(), pool(&[]).await);
        let err = controller.run(&["100".to_string()]).await.unwrap_err();

        assert!(matches!(err, SluiceError::Sink(SinkError::Write(_))));
        assert_eq!(sink.status(), Some(RunStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_crawl_closes_run_as_interrupted() {
        let fetcher = ScriptedFetcher::default();
        fetcher.respond(&list_url("100", 1), ok(page("M_", &["A"], 5)));
        let sink = RecordingSink::default();
        let mut controller =
            Controller::new(&test_config(), fetcher, sink.clone(), pool(&[]).await);

        // The first page is written, then the short wait is cut off
        let targets = ["100".to_string()];
        let cut_off = tokio::time::timeout(
            Duration::from_millis(500),
            controller.run(&targets),
        )
        .await;
        assert!(cut_off.is_err());

        controller.interrupt().unwrap();
        assert_eq!(sink.status(), Some(RunStatus::Interrupted));
        assert_eq!(controller.stats().items_written, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_resource_waits_when_schedule_would_overflow() {
        let mut config = test_config();
        config.pacing.global_wait = vec![GlobalWaitEntry { pages: 4, wait: 60 }];

        let fetcher = ScriptedFetcher::default();
        for user in ["100", "200"] {
            fetcher
                .respond(&list_url(user, 1), ok(page("M_", &["A"], 2)))
                .respond(&list_url(user, 2), ok(page("M_", &["B"], 2)));
        }
        let sink = RecordingSink::default();
        let mut controller = Controller::new(&config, fetcher, sink, pool(&[]).await);

        let started = tokio::time::Instant::now();
        let report = controller
            .run(&["100".to_string(), "200".to_string()])
            .await
            .unwrap();

        // Two pages done, three more would pass the 4-page entry: half of 60s
        assert_eq!(report.stats.long_waits, 1);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let mut stream = Stream::new(StreamKind::Posts, "100", None, 1);
        let err = stream.transition(StreamState::Done).unwrap_err();
        assert!(matches!(
            err,
            SluiceError::InvalidTransition {
                from: StreamState::Start,
                to: StreamState::Done
            }
        ));
    }

    #[test]
    fn test_stream_urls() {
        let posts = Stream::new(StreamKind::Posts, "100", None, 1);
        assert_eq!(posts.url("https://weibo.cn/"), "https://weibo.cn/100?page=1");

        let comments = Stream::new(
            StreamKind::Comments,
            "100",
            Some(ParentRef {
                post_id: "Abc".to_string(),
                post_number: 1,
            }),
            1,
        );
        assert_eq!(
            comments.url("https://weibo.cn"),
            "https://weibo.cn/comment/Abc?page=1"
        );
    }
}
