use std::collections::HashSet;

/// Tracks pagination progress of a single stream
///
/// A cursor is created at page 1 when a stream starts and dropped when the
/// stream reaches `Done`. It owns the dedup set and the item counter, so
/// neither leaks between streams.
#[derive(Debug, Clone)]
pub struct CrawlCursor {
    /// Page currently being fetched (1-based)
    page: u32,

    /// Page count reported by the host's pagination indicator
    total_pages: Option<u32>,

    /// Configured hard cap for this stream
    max_pages: u32,

    /// Item ids already delivered in this stream
    seen_ids: HashSet<String>,

    /// Next item number to hand out (starts at 1, never reused)
    next_number: u64,

    /// Pages that completed successfully, in order
    delivered_pages: Vec<u32>,
}

impl CrawlCursor {
    /// Creates a cursor at page 1 with an unknown total
    pub fn new(max_pages: u32) -> Self {
        Self {
            page: 1,
            total_pages: None,
            max_pages,
            seen_ids: HashSet::new(),
            next_number: 1,
            delivered_pages: Vec::new(),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.total_pages
    }

    /// Records the host's page count the first time one is seen
    pub fn observe_total_pages(&mut self, hint: Option<u32>) {
        if self.total_pages.is_none() {
            self.total_pages = hint;
        }
    }

    /// The last page this stream will fetch
    ///
    /// This is the minimum of the host's page count (when known) and the
    /// configured cap.
    pub fn effective_limit(&self) -> u32 {
        match self.total_pages {
            Some(total) => total.min(self.max_pages),
            None => self.max_pages,
        }
    }

    /// Hands out the next item number
    pub fn claim_number(&mut self) -> u64 {
        let number = self.next_number;
        self.next_number += 1;
        number
    }

    /// Number of item numbers handed out so far
    pub fn numbers_claimed(&self) -> u64 {
        self.next_number - 1
    }

    /// Records an item id, returning false if it was already seen
    pub fn mark_seen(&mut self, id: &str) -> bool {
        self.seen_ids.insert(id.to_string())
    }

    /// Records that the current page completed successfully
    pub fn record_delivered(&mut self) {
        self.delivered_pages.push(self.page);
    }

    pub fn delivered_pages(&self) -> &[u32] {
        &self.delivered_pages
    }

    /// Moves to the next page
    ///
    /// # Returns
    ///
    /// * `true` - The new page is within the effective limit
    /// * `false` - The stream is exhausted
    pub fn advance(&mut self) -> bool {
        self.page += 1;
        self.page <= self.effective_limit()
    }
}
