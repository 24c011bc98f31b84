/// Stream state definitions for the paced crawl state machine
///
/// Every pagination stream (a target's post list, or one post's comment
/// thread) walks these states from `Start` to `Done`.
use std::fmt;

/// Kind of pagination stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Top-level post list pages of a target
    Posts,

    /// Comment pages of a single post
    Comments,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Comments => "comments",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the current state of a stream in the crawl state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Cursor initialized at page 1, total pages unknown
    Start,

    /// Leasing an egress point and requesting the current page
    FetchPage,

    /// Items were extracted from the page
    ParseOk,

    /// The page held no items; end of data or a block
    ParseEmpty,

    /// Transport failure or non-200 response; the page is retried
    FetchError,

    /// Applying the pacing decision before the next page
    Pace,

    /// Terminal
    Done,
}

impl StreamState {
    /// Checks whether `next` is a legal successor of this state
    ///
    /// ```text
    /// Start -> FetchPage -> ParseOk -> Pace -> FetchPage | Done
    ///                    -> ParseEmpty -> Done
    ///                    -> FetchError -> FetchPage
    /// ```
    pub fn can_transition_to(&self, next: StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, next),
            (Start, FetchPage)
                | (FetchPage, ParseOk)
                | (FetchPage, ParseEmpty)
                | (FetchPage, FetchError)
                | (FetchError, FetchPage)
                | (ParseOk, Pace)
                | (ParseEmpty, Done)
                | (Pace, FetchPage)
                | (Pace, Done)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::FetchPage => "fetch_page",
            Self::ParseOk => "parse_ok",
            Self::ParseEmpty => "parse_empty",
            Self::FetchError => "fetch_error",
            Self::Pace => "pace",
            Self::Done => "done",
        }
    }

    /// Returns all possible stream states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Start,
            Self::FetchPage,
            Self::ParseOk,
            Self::ParseEmpty,
            Self::FetchError,
            Self::Pace,
            Self::Done,
        ]
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
