//! Crawler module for paced page fetching and extraction
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching through leased egress points
//! - HTML extraction of posts, comments and page counts
//! - The paced controller that walks list and comment streams

mod controller;
mod extractor;
mod fetcher;

pub use controller::{Controller, CrawlReport, StreamReport};
pub use extractor::{
    CommentPageExtractor, ItemParseError, ListPageExtractor, PageExtractor, ParsedPage,
};
pub use fetcher::{FetchError, Fetcher, HttpFetcher, PageRequest, PageResponse};
