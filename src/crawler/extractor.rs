//! HTML extraction for post list and comment pages
//!
//! Both page kinds mark items as `div.c` blocks whose id carries a kind
//! prefix (`M_` for posts, `C_` for comments) and expose the page count in
//! `div#pagelist input[name=mp]`.

use crate::output::RawItem;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

/// Placeholder for optional fields the page does not show
const MISSING: &str = "N/A";

const NBSP: char = '\u{a0}';

/// A single item slot that could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemParseError {
    #[error("item has no id")]
    MissingId,

    #[error("item {item_id} has no {field}")]
    MissingField {
        item_id: String,
        field: &'static str,
    },
}

/// Result of parsing one page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// One entry per item slot, in page order
    pub items: Vec<Result<RawItem, ItemParseError>>,

    /// Page count reported by the page, if any
    pub total_pages: Option<u32>,
}

impl ParsedPage {
    /// True when the page has no item slots at all
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Turns a response body into item slots and a page-count hint
pub trait PageExtractor: Send + Sync {
    fn parse(&self, body: &str) -> ParsedPage;
}

/// Extracts posts from a user's post list page
#[derive(Debug, Clone, Copy, Default)]
pub struct ListPageExtractor;

/// Extracts comments from a post's comment page
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentPageExtractor;

impl PageExtractor for ListPageExtractor {
    fn parse(&self, body: &str) -> ParsedPage {
        let document = Html::parse_document(body);
        let items = select_all(&document, "div.c[id^='M_']")
            .into_iter()
            .map(parse_post)
            .collect();

        ParsedPage {
            items,
            total_pages: extract_total_pages(&document),
        }
    }
}

impl PageExtractor for CommentPageExtractor {
    fn parse(&self, body: &str) -> ParsedPage {
        let document = Html::parse_document(body);
        let items = select_all(&document, "div.c[id^='C_']")
            .into_iter()
            .map(parse_comment)
            .collect();

        ParsedPage {
            items,
            total_pages: extract_total_pages(&document),
        }
    }
}

fn select_all<'a>(document: &'a Html, selector: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(selector) {
        Ok(selector) => document.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn select_first<'a>(element: &ElementRef<'a>, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    element.select(&selector).next()
}

fn text_of(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Reads the page count from the pagination form
///
/// Pages without a pagination block have a single page.
fn extract_total_pages(document: &Html) -> Option<u32> {
    let pagelist = Selector::parse("div#pagelist").ok()?;
    let Some(block) = document.select(&pagelist).next() else {
        return Some(1);
    };

    match select_first(&block, "input[name='mp']") {
        Some(input) => input.value().attr("value")?.trim().parse().ok(),
        None => Some(1),
    }
}

/// Finds an action link such as `赞[12]` and returns the bracketed count
fn bracket_count(element: &ElementRef<'_>, label: &str) -> Option<String> {
    let selector = Selector::parse("a").ok()?;
    let prefix = format!("{}[", label);

    element.select(&selector).find_map(|link| {
        let text = text_of(&link);
        let rest = text.strip_prefix(&prefix)?;
        let count = rest.strip_suffix(']')?;
        Some(count.to_string())
    })
}

/// Splits the `span.ct` line into publish time, device and location
fn split_info(info: &str) -> (String, String, String) {
    if info.is_empty() {
        return (MISSING.into(), MISSING.into(), MISSING.into());
    }

    let parts: Vec<&str> = info.split(NBSP).collect();
    let time = parts.first().map(|s| s.trim()).unwrap_or(MISSING).to_string();

    let device = match info.split_once("来自") {
        Some((_, after)) => after.split(NBSP).next().unwrap_or(MISSING).trim().to_string(),
        None => MISSING.to_string(),
    };

    let location = if parts.len() > 1 {
        parts[parts.len() - 1].trim().to_string()
    } else {
        MISSING.to_string()
    };

    (time, device, location)
}

fn parse_post(element: ElementRef<'_>) -> Result<RawItem, ItemParseError> {
    let id = element
        .value()
        .id()
        .and_then(|id| id.strip_prefix("M_"))
        .filter(|id| !id.is_empty())
        .ok_or(ItemParseError::MissingId)?;

    let content = select_first(&element, "span.ctt")
        .map(|span| text_of(&span))
        .ok_or_else(|| ItemParseError::MissingField {
            item_id: id.to_string(),
            field: "content",
        })?;

    let info = select_first(&element, "span.ct")
        .map(|span| span.text().collect::<String>())
        .unwrap_or_default();
    let (publish_time, _, _) = split_info(&info);

    let count = |label: &str| bracket_count(&element, label).unwrap_or_else(|| "0".to_string());

    Ok(RawItem::new(id)
        .with_field("content", content)
        .with_field("publish_time", publish_time)
        .with_field("reposts", count("转发"))
        .with_field("comments", count("评论"))
        .with_field("likes", count("赞")))
}

fn parse_comment(element: ElementRef<'_>) -> Result<RawItem, ItemParseError> {
    let id = element
        .value()
        .id()
        .filter(|id| id.len() > 2)
        .ok_or(ItemParseError::MissingId)?;

    let content = select_first(&element, "span.ctt")
        .map(|span| text_of(&span))
        .ok_or_else(|| ItemParseError::MissingField {
            item_id: id.to_string(),
            field: "content",
        })?;

    let (user_id, screen_name) = match select_first(&element, "a[href*='/u/']") {
        Some(link) => {
            let href = link.value().attr("href").unwrap_or_default();
            let user_id = href
                .split('?')
                .next()
                .and_then(|path| path.rsplit('/').next())
                .unwrap_or(MISSING)
                .to_string();
            (user_id, text_of(&link))
        }
        None => (MISSING.to_string(), MISSING.to_string()),
    };

    let info = select_first(&element, "span.ct")
        .map(|span| span.text().collect::<String>())
        .unwrap_or_default();
    let (publish_time, device, location) = split_info(&info);

    let likes = bracket_count(&element, "赞").unwrap_or_else(|| "0".to_string());

    Ok(RawItem::new(id)
        .with_field("user_id", user_id)
        .with_field("screen_name", screen_name)
        .with_field("content", content)
        .with_field("likes", likes)
        .with_field("publish_time", publish_time)
        .with_field("device", device)
        .with_field("ip_location", location))
}
