use scraper::{Html, Selector};

use crate::error::{CoreError, CoreResult};
use crate::model::{Book, BookStatus, Category, CategoryId, Chapter, PublicId};

/// Minimum content length (characters) below which fetched chapter text is
/// treated as invalid rather than merely short.
pub const MIN_CONTENT_LENGTH: usize = 50;

/// Turns a raw upstream HTTP body into typed records. `UpstreamFetcher`
/// depends on this trait rather than any concrete HTML structure so a
/// deployment can swap in a richer parser without touching
/// fetch/retry/rate-limit logic.
pub trait ResponseParser: Send + Sync + 'static {
    fn parse_categories(&self, body: &str) -> CoreResult<Vec<Category>>;
    fn parse_book_info(&self, book_id: &str, body: &str) -> CoreResult<Book>;
    fn parse_chapter_list(&self, book_id: &str, body: &str) -> CoreResult<Vec<Chapter>>;
    fn parse_chapter_content(&self, body: &str) -> CoreResult<String>;

    /// Preflight check consulted by `UpstreamFetcher` before trusting a
    /// response body, to detect an interception/challenge page before it
    /// gets parsed as real content.
    fn looks_like_challenge_page(&self, body: &str) -> bool;
}

/// Default `ResponseParser` backed by the `scraper` crate against a
/// configurable CSS-selector set. Ships a reasonable default selector set so
/// the workspace runs end-to-end; a real deployment provides its own
/// `ResponseParser` behind the same trait.
pub struct ScraperResponseParser {
    selectors: SelectorSet,
    challenge_markers: Vec<String>,
}

pub struct SelectorSet {
    pub category_item: String,
    pub category_name: String,
    pub book_title: String,
    pub book_author: String,
    pub book_status: String,
    pub book_description: String,
    pub chapter_list_container: String,
    pub chapter_item: String,
    pub chapter_title: String,
    pub chapter_link: String,
    pub content_body: String,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            category_item: "a.category-link".to_string(),
            category_name: "span.category-name".to_string(),
            book_title: "h1.book-title".to_string(),
            book_author: "span.book-author".to_string(),
            book_status: "span.book-status".to_string(),
            book_description: "div.book-description".to_string(),
            chapter_list_container: "div.chapter-list, ul.chapter-list".to_string(),
            chapter_item: "li.chapter-item".to_string(),
            chapter_title: "span.chapter-title".to_string(),
            chapter_link: "a.chapter-link".to_string(),
            content_body: "div.chapter-content".to_string(),
        }
    }
}

impl ScraperResponseParser {
    pub fn new(selectors: SelectorSet) -> Self {
        Self {
            selectors,
            challenge_markers: default_challenge_markers(),
        }
    }
}

impl Default for ScraperResponseParser {
    fn default() -> Self {
        Self::new(SelectorSet::default())
    }
}

fn default_challenge_markers() -> Vec<String> {
    [
        "checking your browser",
        "just a moment",
        "enable javascript and cookies",
        "attention required",
        "verify you are human",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn select_one(document: &Html, selector: &str) -> Option<String> {
    let parsed = Selector::parse(selector).ok()?;
    document
        .select(&parsed)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

impl ResponseParser for ScraperResponseParser {
    fn parse_categories(&self, body: &str) -> CoreResult<Vec<Category>> {
        let document = Html::parse_document(body);
        let item_selector = Selector::parse(&self.selectors.category_item)
            .map_err(|err| CoreError::UpstreamInvalid(format!("bad category selector: {err:?}")))?;
        let name_selector = Selector::parse(&self.selectors.category_name)
            .map_err(|err| CoreError::UpstreamInvalid(format!("bad category name selector: {err:?}")))?;

        let categories: Vec<Category> = document
            .select(&item_selector)
            .filter_map(|el| {
                let url = el.value().attr("href")?.to_string();
                let name = el
                    .select(&name_selector)
                    .next()
                    .map(|n| n.text().collect::<String>())
                    .unwrap_or_else(|| el.text().collect::<String>())
                    .trim()
                    .to_string();
                let category_id = slugify(&url);
                Some(Category {
                    category_id: CategoryId(category_id),
                    name,
                    upstream_url: url,
                })
            })
            .collect();

        if categories.is_empty() {
            return Err(CoreError::UpstreamInvalid("no categories found in response".to_string()));
        }
        Ok(categories)
    }

    fn parse_book_info(&self, book_id: &str, body: &str) -> CoreResult<Book> {
        let document = Html::parse_document(body);
        let name = select_one(&document, &self.selectors.book_title)
            .ok_or_else(|| CoreError::UpstreamInvalid("missing book title".to_string()))?;
        let author = select_one(&document, &self.selectors.book_author).unwrap_or_default();
        let raw_status = select_one(&document, &self.selectors.book_status).unwrap_or_default();
        let description = select_one(&document, &self.selectors.book_description).unwrap_or_default();

        let mut book = Book::new_stub(book_id.into(), PublicId::from(book_id));
        book.name = name;
        book.author = author;
        book.status = BookStatus::normalize(&raw_status);
        book.description = description;
        Ok(book)
    }

    fn parse_chapter_list(&self, book_id: &str, body: &str) -> CoreResult<Vec<Chapter>> {
        let document = Html::parse_document(body);
        let container_selector = Selector::parse(&self.selectors.chapter_list_container).map_err(
            |err| CoreError::UpstreamInvalid(format!("bad chapter list container selector: {err:?}")),
        )?;
        let item_selector = Selector::parse(&self.selectors.chapter_item)
            .map_err(|err| CoreError::UpstreamInvalid(format!("bad chapter selector: {err:?}")))?;
        let title_selector = Selector::parse(&self.selectors.chapter_title)
            .map_err(|err| CoreError::UpstreamInvalid(format!("bad chapter title selector: {err:?}")))?;
        let link_selector = Selector::parse(&self.selectors.chapter_link)
            .map_err(|err| CoreError::UpstreamInvalid(format!("bad chapter link selector: {err:?}")))?;

        let chapters: Vec<Chapter> = document
            .select(&item_selector)
            .enumerate()
            .filter_map(|(idx, el)| {
                let title = el
                    .select(&title_selector)
                    .next()
                    .map(|n| n.text().collect::<String>())
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                let link = el.select(&link_selector).next()?;
                let url = link.value().attr("href")?.to_string();
                let number = extract_chapter_number(&url).unwrap_or((idx + 1) as i64);
                Some(Chapter {
                    book_id: book_id.into(),
                    number,
                    title,
                    upstream_url: url,
                    public_id: None,
                })
            })
            .collect();

        // The container marks a page that is structurally a chapter list page.
        // A book can legitimately have zero chapters; a page missing the
        // container entirely isn't a chapter list page at all.
        if chapters.is_empty() && document.select(&container_selector).next().is_none() {
            return Err(CoreError::UpstreamInvalid("chapter list container not found".to_string()));
        }
        Ok(chapters)
    }

    fn parse_chapter_content(&self, body: &str) -> CoreResult<String> {
        let document = Html::parse_document(body);
        let text = select_one(&document, &self.selectors.content_body)
            .ok_or_else(|| CoreError::UpstreamInvalid("missing chapter content".to_string()))?;
        if text.chars().count() < MIN_CONTENT_LENGTH {
            return Err(CoreError::UpstreamInvalid(format!(
                "chapter content shorter than minimum ({} chars)",
                MIN_CONTENT_LENGTH
            )));
        }
        Ok(text)
    }

    fn looks_like_challenge_page(&self, body: &str) -> bool {
        let lowered = body.to_lowercase();
        self.challenge_markers.iter().any(|marker| lowered.contains(marker.as_str()))
    }
}

fn slugify(url: &str) -> String {
    url.trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .to_string()
}

fn extract_chapter_number(url: &str) -> Option<i64> {
    url.rsplit(|c: char| !c.is_ascii_digit())
        .find(|segment| !segment.is_empty())
        .and_then(|segment| segment.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_challenge_markers() {
        let parser = ScraperResponseParser::default();
        assert!(parser.looks_like_challenge_page("<html><body>Just a moment...</body></html>"));
        assert!(!parser.looks_like_challenge_page("<html><body>Welcome to the library</body></html>"));
    }

    #[test]
    fn parse_chapter_content_rejects_short_text() {
        let parser = ScraperResponseParser::default();
        let body = r#"<html><body><div class="chapter-content">too short</div></body></html>"#;
        let err = parser.parse_chapter_content(body).unwrap_err();
        assert!(matches!(err, CoreError::UpstreamInvalid(_)));
    }

    #[test]
    fn parse_chapter_content_accepts_long_enough_text() {
        let parser = ScraperResponseParser::default();
        let long_text = "a".repeat(MIN_CONTENT_LENGTH + 1);
        let body = format!(r#"<html><body><div class="chapter-content">{long_text}</div></body></html>"#);
        let text = parser.parse_chapter_content(&body).unwrap();
        assert_eq!(text.len(), MIN_CONTENT_LENGTH + 1);
    }

    #[test]
    fn parse_chapter_list_returns_empty_list_for_genuinely_chapterless_book() {
        let parser = ScraperResponseParser::default();
        let body = r#"<html><body><div class="chapter-list"></div></body></html>"#;
        let chapters = parser.parse_chapter_list("b1", body).unwrap();
        assert!(chapters.is_empty());
    }

    #[test]
    fn parse_chapter_list_rejects_page_missing_the_list_container() {
        let parser = ScraperResponseParser::default();
        let body = r#"<html><body><p>not a book page</p></body></html>"#;
        let err = parser.parse_chapter_list("b1", body).unwrap_err();
        assert!(matches!(err, CoreError::UpstreamInvalid(_)));
    }

    #[test]
    fn extract_chapter_number_reads_trailing_digits() {
        assert_eq!(extract_chapter_number("https://example.test/book/b1/chapter-42"), Some(42));
        assert_eq!(extract_chapter_number("https://example.test/book/b1/chapter-abc"), None);
    }
}
