use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{CoreError, CoreResult};
use crate::model::{Book, Category, Chapter};
use crate::parser::ResponseParser;
use crate::rate_limiter::RateLimiter;

/// Backoff schedule for network errors and 5xx responses: 1s, 2s, 4s, max 3
/// attempts.
const BACKOFF_SCHEDULE: [Duration; 3] =
    [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wraps the HTTP client. Honours a per-host token bucket, respects
/// `NO_PROXY`-style bypass lists, retries per the backoff schedule above,
/// and validates every parsed record before returning it to the caller.
pub struct UpstreamFetcher {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
    parser: Arc<dyn ResponseParser>,
    no_proxy_hosts: Vec<String>,
}

impl UpstreamFetcher {
    pub fn new(
        base_url: impl Into<String>,
        rate_limiter: Arc<RateLimiter>,
        parser: Arc<dyn ResponseParser>,
        no_proxy: Option<&str>,
    ) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(PER_ATTEMPT_TIMEOUT)
            .build()
            .map_err(CoreError::from)?;
        let no_proxy_hosts = no_proxy
            .unwrap_or_default()
            .split(',')
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty())
            .collect();
        Ok(Self {
            client,
            base_url: base_url.into(),
            rate_limiter,
            parser,
            no_proxy_hosts,
        })
    }

    fn host(&self) -> &str {
        self.base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or(&self.base_url)
    }

    fn bypasses_blocked_check(&self) -> bool {
        let host = self.host();
        self.no_proxy_hosts.iter().any(|bypassed| host.ends_with(bypassed.as_str()))
    }

    async fn get_with_retry(&self, path: &str) -> CoreResult<String> {
        let host = self.host().to_string();
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for (attempt, backoff) in std::iter::once(Duration::ZERO)
            .chain(BACKOFF_SCHEDULE.into_iter())
            .enumerate()
        {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
            }
            self.rate_limiter.acquire(&host).await;

            let response = match self.client.get(url.as_str()).send().await {
                Ok(response) => response,
                Err(err) => {
                    last_err = Some(CoreError::from(err));
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                self.rate_limiter.widen(&host);
                last_err = Some(CoreError::UpstreamRateLimited {
                    retry_after_secs: retry_after_secs(&response).unwrap_or(1),
                });
                continue;
            }
            if status.is_client_error() {
                return Err(CoreError::UpstreamInvalid(format!("upstream returned {status}")));
            }
            if status.is_server_error() {
                last_err = Some(CoreError::UpstreamUnreachable(format!("upstream returned {status}")));
                continue;
            }

            let body = response.text().await.map_err(CoreError::from)?;
            if !self.bypasses_blocked_check() && self.parser.looks_like_challenge_page(&body) {
                return Err(CoreError::UpstreamBlocked);
            }
            return Ok(body);
        }

        Err(last_err.unwrap_or_else(|| CoreError::UpstreamUnreachable("exhausted retries".to_string())))
    }

    pub async fn fetch_categories(&self) -> CoreResult<Vec<Category>> {
        let body = self.get_with_retry("/categories").await?;
        self.parser.parse_categories(&body)
    }

    pub async fn fetch_book_info(&self, book_id: &str) -> CoreResult<Book> {
        let body = self.get_with_retry(&format!("/books/{book_id}")).await?;
        self.parser.parse_book_info(book_id, &body)
    }

    /// A book with zero chapters upstream is a valid result, not an error:
    /// `parse_chapter_list` only fails when the page isn't structurally a
    /// chapter list page at all (missing container), not merely empty.
    pub async fn fetch_chapter_list_page(&self, book_id: &str, page: u32) -> CoreResult<Vec<Chapter>> {
        let body = self
            .get_with_retry(&format!("/books/{book_id}/chapters?page={page}"))
            .await?;
        self.parser.parse_chapter_list(book_id, &body)
    }

    pub async fn fetch_chapter_content(&self, book_id: &str, chapter_key: &str) -> CoreResult<String> {
        let body = self
            .get_with_retry(&format!("/books/{book_id}/chapters/{chapter_key}"))
            .await?;
        self.parser.parse_chapter_content(&body)
    }
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ScraperResponseParser;

    fn fetcher(base_url: &str) -> UpstreamFetcher {
        UpstreamFetcher::new(
            base_url,
            Arc::new(RateLimiter::default()),
            Arc::new(ScraperResponseParser::default()),
            None,
        )
        .unwrap()
    }

    #[test]
    fn host_strips_scheme_and_path() {
        let fetcher = fetcher("https://example.test/v1");
        assert_eq!(fetcher.host(), "example.test");
    }

    #[test]
    fn bypasses_blocked_check_respects_no_proxy() {
        let with_bypass = UpstreamFetcher::new(
            "https://example.test",
            Arc::new(RateLimiter::default()),
            Arc::new(ScraperResponseParser::default()),
            Some("example.test,other.test"),
        )
        .unwrap();
        assert!(with_bypass.bypasses_blocked_check());

        let without_bypass = fetcher("https://example.test");
        assert!(!without_bypass.bypasses_blocked_check());
    }
}
