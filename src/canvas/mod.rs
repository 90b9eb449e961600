pub mod dto;
pub mod rate_limit;

use std::collections::{BTreeSet, HashSet};
use std::env;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::models::{Section, SectionFilter, Term};
use dto::{
    CourseDto, CrossListRequest, EnrollmentDto, EnrollmentTermsResponse, SectionDto,
    section_from_mutation_echo, section_from_parts,
};
use rate_limit::RateLimiter;

/// Defensive ceiling on pages followed per listing, in case the remote keeps
/// handing out next links.
const MAX_PAGES: u32 = 50;

/// Backoff never grows past this, no matter the attempt count.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct CanvasConfig {
    pub api_token: String,
    pub base_url: String,
    pub account_id: i64,
    pub per_page: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub requests_per_minute: usize,
    pub retry_delay: Duration,
}

impl CanvasConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let api_token = env::var("CANVAS_API_TOKEN")
            .map_err(|_| AppError::Config("CANVAS_API_TOKEN is not set".to_string()))?;
        if api_token.is_empty() || api_token == "PLACEHOLDERAPIKEY" {
            return Err(AppError::Config(
                "CANVAS_API_TOKEN is empty or a placeholder".to_string(),
            ));
        }
        let base_url = env::var("CANVAS_BASE_URL")
            .map_err(|_| AppError::Config("CANVAS_BASE_URL is not set".to_string()))?;

        Ok(Self {
            api_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id: env_or("CANVAS_ACCOUNT_ID", 1),
            per_page: env_or("CANVAS_PER_PAGE", 100),
            timeout: Duration::from_secs(env_or("CANVAS_TIMEOUT_SECS", 30)),
            max_retries: env_or("CANVAS_MAX_RETRIES", 3),
            requests_per_minute: env_or("CANVAS_REQUESTS_PER_MINUTE", 60),
            retry_delay: Duration::from_millis(env_or("CANVAS_RETRY_DELAY_MS", 1000)),
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Seam to the Canvas REST API. Handlers and the cross-listing service only
/// ever talk to this trait, so tests can substitute a canned implementation.
#[async_trait]
pub trait CanvasClient: Send + Sync {
    /// Active enrollment terms for the configured account.
    async fn fetch_terms(&self) -> Result<Vec<Term>, AppError>;

    /// Full section snapshot for a term, narrowed by instructor or search
    /// term. Pages are followed until exhausted, preserving remote order.
    async fn fetch_sections(
        &self,
        term_id: i64,
        filter: &SectionFilter,
    ) -> Result<Vec<Section>, AppError>;

    /// Merge a section into a parent course. Remote rejections surface as
    /// `AppError::Validation` carrying the Canvas error message.
    async fn cross_list(
        &self,
        section_id: i64,
        parent_course_id: i64,
    ) -> Result<Section, AppError>;

    /// Revert a prior cross-list, returning the section to its home course.
    async fn un_cross_list(&self, section_id: i64) -> Result<Section, AppError>;
}

pub struct CanvasHttpClient {
    client: Client,
    config: CanvasConfig,
    limiter: Mutex<RateLimiter>,
}

impl CanvasHttpClient {
    pub fn new(config: CanvasConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            limiter: Mutex::new(RateLimiter::new(config.requests_per_minute)),
            config,
        })
    }

    /// One rate-limited round-trip. Returns the parsed body and the
    /// `rel="next"` pagination link, if any.
    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<(Value, Option<String>), AppError> {
        self.limiter.lock().await.acquire().await;

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.config.api_token)
            .header(header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Transient(format!("request timed out: {e}"))
            } else {
                AppError::Transient(format!("network error: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let next = next_link(response.headers());
            let text = response
                .text()
                .await
                .map_err(|e| AppError::Transient(format!("failed to read response body: {e}")))?;
            let value = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text)
                    .map_err(|e| AppError::Internal(format!("invalid JSON from Canvas: {e}")))?
            };
            return Ok((value, next));
        }

        let body_text = response.text().await.unwrap_or_default();
        let reason = remote_message(&body_text, status);
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Auth(reason),
            StatusCode::NOT_FOUND => AppError::NotFound(reason),
            StatusCode::TOO_MANY_REQUESTS => AppError::Transient(reason),
            s if s.is_server_error() => AppError::Transient(reason),
            _ => AppError::Validation(reason),
        })
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<(Value, Option<String>), AppError> {
        retry_transient(self.config.max_retries, self.config.retry_delay, || {
            self.send(Method::GET, url, query, None)
        })
        .await
    }

    /// Follow pagination links until exhausted, merging pages in remote
    /// order. Array pages are flattened; object pages are kept whole.
    async fn get_paginated(
        &self,
        path: &str,
        mut query: Vec<(String, String)>,
    ) -> Result<Vec<Value>, AppError> {
        query.push(("per_page".to_string(), self.config.per_page.to_string()));
        let mut url = format!("{}{}", self.config.base_url, path);
        // The next link already carries the query string, so only the first
        // request sends one.
        let mut query = Some(query);
        let mut out = Vec::new();

        for _ in 0..MAX_PAGES {
            let q = query.take().unwrap_or_default();
            let (value, next) = self.get_json(&url, &q).await?;
            match value {
                Value::Array(items) => out.extend(items),
                Value::Null => {}
                v => out.push(v),
            }
            match next {
                Some(n) => url = n,
                None => return Ok(out),
            }
        }
        warn!(
            "pagination cap of {} pages reached for {}; returning {} items",
            MAX_PAGES,
            path,
            out.len()
        );
        Ok(out)
    }

    async fn get_course(&self, course_id: i64) -> Result<CourseDto, AppError> {
        let url = format!("{}/api/v1/courses/{course_id}", self.config.base_url);
        let query = vec![
            ("include[]".to_string(), "term".to_string()),
            ("include[]".to_string(), "total_students".to_string()),
        ];
        let (value, _) = self.get_json(&url, &query).await?;
        serde_json::from_value(value)
            .map_err(|e| AppError::Internal(format!("unexpected course payload: {e}")))
    }

    /// Faculty path: scope by the instructor's active teacher enrollments in
    /// the term, then hydrate each distinct course.
    async fn instructor_courses(
        &self,
        user_id: i64,
        term_id: i64,
    ) -> Result<Vec<CourseDto>, AppError> {
        let path = format!("/api/v1/users/{user_id}/enrollments");
        let query = vec![
            ("type[]".to_string(), "TeacherEnrollment".to_string()),
            ("enrollment_state".to_string(), "active".to_string()),
            ("enrollment_term_id".to_string(), term_id.to_string()),
        ];
        let values = self.get_paginated(&path, query).await?;

        let mut course_ids = BTreeSet::new();
        for value in values {
            let enrollment: EnrollmentDto = serde_json::from_value(value)
                .map_err(|e| AppError::Internal(format!("unexpected enrollment payload: {e}")))?;
            if let Some(id) = enrollment.course_id {
                course_ids.insert(id);
            }
        }

        let mut courses = Vec::with_capacity(course_ids.len());
        for id in course_ids {
            courses.push(self.get_course(id).await?);
        }
        Ok(courses)
    }

    /// Staff path: account-level course search so we never load a whole term.
    async fn search_courses(
        &self,
        term_id: i64,
        search_term: &str,
    ) -> Result<Vec<CourseDto>, AppError> {
        let search_term = search_term.trim();
        if search_term.len() < 2 {
            return Err(AppError::Validation(
                "search term must be at least 2 characters".to_string(),
            ));
        }
        let path = format!("/api/v1/accounts/{}/courses", self.config.account_id);
        let query = vec![
            ("enrollment_term_id".to_string(), term_id.to_string()),
            ("search_term".to_string(), search_term.to_string()),
            ("with_enrollments".to_string(), "true".to_string()),
            ("state[]".to_string(), "available".to_string()),
            ("state[]".to_string(), "unpublished".to_string()),
            ("include[]".to_string(), "term".to_string()),
            ("include[]".to_string(), "total_students".to_string()),
        ];
        let values = self.get_paginated(&path, query).await?;
        values
            .into_iter()
            .map(|v| {
                serde_json::from_value(v)
                    .map_err(|e| AppError::Internal(format!("unexpected course payload: {e}")))
            })
            .collect()
    }

    async fn course_sections(&self, course_id: i64) -> Result<Vec<SectionDto>, AppError> {
        let path = format!("/api/v1/courses/{course_id}/sections");
        let values = self.get_paginated(&path, Vec::new()).await?;
        values
            .into_iter()
            .map(|v| {
                serde_json::from_value(v)
                    .map_err(|e| AppError::Internal(format!("unexpected section payload: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl CanvasClient for CanvasHttpClient {
    async fn fetch_terms(&self) -> Result<Vec<Term>, AppError> {
        let path = format!("/api/v1/accounts/{}/terms", self.config.account_id);
        let query = vec![("workflow_state[]".to_string(), "active".to_string())];
        let pages = self.get_paginated(&path, query).await?;

        let mut terms = Vec::new();
        for page in pages {
            let parsed: EnrollmentTermsResponse = serde_json::from_value(page)
                .map_err(|e| AppError::Internal(format!("unexpected terms payload: {e}")))?;
            terms.extend(parsed.enrollment_terms.into_iter().map(Term::from));
        }
        debug!("fetched {} active terms", terms.len());
        Ok(terms)
    }

    async fn fetch_sections(
        &self,
        term_id: i64,
        filter: &SectionFilter,
    ) -> Result<Vec<Section>, AppError> {
        let courses = if let Some(user_id) = filter.instructor_id {
            self.instructor_courses(user_id, term_id).await?
        } else if let Some(search) = filter.search_term.as_deref() {
            self.search_courses(term_id, search).await?
        } else {
            return Err(AppError::Validation(
                "an instructor id or a search term is required".to_string(),
            ));
        };

        // A teacher with several enrollments produces duplicate course rows.
        let mut seen = HashSet::new();
        let mut sections = Vec::new();
        for course in &courses {
            if !seen.insert(course.id) {
                continue;
            }
            for dto in self.course_sections(course.id).await? {
                sections.push(section_from_parts(course, &dto));
            }
        }
        debug!("assembled {} sections for term {}", sections.len(), term_id);
        Ok(sections)
    }

    async fn cross_list(
        &self,
        section_id: i64,
        parent_course_id: i64,
    ) -> Result<Section, AppError> {
        let url = format!(
            "{}/api/v1/sections/{section_id}/crosslist",
            self.config.base_url
        );
        let body = serde_json::to_value(CrossListRequest {
            new_course_id: parent_course_id,
        })
        .map_err(|e| AppError::Internal(format!("failed to encode request: {e}")))?;

        info!(
            "cross-listing section {} into course {}",
            section_id, parent_course_id
        );
        let (value, _) = retry_transient(self.config.max_retries, self.config.retry_delay, || {
            self.send(Method::POST, &url, &[], Some(&body))
        })
        .await?;
        let dto: SectionDto = serde_json::from_value(value)
            .map_err(|e| AppError::Internal(format!("unexpected section payload: {e}")))?;
        Ok(section_from_mutation_echo(dto))
    }

    async fn un_cross_list(&self, section_id: i64) -> Result<Section, AppError> {
        let url = format!(
            "{}/api/v1/sections/{section_id}/crosslist",
            self.config.base_url
        );
        info!("un-cross-listing section {}", section_id);
        let (value, _) = retry_transient(self.config.max_retries, self.config.retry_delay, || {
            self.send(Method::DELETE, &url, &[], None)
        })
        .await?;
        let dto: SectionDto = serde_json::from_value(value)
            .map_err(|e| AppError::Internal(format!("unexpected section payload: {e}")))?;
        Ok(section_from_mutation_echo(dto))
    }
}

/// Run `op`, retrying transient failures with exponential backoff. Auth,
/// not-found and validation errors are surfaced on the first failure;
/// exhausting the budget surfaces the last transient error.
pub(crate) async fn retry_transient<T, F, Fut>(
    max_retries: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                let delay = backoff_delay(base_delay, attempt);
                warn!(
                    "transient error (attempt {}/{}): {}; retrying in {:?}",
                    attempt, max_retries, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_BACKOFF)
}

fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_next_link)
}

/// Extract the `rel="next"` target from a Link header.
fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if params.split(';').any(|p| p.trim() == "rel=\"next\"") {
            Some(
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
            )
        } else {
            None
        }
    })
}

/// Prefer the structured Canvas error message over the raw body, but never
/// drop the remote detail entirely.
fn remote_message(body: &str, status: StatusCode) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let detail = parsed.as_ref().and_then(|v| {
        v.get("errors")
            .and_then(|e| e.as_array())
            .and_then(|a| a.first())
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .or_else(|| v.get("message").and_then(|m| m.as_str()))
            .map(str::to_string)
    });
    match detail {
        Some(d) => format!("Canvas API error {}: {}", status.as_u16(), d),
        None if body.trim().is_empty() => format!("Canvas API error {}", status.as_u16()),
        None => format!("Canvas API error {}: {}", status.as_u16(), body.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn next_link_is_extracted_from_canvas_link_header() {
        let header = "<https://canvas.test/api/v1/courses?page=1&per_page=100>; rel=\"current\",\
                      <https://canvas.test/api/v1/courses?page=2&per_page=100>; rel=\"next\",\
                      <https://canvas.test/api/v1/courses?page=7&per_page=100>; rel=\"last\"";
        assert_eq!(
            parse_next_link(header).as_deref(),
            Some("https://canvas.test/api/v1/courses?page=2&per_page=100")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let header = "<https://canvas.test/api/v1/courses?page=7>; rel=\"current\",\
                      <https://canvas.test/api/v1/courses?page=1>; rel=\"first\"";
        assert_eq!(parse_next_link(header), None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 10), MAX_BACKOFF);
    }

    #[test]
    fn remote_message_prefers_structured_errors() {
        let body = r#"{"errors": [{"message": "Section is already crosslisted"}]}"#;
        let msg = remote_message(body, StatusCode::BAD_REQUEST);
        assert_eq!(msg, "Canvas API error 400: Section is already crosslisted");

        let msg = remote_message("plain text", StatusCode::BAD_REQUEST);
        assert_eq!(msg, "Canvas API error 400: plain text");

        let msg = remote_message("", StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(msg, "Canvas API error 503");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_until_success() {
        let attempts = Cell::new(0u32);
        let result = retry_transient(3, Duration::from_millis(100), || {
            let n = attempts.get() + 1;
            attempts.set(n);
            async move {
                if n <= 3 {
                    Err(AppError::Transient("upstream hiccup".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        // Fails transiently max_retries times, then the success comes back.
        assert_eq!(result.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_errors_never_retry() {
        let attempts = Cell::new(0u32);
        let result: Result<(), _> = retry_transient(5, Duration::from_millis(100), || {
            attempts.set(attempts.get() + 1);
            async { Err(AppError::Auth("bad token".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(AppError::Auth(_))));
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_surfaces_last_error() {
        let attempts = Cell::new(0u32);
        let result: Result<(), _> = retry_transient(2, Duration::from_millis(100), || {
            attempts.set(attempts.get() + 1);
            async { Err(AppError::Transient("still down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(AppError::Transient(_))));
        assert_eq!(attempts.get(), 3);
    }
}
