use crate::core::error::{ResolveError, ResolveResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// One outgoing request. `form` switches the request to a form-encoded POST;
/// everything else is a plain GET.
#[derive(Debug, Default)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub form: Option<Vec<(String, String)>>,
    /// Human-readable description logged before the request goes out.
    pub note: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Default::default() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = Some(fields);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// The webpage/API fetch seam. Site resolvers only ever talk to this trait,
/// so tests can swap in a canned implementation.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Perform the request and return the raw response body as text.
    /// Non-2xx and network failures surface as transport errors.
    async fn fetch_raw(&self, req: &FetchRequest) -> ResolveResult<String>;
}

/// Fetch a body as text.
pub async fn fetch_text(fetch: &dyn Fetch, req: FetchRequest) -> ResolveResult<String> {
    if let Some(note) = &req.note {
        debug!("{}", note);
    }
    fetch.fetch_raw(&req).await
}

/// Fetch a body as text, running `transform` on it before returning.
/// Used where the wire body must be decrypted before it is parseable.
pub async fn fetch_text_with<F>(
    fetch: &dyn Fetch,
    req: FetchRequest,
    transform: F,
) -> ResolveResult<String>
where
    F: Fn(&str) -> ResolveResult<String>,
{
    let body = fetch_text(fetch, req).await?;
    transform(&body)
}

/// Fetch and deserialize a JSON body.
pub async fn fetch_json<T: DeserializeOwned>(
    fetch: &dyn Fetch,
    req: FetchRequest,
) -> ResolveResult<T> {
    let url = req.url.clone();
    let body = fetch_text(fetch, req).await?;
    serde_json::from_str(&body)
        .map_err(|e| ResolveError::protocol(format!("invalid JSON from {url}: {e}")))
}

/// Production fetch over a shared reqwest client.
pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    pub fn new(user_agent: &str, timeout: Duration) -> ResolveResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetch {
    async fn fetch_raw(&self, req: &FetchRequest) -> ResolveResult<String> {
        let mut builder = match &req.form {
            Some(fields) => self.client.post(&req.url).form(fields),
            None => self.client.get(&req.url),
        };
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }
        let response = builder.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}
