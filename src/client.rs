use std::fmt;

use reqwest::{header, Method, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    dedup::generate_request_key, retry_with_backoff, wire, ClientOptions, ClinicError,
    RequestDeduplicator, Result, RetryOptions,
};

/// Environment variable holding the API base URL.
pub const BASE_URL_ENV: &str = "CLINIC_API_BASE_URL";
/// Environment variable holding the API access token.
pub const TOKEN_ENV: &str = "CLINIC_API_TOKEN";

/// Sends single attempts. Cloned into deduplicated reads, so it must not hold
/// the deduplicator itself.
#[derive(Clone)]
struct Dispatcher {
    http: reqwest::Client,
    authorization: String,
    options: ClientOptions,
}

#[derive(Clone)]
/// JSON client for the clinic REST API.
///
/// Reads are shared between concurrent callers and every request is retried
/// with backoff according to [`ClientOptions`].
pub struct ClinicClient {
    base_url: String,
    dispatcher: Dispatcher,
    reads: RequestDeduplicator<JsonValue, ClinicError>,
}

impl fmt::Debug for ClinicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClinicClient")
            .field("base_url", &self.base_url)
            .field("authorization", &"<redacted>")
            .field("options", &self.dispatcher.options)
            .finish()
    }
}

impl ClinicClient {
    /// Creates a client with a raw authorization header value.
    ///
    /// An empty value sends no `Authorization` header.
    pub fn new(base_url: impl Into<String>, authorization: impl Into<String>) -> Self {
        let options = ClientOptions::default();
        Self {
            base_url: base_url.into(),
            reads: RequestDeduplicator::new(options.dedup_ttl),
            dispatcher: Dispatcher {
                http: reqwest::Client::new(),
                authorization: authorization.into(),
                options,
            },
        }
    }

    /// Creates a client from a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn new_bearer(base_url: impl Into<String>, token: impl AsRef<str>) -> Self {
        Self::new(base_url, normalize_bearer_authorization(token.as_ref()))
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `CLINIC_API_BASE_URL` — API root, e.g. `https://clinic.example/api`
    /// - `CLINIC_API_TOKEN` — access token (Bearer prefix optional)
    ///
    /// Returns an error if either variable is missing or empty.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use clinic_http::ClinicClient;
    ///
    /// let api = ClinicClient::from_env().expect("missing CLINIC_API_* env vars");
    /// ```
    pub fn from_env() -> std::result::Result<Self, String> {
        let url = std::env::var(BASE_URL_ENV)
            .map_err(|_| format!("missing {BASE_URL_ENV} environment variable"))?;
        let token = std::env::var(TOKEN_ENV)
            .map_err(|_| format!("missing {TOKEN_ENV} environment variable"))?;
        if url.trim().is_empty() {
            return Err(format!("{BASE_URL_ENV} is set but empty"));
        }
        if token.trim().is_empty() {
            return Err(format!("{TOKEN_ENV} is set but empty"));
        }
        Ok(Self::new_bearer(url, token))
    }

    /// Applies client options such as timeout, retry and deduplication.
    ///
    /// Starts a fresh deduplication table using the new TTL.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.reads = RequestDeduplicator::new(opts.dedup_ttl);
        self.dispatcher.options = opts;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.dispatcher.options
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        decode(self.send_json(Method::GET, path, None).await?)
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        decode(self.send_json(Method::DELETE, path, None).await?)
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        decode(self.send_json(Method::POST, path, Some(encode(body)?)).await?)
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        decode(self.send_json(Method::PUT, path, Some(encode(body)?)).await?)
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        decode(self.send_json(Method::PATCH, path, Some(encode(body)?)).await?)
    }

    /// Sends a request and returns the JSON response body.
    ///
    /// An empty success body decodes as `null`.
    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: Option<JsonValue>,
    ) -> Result<JsonValue> {
        let url = join_url(&self.base_url, path)?;
        let is_read = method == Method::GET || method == Method::HEAD;

        if is_read && self.dispatcher.options.deduplicate_reads {
            let key = generate_request_key(method.as_str(), url.as_str(), body.as_ref());
            let dispatcher = self.dispatcher.clone();
            return self
                .reads
                .deduplicate(key, move || async move {
                    dispatcher.send_with_retry(method, url, body).await
                })
                .await;
        }

        self.dispatcher.send_with_retry(method, url, body).await
    }
}

impl Dispatcher {
    async fn send_with_retry(
        &self,
        method: Method,
        url: Url,
        body: Option<JsonValue>,
    ) -> Result<JsonValue> {
        let single_attempt;
        let retry = if method.is_idempotent() || self.options.retry_non_idempotent {
            &self.options.retry
        } else {
            single_attempt = RetryOptions::none();
            &single_attempt
        };

        retry_with_backoff(|| self.send_once(&method, &url, body.as_ref()), retry).await
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue> {
        #[cfg(feature = "tracing")]
        tracing::debug!(method = %method, url = %url, "sending request");

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(header::ACCEPT, "application/json")
            .timeout(self.options.timeout);
        if !self.authorization.is_empty() {
            request = request.header(header::AUTHORIZATION, &self.authorization);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ClinicError::transport)?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.map_err(ClinicError::transport)?;

        if !status.is_success() {
            return Err(ClinicError::Http {
                status: status.as_u16(),
                retry_after: retry_after.or_else(|| wire::retry_after_from_body(&body)),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(JsonValue::Null);
        }
        serde_json::from_str(&body).map_err(|err| {
            ClinicError::Decode(format!("invalid response JSON: {err}; body: {body}"))
        })
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<JsonValue> {
    serde_json::to_value(body).map_err(|err| ClinicError::Encode(err.to_string()))
}

fn decode<T: DeserializeOwned>(value: JsonValue) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|err| ClinicError::Decode(format!("unexpected response shape: {err}")))
}

/// Resolves `path` against `base_url`. Absolute `http(s)` paths are used as-is.
fn join_url(base_url: &str, path: &str) -> Result<Url> {
    let raw = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_owned()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    Url::parse(&raw).map_err(|err| ClinicError::InvalidUrl(format!("{raw}: {err}")))
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
