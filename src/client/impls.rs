use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cancel::{CancellationHandle, CancellationRegistry, SlotGuard},
    client::{ApiClient, ClientInner, RequestBody, RequestOptions},
    config::Config,
    envelope,
    errors::Error,
    telemetry::refresh::RefreshTelemetry,
    token::{AccessToken, RefreshCoordinator, RefreshState},
    types::RefreshResponse,
};

impl ApiClient {
    /// Create a new ApiClient
    /// # Arguments
    /// * `config` - Explicit configuration, typically loaded via `Config::from_env` or `Config::from_file`.
    /// # Errors
    /// Fails before any network call when the base URL is empty or not a valid URL.
    pub fn new(config: Config) -> Result<Self, Error> {
        let config = config.validated()?;
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL '{}': {}", base_url, e)))?;
        let refresh_path = format!("/{}", config.refresh_path().trim_start_matches('/'));

        // Refresh credentials travel in a cookie, so keep a cookie jar per client.
        let mut builder = Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent());
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build()?;

        info!(
            "api client ready: base_url='{}' refresh_path='{}'",
            base_url, refresh_path
        );
        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                refresh_path,
                coordinator: Arc::new(RefreshCoordinator::new()),
                registry: Arc::new(CancellationRegistry::new()),
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn refresh_path(&self) -> &str {
        &self.inner.refresh_path
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        self.inner.coordinator.set_token(token);
    }

    pub fn clear_access_token(&self) {
        self.inner.coordinator.clear_token();
    }

    pub fn token(&self) -> Option<String> {
        self.inner.coordinator.token()
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.coordinator.access_token()
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.inner.coordinator.state()
    }

    /// Re-arms token refresh after a failure, typically right after a successful login.
    pub fn reset_refresh_state(&self) {
        self.inner.coordinator.reset();
    }

    pub fn mark_refresh_failed(&self) {
        self.inner.coordinator.mark_failed();
    }

    /// Registers the hook run when a refresh fails, e.g. to send the user back to a login screen.
    pub fn set_on_persistent_auth_failure<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .coordinator
            .set_on_persistent_failure(Some(Arc::new(callback)));
    }

    pub fn clear_on_persistent_auth_failure(&self) {
        self.inner.coordinator.set_on_persistent_failure(None);
    }

    /// Claims the cancellation slot for `key`, aborting whatever held it before.
    ///
    /// Pass the handle through `RequestOptions::abort_handle` and the slot is
    /// released when the request finishes. A handle that is never sent must be
    /// cancelled or handed to `CancellationRegistry::cleanup` by the caller.
    pub fn create_abort_handle(&self, key: &str) -> CancellationHandle {
        self.inner.registry.register(key)
    }

    /// Aborts the request registered under `key`. Returns false if nothing was registered.
    pub fn abort_request(&self, key: &str) -> bool {
        self.inner.registry.cancel(key)
    }

    pub fn cancellation_registry(&self) -> &CancellationRegistry {
        &self.inner.registry
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, Error> {
        self.send(Method::GET, path, RequestBody::Empty, options)
            .await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, RequestBody::json(body)?, options)
            .await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B, options: RequestOptions) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PUT, path, RequestBody::json(body)?, options)
            .await
    }

    pub async fn patch<T, B>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PATCH, path, RequestBody::json(body)?, options)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, Error> {
        self.send(Method::DELETE, path, RequestBody::Empty, options)
            .await
    }

    /// Sends any body (multipart, raw bytes, empty) and unwraps the JSON envelope.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<T, Error> {
        let bytes = self.dispatch(&method, path, &body, &options).await?;
        envelope::unwrap_body(&bytes)
    }

    /// Fetches a binary payload. The body is returned untouched, never parsed as an envelope.
    pub async fn get_blob(&self, path: &str, options: RequestOptions) -> Result<Bytes, Error> {
        let bytes = self
            .dispatch(&Method::GET, path, &RequestBody::Empty, &options)
            .await?;
        debug!("blob received: path='{}' bytes={}", path, bytes.len());
        Ok(bytes)
    }

    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        body: &RequestBody,
        options: &RequestOptions,
    ) -> Result<Bytes, Error> {
        // Dropping the slot on return frees the key without cancelling anyone.
        let slot = match (&options.abort_handle, options.abort_key.as_deref()) {
            (Some(handle), _) => Some(self.inner.registry.adopt(handle.clone())),
            (None, Some(key)) => Some(self.inner.registry.slot(key)),
            (None, None) => None,
        };
        if slot.is_none() && options.signal.is_none() {
            return self.exchange(method, path, body, options).await;
        }

        let label = slot
            .as_ref()
            .map(|slot| slot.handle().key().to_string())
            .unwrap_or_else(|| format!("{method} {path}"));
        tokio::select! {
            biased;
            _ = cancelled(slot.as_ref(), options.signal.as_ref()) => {
                debug!("request cancelled: {}", label);
                Err(Error::Cancelled(label))
            }
            result = self.exchange(method, path, body, options) => result,
        }
    }

    /// One logical request: send, and on a 401 recover a token and replay exactly once.
    async fn exchange(
        &self,
        method: &Method,
        path: &str,
        body: &RequestBody,
        options: &RequestOptions,
    ) -> Result<Bytes, Error> {
        let sent_with = self.inner.coordinator.token();
        let response = self
            .send_once(method, path, body, options, sent_with.as_deref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED || self.is_refresh_path(path) {
            return read_body(method, path, response).await;
        }

        warn!("{} {} returned 401; recovering access token", method, path);
        let telemetry = RefreshTelemetry::new(format!("{method} {path}"));
        // The refresh owns its own client handle so it outlives this caller.
        let refresher = self.clone();
        let token = self
            .inner
            .coordinator
            .recover(
                sent_with.as_deref(),
                move || {
                    let client = refresher.clone();
                    async move { client.request_refresh().await }
                },
                &telemetry,
            )
            .await?;

        let replayed = self
            .send_once(method, path, body, options, Some(&token))
            .await?;
        read_body(method, path, replayed).await
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: &RequestBody,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<Response, Error> {
        let url = self.url_for(path);
        let mut headers = options.headers.clone();
        if body.wants_json_content_type() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::Auth(format!("access token is not a valid header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut request = self.inner.http.request(method.clone(), &url);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.body(serde_json::to_vec(value)?),
            RequestBody::Bytes {
                bytes,
                content_type,
            } => {
                if !headers.contains_key(CONTENT_TYPE) {
                    let value = HeaderValue::from_str(content_type).map_err(|e| {
                        Error::Config(format!("Invalid content type '{content_type}': {e}"))
                    })?;
                    headers.insert(CONTENT_TYPE, value);
                }
                request.body(bytes.clone())
            }
            RequestBody::Multipart(form) => request.multipart(form.to_form()?),
        };

        debug!(
            "sending request: method={} url='{}' authorized={}",
            method,
            url,
            token.is_some()
        );
        Ok(request.headers(headers).send().await?)
    }

    async fn request_refresh(&self) -> Result<String, Error> {
        let path = self.inner.refresh_path.as_str();
        let current = self.inner.coordinator.token();
        let response = self
            .send_once(
                &Method::POST,
                path,
                &RequestBody::Json(serde_json::json!({})),
                &RequestOptions::default(),
                current.as_deref(),
            )
            .await?;
        let body = read_body(&Method::POST, path, response).await?;
        let refreshed: Option<RefreshResponse> = envelope::unwrap_body(&body)?;
        match refreshed.map(|r| r.access_token) {
            Some(token) if !token.is_empty() => {
                info!("access token refreshed (len={})", token.len());
                Ok(token)
            }
            _ => Err(Error::Auth("refresh response invalid".into())),
        }
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.inner.base_url, path.trim_start_matches('/'))
    }

    fn is_refresh_path(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        path.trim_end_matches('/')
            .ends_with(self.inner.refresh_path.trim_start_matches('/'))
    }
}

async fn read_body(method: &Method, path: &str, response: Response) -> Result<Bytes, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.bytes().await?);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(
        "request failed: method={} path='{}' status={}",
        method, path, status
    );
    Err(Error::Http(status, body))
}

async fn cancelled(slot: Option<&SlotGuard>, signal: Option<&CancellationToken>) {
    match (slot, signal) {
        (Some(slot), Some(signal)) => {
            tokio::select! {
                _ = slot.handle().cancelled() => {}
                _ = signal.cancelled() => {}
            }
        }
        (Some(slot), None) => slot.handle().cancelled().await,
        (None, Some(signal)) => signal.cancelled().await,
        (None, None) => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(Config::from_values(base, None, None, None)).unwrap()
    }

    #[test]
    fn joins_relative_paths_onto_base() {
        let client = client("https://api.example.com/v1/");
        assert_eq!(client.url_for("/students"), "https://api.example.com/v1/students");
        assert_eq!(client.url_for("students"), "https://api.example.com/v1/students");
        assert_eq!(
            client.url_for("https://cdn.example.com/file.pdf"),
            "https://cdn.example.com/file.pdf"
        );
    }

    #[test]
    fn recognizes_refresh_endpoint() {
        let client = client("https://api.example.com");
        assert!(client.is_refresh_path("/auth/refresh"));
        assert!(client.is_refresh_path("auth/refresh/"));
        assert!(client.is_refresh_path("/auth/refresh?source=cookie"));
        assert!(!client.is_refresh_path("/auth/me"));
    }
}
