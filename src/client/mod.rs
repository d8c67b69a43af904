use std::sync::Arc;

use crate::cancel::CancellationRegistry;
use crate::token::RefreshCoordinator;

mod impls;
mod request;

pub use request::{MultipartBody, RequestBody, RequestOptions};

/// Authenticated gateway to the LMS backend.
///
/// Cloning is cheap and every clone shares the same token, refresh state and
/// cancellation slots. Build one per session and pass it to whoever needs it.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    refresh_path: String,
    coordinator: Arc<RefreshCoordinator>,
    registry: Arc<CancellationRegistry>,
}
