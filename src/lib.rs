pub mod auth;
pub mod cancel;
mod client;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod telemetry;
pub mod token;
pub mod types;

pub use auth::AuthSession;
pub use cancel::{CancellationHandle, CancellationRegistry};
pub use client::{ApiClient, MultipartBody, RequestBody, RequestOptions};
pub use config::{Config, ConfigLocation};
pub use envelope::ApiEnvelope;
pub use errors::Error;
pub use reqwest::Method;
pub use token::{AccessToken, RefreshState};
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests;
