use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::errors::Error;

const FALLBACK_MESSAGE: &str = "API request failed";

/// Uniform wrapper the backend puts around every non-binary response.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: DeserializeOwned> ApiEnvelope<T> {
    /// Converts the envelope into its payload, or an [`Error::Envelope`] when
    /// `success` is false.
    ///
    /// A successful envelope without `data` yields `T` deserialized from `null`,
    /// which covers `()`, `Option<_>` and `serde_json::Value`.
    pub fn into_result(self) -> Result<T, Error> {
        if !self.success {
            let message = if self.message.trim().is_empty() {
                FALLBACK_MESSAGE.to_string()
            } else {
                self.message
            };
            return Err(Error::Envelope {
                message,
                detail: self.error,
            });
        }
        match self.data {
            Some(data) => Ok(data),
            None => Ok(serde_json::from_value(serde_json::Value::Null)?),
        }
    }
}

/// Parses a response body as an envelope and returns its payload.
pub fn unwrap_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    let envelope: ApiEnvelope<T> = serde_json::from_slice(body)?;
    envelope.into_result()
}
