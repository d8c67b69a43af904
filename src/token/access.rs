use std::fmt;

use jiff::Timestamp;

/// Bearer token held in memory for the lifetime of a session.
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    installed_at: Timestamp,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            installed_at: Timestamp::now(),
        }
    }

    /// Returns the raw token value suitable for Authorization headers.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn installed_at(&self) -> Timestamp {
        self.installed_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("len", &self.value.len())
            .field("installed_at", &self.installed_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_value() {
        let token = AccessToken::new("super-secret");
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("len: 12"));
        assert_eq!(token.value(), "super-secret");
    }
}
