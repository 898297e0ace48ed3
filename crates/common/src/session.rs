use async_trait::async_trait;

use crate::Result;

/// Credentials presented on the LOGIN frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("token", &"<redacted>").finish()
    }
}

/// Token lifecycle collaborator. Acquisition and refresh happen behind this
/// trait; the protocol client only consumes `ensure_valid`.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Return credentials that are valid right now, refreshing if needed.
    async fn ensure_valid(&self) -> Result<Credentials>;

    /// Release the session (e.g. revoke the token).
    async fn close(&self) -> Result<()>;
}

/// Session backed by a pre-issued token, e.g. from `KIWOOM_TOKEN`.
pub struct StaticSession {
    credentials: Credentials,
}

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(token),
        }
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn ensure_valid(&self) -> Result<Credentials> {
        if self.credentials.token.is_empty() {
            return Err(crate::Error::Config("session token is empty".into()));
        }
        Ok(self.credentials.clone())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_token() {
        let creds = Credentials::new("secret-token");
        let printed = format!("{creds:?}");
        assert!(!printed.contains("secret-token"));
    }
}
