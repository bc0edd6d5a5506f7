use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use google_drive3::hyper::client::HttpConnector;
use google_drive3::hyper_rustls::HttpsConnector;
use google_drive3::oauth2;
use google_drive3::oauth2::authenticator::Authenticator;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::config::AccessMode;
use crate::google_drive::executor::TransferExecutor;
use crate::google_drive::transfer::{HttpTransport, Method, TransferRequest};
use crate::prelude::*;

const URL_AUTH_TOKEN: &str = "https://www.googleapis.com/oauth2/v3/token";

/// Source of the bearer token attached to every remote request.
#[async_trait]
pub trait CredentialProvider: Send + Sync + Debug {
    async fn current_access_token(&self) -> Option<String>;
    /// Obtain a fresh access token, called after the remote answered 401.
    async fn refresh(&self) -> Result<()>;
}

//region refresh token
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Exchanges a stored refresh token for access tokens at the OAuth token endpoint.
pub struct RefreshTokenCredentials {
    client_id: String,
    client_secret: String,
    refresh_token: RwLock<String>,
    access_token: RwLock<Option<String>>,
    /// no credentials attached, so a 401 from the token endpoint is final
    executor: TransferExecutor,
}

impl RefreshTokenCredentials {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: RwLock::new(refresh_token.into()),
            access_token: RwLock::new(None),
            executor: TransferExecutor::unauthenticated(transport),
        }
    }
}

#[async_trait]
impl CredentialProvider for RefreshTokenCredentials {
    async fn current_access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    #[instrument(skip(self))]
    async fn refresh(&self) -> Result<()> {
        let refresh_token = self.refresh_token.read().await.clone();
        let mut request = TransferRequest::new(Method::Post, URL_AUTH_TOKEN)
            .form(vec![
                ("client_id".to_string(), self.client_id.clone()),
                ("client_secret".to_string(), self.client_secret.clone()),
                ("refresh_token".to_string(), refresh_token),
                ("grant_type".to_string(), "refresh_token".to_string()),
            ])
            .without_auth_retry();
        let response = self
            .executor
            .execute(&mut request)
            .await
            .context("token refresh failed")?;
        let token: TokenResponse = response
            .json()
            .context("token endpoint returned an unreadable response")?;
        debug!("received new access token");
        *self.access_token.write().await = Some(token.access_token);
        if let Some(refresh_token) = token.refresh_token {
            *self.refresh_token.write().await = refresh_token;
        }
        Ok(())
    }
}

impl Debug for RefreshTokenCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RefreshTokenCredentials {{ client_id: {} }}", self.client_id)
    }
}
//endregion

//region installed flow
/// Interactive OAuth installed-application flow, tokens persisted to disk.
pub struct InstalledFlowCredentials {
    authenticator: Authenticator<HttpsConnector<HttpConnector>>,
    scope: String,
}

impl InstalledFlowCredentials {
    #[instrument]
    pub async fn new(secret_path: &Path, token_store: &Path, mode: AccessMode) -> Result<Self> {
        let secret = oauth2::read_application_secret(secret_path)
            .await
            .context("failed to read client secret file")?;
        let authenticator = oauth2::InstalledFlowAuthenticator::builder(
            secret,
            oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(token_store)
        .build()
        .await?;
        let scope = mode.scope();
        let scope: &str = scope.as_ref();
        Ok(Self {
            authenticator,
            scope: scope.to_string(),
        })
    }
}

#[async_trait]
impl CredentialProvider for InstalledFlowCredentials {
    async fn current_access_token(&self) -> Option<String> {
        match self.authenticator.token(&[self.scope.as_str()]).await {
            Ok(token) => token.token().map(String::from),
            Err(e) => {
                warn!("could not get access token: {}", e);
                None
            }
        }
    }

    #[instrument(skip(self))]
    async fn refresh(&self) -> Result<()> {
        let token = self
            .authenticator
            .force_refreshed_token(&[self.scope.as_str()])
            .await?;
        token
            .token()
            .map(|_| ())
            .ok_or(anyhow!("refreshed token carries no access token"))
    }
}

impl Debug for InstalledFlowCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "InstalledFlowCredentials {{ scope: {} }}", self.scope)
    }
}
//endregion

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDrive;

    #[tokio::test]
    async fn refresh_stores_new_access_token() {
        crate::tests::init_logs();
        let drive = Arc::new(FakeDrive::new());
        let credentials =
            RefreshTokenCredentials::new(drive.clone(), "client", "secret", "refresh-me");
        assert_eq!(None, credentials.current_access_token().await);

        credentials.refresh().await.unwrap();

        assert_eq!(
            Some(drive.valid_token()),
            credentials.current_access_token().await
        );
        let request = drive.last_request_to("oauth2/v3/token").unwrap();
        assert_eq!(Method::Post, request.method);
        assert!(request.form.contains(&("refresh_token".into(), "refresh-me".into())));
    }

    #[tokio::test]
    async fn rejected_refresh_is_not_retried() {
        crate::tests::init_logs();
        let drive = Arc::new(FakeDrive::new());
        drive.reject_refresh_tokens();
        let credentials = RefreshTokenCredentials::new(drive.clone(), "client", "secret", "bad");

        assert!(credentials.refresh().await.is_err());
        assert_eq!(1, drive.count_requests_to("oauth2/v3/token"));
        assert_eq!(None, credentials.current_access_token().await);
    }
}
