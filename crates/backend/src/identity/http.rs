//! HTTP client for the Horizon local-account API

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use horizon_core::SecretString;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::{Account, IdentityClient, IdentityConnector, IdentityResult};
use crate::error::IdentityError;

const LOCAL_ACCOUNTS: [&str; 5] = ["api", "v1", "security", "principals", "local"];

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connector producing [`HttpIdentityClient`]s that share one connection pool
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: Client,
}

impl HttpConnector {
    /// Connector with [`DEFAULT_REQUEST_TIMEOUT`]
    pub fn new() -> IdentityResult<Self> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Connector whose clients give up on a request after `timeout`
    pub fn with_timeout(timeout: Duration) -> IdentityResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("horizond/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl IdentityConnector for HttpConnector {
    async fn connect(
        &self,
        endpoint: &Url,
        username: &str,
        password: &SecretString,
    ) -> IdentityResult<Arc<dyn IdentityClient>> {
        let client = HttpIdentityClient::new(self.http.clone(), endpoint.clone(), username, password)?;
        Ok(Arc::new(client))
    }
}

/// Local-account client authenticating every request with basic auth
pub struct HttpIdentityClient {
    http: Client,
    base: Url,
    username: String,
    password: SecretString,
}

impl HttpIdentityClient {
    /// Client for the instance at `base`
    pub fn new(
        http: Client,
        base: Url,
        username: &str,
        password: &SecretString,
    ) -> IdentityResult<Self> {
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(IdentityError::Transport(format!(
                "'{base}' is not an http(s) endpoint"
            )));
        }
        Ok(Self {
            http,
            base,
            username: username.to_string(),
            password: password.clone(),
        })
    }

    fn url(&self, tail: &[&str]) -> IdentityResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| IdentityError::Transport(format!("'{}' cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(LOCAL_ACCOUNTS)
            .extend(tail);
        Ok(url)
    }

    fn request(&self, method: Method, tail: &[&str]) -> IdentityResult<RequestBuilder> {
        let builder = self
            .http
            .request(method, self.url(tail)?)
            .header(reqwest::header::ACCEPT, "application/json");
        Ok(self
            .password
            .expose_secret(|password| builder.basic_auth(&self.username, Some(password))))
    }

    async fn send(&self, builder: RequestBuilder, subject: &str) -> IdentityResult<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(IdentityError::Unauthorized(self.username.clone()))
            }
            StatusCode::NOT_FOUND => Err(IdentityError::NotFound(subject.to_string())),
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(IdentityError::Remote {
                    status: status.as_u16(),
                    message: message.trim().to_string(),
                })
            }
        }
    }

    async fn send_json<B, T>(
        &self,
        method: Method,
        tail: &[&str],
        body: Option<&B>,
        subject: &str,
    ) -> IdentityResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let mut builder = self.request(method, tail)?;
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.send(builder, subject)
            .await?
            .json()
            .await
            .map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> IdentityError {
    if err.is_timeout() {
        IdentityError::Timeout
    } else {
        IdentityError::Transport(err.to_string())
    }
}

#[derive(Serialize)]
struct CreateAccount<'a> {
    identifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact: Option<&'a str>,
}

#[derive(Serialize)]
struct AssignRoles<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    contact: Option<&'a str>,
    roles: &'a [String],
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn create_account(
        &self,
        username: &str,
        contact: Option<&str>,
    ) -> IdentityResult<Account> {
        let body = CreateAccount {
            identifier: username,
            contact,
        };
        self.send_json(Method::POST, &[], Some(&body), username).await
    }

    async fn set_password(&self, account: &Account, value: &SecretString) -> IdentityResult<()> {
        let body = value.expose_secret(|password| serde_json::json!({ "password": password }));
        let builder = self
            .request(Method::PUT, &[account.identifier.as_str(), "password"])?
            .json(&body);
        self.send(builder, &account.identifier).await?;
        Ok(())
    }

    async fn assign_roles(
        &self,
        account: &Account,
        contact: Option<&str>,
        roles: &[String],
    ) -> IdentityResult<()> {
        let builder = self
            .request(Method::PUT, &[account.identifier.as_str(), "roles"])?
            .json(&AssignRoles { contact, roles });
        self.send(builder, &account.identifier).await?;
        Ok(())
    }

    async fn get_account(&self, username: &str) -> IdentityResult<Account> {
        self.send_json::<(), _>(Method::GET, &[username], None, username)
            .await
    }

    async fn delete_account(&self, account: &Account) -> IdentityResult<()> {
        let builder = self.request(Method::DELETE, &[account.identifier.as_str()])?;
        self.send(builder, &account.identifier).await?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpIdentityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityClient")
            .field("base", &self.base.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
