use crate::error::{DirectoryError, DirectoryResult};
use crate::types::{GroupMember, GroupOrg, OrgsResponse, PendingOrgInvite, RoleDescriptor};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Remote directory operations consumed by the sync engine.
///
/// Every call may fail with [`DirectoryError::Authentication`] (the whole
/// group gets marked disabled by the caller) or a transient error that the
/// implementation retries internally before surfacing.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn get_members(&self, group_id: &str) -> DirectoryResult<Vec<GroupMember>>;
    async fn get_orgs(&self) -> DirectoryResult<Vec<GroupOrg>>;
    async fn get_roles(&self, group_id: &str) -> DirectoryResult<Vec<RoleDescriptor>>;
    async fn invite(&self, org_id: &str, email: &str, is_admin: bool) -> DirectoryResult<()>;
    async fn provision(
        &self,
        org_id: &str,
        email: &str,
        role_public_id: &str
    ) -> DirectoryResult<()>;
    async fn add_member(
        &self,
        group_id: &str,
        org_id: &str,
        user_id: &str,
        role: &str
    ) -> DirectoryResult<()>;
    async fn update_role(
        &self,
        org_id: &str,
        user_id: &str,
        role_public_id: &str
    ) -> DirectoryResult<()>;
    async fn remove_member(&self, org_id: &str, user_id: &str) -> DirectoryResult<()>;
    async fn get_pending_invites(&self, org_id: &str) -> DirectoryResult<Vec<PendingOrgInvite>>;
}

/// Bounded retry with exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30000
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Production [`DirectoryClient`] over the directory REST API.
///
/// One client is built per group credential; the token never changes for the
/// lifetime of the client.
pub struct RestDirectoryClient {
    client: Client,
    base_url: String,
    token: String,
    retry: RetryPolicy
}

impl RestDirectoryClient {
    pub fn new(base_url: &str, token: &str) -> DirectoryResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(DirectoryError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            retry: RetryPolicy::default()
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        body: Option<&serde_json::Value>
    ) -> DirectoryResult<reqwest::Response> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);
                Err(DirectoryError::RateLimited {
                    retry_after_seconds: retry_after
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                DirectoryError::Authentication(format!("API token rejected ({status})"))
            ),
            StatusCode::NOT_FOUND => Err(DirectoryError::NotFound(url.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DirectoryError::Api {
                    status: status.as_u16(),
                    message: body
                })
            }
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>
    ) -> DirectoryResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "directory API request");

        let mut attempt: u32 = 0;
        loop {
            match self.send_once(&method, &url, body.as_ref()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = err
                        .retry_after()
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.retry.backoff(attempt));
                    warn!(
                        url = %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient directory error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err)
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> DirectoryResult<T> {
        let response = self.request(Method::GET, path, None).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl DirectoryClient for RestDirectoryClient {
    async fn get_members(&self, group_id: &str) -> DirectoryResult<Vec<GroupMember>> {
        self.get(&format!("/group/{group_id}/members")).await
    }

    async fn get_orgs(&self) -> DirectoryResult<Vec<GroupOrg>> {
        let response: OrgsResponse = self.get("/orgs").await?;
        Ok(response.orgs)
    }

    async fn get_roles(&self, group_id: &str) -> DirectoryResult<Vec<RoleDescriptor>> {
        self.get(&format!("/group/{group_id}/roles")).await
    }

    async fn invite(&self, org_id: &str, email: &str, is_admin: bool) -> DirectoryResult<()> {
        let body = if is_admin {
            json!({ "email": email, "isAdmin": true })
        } else {
            json!({ "email": email })
        };
        self.request(Method::POST, &format!("/org/{org_id}/invite"), Some(body))
            .await?;
        Ok(())
    }

    async fn provision(
        &self,
        org_id: &str,
        email: &str,
        role_public_id: &str
    ) -> DirectoryResult<()> {
        let body = json!({ "email": email, "rolePublicId": role_public_id });
        self.request(
            Method::POST,
            &format!("/org/{org_id}/provision"),
            Some(body)
        )
        .await?;
        Ok(())
    }

    async fn add_member(
        &self,
        group_id: &str,
        org_id: &str,
        user_id: &str,
        role: &str
    ) -> DirectoryResult<()> {
        let body = json!({ "userId": user_id, "role": role });
        self.request(
            Method::POST,
            &format!("/group/{group_id}/org/{org_id}/members"),
            Some(body)
        )
        .await?;
        Ok(())
    }

    async fn update_role(
        &self,
        org_id: &str,
        user_id: &str,
        role_public_id: &str
    ) -> DirectoryResult<()> {
        let body = json!({ "rolePublicId": role_public_id });
        self.request(
            Method::PUT,
            &format!("/org/{org_id}/members/{user_id}"),
            Some(body)
        )
        .await?;
        Ok(())
    }

    async fn remove_member(&self, org_id: &str, user_id: &str) -> DirectoryResult<()> {
        self.request(
            Method::DELETE,
            &format!("/org/{org_id}/members/{user_id}"),
            None
        )
        .await?;
        Ok(())
    }

    async fn get_pending_invites(&self, org_id: &str) -> DirectoryResult<Vec<PendingOrgInvite>> {
        self.get(&format!("/org/{org_id}/invites")).await
    }
}
