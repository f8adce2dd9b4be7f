use crate::domain::models::{Credentials, RemoteActivity, RemoteTask, Session};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_status::RemoteStatus;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://boostdesign.scoro.com/api/v2/";
const AUTH_ENDPOINT: &str = "userAuth/modify";
const TASKS_ENDPOINT: &str = "tasks/list";
const ACTIVITIES_ENDPOINT: &str = "activities/list";
const TIME_ENTRY_ENDPOINT: &str = "timeEntries/modify";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub company_account_id: String,
    pub lang: String,
    pub device_name: String,
    pub device_id: String,
}

impl RemoteConfig {
    /// Normalizes the base URL so relative endpoints join under its last path segment.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, InfraError> {
        let trimmed = base_url.trim();
        let normalized = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };
        Url::parse(&normalized).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid remote base url '{trimmed}': {error}"))
        })?;
        self.base_url = normalized;
        Ok(self)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            company_account_id: "boostdesign".to_string(),
            lang: "eng".to_string(),
            device_name: "pc".to_string(),
            device_id: "123456789987654321".to_string(),
        }
    }
}

/// Body of a create or update call on the time-entry endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeEntryRequest {
    pub event_id: i64,
    pub activity_id: i64,
    pub description: String,
    pub time_entry_date: String,
    pub completed_datetime: String,
    pub submitted_date: String,
    pub start_datetime: String,
    pub duration: String,
    pub is_completed: bool,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeEntryReceipt {
    pub time_entry_id: Option<i64>,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, InfraError>;

    async fn list_tasks(&self, session: &Session) -> Result<Vec<RemoteTask>, InfraError>;

    async fn list_activities(&self, session: &Session) -> Result<Vec<RemoteActivity>, InfraError>;

    async fn create_time_entry(
        &self,
        session: &Session,
        request: &TimeEntryRequest,
    ) -> Result<TimeEntryReceipt, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestRemoteClient {
    client: Client,
    config: RemoteConfig,
}

impl ReqwestRemoteClient {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self, relative: &str) -> Result<Url, InfraError> {
        let base = Url::parse(&self.config.base_url).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid remote base url: {error}"))
        })?;
        base.join(relative).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid remote endpoint '{relative}': {error}"))
        })
    }

    fn envelope<'a>(
        &'a self,
        session: &'a Session,
        request: Option<&'a TimeEntryRequest>,
    ) -> SessionEnvelope<'a> {
        SessionEnvelope {
            lang: &self.config.lang,
            company_account_id: &session.master_account_id,
            user_token: &session.token,
            user_id: session.user_id,
            return_data: request.map(|_| true),
            request,
        }
    }

    /// Posts `body` and classifies the reply. The body's `statusCode` wins; the HTTP
    /// status is only consulted when the body carries none.
    async fn post<B>(&self, relative: &str, body: &B) -> Result<Value, InfraError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = self.endpoint(relative)?;
        debug!(endpoint = relative, "posting remote request");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|error| {
                InfraError::Network(format!("request to {relative} failed: {error}"))
            })?;

        let http_status = response.status();
        let text = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading {relative} response: {error}"))
        })?;

        let parsed = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str::<ApiResponse>(&text).ok()
        };
        let code = parsed
            .as_ref()
            .and_then(|reply| reply.status_code)
            .unwrap_or_else(|| i64::from(http_status.as_u16()));

        let status = RemoteStatus::from_code(code);
        if let Err(error) = status.into_result() {
            warn!(endpoint = relative, status = %status, "remote call rejected");
            return Err(error);
        }

        parsed
            .map(|reply| reply.data)
            .ok_or_else(|| InfraError::Protocol(format!("{relative} returned an unreadable body")))
    }

    fn decode<T: DeserializeOwned>(relative: &str, data: Value) -> Result<T, InfraError> {
        serde_json::from_value(data).map_err(|error| {
            InfraError::Protocol(format!("invalid {relative} payload: {error}"))
        })
    }
}

impl Default for ReqwestRemoteClient {
    fn default() -> Self {
        Self::new(RemoteConfig::default())
    }
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
    device_name: &'a str,
    device_type: &'a str,
    device_id: &'a str,
    request: EmptyObject,
    company_account_id: &'a str,
    lang: &'a str,
}

#[derive(Debug, Serialize)]
struct EmptyObject {}

#[derive(Debug, Serialize)]
struct SessionEnvelope<'a> {
    lang: &'a str,
    company_account_id: &'a str,
    user_token: &'a str,
    user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_data: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request: Option<&'a TimeEntryRequest>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(rename = "statusCode")]
    status_code: Option<i64>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct AuthData {
    token: Option<String>,
    settings: Option<AuthSettings>,
}

#[derive(Debug, Deserialize)]
struct AuthSettings {
    user_id: Option<i64>,
    master_company_account: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskItem {
    event_id: i64,
    event_name: Option<String>,
    project_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActivityItem {
    activity_id: i64,
    name: Option<String>,
    parent_name: Option<String>,
    #[serde(default)]
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct TimeEntryData {
    time_entry_id: Option<i64>,
}

#[async_trait]
impl RemoteClient for ReqwestRemoteClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, InfraError> {
        credentials.validate().map_err(InfraError::Validation)?;

        let request = AuthRequest {
            username: credentials.username.trim(),
            password: &credentials.password,
            device_name: &self.config.device_name,
            device_type: std::env::consts::OS,
            device_id: &self.config.device_id,
            request: EmptyObject {},
            company_account_id: &self.config.company_account_id,
            lang: &self.config.lang,
        };
        let data = self.post(AUTH_ENDPOINT, &request).await?;
        let auth: AuthData = Self::decode(AUTH_ENDPOINT, data)?;

        let token = auth
            .token
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| missing_auth_field("a token"))?;
        let settings = auth.settings.ok_or_else(|| missing_auth_field("settings"))?;
        let user_id = settings
            .user_id
            .ok_or_else(|| missing_auth_field("user_id"))?;
        let master_account_id = settings
            .master_company_account
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.config.company_account_id.clone());

        Ok(Session {
            token,
            user_id,
            master_account_id,
        })
    }

    async fn list_tasks(&self, session: &Session) -> Result<Vec<RemoteTask>, InfraError> {
        let data = self
            .post(TASKS_ENDPOINT, &self.envelope(session, None))
            .await?;
        let items: Option<Vec<TaskItem>> = Self::decode(TASKS_ENDPOINT, data)?;
        Ok(items
            .unwrap_or_default()
            .into_iter()
            .map(|item| RemoteTask {
                id: item.event_id,
                name: item.event_name.unwrap_or_default().trim().to_string(),
                project: item.project_name.unwrap_or_default().trim().to_string(),
            })
            .collect())
    }

    async fn list_activities(&self, session: &Session) -> Result<Vec<RemoteActivity>, InfraError> {
        let data = self
            .post(ACTIVITIES_ENDPOINT, &self.envelope(session, None))
            .await?;
        let items: Option<Vec<ActivityItem>> = Self::decode(ACTIVITIES_ENDPOINT, data)?;
        Ok(items
            .unwrap_or_default()
            .into_iter()
            .map(|item| RemoteActivity {
                id: item.activity_id,
                name: item.name.unwrap_or_default().trim().to_string(),
                parent: item.parent_name.unwrap_or_default().trim().to_string(),
                active: item.is_active,
            })
            .collect())
    }

    async fn create_time_entry(
        &self,
        session: &Session,
        request: &TimeEntryRequest,
    ) -> Result<TimeEntryReceipt, InfraError> {
        let data = self
            .post(TIME_ENTRY_ENDPOINT, &self.envelope(session, Some(request)))
            .await?;
        let entry: Option<TimeEntryData> = Self::decode(TIME_ENTRY_ENDPOINT, data)?;
        Ok(TimeEntryReceipt {
            time_entry_id: entry.and_then(|entry| entry.time_entry_id),
        })
    }
}

fn missing_auth_field(field: &str) -> InfraError {
    InfraError::Protocol(format!("auth response did not include {field}"))
}
