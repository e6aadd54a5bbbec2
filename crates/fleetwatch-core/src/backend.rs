use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::{ClientConfig, RetryPolicy};
use crate::model::MoveDirection;
use crate::retry::with_retry;
use crate::session::SessionId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{operation}: backend returned HTTP {status}")]
    Status { operation: &'static str, status: u16 },
    #[error("{operation}: timed out")]
    Timeout { operation: &'static str },
    #[error("{operation}: transport error: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    #[error("{operation}: malformed response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode { .. } | Self::Config(_) => false,
        }
    }

    fn from_reqwest(operation: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { operation }
        } else if err.is_decode() {
            Self::Decode {
                operation,
                message: err.to_string(),
            }
        } else {
            Self::Transport {
                operation,
                message: err.to_string(),
            }
        }
    }
}

/// Raw fleet backend. Payloads are returned untouched; translating them is the
/// adapter's job.
#[async_trait]
pub trait FleetBackend: Send + Sync {
    async fn start_session(&self) -> Result<SessionId, BackendError>;
    async fn fleet_status(&self, session: &SessionId) -> Result<Value, BackendError>;
    async fn rover_status(&self, session: &SessionId, rover_id: &str) -> Result<Value, BackendError>;
    async fn rover_sensor_data(
        &self,
        session: &SessionId,
        rover_id: &str,
    ) -> Result<Value, BackendError>;
    async fn rover_battery(&self, session: &SessionId, rover_id: &str) -> Result<Value, BackendError>;
    async fn rover_coordinates(
        &self,
        session: &SessionId,
        rover_id: &str,
    ) -> Result<Value, BackendError>;
    async fn assign_task(
        &self,
        session: &SessionId,
        rover_id: &str,
        task: &str,
    ) -> Result<Value, BackendError>;
    async fn move_rover(
        &self,
        session: &SessionId,
        rover_id: &str,
        direction: MoveDirection,
    ) -> Result<Value, BackendError>;
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
    #[serde(default)]
    message: String,
}

pub struct HttpBackend {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
    read_retry: RetryPolicy,
    command_retry: RetryPolicy,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|err| BackendError::Config(format!("{}: {err}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Config(format!(
                "{} cannot be used as a base url",
                config.base_url
            )));
        }

        let client = Client::builder()
            .build()
            .map_err(|err| BackendError::Config(err.to_string()))?;

        Ok(Self {
            client,
            base_url,
            request_timeout: config.request_timeout,
            read_retry: config.read_retry,
            command_retry: config.command_retry,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, BackendError> {
        let url = self.endpoint(segments);
        let policy = if method == Method::GET {
            self.read_retry
        } else {
            self.command_retry
        };
        debug!(operation, %method, path = url.path(), "backend request");

        let (client, url, method, body) = (&self.client, &url, &method, &body);
        with_retry(operation, policy, self.request_timeout, move || async move {
            let mut request = client.request(method.clone(), url.clone()).query(query);
            request = match body {
                Some(body) => request.json(body),
                None if *method != Method::GET => request.header(CONTENT_TYPE, "application/json"),
                None => request,
            };

            let response = request
                .send()
                .await
                .map_err(|err| BackendError::from_reqwest(operation, err))?;

            let status = response.status();
            if !status.is_success() {
                return Err(BackendError::Status {
                    operation,
                    status: status.as_u16(),
                });
            }

            response
                .json::<Value>()
                .await
                .map_err(|err| BackendError::Decode {
                    operation,
                    message: err.to_string(),
                })
        })
        .await
    }
}

#[async_trait]
impl FleetBackend for HttpBackend {
    async fn start_session(&self) -> Result<SessionId, BackendError> {
        let raw = self
            .call("start session", Method::POST, &["session", "start"], &[], None)
            .await?;
        let response: SessionResponse =
            serde_json::from_value(raw).map_err(|err| BackendError::Decode {
                operation: "start session",
                message: err.to_string(),
            })?;
        if response.session_id.is_empty() {
            return Err(BackendError::Decode {
                operation: "start session",
                message: "empty session_id".to_string(),
            });
        }
        debug!(message = %response.message, "session started");
        Ok(SessionId::new(response.session_id))
    }

    async fn fleet_status(&self, session: &SessionId) -> Result<Value, BackendError> {
        self.call(
            "fleet status",
            Method::GET,
            &["fleet", "status"],
            &[("session_id", session.as_str())],
            None,
        )
        .await
    }

    async fn rover_status(&self, session: &SessionId, rover_id: &str) -> Result<Value, BackendError> {
        self.call(
            "rover status",
            Method::GET,
            &["rover", rover_id, "status"],
            &[("session_id", session.as_str())],
            None,
        )
        .await
    }

    async fn rover_sensor_data(
        &self,
        session: &SessionId,
        rover_id: &str,
    ) -> Result<Value, BackendError> {
        self.call(
            "rover sensor data",
            Method::GET,
            &["rover", rover_id, "sensor-data"],
            &[("session_id", session.as_str())],
            None,
        )
        .await
    }

    async fn rover_battery(&self, session: &SessionId, rover_id: &str) -> Result<Value, BackendError> {
        self.call(
            "rover battery",
            Method::GET,
            &["rover", rover_id, "battery"],
            &[("session_id", session.as_str())],
            None,
        )
        .await
    }

    async fn rover_coordinates(
        &self,
        session: &SessionId,
        rover_id: &str,
    ) -> Result<Value, BackendError> {
        self.call(
            "rover coordinates",
            Method::GET,
            &["rover", rover_id, "coordinates"],
            &[("session_id", session.as_str())],
            None,
        )
        .await
    }

    async fn assign_task(
        &self,
        session: &SessionId,
        rover_id: &str,
        task: &str,
    ) -> Result<Value, BackendError> {
        self.call(
            "assign task",
            Method::POST,
            &["rover", rover_id, "task"],
            &[("session_id", session.as_str()), ("task", task)],
            Some(json!({ "task": task })),
        )
        .await
    }

    async fn move_rover(
        &self,
        session: &SessionId,
        rover_id: &str,
        direction: MoveDirection,
    ) -> Result<Value, BackendError> {
        self.call(
            "move rover",
            Method::POST,
            &["rover", rover_id, direction.endpoint()],
            &[
                ("session_id", session.as_str()),
                ("direction", direction.as_str()),
            ],
            None,
        )
        .await
    }
}
