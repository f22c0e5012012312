//! Face-recognition backend capability.
//!
//! The backend itself is an external service; the daemon only depends on the
//! [`FaceApi`] trait so the pipeline can be exercised against stubs. The
//! production [`Client`] speaks the backend's HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum FaceError {
    /// No face is visible in the submitted frame. Benign, distinct from failure.
    #[error("face not found")]
    NotPresent,
    #[error("face api returned status code {0}")]
    UnexpectedStatus(u16),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Capability offered by the face-recognition backend.
#[async_trait]
pub trait FaceApi: Send + Sync {
    /// Register a new user from a photo; returns the backend's user id.
    async fn add_user(&self, photo: Bytes) -> Result<String, FaceError>;

    /// Attach an additional photo to an existing user.
    async fn add_user_photo(&self, user_id: &str, photo: Bytes) -> Result<(), FaceError>;

    /// Recognize the user in `frame`. [`FaceError::NotPresent`] signals that no
    /// face is in the frame.
    async fn recognize_user(&self, frame: Bytes) -> Result<String, FaceError>;

    /// Remove a user from the backend.
    async fn remove_user(&self, user_id: &str) -> Result<(), FaceError>;
}

/// Face-api connection settings (`face_api` section of the overseer config).
#[derive(Debug, Clone, Deserialize)]
pub struct FaceApiConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Deserialize)]
struct UserIdResponse {
    user_id: String,
}

/// HTTP client for the face-recognition backend.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// # Errors
    ///
    /// Returns the underlying error if the HTTP client cannot be constructed.
    pub fn new(config: &FaceApiConfig) -> Result<Self, FaceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn expect_ok(code: StatusCode) -> Result<(), FaceError> {
        if code != StatusCode::OK {
            return Err(FaceError::UnexpectedStatus(code.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl FaceApi for Client {
    async fn add_user(&self, photo: Bytes) -> Result<String, FaceError> {
        let response = self
            .http
            .post(format!("{}/users", self.base_url))
            .body(photo)
            .send()
            .await?;
        Self::expect_ok(response.status())?;
        let body: UserIdResponse = response.json().await?;
        Ok(body.user_id)
    }

    async fn add_user_photo(&self, user_id: &str, photo: Bytes) -> Result<(), FaceError> {
        let response = self
            .http
            .post(format!("{}/users/{user_id}/photos", self.base_url))
            .body(photo)
            .send()
            .await?;
        Self::expect_ok(response.status())
    }

    async fn recognize_user(&self, frame: Bytes) -> Result<String, FaceError> {
        let response = self
            .http
            .post(format!("{}/recognize", self.base_url))
            .body(frame)
            .send()
            .await?;
        // The backend answers 404 when the frame contains no face.
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FaceError::NotPresent);
        }
        Self::expect_ok(response.status())?;
        let body: UserIdResponse = response.json().await?;
        Ok(body.user_id)
    }

    async fn remove_user(&self, user_id: &str) -> Result<(), FaceError> {
        let response = self
            .http
            .delete(format!("{}/users/{user_id}", self.base_url))
            .send()
            .await?;
        Self::expect_ok(response.status())
    }
}
