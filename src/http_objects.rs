use axum::{
    extract::{
        multipart::MultipartError,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use data_model::{ImageView, Vote};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use vote_store::VoteStoreError;

#[derive(Debug)]
pub struct ApiError {
    status_code: StatusCode,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl ApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn payload_too_large(message: &str) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!("API Error: {} - {}", self.status_code, self.message);
        } else {
            info!("API Error: {} - {}", self.status_code, self.message);
        }
        let body = ErrorBody {
            success: false,
            error: self.message,
        };
        (self.status_code, Json(body)).into_response()
    }
}

impl From<VoteStoreError> for ApiError {
    fn from(err: VoteStoreError) -> Self {
        let status_code = match &err {
            VoteStoreError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            VoteStoreError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
            VoteStoreError::WriteConflict { .. } => StatusCode::CONFLICT,
            VoteStoreError::BackendUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status_code, &err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(&rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(&rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        // Body limit violations surface here as 413.
        Self::new(err.status(), &err.body_text())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Newest,
    Score,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListImagesParams {
    pub user_id: Option<String>,
    pub sort: Option<SortOrder>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub key: String,
    pub url: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub upvotes: u64,
    pub downvotes: u64,
    pub flagged: bool,
    pub user_vote: Option<Vote>,
}

impl Image {
    fn score(&self) -> i64 {
        self.upvotes as i64 - self.downvotes as i64
    }
}

impl From<ImageView> for Image {
    fn from(view: ImageView) -> Self {
        Self {
            key: view.key,
            url: view.url,
            timestamp: view.timestamp,
            upvotes: view.upvotes,
            downvotes: view.downvotes,
            flagged: view.flagged,
            user_vote: view.user_vote,
        }
    }
}

/// Order `images` in place; ties keep the newer image first.
pub fn sort_images(images: &mut [Image], order: SortOrder) {
    match order {
        SortOrder::Newest => images.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        SortOrder::Score => images.sort_by(|a, b| {
            b.score()
                .cmp(&a.score())
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        }),
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub key: String,
    pub image_url: String,
    pub upvotes: u64,
    pub downvotes: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub vote_type: String,
    /// The vote the client believes it has cast. Only compared and logged.
    #[serde(default)]
    pub current_vote: Option<String>,
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub success: bool,
    pub upvotes: u64,
    pub downvotes: u64,
    pub user_vote: Vote,
}

#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FlagResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
