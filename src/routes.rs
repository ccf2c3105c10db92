use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit,
        Multipart,
        Path,
        Query,
        State,
    },
    http::Method,
    routing::{get, post},
    Json,
    Router,
};
use bytes::Bytes;
use data_model::{extension_for, Vote};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};
use vote_store::VoteStore;

use crate::http_objects::{
    sort_images,
    ApiError,
    FlagRequest,
    FlagResponse,
    HealthResponse,
    Image,
    ListImagesParams,
    UploadResponse,
    VoteRequest,
    VoteResponse,
};

/// Slack on top of the image ceiling for multipart framing and the other
/// form fields.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct RouteState {
    pub vote_store: Arc<VoteStore>,
    pub max_upload_bytes: usize,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);
    let body_limit = route_state.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/images/{region}", get(list_images))
        .route(
            "/api/upload",
            post(upload_image).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/vote", post(vote))
        .route("/api/flag", post(flag))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(route_state)
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn not_found() -> ApiError {
    ApiError::not_found("no such route")
}

#[tracing::instrument(skip(state, params))]
async fn list_images(
    State(state): State<RouteState>,
    Path(region): Path<String>,
    params: Result<Query<ListImagesParams>, QueryRejection>,
) -> Result<Json<Vec<Image>>, ApiError> {
    let Query(params) = params?;
    let views = state
        .vote_store
        .list_records(&region, params.user_id.as_deref())
        .await?;

    let mut images: Vec<Image> = views.into_iter().map(Image::from).collect();
    if let Some(order) = params.sort {
        sort_images(&mut images, order);
    }
    Ok(Json(images))
}

struct UploadedFile {
    file_name: Option<String>,
    content_type: String,
    data: Bytes,
}

#[tracing::instrument(skip_all)]
async fn upload_image(
    State(state): State<RouteState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut region: Option<String> = None;
    let mut file: Option<UploadedFile> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("state") => region = Some(field.text().await?),
            Some("image") => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                if !content_type.starts_with("image/") {
                    return Err(ApiError::bad_request("only image uploads are allowed"));
                }
                let file_name = field.file_name().map(str::to_string);
                let data = field.bytes().await?;
                if data.len() > state.max_upload_bytes {
                    return Err(ApiError::payload_too_large(&format!(
                        "image exceeds the {} byte limit",
                        state.max_upload_bytes
                    )));
                }
                file = Some(UploadedFile {
                    file_name,
                    content_type,
                    data,
                });
            }
            other => debug!(field = ?other, "ignoring multipart field"),
        }
    }

    let file = file.ok_or_else(|| ApiError::bad_request("No file uploaded."))?;
    let region = region.ok_or_else(|| ApiError::bad_request("state is required"))?;
    let extension = extension_for(file.file_name.as_deref(), &file.content_type);

    let key = state
        .vote_store
        .create_record(&region, file.data, &file.content_type, &extension)
        .await?;
    let view = state.vote_store.get_record(&key, None).await?;

    Ok(Json(UploadResponse {
        success: true,
        key,
        image_url: view.url,
        upvotes: view.upvotes,
        downvotes: view.downvotes,
    }))
}

#[tracing::instrument(skip_all)]
async fn vote(
    State(state): State<RouteState>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<VoteResponse>, ApiError> {
    let Json(request) = payload?;
    let vote = Vote::from_str(&request.vote_type).map_err(|_| {
        ApiError::bad_request(&format!("unknown voteType {:?}", request.vote_type))
    })?;

    let outcome = state
        .vote_store
        .apply_vote(&request.key, vote, &request.user_id)
        .await?;

    if let Some(current_vote) = request.current_vote.as_deref() {
        let claimed = Vote::from_str(current_vote).ok();
        if claimed != outcome.previous_vote {
            info!(
                key = %request.key,
                claimed = current_vote,
                stored = ?outcome.previous_vote,
                "client vote state disagrees with the stored vote"
            );
        }
    }

    Ok(Json(VoteResponse {
        success: true,
        upvotes: outcome.upvotes,
        downvotes: outcome.downvotes,
        user_vote: outcome.user_vote,
    }))
}

#[tracing::instrument(skip_all)]
async fn flag(
    State(state): State<RouteState>,
    payload: Result<Json<FlagRequest>, JsonRejection>,
) -> Result<Json<FlagResponse>, ApiError> {
    let Json(request) = payload?;
    state.vote_store.apply_flag(&request.key).await?;
    Ok(Json(FlagResponse { success: true }))
}
