//! Comic CRUD handlers: create, list, search, get, update, delete.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{
    ComicDto, ComicListResponse, ComicRequest, CreateComicResponse, ListComicsParams,
    SearchParams,
};
use crate::app_state::AppState;
use crate::domain::ComicId;
use crate::error::ApiError;

/// Ids are assigned from 1; reject 0 before it reaches the store.
fn comic_id(raw: u32) -> Result<ComicId, ApiError> {
    if raw == 0 {
        return Err(ApiError::InvalidRequest("comic id must be positive".to_string()));
    }
    Ok(ComicId::new(raw))
}

/// `POST /comics`: Create a comic.
///
/// # Errors
///
/// Returns [`ApiError`] on invalid input or store failure.
pub async fn create_comic(
    State(state): State<AppState>,
    Json(req): Json<ComicRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.request_context();
    let comic = req.into_comic(ComicId::default());
    let id = state.store.create(&ctx, &comic).await?;
    tracing::info!(comic_id = %id, "comic created");
    Ok((StatusCode::CREATED, Json(CreateComicResponse { id })))
}

/// `GET /comics`: List comics, newest first.
///
/// # Errors
///
/// Returns [`ApiError`] on store failure.
pub async fn list_comics(
    State(state): State<AppState>,
    Query(params): Query<ListComicsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, filter) = params.split();
    let ctx = state.request_context();
    let result = state.store.list(&ctx, page, filter).await?;
    Ok(Json(ComicListResponse::from(result)))
}

/// `GET /comics/search?q=`: Search titles, author and description.
///
/// # Errors
///
/// Returns [`ApiError`] for a blank term or on store failure.
pub async fn search_comics(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.request_context();
    let result = state
        .store
        .search(&ctx, &params.q, params.page_request())
        .await?;
    Ok(Json(ComicListResponse::from(result)))
}

/// `GET /comics/by-title/{title}`: First comic whose title contains the
/// given text.
///
/// # Errors
///
/// Returns [`ApiError`] if nothing matches.
pub async fn get_comic_by_title(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.request_context();
    let comic = state.store.get_by_title(&ctx, &title).await?;
    Ok(Json(ComicDto::from(comic)))
}

/// `GET /comics/{id}`: Get one comic.
///
/// # Errors
///
/// Returns [`ApiError`] if the comic does not exist.
pub async fn get_comic(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.request_context();
    let comic = state.store.get_by_id(&ctx, comic_id(id)?).await?;
    Ok(Json(ComicDto::from(comic)))
}

/// `PUT /comics/{id}`: Replace every field of a comic.
///
/// # Errors
///
/// Returns [`ApiError`] if the comic does not exist or the body is invalid.
pub async fn update_comic(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(req): Json<ComicRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.request_context();
    let comic = req.into_comic(comic_id(id)?);
    state.store.update(&ctx, &comic).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /comics/{id}`: Soft-delete a comic.
///
/// # Errors
///
/// Returns [`ApiError`] if the comic does not exist.
pub async fn delete_comic(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.request_context();
    state.store.delete(&ctx, comic_id(id)?).await?;
    tracing::info!(comic_id = id, "comic deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Comic resource routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/comics", get(list_comics).post(create_comic))
        .route("/comics/search", get(search_comics))
        .route("/comics/by-title/{title}", get(get_comic_by_title))
        .route(
            "/comics/{id}",
            get(get_comic).put(update_comic).delete(delete_comic),
        )
}
