use crate::error::{AppError, Result};
use crate::model::{ChangeStatusRequest, DeleteLinkQuery, LinkResponse, RebuildResponse};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use stargate_core::{FullShortUrl, ShortCode};
use stargate_shortener::{CreateLinkRequest, ShortenerError};

fn parse_code(code: &str) -> Result<ShortCode> {
    ShortCode::new(code).map_err(|e| AppError::Shortener(ShortenerError::from(e)))
}

pub async fn create_link_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<LinkResponse>)> {
    let link = state.links().create_link(request).await?;
    Ok((StatusCode::CREATED, Json(link.into())))
}

pub async fn get_link_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<LinkResponse>> {
    let short_code = parse_code(&code)?;
    match state.links().lookup(&short_code).await? {
        Some(link) if !link.deleted => Ok(Json(link.into())),
        _ => Err(AppError::LinkNotFound(code)),
    }
}

pub async fn disable_link_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ChangeStatusRequest>,
) -> Result<StatusCode> {
    change_status(&state, &code, &request.gid, true).await
}

pub async fn enable_link_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ChangeStatusRequest>,
) -> Result<StatusCode> {
    change_status(&state, &code, &request.gid, false).await
}

async fn change_status(state: &AppState, code: &str, gid: &str, disabled: bool) -> Result<StatusCode> {
    let full_short_url = FullShortUrl::new(state.links().domain(), &parse_code(code)?);
    if state.links().set_disabled(gid, &full_short_url, disabled).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::LinkNotFound(code.to_string()))
    }
}

pub async fn delete_link_handler(
    Path(code): Path<String>,
    Query(query): Query<DeleteLinkQuery>,
    State(state): State<AppState>,
) -> Result<StatusCode> {
    let full_short_url = FullShortUrl::new(state.links().domain(), &parse_code(&code)?);
    if state.links().soft_delete(&query.gid, &full_short_url).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::LinkNotFound(code))
    }
}

pub async fn rebuild_filter_handler(State(state): State<AppState>) -> Result<Json<RebuildResponse>> {
    let codes = state.links().rebuild_filter().await?;
    Ok(Json(RebuildResponse { codes }))
}
