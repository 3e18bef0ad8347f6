//! Article handlers

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use folio_common::{
    db::models::Article,
    errors::{AppError, Result},
    ingest::{ArticleUpload, Attachment, FileInput},
};

#[derive(Serialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// All articles, newest first
pub async fn list_articles(State(state): State<AppState>) -> Result<Json<Vec<Article>>> {
    Ok(Json(state.repo.list_articles().await?))
}

/// Get an article by ID
pub async fn get_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Article>> {
    let id = parse_id(&id)?;
    Ok(Json(state.repo.find_article(id).await?))
}

/// Create an article from a multipart form with an attachment
pub async fn create_article(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Article>)> {
    let upload = read_upload(multipart, state.config.server.max_upload_bytes).await?;
    let article = state.ingestor.create(upload).await?;

    Ok((StatusCode::CREATED, Json(article)))
}

/// Update an article; the attachment is optional
pub async fn update_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Article>> {
    let id = parse_id(&id)?;
    let upload = read_upload(multipart, state.config.server.max_upload_bytes).await?;

    Ok(Json(state.ingestor.update(id, upload).await?))
}

/// Delete an article
pub async fn delete_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let id = parse_id(&id)?;
    state.ingestor.delete(id).await?;

    Ok(Json(DeleteResponse {
        message: "Article deleted successfully".to_string(),
    }))
}

/// Ids that are not UUIDs cannot name an article
fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::ArticleNotFound { id: raw.to_string() })
}

/// Collect the article form fields.
///
/// A `file` part with a filename is an upload; a plain `file` text field is
/// taken as a link. Browsers send an empty nameless part when no file was
/// picked, which counts as absent.
async fn read_upload(mut multipart: Multipart, limit: usize) -> Result<ArticleUpload> {
    let mut upload = ArticleUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "title" | "summary" | "content" => {
                let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
                match name.as_str() {
                    "title" => upload.title = Some(value),
                    "summary" => upload.summary = Some(value),
                    _ => upload.content = Some(value),
                }
            }
            "file" => match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;

                    if filename.is_empty() && bytes.is_empty() {
                        continue;
                    }

                    upload.file = Some(FileInput::Upload(Attachment {
                        filename,
                        content_type,
                        bytes,
                    }));
                }
                None => {
                    let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
                    let value = value.trim();
                    if !value.is_empty() {
                        upload.file = Some(FileInput::Link(value.to_string()));
                    }
                }
            },
            other => {
                tracing::debug!(field = %other, "Ignoring unknown form field");
            }
        }
    }

    Ok(upload)
}

fn multipart_error(err: MultipartError, limit: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit }
    } else {
        AppError::InvalidFormat {
            message: err.body_text(),
        }
    }
}
