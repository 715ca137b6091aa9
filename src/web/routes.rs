//! Request handlers for the control server.
//!
//! Handlers only read shared state or hand work to the job runner; none of
//! them waits for a job to finish.

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use chrono::Local;
use percent_encoding::utf8_percent_encode;
use serde::Serialize;
use std::io::ErrorKind;
use tokio_util::io::ReaderStream;
use tracing::info;

use super::page::{self, JobRow, PATH_SEGMENT};
use crate::context::AppContext;
use crate::core::{ArchiveEntry, CleanupReport};
use crate::error::{Error, Result};

/// Chunk size for streamed downloads.
const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub files: Vec<ArchiveEntry>,
}

pub async fn control_page(State(ctx): State<AppContext>) -> Result<Html<String>> {
    let archives = ctx.archives.list().await?;

    let mut jobs = Vec::with_capacity(ctx.registry.len());
    for name in ctx.registry.names() {
        jobs.push(JobRow {
            name: name.to_string(),
            latest: ctx.runs.latest(name).await,
        });
    }

    Ok(Html(page::render(&jobs, &archives, ctx.config.retention_days)))
}

pub async fn run_job(State(ctx): State<AppContext>, Path(job): Path<String>) -> Result<String> {
    let run = ctx.runner.trigger(&job).await?;
    Ok(format!("started {} (run {})", run.job_name, run.run_id))
}

pub async fn download(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<Response> {
    let entry = ctx.archives.find(&name).await?;

    let file = match tokio::fs::File::open(&entry.path).await {
        Ok(file) => file,
        // Removed between listing and open
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::ArchiveNotFound(name)),
        Err(e) => return Err(e.into()),
    };

    // Size of the file actually opened; the slot may have been replaced
    // since it was listed.
    let size = file.metadata().await?.len();

    info!(archive = %entry.name, bytes = size, "Serving download");

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
        (header::CONTENT_LENGTH, HeaderValue::from(size)),
        (header::CONTENT_DISPOSITION, content_disposition(&entry.name)?),
    ];
    let body = Body::from_stream(ReaderStream::with_capacity(file, DOWNLOAD_CHUNK_SIZE));

    Ok((headers, body).into_response())
}

pub async fn status(State(ctx): State<AppContext>) -> Result<Json<StatusResponse>> {
    let files = ctx.archives.list().await?;
    Ok(Json(StatusResponse {
        status: "running",
        timestamp: Local::now().to_rfc3339(),
        files,
    }))
}

pub async fn cleanup(State(ctx): State<AppContext>) -> Json<CleanupReport> {
    let report = ctx.retention().cleanup().await;
    info!(deleted = report.deleted_count, "Cleanup requested");
    Json(report)
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

/// `attachment` disposition with an ASCII fallback name and the exact UTF-8
/// name in RFC 5987 form.
fn content_disposition(name: &str) -> Result<HeaderValue> {
    let fallback: String = name
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(name, PATH_SEGMENT)
    );

    HeaderValue::from_str(&value).map_err(|_| Error::InvalidHeader(value))
}
