//! 表单上传处理：解析 multipart 请求并写入目标目录。

use axum::body::{Body as AxumBody, Bytes};
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Extension, FromRequest, Multipart};
use axum::http::{HeaderMap, Request, header};
use axum::response::{IntoResponse, Redirect, Response};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::atomic::write_atomically;
use crate::error::ApiError;
use crate::storage::Storage;

/// 从一个 multipart 分段中解出的文件。
#[derive(Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Debug)]
pub enum UploadError {
    Multipart(MultipartError),
    Write { filename: String, source: io::Error },
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Multipart(err) => write!(f, "malformed multipart body: {err}"),
            UploadError::Write { filename, source } => {
                write!(f, "failed to write {filename}: {source}")
            }
        }
    }
}

impl From<MultipartError> for UploadError {
    fn from(err: MultipartError) -> Self {
        UploadError::Multipart(err)
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// 接收上传表单，写入解析出的目录后 303 跳转回目录列表。
pub async fn upload_files(
    Extension(storage): Extension<Arc<Storage>>,
    request: Request<AxumBody>,
) -> Result<Response, ApiError> {
    let resolved = storage.resolve(request.uri().path()).await;
    if !resolved.is_dir {
        return Err(ApiError::NotFound);
    }

    let filenames = if has_body(request.headers()) {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::Internal(rejection.body_text()))?;
        ingest(&resolved.absolute_path, &mut multipart).await?
    } else {
        debug!("upload request without body");
        Vec::new()
    };

    let location = format!(
        "{}?uploaded={}",
        storage.public_url(&resolved.absolute_path, true),
        filenames.len()
    );
    info!(
        dir = %resolved.absolute_path.display(),
        count = filenames.len(),
        "upload finished"
    );
    Ok(Redirect::to(&location).into_response())
}

// Without Content-Length (and not chunked) the body is treated as empty.
fn has_body(headers: &HeaderMap) -> bool {
    let chunked = headers
        .get(header::TRANSFER_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .is_some_and(|length| length > 0)
}

/// 逐个写入带文件名的分段，返回已写入的文件名。
///
/// 每个文件独立写入；后续分段失败时，已写入的文件保留在磁盘上。
pub async fn ingest(
    target_dir: &Path,
    multipart: &mut Multipart,
) -> Result<Vec<String>, UploadError> {
    let mut written = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let Some(raw_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if raw_name.is_empty() {
            continue;
        }
        let Some(filename) = sanitize_filename(&raw_name) else {
            warn!(filename = %raw_name, "rejected upload filename");
            continue;
        };

        let file = read_part(filename, field).await?;
        let target = target_dir.join(&file.filename);
        write_atomically(&target, &file.bytes)
            .await
            .map_err(|source| UploadError::Write {
                filename: file.filename.clone(),
                source,
            })?;
        info!(
            path = %target.display(),
            size = file.bytes.len(),
            "uploaded file saved"
        );
        written.push(file.filename);
    }

    Ok(written)
}

// text/* parts are decoded with their charset and stored as UTF-8.
async fn read_part(filename: String, field: Field<'_>) -> Result<UploadedFile, UploadError> {
    let is_text = field
        .content_type()
        .is_some_and(|value| value.trim().to_ascii_lowercase().starts_with("text/"));
    let bytes = if is_text {
        Bytes::from(field.text().await?)
    } else {
        field.bytes().await?
    };
    Ok(UploadedFile { filename, bytes })
}

/// 只保留客户端文件名的最后一段，拒绝空名与 `.`/`..`。
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    let last = cleaned.rsplit(['/', '\\']).next().unwrap_or_default();
    if last.trim().is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}
