//! GET 处理器：下载文件或渲染目录列表。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, RawQuery};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use httpdate::fmt_http_date;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::listing::render_listing;
use crate::storage::{Storage, StorageError};

const UPLOADED_PARAM: &str = "uploaded";

/// 从查询串中取第一个可解析的 `uploaded` 计数，其余参数一律忽略。
fn uploaded_count(query: Option<&str>) -> Option<usize> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| *key == UPLOADED_PARAM)
        .find_map(|(_, value)| value.parse::<usize>().ok())
}

/// 解析请求路径：文件返回内容，目录返回列表页，否则 404。
pub async fn serve_entry(
    uri: Uri,
    RawQuery(query): RawQuery,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let resolved = storage.resolve(uri.path()).await;

    if resolved.is_file {
        return download_file(&resolved.absolute_path, &request_headers).await;
    }
    if resolved.is_dir {
        let entries = storage.list_dir(&resolved.absolute_path).await?;
        let uploaded = uploaded_count(query.as_deref());
        info!(
            path = %resolved.absolute_path.display(),
            count = entries.len(),
            "list directory"
        );
        let html = render_listing(&storage, &resolved.absolute_path, &entries, uploaded)?;
        return Ok(Html(html).into_response());
    }

    debug!(path = uri.path(), "not found");
    Err(ApiError::NotFound)
}

/// 返回完整文件内容，命中 If-None-Match 时返回 304。
async fn download_file(path: &Path, request_headers: &HeaderMap) -> Result<Response, ApiError> {
    let metadata = fs::metadata(path).await.map_err(StorageError::from)?;
    let file_size = metadata.len();
    let etag = etag_from_metadata(&metadata);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    if let Ok(modified) = metadata.modified() {
        response_headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
    }

    if is_not_modified(request_headers, &etag) {
        debug!(path = %path.display(), "not modified");
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&file_size.to_string())
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );

    let file = File::open(path).await.map_err(StorageError::from)?;
    info!(path = %path.display(), size = file_size, "download file");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
