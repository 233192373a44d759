use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::normalize_prefix;

/// 被服务的目录树：工作目录根与挂载前缀。
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    prefix: String,
}

/// 一次请求解析出的文件系统位置，总是位于工作目录之内。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    pub absolute_path: PathBuf,
    pub is_file: bool,
    pub is_dir: bool,
}

impl Storage {
    /// `root` must already be canonical so containment checks compare like with like.
    pub fn new(root: PathBuf, prefix: &str) -> Self {
        Self {
            root,
            prefix: normalize_prefix(prefix),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将请求路径映射到工作目录内的绝对路径；越界时回退到根目录。
    pub async fn resolve(&self, raw_path: &str) -> ResolvedPath {
        let decoded = decode_url_path(raw_path);
        let relative = self.strip_prefix(&decoded);
        let absolute_path = self.confine(relative).await;
        let (is_file, is_dir) = match fs::metadata(&absolute_path).await {
            Ok(metadata) => (metadata.is_file(), metadata.is_dir()),
            Err(_) => (false, false),
        };
        debug!(
            raw_path,
            resolved = %absolute_path.display(),
            is_file,
            is_dir,
            "resolve request path"
        );
        ResolvedPath {
            absolute_path,
            is_file,
            is_dir,
        }
    }

    // A path outside the prefix is treated as root-relative.
    fn strip_prefix<'a>(&self, path: &'a str) -> &'a str {
        if self.prefix == "/" {
            return path;
        }
        let bare = self.prefix.trim_end_matches('/');
        if path == bare {
            return "/";
        }
        match path.strip_prefix(bare) {
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }

    async fn confine(&self, relative: &str) -> PathBuf {
        let relative = relative.trim_start_matches('/');
        let joined = self.root.join(relative);
        let candidate = match fs::canonicalize(&joined).await {
            Ok(path) => Some(path),
            Err(_) => normalize_lexically(&self.root, relative),
        };
        match candidate {
            Some(path) if path.starts_with(&self.root) => path,
            _ => {
                warn!(requested = relative, "path escapes working directory, using root");
                self.root.clone()
            }
        }
    }

    /// 返回工作目录内路径对应的 URL（含前缀，目录以 `/` 结尾）。
    pub fn public_url(&self, path: &Path, is_dir: bool) -> String {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return self.prefix.clone();
        };
        let mut url = self.prefix.trim_end_matches('/').to_string();
        for component in relative.components() {
            url.push('/');
            url.push_str(&urlencoding::encode(
                &component.as_os_str().to_string_lossy(),
            ));
        }
        if is_dir && !url.ends_with('/') {
            url.push('/');
        }
        if url.is_empty() {
            url.push('/');
        }
        url
    }

    /// 列出目录下的可见条目（忽略以 `.` 开头的名称），按名称排序。
    pub async fn list_dir(&self, dir: &Path) -> Result<Vec<FileEntry>, StorageError> {
        if !dir.starts_with(&self.root) {
            return Err(StorageError::InvalidPath);
        }
        let mut reader = fs::read_dir(dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            // Follows symlinks; a dangling link is listed as a plain file.
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => Some(metadata),
                Err(err) if err.kind() == io::ErrorKind::NotFound => None,
                Err(err) => return Err(StorageError::Io(err)),
            };
            let is_dir = metadata.as_ref().is_some_and(|m| m.is_dir());
            let modified = metadata
                .as_ref()
                .and_then(|m| m.modified().ok())
                .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
                .map(format_timestamp);

            entries.push(FileEntry {
                href: self.public_url(&path, is_dir),
                name,
                is_dir,
                size: metadata.as_ref().map_or(0, |m| m.len()),
                modified,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(entries)
    }
}

fn decode_url_path(raw: &str) -> Cow<'_, str> {
    match urlencoding::decode_binary(raw.as_bytes()) {
        Cow::Borrowed(_) => Cow::Borrowed(raw),
        Cow::Owned(bytes) => Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn normalize_lexically(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => continue,
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(root.join(normalized))
}

fn format_timestamp(duration: Duration) -> String {
    let timestamp = UNIX_EPOCH + duration;
    let datetime: DateTime<Utc> = timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

/// 目录列表中的一行。
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub name: String,
    pub href: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<String>,
}
