//! 目录列表页面渲染，模板与图标以嵌入资源提供。

use rust_embed::RustEmbed;
use std::borrow::Cow;
use std::path::Path;

use crate::error::ApiError;
use crate::storage::{FileEntry, Storage};

#[derive(RustEmbed)]
#[folder = "assets"]
/// 嵌入式页面模板与图标。
pub struct ListingAssets;

const TEMPLATE: &str = "listing.html";
const ICON_UP: &str = "icons/arrow-up.svg";
const ICON_FOLDER: &str = "icons/folder.svg";
const ICON_FILE: &str = "icons/file.svg";

/// 渲染目录列表页：上传表单、返回上级链接与各条目。
pub fn render_listing(
    storage: &Storage,
    dir: &Path,
    entries: &[FileEntry],
    uploaded: Option<usize>,
) -> Result<String, ApiError> {
    let template = load_asset(TEMPLATE)?;
    let icon_up = load_asset(ICON_UP)?;
    let icon_folder = load_asset(ICON_FOLDER)?;
    let icon_file = load_asset(ICON_FILE)?;

    let display_path = display_path(storage, dir);
    let current_path = storage.public_url(dir, true);
    let upload_result = match uploaded {
        Some(count) if count > 0 => format!(
            r#"<p><span style="font-weight: bold">{count}</span> files have been uploaded.</p>"#
        ),
        _ => String::new(),
    };

    let mut rows = String::new();
    for entry in entries {
        let (icon, class, trailing) = if entry.is_dir {
            (&*icon_folder, "directory-entry", "/")
        } else {
            (&*icon_file, "file-entry", "")
        };
        let size = if entry.is_dir {
            "-".to_string()
        } else {
            format_size(entry.size)
        };
        rows.push_str(&format!(
            r#"<li><a class="{class}" href="{href}"><span>{icon} {name}{trailing}</span></a><span class="entry-meta">{size} {modified}</span></li>"#,
            href = html_escape(&entry.href),
            icon = icon.trim(),
            name = html_escape(&entry.name),
            modified = entry.modified.as_deref().unwrap_or(""),
        ));
        rows.push('\n');
    }

    let title = html_escape(&format!("Index of {display_path}"));
    let path = html_escape(&display_path);
    let action = html_escape(&current_path);
    Ok(fill_template(
        &template,
        &[
            ("title", title.as_str()),
            ("path", path.as_str()),
            ("current_path", action.as_str()),
            ("upload_result", upload_result.as_str()),
            ("icon_up", icon_up.trim()),
            ("entries", rows.as_str()),
        ],
    ))
}

fn load_asset(path: &str) -> Result<Cow<'static, str>, ApiError> {
    let asset = ListingAssets::get(path)
        .ok_or_else(|| ApiError::Internal(format!("missing asset {path}")))?;
    match asset.data {
        Cow::Borrowed(bytes) => std::str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|err| ApiError::Internal(err.to_string())),
        Cow::Owned(bytes) => String::from_utf8(bytes)
            .map(Cow::Owned)
            .map_err(|err| ApiError::Internal(err.to_string())),
    }
}

// Path shown in the heading, relative to the served root.
fn display_path(storage: &Storage, dir: &Path) -> String {
    let relative = dir
        .strip_prefix(storage.root_path())
        .map(|p| p.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
        .unwrap_or_default();
    format!("/{relative}")
}

/// 单次扫描替换 `{{ key }}` 占位符，替换结果不会再被展开。
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        match values.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
