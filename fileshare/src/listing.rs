//! Plain HTML index for shared directories without an `index.html`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use tracing::debug;

/// Fallback behind `ServeDir`: lists the requested directory, 404 for anything else.
pub(crate) async fn list_directory(State(root): State<Arc<PathBuf>>, uri: Uri) -> Response {
    let Some(dir) = resolve(&root, uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match read_entries(&dir).await {
        Ok(entries) => Html(render(&entries)).into_response(),
        Err(err) => {
            debug!(path = %dir.display(), err = %err, "no listing");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Map a request path onto `root`, refusing anything that climbs out of it.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(request_path)?;
    let mut dir = root.to_path_buf();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(segment) => dir.push(segment),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(dir)
}

/// Entry names, directories suffixed with `/`, sorted.
async fn read_entries(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

fn render(entries: &[String]) -> String {
    let mut page = String::from("<pre>\n");
    for name in entries {
        page.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            escape_html(&percent_encode(name)),
            escape_html(name)
        ));
    }
    page.push_str("</pre>\n");
    page
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn percent_encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(char::from(byte));
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn percent_decode(path: &str) -> Option<String> {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = path.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
