use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use bytes::Bytes;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::HttpError;
use crate::state::AppState;

/// Remote folder for avatar uploads. Keys reuse the staged filename, so
/// re-uploading the same name overwrites the stored object.
const AVATAR_FOLDER: &str = "avatars";

struct StagedFile {
    path: PathBuf,
    file_name: String,
    bytes: Bytes,
    content_type: String,
}

/// Collects a multipart request into a JSON-shaped body. Text fields pass
/// through as strings. The single `file_field` file is staged to local disk,
/// pushed to the image store, and its URL injected under `image`; with no
/// file attached the body passes through untouched.
pub async fn collect(
    state: &AppState,
    mut multipart: Multipart,
    file_field: &str,
) -> Result<Map<String, Value>, HttpError> {
    let mut body = Map::new();
    let mut staged: Option<StagedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HttpError::bad_request(e.to_string()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == file_field && field.file_name().is_some() {
            let original = field.file_name().unwrap_or("file").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| HttpError::bad_request(e.to_string()))?;
            staged = Some(stage_to_disk(&state.config.upload_dir, &original, data, content_type).await?);
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| HttpError::bad_request(e.to_string()))?;
            body.insert(name, Value::String(text));
        }
    }

    if let Some(file) = staged {
        let url = push_to_store(state, &file).await?;
        debug!(path = %file.path.display(), %url, "avatar uploaded");
        body.insert("image".into(), Value::String(url));
    }

    Ok(body)
}

/// Timestamp-prefixed name keeps local stagings from colliding. Only the
/// basename of the client-supplied filename is used, so path separators in
/// it cannot steer the staging path outside the upload dir.
fn timestamped_name(original: &str) -> String {
    let base = Path::new(original)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".into());
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    format!("{}_{}", millis, base)
}

async fn stage_to_disk(
    dir: &str,
    original: &str,
    data: Bytes,
    content_type: String,
) -> Result<StagedFile, HttpError> {
    let file_name = timestamped_name(original);
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| HttpError::internal(e.to_string()))?;
    let path = Path::new(dir).join(&file_name);
    tokio::fs::write(&path, &data)
        .await
        .map_err(|e| HttpError::internal(e.to_string()))?;
    Ok(StagedFile {
        path,
        file_name,
        bytes: data,
        content_type,
    })
}

async fn push_to_store(state: &AppState, file: &StagedFile) -> Result<String, HttpError> {
    let key = format!("{}/{}", AVATAR_FOLDER, file.file_name);
    state
        .storage
        .put_object(&key, file.bytes.clone(), &file.content_type)
        .await
        .map_err(|e| HttpError::internal(e.to_string()))?;
    Ok(state.storage.object_url(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_names_are_timestamp_prefixed() {
        let name = timestamped_name("me.png");
        let (prefix, rest) = name.split_once('_').expect("has separator");
        assert!(prefix.parse::<i128>().is_ok());
        assert_eq!(rest, "me.png");
    }

    #[test]
    fn staged_names_use_only_the_basename() {
        let name = timestamped_name("a/../../b.png");
        assert!(!name.contains('/'));
        assert!(name.ends_with("_b.png"));

        let name = timestamped_name("..");
        assert!(name.ends_with("_file"));
    }

    #[tokio::test]
    async fn staging_writes_the_file_under_the_upload_dir() {
        let dir = std::env::temp_dir().join("uniteam-staging-test");
        let dir = dir.to_string_lossy().into_owned();
        let staged = stage_to_disk(&dir, "pic.jpg", Bytes::from_static(b"jpeg"), "image/jpeg".into())
            .await
            .expect("staging succeeds");
        assert!(staged.path.starts_with(&dir));
        assert!(staged.file_name.ends_with("_pic.jpg"));
        let written = tokio::fs::read(&staged.path).await.expect("file exists");
        assert_eq!(written, b"jpeg");
        let _ = tokio::fs::remove_file(&staged.path).await;
    }

    #[tokio::test]
    async fn pushed_files_land_under_the_avatar_folder() {
        let state = crate::state::AppState::fake();
        let staged = StagedFile {
            path: PathBuf::from("uploads/1_me.png"),
            file_name: "1_me.png".into(),
            bytes: Bytes::from_static(b"png"),
            content_type: "image/png".into(),
        };
        let url = push_to_store(&state, &staged).await.expect("push succeeds");
        assert_eq!(url, "https://fake.local/avatars/1_me.png");
    }
}
