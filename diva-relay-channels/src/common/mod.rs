//! HTTP and media helpers shared by adapters

use diva_relay_core::channel::{ChannelError, Result};
use diva_relay_core::utils::safe_filename;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Create a standard HTTP client with timeout
pub fn create_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ChannelError::Error(format!("Failed to build HTTP client: {}", e)))
}

/// Directory for downloaded attachments
pub fn media_temp_dir() -> PathBuf {
    std::env::temp_dir().join("diva-relay-media")
}

/// Download `url` into `dir` under a unique name ending in `filename`.
///
/// A partially written file is removed before the error is returned.
pub async fn download_to_temp(
    client: &reqwest::Client,
    url: &str,
    bearer_token: Option<&str>,
    dir: &Path,
    filename: &str,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ChannelError::Error(format!("Failed to create media dir: {}", e)))?;

    let mut request = client.get(url);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .map_err(|e| ChannelError::ApiError(format!("Download failed: {}", e)))?;
    if !response.status().is_success() {
        return Err(ChannelError::ApiError(format!(
            "Download failed with status {}",
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ChannelError::ApiError(format!("Read failed: {}", e)))?;

    let file_path = dir.join(format!(
        "{}_{}",
        uuid::Uuid::new_v4().simple(),
        safe_filename(filename)
    ));
    if let Err(e) = write_file(&file_path, &bytes).await {
        let _ = tokio::fs::remove_file(&file_path).await;
        return Err(ChannelError::Error(format!("Write failed: {}", e)));
    }

    Ok(file_path)
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await
}
