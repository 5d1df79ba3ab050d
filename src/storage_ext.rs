use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info};
use reqwest::StatusCode;
use std::error;
use tokio::io::AsyncWriteExt;

use crate::config::CONFIG_NAME;
use crate::storage::Storage;

const HUB_URL: &str = "https://huggingface.co";

/// Url of a file in the main revision of a Hugging Face hub repository.
pub fn hub_file_url(repo_id: &str, file_name: &str) -> String {
    format!("{HUB_URL}/{}/resolve/main/{file_name}", repo_id.trim_matches('/'))
}

#[async_trait]
pub trait StorageExt: Storage {
    /// Downloads the `config.json` of a hub repository into `{repo_id}/config.json`,
    /// unless it was already downloaded. Returns the storage path of the config.
    async fn download_config(&self, repo_id: &str, force_download: bool) -> anyhow::Result<String> {
        let local_file = format!("{}/{CONFIG_NAME}", repo_id.trim_matches('/'));
        let url = hub_file_url(repo_id, CONFIG_NAME);

        let bar = download_bar(&local_file);
        let cbk_bar = bar.clone();
        self.fetch_remote_data_file(&url, &local_file, force_download, move |el, t| {
            cbk_bar.set_length(t as u64);
            cbk_bar.set_position(el as u64);
        })
        .await?;
        bar.finish_and_clear();
        Ok(local_file)
    }

    /// Stores a remote file under `local_file`, downloading it only if it
    /// is not already stored or if `force` is set.
    ///
    /// # Arguments
    ///
    /// * `url`: The URL of the remote file
    /// * `local_file`: The destination path in the storage
    /// * `force`: Force the download even if the file exists
    /// * `cbk`: A callback for tracking progress of the download (elapsed, total)
    async fn fetch_remote_data_file<Cb: Fn(usize, usize) + Send + Sync + 'static>(
        &self,
        url: &str,
        local_file: &str,
        force: bool,
        cbk: Cb,
    ) -> std::io::Result<()> {
        if self.exists(local_file).await? && !force {
            debug!("{local_file} already downloaded");
            return Ok(());
        }

        info!("Downloading {url}");
        let resp = reqwest::get(url).await.map_err(io_err)?;
        let status_code = resp.status();
        if status_code != StatusCode::OK {
            return Err(io_err(format!(
                "Error downloading {url}. Invalid status code {status_code}"
            )));
        }
        let total_bytes = resp.content_length().unwrap_or_default() as usize;

        // Downloads land in a temp file first, so an interrupted download
        // never leaves a truncated file at the destination.
        let temp_file = format!("{local_file}.temp");
        let mut file = self.create(&temp_file).await?;

        let mut stream = resp.bytes_stream();
        let mut downloaded_bytes = 0;
        while let Some(item) = stream.next().await {
            let chunk = item.map_err(io_err)?;
            downloaded_bytes += chunk.len();
            cbk(downloaded_bytes, total_bytes);
            file.write_all(&chunk).await?
        }
        file.flush().await?;
        drop(file);

        self.mv(&temp_file, local_file).await
    }
}

impl<T: Storage + 'static> StorageExt for T {}

pub fn download_bar(file: &str) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template(
        "{prefix:>32} {spinner:.green} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_prefix(file.to_string());
    pb
}

fn io_err<E>(e: E) -> std::io::Error
where
    E: Into<Box<dyn error::Error + Send + Sync>>,
{
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

#[cfg(test)]
mod tests {
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};
    use std::time::SystemTime;

    use super::*;
    use crate::config::{SongGenConfig, StructuredRecord};
    use crate::storage::AppFs;

    fn rand_string() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(7)
            .map(char::from)
            .collect()
    }

    #[test]
    fn builds_hub_urls() {
        assert_eq!(
            hub_file_url("/org/model/", "config.json"),
            "https://huggingface.co/org/model/resolve/main/config.json"
        );
    }

    #[tokio::test]
    async fn skips_already_stored_files() -> anyhow::Result<()> {
        let app_fs = AppFs::new(format!("/tmp/{}", rand_string()));
        app_fs.write("org/model/config.json", "{}").await?;

        // The url is never hit because the file is already there.
        let local = app_fs.download_config("org/model", false).await?;
        assert_eq!(local, "org/model/config.json");
        assert_eq!(app_fs.read(&local).await?.as_deref(), Some("{}".as_bytes()));
        Ok(())
    }

    #[ignore]
    #[tokio::test]
    async fn downloads_remote_config() -> anyhow::Result<()> {
        // Any hub repository hosting a SongGen config.json.
        let Ok(repo_id) = std::env::var("SONGGEN_TEST_REPO") else {
            return Ok(());
        };
        let app_fs = AppFs::new("/tmp/downloads_remote_config_test");

        let time = SystemTime::now();
        let local = app_fs.download_config(&repo_id, true).await?;
        let download_elapsed = SystemTime::now().duration_since(time)?.as_micros();

        let time = SystemTime::now();
        app_fs.download_config(&repo_id, false).await?;
        let cached_elapsed = SystemTime::now().duration_since(time)?.as_micros();
        assert!(download_elapsed / cached_elapsed.max(1) > 10);

        let content = app_fs.read(&local).await?.unwrap_or_default();
        SongGenConfig::from_json_str(&String::from_utf8_lossy(&content))?;
        Ok(())
    }
}
