use log::{error, info, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use sttq_protocol::{BundleMetadata, TaskState};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::convert::convert_to_opus;
use crate::scan::{has_sibling_srt, scan_videos};
use crate::server_client::ServerClient;

/// Batch driver: scan → skip-if-done → convert → bundle → admission-gated
/// submit → hand off to a background waiter, repeated serially over every
/// discovered video. Returns the number of videos that failed.
pub async fn run(config: ClientConfig) -> anyhow::Result<usize> {
    let client = ServerClient::new(config.server_url.clone())?;
    let videos = scan_videos(&config.scan_root)?;
    info!("found {} video file(s) under {:?}", videos.len(), config.scan_root);

    let scratch_dir = tempfile::tempdir()?;
    let mut waiters: Vec<JoinHandle<bool>> = Vec::new();
    let mut failures = 0usize;

    for video_path in videos {
        if has_sibling_srt(&video_path) {
            info!("skipping {video_path:?}: subtitle already present");
            continue;
        }

        match submit_one(&client, &config, &video_path, scratch_dir.path()).await {
            Ok(task_id) => {
                let waiter_client = client.clone();
                let waiter_config = config.clone();
                let waiter_video = video_path.clone();
                waiters.push(tokio::spawn(async move {
                    wait_and_save(waiter_client, waiter_config, task_id, waiter_video).await
                }));
            }
            Err(e) => {
                error!("submission failed for {video_path:?}: {e}");
                failures += 1;
            }
        }
    }

    info!("draining {} outstanding waiter(s)", waiters.len());
    for waiter in waiters {
        match waiter.await {
            Ok(true) => {}
            Ok(false) => failures += 1,
            Err(e) => {
                error!("waiter task panicked: {e}");
                failures += 1;
            }
        }
    }

    Ok(failures)
}

async fn submit_one(
    client: &ServerClient,
    config: &ClientConfig,
    video_path: &Path,
    scratch_dir: &Path,
) -> anyhow::Result<String> {
    let audio_path = convert_to_opus(&config.audio_encoder_bin, video_path, scratch_dir).await?;
    let task_id = derive_task_id(video_path);

    let metadata = BundleMetadata::new(&task_id, &config.default_model);
    let bundle_path = scratch_dir.join(format!("{task_id}.bundle"));
    let bundle_bytes = sttq_protocol::pack(&metadata, &audio_path, &config.bundle_password)?;
    tokio::fs::write(&bundle_path, &bundle_bytes).await?;

    wait_for_admission(client, config).await?;
    client
        .submit(&task_id, &config.default_model, &config.bundle_password, &bundle_path)
        .await?;
    info!("submitted {video_path:?} as task '{task_id}'");

    if !config.keep_scratch {
        let _ = tokio::fs::remove_file(&audio_path).await;
        let _ = tokio::fs::remove_file(&bundle_path).await;
    }

    Ok(task_id)
}

async fn wait_for_admission(client: &ServerClient, config: &ClientConfig) -> anyhow::Result<()> {
    loop {
        let pool = client.pool_status().await?;
        if !pool.is_full {
            return Ok(());
        }
        warn!("pool full ({}/{}), backing off", pool.current_size, pool.max_size);
        tokio::time::sleep(config.pool_full_backoff()).await;
    }
}

/// Task ids are derived deterministically from the video's canonical path
/// so re-running the client over the same tree after an interruption
/// reuses the same id instead of minting a fresh one.
fn derive_task_id(video_path: &Path) -> String {
    let canonical = video_path
        .canonicalize()
        .unwrap_or_else(|_| video_path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest[..16])
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Adaptive polling per spec §4.8 step 6: pending interval while `QUEUED`,
/// processing interval while `PROCESSING`, fast fetch once `COMPLETED`.
/// Returns `true` on success, `false` on any terminal non-success outcome.
async fn wait_and_save(client: ServerClient, config: ClientConfig, task_id: String, video_path: PathBuf) -> bool {
    loop {
        let status = match client.status(&task_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!("status poll failed for '{task_id}': {e}; retrying");
                tokio::time::sleep(config.processing_interval()).await;
                continue;
            }
        };

        match status.state {
            TaskState::Queued => tokio::time::sleep(config.pending_interval()).await,
            TaskState::Processing => tokio::time::sleep(config.processing_interval()).await,
            TaskState::Completed => {
                return save_result(&client, &config, &task_id, &video_path).await;
            }
            TaskState::Failed => {
                let detail = status.error.map(|e| e.message).unwrap_or_default();
                error!("task '{task_id}' for {video_path:?} failed: {detail}");
                return false;
            }
            TaskState::Cancelled => {
                warn!("task '{task_id}' for {video_path:?} was cancelled");
                return false;
            }
        }
    }
}

async fn save_result(client: &ServerClient, config: &ClientConfig, task_id: &str, video_path: &Path) -> bool {
    // fast-fetch: short final wait lets a just-completed task settle before
    // the first download attempt.
    tokio::time::sleep(config.fast_interval()).await;

    let bytes = match client.download_result(task_id).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("download failed for '{task_id}': {e}");
            return false;
        }
    };

    let dest_dir = config.output_dir.as_deref().unwrap_or_else(|| video_path.parent().unwrap_or(Path::new(".")));
    let dest_path = dest_dir.join(format!(
        "{}.srt",
        video_path.file_stem().and_then(|s| s.to_str()).unwrap_or(task_id)
    ));
    let tmp_path = dest_dir.join(format!("{task_id}.srt.tmp"));

    if let Err(e) = tokio::fs::write(&tmp_path, &bytes).await {
        error!("failed to write subtitle for '{task_id}': {e}");
        return false;
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, &dest_path).await {
        error!("failed to finalize subtitle for '{task_id}': {e}");
        return false;
    }

    info!("saved subtitle for {video_path:?} -> {dest_path:?}");
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_is_deterministic_for_same_path() {
        let path = PathBuf::from("video.mp4");
        assert_eq!(derive_task_id(&path), derive_task_id(&path));
    }

    #[test]
    fn task_id_differs_across_paths() {
        assert_ne!(
            derive_task_id(&PathBuf::from("a.mp4")),
            derive_task_id(&PathBuf::from("b.mp4"))
        );
    }
}
