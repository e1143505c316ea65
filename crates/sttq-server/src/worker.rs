use log::{error, info, warn};
use std::sync::Arc;
use sttq_common::TaskError;

use crate::registry::TaskRegistry;
use crate::store::ArtifactStore;
use crate::transcriber::TranscriberDriver;

/// Single-consumer loop: dequeue a task, unpack its bundle, run the
/// transcriber, publish or record the failure, clean up. Runs for the
/// lifetime of the server; the worker pool in the reference server spawns
/// one blocking thread per worker, but this pipeline is constrained to a
/// single concurrent transcription by design, so there is exactly one loop.
pub async fn run(registry: Arc<TaskRegistry>, store: ArtifactStore, driver: TranscriberDriver, password: String) {
    info!("worker loop started");
    loop {
        let task = registry.claim_next().await;
        info!("claimed task '{}'", task.task_id);

        if task.cancel.is_cancelled() {
            warn!("task '{}' cancelled before processing started", task.task_id);
            let _ = registry.fail(&task.task_id, &TaskError::Cancelled);
            store.drop_workdir(&task.task_id);
            store.remove_bundle(&task.task_id);
            continue;
        }

        let outcome = process_one(
            &store,
            &driver,
            &password,
            &task.task_id,
            &task.model,
            &task.bundle_path,
            task.cancel.clone(),
        )
        .await;

        match outcome {
            Ok(descriptor) => {
                info!("task '{}' completed", task.task_id);
                if let Err(e) = registry.complete(&task.task_id, descriptor) {
                    error!("failed to record completion for '{}': {e}", task.task_id);
                }
            }
            Err(TaskError::Cancelled) => {
                info!("task '{}' cancelled during processing", task.task_id);
                if let Err(e) = registry.fail(&task.task_id, &TaskError::Cancelled) {
                    error!("failed to record cancellation for '{}': {e}", task.task_id);
                }
            }
            Err(e) => {
                warn!("task '{}' failed: {e}", task.task_id);
                if let Err(record_err) = registry.fail(&task.task_id, &e) {
                    error!("failed to record failure for '{}': {record_err}", task.task_id);
                }
            }
        }

        store.drop_workdir(&task.task_id);
        store.remove_bundle(&task.task_id);
    }
}

async fn process_one(
    store: &ArtifactStore,
    driver: &TranscriberDriver,
    password: &str,
    task_id: &str,
    model: &str,
    bundle_path: &std::path::Path,
    cancel: tokio_util::sync::CancellationToken,
) -> sttq_common::Result<sttq_protocol::ResultDescriptor> {
    let workdir = store.open_workdir(task_id)?;

    let bundle_bytes = std::fs::read(bundle_path)?;
    let (_metadata, audio_path) = sttq_protocol::unpack(&bundle_bytes, password, &workdir)?;

    let srt_path = driver.transcribe(&audio_path, model, &workdir, cancel).await?;
    store.publish_result(task_id, &srt_path)
}
