use log::debug;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Invoke the external audio encoder to normalize `video_path` into a
/// sibling `.ogg` under `scratch_dir`: mono, 16 kHz, Opus, 24 kbps, no
/// video stream. Parameters are fixed per spec, not user-configurable.
pub async fn convert_to_opus(encoder_bin: &str, video_path: &Path, scratch_dir: &Path) -> anyhow::Result<PathBuf> {
    let stem = video_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    let output_path = scratch_dir.join(format!("{stem}.ogg"));

    let mut cmd = Command::new(encoder_bin);
    cmd.args([
        "-y",
        "-i",
    ])
    .arg(video_path)
    .args([
        "-vn",
        "-ac",
        "1",
        "-ar",
        "16000",
        "-c:a",
        "libopus",
        "-b:a",
        "24k",
    ])
    .arg(&output_path)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    debug!("converting {video_path:?} -> {output_path:?}");
    let output = cmd.output().await?;

    if !output.status.success() {
        anyhow::bail!(
            "audio encoder exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(output_path)
}
