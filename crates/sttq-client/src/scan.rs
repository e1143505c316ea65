use std::path::{Path, PathBuf};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "flv", "wmv", "m4v"];

/// Recursively enumerate video files under `root` in stable sorted order.
pub fn scan_videos(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk(root, &mut found)?;
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, found)?;
        } else if file_type.is_file() && is_video(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// A sibling SRT (video stem + `.srt`) already exists, so this video can be
/// skipped. Makes interrupted runs safely resumable.
pub fn has_sibling_srt(video_path: &Path) -> bool {
    video_path.with_extension("srt").exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scan_finds_videos_recursively_in_sorted_order() {
        let root = tempdir().unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        std::fs::write(root.path().join("b.mp4"), b"").unwrap();
        std::fs::write(root.path().join("sub").join("a.mkv"), b"").unwrap();
        std::fs::write(root.path().join("notes.txt"), b"").unwrap();

        let videos = scan_videos(root.path()).unwrap();
        assert_eq!(videos.len(), 2);
        assert!(videos[0] < videos[1]);
    }

    #[test]
    fn sibling_srt_detection() {
        let root = tempdir().unwrap();
        let video = root.path().join("clip.mp4");
        std::fs::write(&video, b"").unwrap();
        assert!(!has_sibling_srt(&video));

        std::fs::write(root.path().join("clip.srt"), b"").unwrap();
        assert!(has_sibling_srt(&video));
    }
}
