use log::warn;
use srtlib::Subtitles;
use std::path::Path;
use sttq_common::{Result, TaskError};

/// A single cue: sequence number, millisecond timestamps, and text.
#[derive(Debug, Clone)]
pub struct SubtitleEntry {
    pub num: usize,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

/// Thin wrapper around `srtlib::Subtitles` used to validate transcriber
/// output and to produce well-formed empty files when a job yields no
/// speech.
#[derive(Debug, Default)]
pub struct SrtFile {
    entries: Vec<SubtitleEntry>,
}

impl SrtFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[SubtitleEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let subs = Subtitles::parse_from_file(path, None)
            .map_err(|e| TaskError::Internal(format!("invalid SRT at {path:?}: {e}")))?;
        Ok(Self::from_subtitles(subs))
    }

    pub fn parse_content(content: &str) -> Result<Self> {
        let subs = Subtitles::parse_from_str(content.to_string())
            .map_err(|e| TaskError::Internal(format!("invalid SRT content: {e}")))?;
        Ok(Self::from_subtitles(subs))
    }

    fn from_subtitles(subs: Subtitles) -> Self {
        let entries = subs
            .into_iter()
            .map(|s| SubtitleEntry {
                num: s.num,
                start_ms: timestamp_to_ms(&s.start_time),
                end_ms: timestamp_to_ms(&s.end_time),
                text: s.text,
            })
            .collect();
        Self { entries }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if self.entries.is_empty() {
            warn!("writing empty SRT to {path:?}");
        }
        let mut content = String::new();
        for e in &self.entries {
            content.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                e.num,
                format_timestamp(e.start_ms),
                format_timestamp(e.end_ms),
                e.text
            ));
        }
        std::fs::write(path, content).map_err(TaskError::Io)
    }
}

fn timestamp_to_ms(ts: &srtlib::Timestamp) -> i64 {
    let (hours, minutes, seconds, millis) = ts.get();
    srtlib::Timestamp::convert_to_milliseconds(hours, minutes, seconds, millis) as i64
}

fn format_timestamp(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

/// Locate exactly one SRT file in `dir` whose stem matches `audio_stem`.
/// Mirrors whisper-cli's convention of naming output after the input file.
pub fn find_unique_output(dir: &Path, audio_stem: &str) -> Result<std::path::PathBuf> {
    let mut matches = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(TaskError::Io)?;
    for entry in entries {
        let entry = entry.map_err(TaskError::Io)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("srt") {
            continue;
        }
        let stem_matches = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|stem| stem == audio_stem || stem.starts_with(&format!("{audio_stem}.")))
            .unwrap_or(false);
        if stem_matches {
            matches.push(path);
        }
    }

    match matches.len() {
        0 => Err(TaskError::NoOutput),
        1 => Ok(matches.remove(0)),
        _ => Err(TaskError::AmbiguousOutput),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.srt");
        let srt = SrtFile {
            entries: vec![SubtitleEntry {
                num: 1,
                start_ms: 0,
                end_ms: 1500,
                text: "hello world".to_string(),
            }],
        };
        srt.save(&path).unwrap();
        let loaded = SrtFile::load(&path).unwrap();
        assert_eq!(loaded.entries().len(), 1);
        assert_eq!(loaded.entries()[0].text, "hello world");
    }

    #[test]
    fn find_unique_output_requires_exactly_one() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            find_unique_output(dir.path(), "audio"),
            Err(TaskError::NoOutput)
        ));

        std::fs::write(dir.path().join("audio.srt"), "").unwrap();
        assert!(find_unique_output(dir.path(), "audio").is_ok());

        std::fs::write(dir.path().join("audio.old.srt"), "").unwrap();
        std::fs::rename(
            dir.path().join("audio.old.srt"),
            dir.path().join("audio_stale.srt"),
        )
        .unwrap();
        // still exactly one match for stem "audio"
        assert!(find_unique_output(dir.path(), "audio").is_ok());
    }

    #[test]
    fn find_unique_output_ambiguous() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("audio.srt"), "a").unwrap();
        std::fs::write(dir.path().join("audio.en.srt"), "b").unwrap();
        assert!(matches!(
            find_unique_output(dir.path(), "audio"),
            Err(TaskError::AmbiguousOutput)
        ));
    }
}
