use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use sttq_common::{Result, TaskError};
use sttq_crypto::{EncryptionKey, KDF_VERSION_V1, SALT_LEN};

/// Fixed member names inside the bundle archive. Part of the wire contract.
pub const METADATA_ENTRY: &str = "metadata.json";
pub const AUDIO_ENTRY: &str = "audio.ogg";

/// Current `metadata.json` schema version. Distinct from the KDF version
/// pinned in the outer bundle header.
pub const BUNDLE_SCHEMA_VERSION: u32 = 1;

/// The archive's plaintext payload, serialized as `metadata.json` inside the
/// encrypted zip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleMetadata {
    pub task_id: String,
    pub model: String,
    pub version: u32,
}

impl BundleMetadata {
    pub fn new(task_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            model: model.into(),
            version: BUNDLE_SCHEMA_VERSION,
        }
    }
}

/// Pack `metadata` and the audio file at `audio_path` into an encrypted
/// bundle. The returned bytes are `[kdf_version][salt][nonce || ciphertext]`
/// where the ciphertext is a zip archive containing exactly
/// `metadata.json` and `audio.ogg`.
pub fn pack(metadata: &BundleMetadata, audio_path: &Path, password: &str) -> Result<Vec<u8>> {
    let audio_bytes = std::fs::read(audio_path)?;

    let mut zip_buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut zip_buf);
        let options: zip::write::FileOptions<()> =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let metadata_json = serde_json::to_vec(metadata)
            .map_err(|e| TaskError::Internal(format!("metadata serialization failed: {e}")))?;

        writer
            .start_file(METADATA_ENTRY, options)
            .map_err(|e| TaskError::Internal(format!("zip write failed: {e}")))?;
        writer
            .write_all(&metadata_json)
            .map_err(|e| TaskError::Internal(format!("zip write failed: {e}")))?;

        writer
            .start_file(AUDIO_ENTRY, options)
            .map_err(|e| TaskError::Internal(format!("zip write failed: {e}")))?;
        writer
            .write_all(&audio_bytes)
            .map_err(|e| TaskError::Internal(format!("zip write failed: {e}")))?;

        writer
            .finish()
            .map_err(|e| TaskError::Internal(format!("zip finalize failed: {e}")))?;
    }

    let salt = sttq_crypto::generate_salt();
    let key = EncryptionKey::derive(password, KDF_VERSION_V1, &salt)?;
    let ciphertext = key.encrypt(zip_buf.get_ref())?;

    let mut out = Vec::with_capacity(1 + SALT_LEN + ciphertext.len());
    out.push(KDF_VERSION_V1);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unpack `bundle_bytes`, writing the audio member into `workdir` under its
/// fixed name and returning the parsed metadata alongside the audio path.
pub fn unpack(bundle_bytes: &[u8], password: &str, workdir: &Path) -> Result<(BundleMetadata, PathBuf)> {
    if bundle_bytes.len() < 1 + SALT_LEN {
        return Err(TaskError::BundleFormat("bundle too short".to_string()));
    }
    let kdf_version = bundle_bytes[0];
    if kdf_version != KDF_VERSION_V1 {
        return Err(TaskError::BundleFormat(format!(
            "unsupported kdf version {kdf_version}"
        )));
    }
    let salt: [u8; SALT_LEN] = bundle_bytes[1..1 + SALT_LEN]
        .try_into()
        .expect("slice length checked above");
    let ciphertext = &bundle_bytes[1 + SALT_LEN..];

    let key = EncryptionKey::derive(password, kdf_version, &salt)?;
    let plaintext = key.decrypt(ciphertext)?;

    let mut archive = zip::ZipArchive::new(Cursor::new(plaintext))
        .map_err(|e| TaskError::BundleFormat(format!("not a valid archive: {e}")))?;

    let metadata: BundleMetadata = {
        let mut entry = archive
            .by_name(METADATA_ENTRY)
            .map_err(|_| TaskError::BundleSchema(format!("missing {METADATA_ENTRY}")))?;
        let mut buf = String::new();
        entry
            .read_to_string(&mut buf)
            .map_err(|e| TaskError::BundleSchema(format!("{METADATA_ENTRY} unreadable: {e}")))?;
        serde_json::from_str(&buf)
            .map_err(|e| TaskError::BundleSchema(format!("{METADATA_ENTRY} malformed: {e}")))?
    };

    let audio_path = workdir.join(AUDIO_ENTRY);
    {
        let mut entry = archive
            .by_name(AUDIO_ENTRY)
            .map_err(|_| TaskError::BundleFormat(format!("missing {AUDIO_ENTRY}")))?;
        let mut out = std::fs::File::create(&audio_path)?;
        std::io::copy(&mut entry, &mut out)?;
    }

    Ok((metadata, audio_path))
}

/// Task lifecycle states. Transitions are enforced by the registry, not by
/// this type; it is a pure value carried across the wire and in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }
}

/// Short machine-readable code plus a human message, attached to `FAILED`
/// tasks. Never carries raw subprocess stderr beyond the tail captured by
/// the transcriber driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub code: String,
    pub message: String,
}

impl From<&TaskError> for ErrorDescriptor {
    fn from(err: &TaskError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Summary of a completed task's subtitle artifact, as exposed over `/result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDescriptor {
    pub task_id: String,
    pub srt_size: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Derived view of admission pressure, computed from the registry on demand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolStatus {
    pub is_full: bool,
    pub current_size: usize,
    pub max_size: usize,
    pub processing_count: usize,
}

impl PoolStatus {
    pub fn new(current_size: usize, processing_count: usize, max_size: usize) -> Self {
        Self {
            is_full: current_size + processing_count >= max_size,
            current_size,
            max_size,
            processing_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitAccepted {
    pub task_id: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub task_id: String,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<ErrorDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error")]
pub enum ErrorResponse {
    #[serde(rename = "conflict")]
    Conflict,
    #[serde(rename = "pool_full")]
    PoolFull { pool: PoolStatus },
    #[serde(rename = "bad_request")]
    BadRequest { detail: String },
}
