//! Evidence blob store: uploaded photos live as plain files under one root
//! directory, addressed by their generated storage name.

mod sweep;

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::NaiveDateTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::error::{AppError, AppResult};

pub use sweep::{sweep_orphans, SweepReport};

/// Prefix format for storage names, second granularity.
const NAME_PREFIX_FORMAT: &str = "%Y%m%d%H%M%S_";
const NAME_PREFIX_LEN: usize = 15;

/// Longest sanitized filename kept after the prefix.
const MAX_SANITIZED_LEN: usize = 200;

/// Name used when sanitizing leaves nothing of the original filename.
const FALLBACK_NAME: &str = "upload";

/// Upper bound on `_N` suffixes tried before giving up on a name.
const MAX_NAME_ATTEMPTS: u32 = 1_000;

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens the store rooted at `root`, creating the directory if needed.
    /// A relative root is resolved against the working directory once, here.
    pub async fn open(root: impl AsRef<Path>) -> AppResult<Self> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| AppError::Storage(format!("cannot resolve working directory: {e}")))?
                .join(root)
        };

        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            AppError::Storage(format!("cannot create blob root {}: {e}", root.display()))
        })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, storage_name: &str) -> PathBuf {
        self.root.join(storage_name)
    }

    /// Absolute `file://` URI for a stored blob.
    pub fn resolve_uri(&self, storage_name: &str) -> String {
        file_uri(&self.path_of(storage_name))
    }

    /// Writes `bytes` under a fresh storage name derived from `original_name`
    /// and `now`, and returns that name. The file is created exclusively; a
    /// name already taken gets a `_1`, `_2`, ... suffix before its extension.
    pub async fn store(&self, original_name: &str, bytes: &[u8], now: NaiveDateTime) -> AppResult<String> {
        let base = storage_name(original_name, now);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                base.clone()
            } else {
                with_suffix(&base, attempt)
            };
            let path = self.path_of(&name);

            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(AppError::Storage(format!("cannot create {}: {e}", path.display())))
                }
            };

            let written = match file.write_all(bytes).await {
                Ok(()) => file.sync_all().await,
                Err(e) => Err(e),
            };

            if let Err(e) = written {
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %cleanup, "Failed to remove partial blob");
                }
                return Err(AppError::Storage(format!("cannot write {}: {e}", path.display())));
            }

            debug!(name = %name, bytes = bytes.len(), "Stored blob");
            return Ok(name);
        }

        Err(AppError::Storage(format!(
            "no free storage name for {base} after {MAX_NAME_ATTEMPTS} attempts"
        )))
    }

    pub async fn remove(&self, storage_name: &str) -> AppResult<()> {
        if !is_plain_name(storage_name) {
            return Err(AppError::Storage(format!("refusing to remove {storage_name:?}")));
        }
        let path = self.path_of(storage_name);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| AppError::Storage(format!("cannot remove {}: {e}", path.display())))
    }

    /// Names of the regular files directly under the root.
    pub async fn list(&self) -> AppResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            AppError::Storage(format!("cannot read {}: {e}", self.root.display()))
        })?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Storage(format!("cannot read {}: {e}", self.root.display())))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}

/// `YYYYMMDDHHMMSS_` + the sanitized original name.
pub fn storage_name(original_name: &str, now: NaiveDateTime) -> String {
    format!("{}{}", now.format(NAME_PREFIX_FORMAT), sanitize_filename(original_name))
}

/// Upload time encoded in a storage name, or `None` for names this store
/// did not generate.
pub fn stored_at(name: &str) -> Option<NaiveDateTime> {
    let prefix = name.get(..NAME_PREFIX_LEN)?;
    if name.len() == NAME_PREFIX_LEN {
        return None;
    }
    NaiveDateTime::parse_from_str(prefix, NAME_PREFIX_FORMAT).ok()
}

fn with_suffix(name: &str, n: u32) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{n}.{ext}"),
        _ => format!("{name}_{n}"),
    }
}

/// Reduces an uploaded filename to a safe single path component: only the
/// last `/` or `\` separated part is kept, accents are folded to ASCII,
/// whitespace becomes `_`, anything outside `[A-Za-z0-9._-]` is dropped,
/// leading/trailing `.` and `_` are stripped, and the result is capped at
/// [`MAX_SANITIZED_LEN`] bytes with its extension kept.
pub fn sanitize_filename(original: &str) -> String {
    let last = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let folded: String = last.nfkd().collect();

    let cleaned: String = folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c == '_');
    let capped = cap_length(trimmed);
    let capped = capped.trim_end_matches(|c: char| c == '.' || c == '_');
    if capped.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        capped.to_string()
    }
}

/// Truncates an ASCII name to [`MAX_SANITIZED_LEN`] bytes, cutting the stem
/// rather than a short extension.
fn cap_length(name: &str) -> String {
    if name.len() <= MAX_SANITIZED_LEN {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= 16 => {
            let ext = &name[dot..];
            format!("{}{}", &name[..MAX_SANITIZED_LEN - ext.len()], ext)
        }
        _ => name[..MAX_SANITIZED_LEN].to_string(),
    }
}

/// Builds a `file://` URI for an absolute path on either Unix or Windows.
///
/// Backslashes become `/`, every segment is percent-encoded except a drive
/// letter (`C:`), and paths without a leading `/` get one so the URI always
/// reads `file:///...`.
pub fn file_uri(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");

    let encoded = raw
        .split('/')
        .map(|segment| {
            if is_drive_segment(segment) {
                segment.to_string()
            } else {
                urlencoding::encode(segment).into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/");

    if encoded.starts_with('/') {
        format!("file://{encoded}")
    } else {
        format!("file:///{encoded}")
    }
}

pub fn is_drive_segment(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// True when `name` is a bare file name that cannot escape the store root.
pub fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}
