use std::path::PathBuf;

use anyhow::Context;

/// 50 MiB, enough for a handful of phone photos per return.
const DEFAULT_MAX_UPLOAD_BYTES: usize = 52_428_800;

/// Unreferenced blobs younger than this survive a sweep.
const DEFAULT_SWEEP_GRACE_SECS: u32 = 600;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Root directory of the evidence blob store.
    pub upload_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub sweep_grace_secs: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://returns.db".to_string()),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static").join("uploads")),
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            max_upload_bytes: match std::env::var("MAX_UPLOAD_BYTES") {
                Ok(raw) => raw
                    .parse()
                    .context("MAX_UPLOAD_BYTES must be a byte count")?,
                Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
            },
            sweep_grace_secs: match std::env::var("SWEEP_GRACE_SECS") {
                Ok(raw) => raw
                    .parse()
                    .context("SWEEP_GRACE_SECS must be a number of seconds")?,
                Err(_) => DEFAULT_SWEEP_GRACE_SECS,
            },
        })
    }
}
