//! Durable transcript artifact.
//!
//! Every session mutation rewrites the full transcript as a JSON array of
//! `{role, content}` objects. The write is a single atomic replace:
//! serialize to a dot-prefixed sibling, fsync, rename over the target.
//! A crash mid-write leaves the previous artifact intact, so readers
//! never see a half-written transcript.

use crate::message::{ChatMessage, Role};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Error from transcript IO.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to encode transcript: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write transcript {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read transcript {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt transcript {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("transcript {path} does not start with a system message")]
    MissingSystemMessage { path: PathBuf },
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transcript".to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}

/// Atomically replace the artifact at `path` with the full transcript.
pub async fn write_transcript(path: &Path, messages: &[ChatMessage]) -> Result<(), LogError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LogError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
    }

    let bytes = serde_json::to_vec_pretty(messages)?;
    let tmp = temp_path(path);

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|source| LogError::Write {
            path: tmp.clone(),
            source,
        })?;
    file.write_all(&bytes)
        .await
        .map_err(|source| LogError::Write {
            path: tmp.clone(),
            source,
        })?;
    file.sync_all().await.map_err(|source| LogError::Write {
        path: tmp.clone(),
        source,
    })?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| LogError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Read a transcript back, validating shape.
///
/// The first entry must be a system message; anything else means the
/// artifact was not written by us or has been damaged.
pub async fn read_transcript(path: &Path) -> Result<Vec<ChatMessage>, LogError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| LogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let messages: Vec<ChatMessage> =
        serde_json::from_slice(&bytes).map_err(|source| LogError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

    match messages.first() {
        Some(first) if first.role == Role::System => Ok(messages),
        _ => Err(LogError::MissingSystemMessage {
            path: path.to_path_buf(),
        }),
    }
}
