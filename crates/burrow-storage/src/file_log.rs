use burrow_core::error::{Result, StorageError};
use burrow_core::UserId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, warn};

/// One line of the append-only log.
///
/// Inserts keep the `{"Key", "Value"}` shape; the owner is recorded as
/// `UserID`. Soft-deletes are appended as `{"Key", "Deleted": true}` so they
/// survive a restart. A record is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogRecord {
    Insert {
        #[serde(rename = "Key")]
        key: u64,
        #[serde(rename = "Value")]
        value: String,
        #[serde(rename = "UserID", default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    Delete {
        #[serde(rename = "Key")]
        key: u64,
        #[serde(rename = "Deleted")]
        deleted: bool,
    },
}

impl LogRecord {
    pub fn insert(key: u64, value: impl Into<String>, user_id: UserId) -> Self {
        LogRecord::Insert {
            key,
            value: value.into(),
            user_id: Some(user_id),
        }
    }

    pub fn delete(key: u64) -> Self {
        LogRecord::Delete { key, deleted: true }
    }
}

/// Newline-delimited JSON log mirroring an [`InMemoryRepository`][crate::InMemoryRepository].
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileLog {
    /// Opens (or creates) the log at `path` and returns every record it holds.
    ///
    /// A torn final line left by a crash mid-write is cut off. Any other
    /// unparseable line fails with [`StorageError::InvalidData`].
    pub async fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<LogRecord>)> {
        let path = path.as_ref().to_path_buf();

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(io_error(&path, err)),
        };

        let complete_len = contents.rfind('\n').map_or(0, |pos| pos + 1);
        let mut records = parse_lines(&path, &contents[..complete_len])?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|err| io_error(&path, err))?;

        let tail = contents[complete_len..].trim();
        let mut needs_newline = false;
        if !tail.is_empty() {
            match serde_json::from_str::<LogRecord>(tail) {
                Ok(record) => {
                    records.push(record);
                    needs_newline = true;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "dropping torn tail of storage log");
                    file.set_len(complete_len as u64)
                        .await
                        .map_err(|err| io_error(&path, err))?;
                }
            }
        }

        let mut log = Self {
            path,
            writer: BufWriter::new(file),
        };
        if needs_newline {
            log.write(b"\n").await?;
        }

        info!(path = %log.path.display(), records = records.len(), "opened storage log");
        Ok((log, records))
    }

    /// Appends `records` and flushes them to the file.
    pub async fn append(&mut self, records: &[LogRecord]) -> Result<()> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)
                .map_err(|err| StorageError::InvalidData(err.to_string()))?;
            buf.push(b'\n');
        }
        self.write(&buf).await
    }

    /// Flushes buffered bytes and fsyncs the file.
    pub async fn sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .map_err(|err| io_error(&self.path, err))?;
        self.writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|err| io_error(&self.path, err))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|err| io_error(&self.path, err))?;
        self.writer
            .flush()
            .await
            .map_err(|err| io_error(&self.path, err))
    }
}

fn parse_lines(path: &Path, contents: &str) -> Result<Vec<LogRecord>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| {
                StorageError::InvalidData(format!(
                    "{}:{}: malformed log entry: {err}",
                    path.display(),
                    index + 1
                ))
            })
        })
        .collect()
}

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Unavailable(format!("{}: {err}", path.display()))
}
