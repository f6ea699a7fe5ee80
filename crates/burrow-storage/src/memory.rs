use crate::file_log::{FileLog, LogRecord};
use async_trait::async_trait;
use burrow_core::error::{Result, StorageError};
use burrow_core::{Repository, ShortCode, Stats, UrlRecord, UserId, UserUrl};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

/// Everything the repository knows, guarded as one unit.
///
/// Allocation, conflict detection and the ownership append all happen while
/// the lock is held, so concurrent inserts can never share an identifier.
#[derive(Debug)]
struct State {
    records: BTreeMap<u64, UrlRecord>,
    /// Live (not deleted) values to their identifier.
    live: HashMap<String, u64>,
    owners: HashMap<UserId, Vec<u64>>,
    next_index: u64,
    log: Option<FileLog>,
}

impl State {
    fn empty() -> Self {
        Self {
            records: BTreeMap::new(),
            live: HashMap::new(),
            owners: HashMap::new(),
            next_index: 1,
            log: None,
        }
    }

    /// Rebuilds the state from log records, refusing anything the
    /// repository could not have written.
    fn replay(records: Vec<LogRecord>) -> Result<Self> {
        let mut state = Self::empty();
        for record in records {
            match record {
                LogRecord::Insert {
                    key,
                    value,
                    user_id,
                } => {
                    if key == 0 || key == u64::MAX {
                        return Err(StorageError::InvalidData(format!(
                            "log entry uses reserved key {key}"
                        )));
                    }
                    if state.records.contains_key(&key) {
                        return Err(StorageError::InvalidData(format!(
                            "log entry rewrites key {key}"
                        )));
                    }
                    if let Some(existing) = state.live.get(&value) {
                        return Err(StorageError::InvalidData(format!(
                            "log entry {key} duplicates live value of key {existing}"
                        )));
                    }
                    state.insert_record(key, value, user_id);
                }
                LogRecord::Delete { key, deleted } => {
                    if !deleted {
                        return Err(StorageError::InvalidData(format!(
                            "log entry for key {key} clears the deleted flag"
                        )));
                    }
                    if !state.records.contains_key(&key) {
                        return Err(StorageError::InvalidData(format!(
                            "log entry deletes unknown key {key}"
                        )));
                    }
                    state.mark_deleted(key);
                }
            }
        }
        Ok(state)
    }

    /// `id` must be below `u64::MAX` so that its successor is representable.
    fn insert_record(&mut self, id: u64, value: String, owner: Option<UserId>) {
        self.live.insert(value.clone(), id);
        self.records.insert(
            id,
            UrlRecord {
                id,
                value,
                deleted: false,
            },
        );
        if let Some(owner) = owner {
            self.owners.entry(owner).or_default().push(id);
        }
        self.next_index = self.next_index.max(id + 1);
    }

    fn mark_deleted(&mut self, id: u64) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if record.deleted {
            return;
        }
        record.deleted = true;
        if self.live.get(&record.value) == Some(&id) {
            self.live.remove(&record.value);
        }
    }

    /// Writes `records` to the log, if there is one. Must run before the
    /// in-memory state is touched so a failed write changes nothing.
    async fn persist(&mut self, records: &[LogRecord]) -> Result<()> {
        match self.log.as_mut() {
            Some(log) => log.append(records).await,
            None => Ok(()),
        }
    }
}

/// In-memory implementation of the [`Repository`] trait, optionally mirrored
/// to an append-only [`FileLog`].
#[derive(Debug)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    /// Creates a new, purely in-process repository.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::empty()),
        }
    }

    /// Opens a file-backed repository, replaying the log at `path`.
    ///
    /// The next identifier continues after the largest key in the log.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (log, records) = FileLog::open(path).await?;
        let mut state = State::replay(records)?;
        info!(
            path = %log.path().display(),
            records = state.records.len(),
            next_index = state.next_index,
            "replayed storage log"
        );
        state.log = Some(log);
        Ok(Self {
            state: Mutex::new(state),
        })
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_next_index(&self) -> Result<u64> {
        Ok(self.state.lock().await.next_index)
    }

    async fn insert_value(&self, value: &str, user: UserId) -> Result<u64> {
        let mut state = self.state.lock().await;

        if let Some(&id) = state.live.get(value) {
            debug!(id, user = %user, "value already stored");
            return Err(StorageError::Conflict { id });
        }

        let id = state.next_index;
        if id == u64::MAX {
            return Err(StorageError::Unavailable(
                "identifier space exhausted".to_string(),
            ));
        }
        state.persist(&[LogRecord::insert(id, value, user)]).await?;
        state.insert_record(id, value.to_owned(), Some(user));

        trace!(id, user = %user, "inserted value");
        Ok(id)
    }

    async fn insert_batch_values(
        &self,
        values: &[String],
        start_index: u64,
        user: UserId,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;

        if start_index == 0 {
            return Err(StorageError::Batch(
                "start index must be at least 1".to_string(),
            ));
        }
        if start_index < state.next_index {
            return Err(StorageError::StaleIndex {
                start_index,
                next_index: state.next_index,
            });
        }
        start_index
            .checked_add(values.len() as u64)
            .ok_or_else(|| StorageError::Batch("identifier range overflows".to_string()))?;

        let mut seen = HashSet::with_capacity(values.len());
        for value in values {
            if let Some(id) = state.live.get(value) {
                return Err(StorageError::Batch(format!(
                    "value '{value}' is already stored under id {id}"
                )));
            }
            if !seen.insert(value.as_str()) {
                return Err(StorageError::Batch(format!(
                    "value '{value}' appears twice in the batch"
                )));
            }
        }

        let records: Vec<LogRecord> = values
            .iter()
            .zip(start_index..)
            .map(|(value, id)| LogRecord::insert(id, value.as_str(), user))
            .collect();
        state.persist(&records).await?;

        for (value, id) in values.iter().zip(start_index..) {
            state.insert_record(id, value.clone(), Some(user));
        }

        debug!(start_index, count = values.len(), user = %user, "inserted batch");
        Ok(())
    }

    async fn get_value(&self, id: u64, _user: UserId) -> Result<String> {
        let state = self.state.lock().await;
        match state.records.get(&id) {
            None => Err(StorageError::NotFound(id)),
            Some(record) if record.deleted => Err(StorageError::Gone(id)),
            Some(record) => Ok(record.value.clone()),
        }
    }

    async fn get_user_urls(&self, user: UserId, base_url: &str) -> Result<Vec<UserUrl>> {
        let state = self.state.lock().await;

        let urls: Vec<UserUrl> = state
            .owners
            .get(&user)
            .into_iter()
            .flatten()
            .filter_map(|id| state.records.get(id))
            .filter(|record| !record.deleted)
            .map(|record| UserUrl {
                short_url: ShortCode::from_id(record.id).to_url(base_url),
                original_url: record.value.clone(),
            })
            .collect();

        if urls.is_empty() {
            return Err(StorageError::NoContent(user));
        }
        Ok(urls)
    }

    async fn mark_batch_as_deleted(&self, ids: &[u64], user: UserId) -> Result<()> {
        let mut state = self.state.lock().await;

        let Some(owned) = state.owners.get(&user) else {
            trace!(user = %user, "user owns nothing to delete");
            return Ok(());
        };
        let owned: HashSet<u64> = owned.iter().copied().collect();

        let mut targets = Vec::new();
        for id in ids {
            let live = state.records.get(id).is_some_and(|record| !record.deleted);
            if owned.contains(id) && live && !targets.contains(id) {
                targets.push(*id);
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let records: Vec<LogRecord> = targets.iter().map(|id| LogRecord::delete(*id)).collect();
        state.persist(&records).await?;

        for id in &targets {
            state.mark_deleted(*id);
        }

        debug!(
            user = %user,
            deleted = targets.len(),
            requested = ids.len(),
            "marked batch as deleted"
        );
        Ok(())
    }

    async fn get_stats(&self) -> Result<Stats> {
        let state = self.state.lock().await;
        Ok(Stats {
            urls: state.live.len() as u64,
            users: state.owners.len() as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(log) = state.log.as_mut() {
            log.sync().await?;
            info!(path = %log.path().display(), "storage log synced");
        }
        Ok(())
    }
}
