// Task store: the read interface the notifier consumes, plus the status write
// path used by the CRUD layer. Tasks are persisted to tasks.json, guarded by an
// advisory lock on a sidecar file.

use crate::notifier::task::{Task, TaskError, TaskId, TaskStatus};
use fs2::FileExt;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

/// Errors surfaced by a task store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("task {id} in {} is not a valid record: {source}", path.display())]
    InvalidRecord {
        path: PathBuf,
        id: TaskId,
        #[source]
        source: serde_json::Error,
    },
    #[error("task store lock poisoned")]
    Poisoned,
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Read/write access to task records.
///
/// Implementations are synchronous; async callers go through
/// `tokio::task::spawn_blocking`.
pub trait TaskStore: Send + Sync {
    /// All tasks with the given status at the query instant
    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;

    /// Change a task's status. Only the CRUD layer calls this.
    fn set_status(&self, id: &TaskId, status: TaskStatus) -> Result<(), StoreError>;
}

/// In-process task store
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<Vec<Task>>,
}

impl MemoryTaskStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }

    /// Insert a task, replacing any existing task with the same id
    pub fn upsert(&self, task: Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::Poisoned)?;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => tasks.push(task),
        }
        Ok(())
    }

    pub fn remove(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::Poisoned)?;
        Ok(tasks
            .iter()
            .position(|t| &t.id == id)
            .map(|idx| tasks.remove(idx)))
    }
}

impl TaskStore for MemoryTaskStore {
    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tasks.iter().filter(|t| t.status == status).cloned().collect())
    }

    fn set_status(&self, id: &TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| StoreError::Poisoned)?;
        let task = tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        task.status = status;
        Ok(())
    }
}

/// Task store backed by a JSON array of task records on disk.
///
/// Every call re-reads the file, so edits made by other processes are
/// visible on the next query.
#[derive(Debug, Clone)]
pub struct JsonFileTaskStore {
    path: PathBuf,
}

impl JsonFileTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("tasks.json");
        self.path.with_file_name(format!(".{}.lock", name))
    }

    fn io_err(&self, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Open the sidecar lock file, creating the parent directory if needed
    fn open_lock(&self) -> Result<File, StoreError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(parent, e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| self.io_err(&lock_path, e))
    }

    /// Load every task record. A missing or empty file is an empty store.
    ///
    /// Records that do not decode as a task are skipped with a warning so
    /// one bad entry cannot hide the rest of the file.
    pub fn load_all(&self) -> Result<Vec<Task>, StoreError> {
        let lock = self.open_lock()?;
        lock.lock_shared()
            .map_err(|e| self.io_err(&self.lock_path(), e))?;
        let records = self.read_unlocked();
        // Lock is released when `lock` is dropped
        drop(lock);

        Ok(records?
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| match serde_json::from_value::<Task>(record) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        index,
                        error = %e,
                        "skipping undecodable task record"
                    );
                    None
                }
            })
            .collect())
    }

    /// Raw records as stored, so writes keep entries this code cannot decode
    fn read_unlocked(&self) -> Result<Vec<Value>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(&self.path, e)),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the whole task file
    pub fn save_all(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()
            .map_err(|e| self.io_err(&self.lock_path(), e))?;
        self.write_unlocked(tasks)
    }

    fn write_unlocked<T: serde::Serialize>(&self, records: &[T]) -> Result<(), StoreError> {
        let contents =
            serde_json::to_string_pretty(records).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;
        atomic_write(&self.path, &contents).map_err(|e| self.io_err(&self.path, e))
    }

    /// Fetch a single task by id
    pub fn get(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.load_all()?
            .into_iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))
    }

    /// Read-modify-write one task under the exclusive lock.
    ///
    /// Nothing is written when `f` fails. Other records, and fields of this
    /// one that `Task` does not model, are written back untouched.
    pub fn update<R>(
        &self,
        id: &TaskId,
        f: impl FnOnce(&mut Task) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()
            .map_err(|e| self.io_err(&self.lock_path(), e))?;

        let mut records = self.read_unlocked()?;
        let record = records
            .iter_mut()
            .find(|r| r.get("id").and_then(Value::as_str) == Some(id.as_str()))
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;

        let mut task: Task =
            serde_json::from_value(record.clone()).map_err(|source| StoreError::InvalidRecord {
                path: self.path.clone(),
                id: id.clone(),
                source,
            })?;
        let result = f(&mut task)?;

        let updated = serde_json::to_value(&task).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        if let (Value::Object(stored), Value::Object(updated)) = (record, updated) {
            if updated.contains_key("endDate") {
                stored.remove("end_date");
            }
            stored.extend(updated);
        }

        self.write_unlocked(&records)?;
        Ok(result)
    }
}

impl TaskStore for JsonFileTaskStore {
    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    fn set_status(&self, id: &TaskId, status: TaskStatus) -> Result<(), StoreError> {
        self.update(id, |task| {
            task.status = status;
            Ok(())
        })
    }
}

/// Atomically save data to a file using write-to-temp + rename
/// so readers never observe a half-written task file
pub fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid path: {}", path.display()),
        )
    })?;

    // Temp file in the same directory keeps the rename on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown"),
        std::process::id()
    ));

    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)
}
