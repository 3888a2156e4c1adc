use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::models::{SettingsFile, Task, TasksFile};

pub const DEFAULT_DATA_FILE: &str = "tasks.json";
const SETTINGS_FILE: &str = "settings.json";
const BACKUP_DIR: &str = "backups";

#[derive(Debug)]
pub enum StorageError {
    /// The file does not exist. Callers decide whether that means "empty".
    NotFound(PathBuf),
    /// The file exists but its contents do not describe what was asked for.
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::NotFound(path) => write!(f, "{} does not exist", path.display()),
            StorageError::Corrupt { path, source } => {
                write!(f, "{} is unreadable: {source}", path.display())
            }
            StorageError::Io(err) => write!(f, "io error: {err}"),
            StorageError::Json(err) => write!(f, "serialization error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::NotFound(_) => None,
            StorageError::Corrupt { source, .. } => Some(source),
            StorageError::Io(err) => Some(err),
            StorageError::Json(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        StorageError::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        StorageError::Json(value)
    }
}

fn read_value(path: &Path) -> Result<Value, StorageError> {
    let text = fs::read_to_string(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound(path.to_path_buf()),
        _ => StorageError::Io(err),
    })?;
    serde_json::from_str(&text).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    serde_json::from_value(read_value(path)?).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

// Files written before the counter existed hold a bare array of tasks.
fn read_tasks_file(path: &Path) -> Result<TasksFile, StorageError> {
    let value = read_value(path)?;
    let parsed = if value.is_array() {
        serde_json::from_value::<Vec<Task>>(value).map(|tasks| TasksFile { next_id: 0, tasks })
    } else {
        serde_json::from_value::<TasksFile>(value)
    };
    parsed.map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// File-backed persistence for one task list. Settings, backups and exports
/// live next to the data file.
#[derive(Debug, Clone)]
pub struct Storage {
    data_path: PathBuf,
}

impl Storage {
    pub fn new(data_path: PathBuf) -> Self {
        Self { data_path }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn root(&self) -> PathBuf {
        match self.data_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root().join(SETTINGS_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root().join(BACKUP_DIR)
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.root())?;
        Ok(())
    }

    /// A missing data file is the first-run case and yields an empty list.
    pub fn load_tasks(&self) -> Result<TasksFile, StorageError> {
        match read_tasks_file(&self.data_path) {
            Err(err) if err.is_not_found() => Ok(TasksFile::default()),
            other => other,
        }
    }

    pub fn save_tasks(&self, data: &TasksFile) -> Result<(), StorageError> {
        write_atomic(&self.data_path, data)
    }

    pub fn load_settings(&self) -> Result<SettingsFile, StorageError> {
        read_json(&self.settings_path())
    }

    pub fn save_settings(&self, data: &SettingsFile) -> Result<(), StorageError> {
        write_atomic(&self.settings_path(), data)
    }

    /// Copies the current data file into `backups/` and keeps the newest `keep` copies.
    pub fn create_backup(&self, keep: usize) -> Result<String, StorageError> {
        let dir = self.backup_dir();
        fs::create_dir_all(&dir)?;
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let stem = self
            .data_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("tasks");
        let backup_name = format!("{stem}-{timestamp}.json");
        fs::copy(&self.data_path, dir.join(&backup_name))?;
        self.trim_backups(keep)?;
        Ok(backup_name)
    }

    pub fn list_backups(&self) -> Result<Vec<(String, i64)>, StorageError> {
        let dir = self.backup_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|entry| entry.ok()).collect();
        entries.sort_by_key(|entry| (entry.metadata().and_then(|m| m.modified()).ok(), entry.file_name()));
        let mut results = Vec::new();
        for entry in entries {
            if let Some(name) = entry.file_name().to_str() {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|dur| dur.as_secs() as i64)
                    .unwrap_or(0);
                results.push((name.to_string(), modified));
            }
        }
        Ok(results)
    }

    /// Reads a backup, writes it over the data file and returns it.
    pub fn restore_backup(&self, filename: &str) -> Result<TasksFile, StorageError> {
        if filename.is_empty() || filename.contains(['/', '\\']) || filename == ".." {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid backup name: {filename}"),
            )));
        }
        let data = read_tasks_file(&self.backup_dir().join(filename))?;
        self.save_tasks(&data)?;
        Ok(data)
    }

    fn trim_backups(&self, keep: usize) -> Result<(), StorageError> {
        let mut entries: Vec<_> = fs::read_dir(self.backup_dir())?
            .filter_map(|entry| entry.ok())
            .collect();
        entries.sort_by_key(|entry| (entry.metadata().and_then(|m| m.modified()).ok(), entry.file_name()));
        let to_remove = entries.len().saturating_sub(keep.max(1));
        for entry in entries.into_iter().take(to_remove) {
            if let Err(err) = fs::remove_file(entry.path()) {
                log::warn!("storage: failed to trim backup {}: {err}", entry.path().display());
            }
        }
        Ok(())
    }
}

pub fn write_atomic<T: Serialize>(path: &Path, data: &T) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(data)?;
    write_atomic_bytes(path, &json)
}

/// Writes to a sibling temp file, syncs it, then renames over `path`.
pub fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(temp_path, path)?;
    Ok(())
}
