use chrono::{Local, NaiveDateTime};

use crate::models::{Filter, Priority, Stats, Task, TaskId, TasksFile};
use crate::storage::{Storage, StorageError};

#[derive(Debug)]
pub enum StoreError {
    /// Task text was empty after trimming. Nothing changed.
    Validation(String),
    /// A bulk operation found nothing to act on. Nothing changed.
    EmptyOperation(String),
    /// The in-memory change stands but could not be written to disk.
    Persistence(StorageError),
    /// The id counter reached `u64::MAX`. Nothing changed.
    IdsExhausted,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Validation(message) => write!(f, "validation error: {message}"),
            StoreError::EmptyOperation(message) => write!(f, "{message}"),
            StoreError::Persistence(err) => write!(f, "storage error: {err}"),
            StoreError::IdsExhausted => write!(f, "no task ids left"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for StoreError {
    fn from(value: StorageError) -> Self {
        StoreError::Persistence(value)
    }
}

/// The authoritative task list. Every mutation is flushed to `storage` right away;
/// a failed flush is reported but the in-memory change is kept.
#[derive(Debug)]
pub struct TaskStore {
    storage: Storage,
    tasks: Vec<Task>,
    next_id: TaskId,
}

impl TaskStore {
    pub fn new(storage: Storage, data: TasksFile) -> Self {
        let mut store = Self {
            storage,
            tasks: Vec::new(),
            next_id: 1,
        };
        store.install(data);
        store
    }

    /// Loads the collection from `storage`. A missing file starts an empty list.
    pub fn open(storage: Storage) -> Result<Self, StorageError> {
        let data = storage.load_tasks()?;
        log::info!(
            "store: loaded {} task(s) from {}",
            data.tasks.len(),
            storage.data_path().display()
        );
        Ok(Self::new(storage, data))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn next_id(&self) -> TaskId {
        self.next_id
    }

    pub fn tasks_file(&self) -> TasksFile {
        TasksFile {
            next_id: self.next_id,
            tasks: self.tasks.clone(),
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn add(&mut self, text: &str, priority: Priority) -> Result<Task, StoreError> {
        self.add_at(text, priority, Local::now().naive_local())
    }

    fn add_at(
        &mut self,
        text: &str,
        priority: Priority,
        created_at: NaiveDateTime,
    ) -> Result<Task, StoreError> {
        let text = validated_text(text)?;
        let following = self.next_id.checked_add(1).ok_or(StoreError::IdsExhausted)?;
        let task = Task {
            id: self.next_id,
            text,
            priority,
            completed: false,
            created_at,
        };
        self.next_id = following;
        self.tasks.push(task.clone());
        self.flush()?;
        Ok(task)
    }

    /// Flips `completed`. Unknown ids are ignored; the list is flushed either way.
    pub fn toggle(&mut self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let toggled = self.tasks.iter_mut().find(|t| t.id == id).map(|task| {
            task.completed = !task.completed;
            task.clone()
        });
        self.flush()?;
        Ok(toggled)
    }

    pub fn edit(&mut self, id: TaskId, new_text: &str) -> Result<Option<Task>, StoreError> {
        let text = validated_text(new_text)?;
        let edited = self.tasks.iter_mut().find(|t| t.id == id).map(|task| {
            task.text = text;
            task.clone()
        });
        self.flush()?;
        Ok(edited)
    }

    pub fn delete(&mut self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let removed = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .map(|index| self.tasks.remove(index));
        self.flush()?;
        Ok(removed)
    }

    /// Removes every completed task in one batch and returns how many went.
    pub fn clear_completed(&mut self) -> Result<usize, StoreError> {
        let done = self.tasks.iter().filter(|t| t.completed).count();
        if done == 0 {
            return Err(StoreError::EmptyOperation(
                "no completed tasks to clear".to_string(),
            ));
        }
        self.tasks.retain(|task| !task.completed);
        self.flush()?;
        Ok(done)
    }

    /// Display order: open tasks before completed ones, then by priority rank.
    /// Ties keep insertion order and the stored order is never touched.
    pub fn list(&self, filter: Filter) -> impl Iterator<Item = &Task> + '_ {
        let mut view: Vec<&Task> = self.tasks.iter().filter(|t| filter.matches(t)).collect();
        view.sort_by_key(|t| (t.completed, t.priority.rank()));
        view.into_iter()
    }

    pub fn stats(&self) -> Stats {
        let total = self.tasks.len();
        let completed = self.tasks.iter().filter(|t| t.completed).count();
        Stats {
            total,
            active: total - completed,
            completed,
        }
    }

    /// Replaces the whole collection, e.g. after restoring a backup. Not flushed:
    /// the caller has just read `data` from disk. The id counter never moves back.
    pub fn replace_all(&mut self, data: TasksFile) {
        let floor = self.next_id;
        self.tasks.clear();
        self.install(data);
        self.next_id = self.next_id.max(floor);
        log::info!("store: replaced collection with {} task(s)", self.tasks.len());
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        match self.storage.save_tasks(&self.tasks_file()) {
            Ok(()) => {
                log::debug!(
                    "store: flushed {} task(s) to {}",
                    self.tasks.len(),
                    self.storage.data_path().display()
                );
                Ok(())
            }
            Err(err) => {
                log::warn!("store: flush failed, keeping in-memory state: {err}");
                Err(err)
            }
        }
    }

    // Ids must stay unique even if the file was edited by hand or predates the
    // counter, so duplicates are renumbered and the counter is pushed past every id.
    // If there is no room above the highest id, the whole list is renumbered 1..=n.
    fn install(&mut self, data: TasksFile) {
        let count = data.tasks.len() as TaskId;
        let headroom = data
            .tasks
            .iter()
            .try_fold(data.next_id.max(1), |next, task| {
                task.id.checked_add(1).map(|after| next.max(after))
            })
            .filter(|next| next.checked_add(count).is_some());
        let Some(mut next_id) = headroom else {
            log::warn!("store: ids reach the top of the range, renumbering {count} task(s)");
            self.tasks = data
                .tasks
                .into_iter()
                .zip(1..)
                .map(|(task, id)| Task { id, ..task })
                .collect();
            self.next_id = count + 1;
            return;
        };
        for mut task in data.tasks {
            if self.tasks.iter().any(|t| t.id == task.id) {
                log::warn!("store: duplicate id {} renumbered to {next_id}", task.id);
                task.id = next_id;
                next_id += 1;
            }
            self.tasks.push(task);
        }
        self.next_id = next_id;
    }
}

fn validated_text(text: &str) -> Result<String, StoreError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Validation("task text cannot be empty".to_string()));
    }
    Ok(trimmed.to_string())
}
