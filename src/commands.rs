use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::Serialize;

use crate::models::{Filter, Priority, Settings, SettingsFile, Stats, Task, TaskId, TIMESTAMP_FORMAT};
use crate::storage::{write_atomic_bytes, Storage, StorageError};
use crate::store::{StoreError, TaskStore};

const SETTINGS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    EmptyOperation,
    Persistence,
    IdsExhausted,
}

/// Uniform response handed to a presentation layer.
#[derive(Debug, Serialize)]
pub struct CommandResult<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListPayload {
    pub filter: Filter,
    pub tasks: Vec<Task>,
    pub stats: Stats,
}

#[derive(Debug, Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub modified_at: i64,
}

fn ok<T>(data: T) -> CommandResult<T> {
    CommandResult {
        ok: true,
        data: Some(data),
        error: None,
        kind: None,
    }
}

fn err<T>(kind: ErrorKind, message: &str) -> CommandResult<T> {
    CommandResult {
        ok: false,
        data: None,
        error: Some(message.to_string()),
        kind: Some(kind),
    }
}

fn storage_err<T>(error: &StorageError) -> CommandResult<T> {
    err(
        ErrorKind::Persistence,
        &format!("{error}; changes may not survive a restart"),
    )
}

fn store_err<T>(error: StoreError) -> CommandResult<T> {
    match error {
        StoreError::Validation(message) => err(ErrorKind::Validation, &message),
        StoreError::EmptyOperation(message) => err(ErrorKind::EmptyOperation, &message),
        StoreError::Persistence(error) => storage_err(&error),
        StoreError::IdsExhausted => err(
            ErrorKind::IdsExhausted,
            "no task ids left; delete the list or restore a backup",
        ),
    }
}

fn from_store<T>(result: Result<T, StoreError>) -> CommandResult<T> {
    match result {
        Ok(data) => ok(data),
        Err(error) => store_err(error),
    }
}

/// Opens the store. An unreadable file is reported and an empty, unsaved list
/// is returned so the caller can decide whether to carry on.
pub fn open_store(storage: Storage) -> (TaskStore, Option<StorageError>) {
    match TaskStore::open(storage.clone()) {
        Ok(store) => (store, None),
        Err(error) => {
            log::error!(
                "commands: failed to load {}: {error}",
                storage.data_path().display()
            );
            (TaskStore::new(storage, Default::default()), Some(error))
        }
    }
}

pub fn add_task(store: &mut TaskStore, text: &str, priority: Priority) -> CommandResult<Task> {
    from_store(store.add(text, priority))
}

pub fn toggle_task(store: &mut TaskStore, id: TaskId) -> CommandResult<Option<Task>> {
    from_store(store.toggle(id))
}

pub fn edit_task(store: &mut TaskStore, id: TaskId, text: &str) -> CommandResult<Option<Task>> {
    from_store(store.edit(id, text))
}

pub fn delete_task(store: &mut TaskStore, id: TaskId) -> CommandResult<Option<Task>> {
    from_store(store.delete(id))
}

pub fn clear_completed(store: &mut TaskStore) -> CommandResult<usize> {
    from_store(store.clear_completed())
}

pub fn list_tasks(store: &TaskStore, filter: Filter) -> CommandResult<ListPayload> {
    ok(ListPayload {
        filter,
        tasks: store.list(filter).cloned().collect(),
        stats: store.stats(),
    })
}

pub fn stats(store: &TaskStore) -> CommandResult<Stats> {
    ok(store.stats())
}

/// Settings are optional; anything unreadable falls back to defaults.
pub fn load_settings(storage: &Storage) -> Settings {
    match storage.load_settings() {
        Ok(file) => file.settings,
        Err(error) if error.is_not_found() => Settings::default(),
        Err(error) => {
            log::warn!("commands: settings unreadable, using defaults: {error}");
            Settings::default()
        }
    }
}

pub fn update_settings(storage: &Storage, settings: Settings) -> CommandResult<Settings> {
    let file = SettingsFile {
        schema_version: SETTINGS_SCHEMA_VERSION,
        settings,
    };
    if let Err(error) = storage.save_settings(&file) {
        return storage_err(&error);
    }
    ok(file.settings)
}

pub fn list_backups(store: &TaskStore) -> CommandResult<Vec<BackupEntry>> {
    match store.storage().list_backups() {
        Ok(list) => ok(list
            .into_iter()
            .map(|(name, modified_at)| BackupEntry { name, modified_at })
            .collect()),
        Err(error) => storage_err(&error),
    }
}

pub fn create_backup(store: &TaskStore, settings: &Settings) -> CommandResult<String> {
    // The data file may not exist yet on a fresh list.
    if let Err(error) = store.flush() {
        return storage_err(&error);
    }
    match store.storage().create_backup(settings.backup_keep) {
        Ok(name) => {
            log::info!("commands: created backup {name}");
            ok(name)
        }
        Err(error) => storage_err(&error),
    }
}

pub fn restore_backup(store: &mut TaskStore, filename: &str) -> CommandResult<Vec<Task>> {
    let data = match store.storage().restore_backup(filename) {
        Ok(data) => data,
        Err(error) => return storage_err(&error),
    };
    store.replace_all(data);
    // Persist the re-validated ids and counter.
    if let Err(error) = store.flush() {
        return storage_err(&error);
    }
    ok(store.list(Filter::All).cloned().collect())
}

fn export_default_path(root: &Path, ext: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    root.join("exports").join(format!("tasklist-{stamp}.{ext}"))
}

fn csv_escape(value: &str) -> String {
    // Minimal CSV escaping: wrap in quotes and double any existing quotes.
    let escaped = value.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

pub fn render_csv<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> String {
    let mut out = String::new();
    out.push_str("id,text,priority,completed,created_at\n");
    for task in tasks {
        out.push_str(&task.id.to_string());
        out.push(',');
        out.push_str(&csv_escape(&task.text));
        out.push(',');
        out.push_str(task.priority.label());
        out.push(',');
        out.push_str(if task.completed { "true" } else { "false" });
        out.push(',');
        out.push_str(&csv_escape(
            &task.created_at.format(TIMESTAMP_FORMAT).to_string(),
        ));
        out.push('\n');
    }
    out
}

pub fn render_markdown<'a>(tasks: impl IntoIterator<Item = &'a Task>, now: NaiveDateTime) -> String {
    let (done, open): (Vec<&Task>, Vec<&Task>) = tasks.into_iter().partition(|t| t.completed);

    let mut out = String::new();
    out.push_str("# Task List\n\n");
    out.push_str(&format!("Generated at: {}\n\n", now.format(TIMESTAMP_FORMAT)));

    let mut write_section = |title: &str, tasks: &[&Task], checked: bool| {
        out.push_str(&format!("## {title}\n\n"));
        if tasks.is_empty() {
            out.push_str("_Empty_\n\n");
            return;
        }
        let box_mark = if checked { "x" } else { " " };
        for task in tasks {
            let text = task.text.replace("\r\n", "\n").replace('\n', " ");
            out.push_str(&format!("- [{box_mark}] {text} ({})\n", task.priority));
        }
        out.push('\n');
    };

    write_section("Active", &open, false);
    write_section("Completed", &done, true);
    out
}

pub fn export_csv(store: &TaskStore) -> CommandResult<String> {
    let path = export_default_path(&store.storage().root(), "csv");
    let csv = render_csv(store.list(Filter::All));
    if let Err(error) = write_atomic_bytes(&path, csv.as_bytes()) {
        return storage_err(&error);
    }
    ok(path.to_string_lossy().to_string())
}

pub fn export_markdown(store: &TaskStore) -> CommandResult<String> {
    let path = export_default_path(&store.storage().root(), "md");
    let md = render_markdown(store.list(Filter::All), Local::now().naive_local());
    if let Err(error) = write_atomic_bytes(&path, md.as_bytes()) {
        return storage_err(&error);
    }
    ok(path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DEFAULT_DATA_FILE;
    use chrono::NaiveDate;
    use std::fs;

    fn make_store() -> (tempfile::TempDir, TaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join(DEFAULT_DATA_FILE));
        let (store, error) = open_store(storage);
        assert!(error.is_none());
        (dir, store)
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 4)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn ok_and_err_helpers_construct_expected_shape() {
        let res = ok(1);
        assert!(res.ok);
        assert_eq!(res.data, Some(1));
        assert!(res.error.is_none() && res.kind.is_none());

        let res: CommandResult<i32> = err(ErrorKind::Validation, "boom");
        assert!(!res.ok);
        assert!(res.data.is_none());
        assert_eq!(res.error.as_deref(), Some("boom"));
        assert_eq!(res.kind, Some(ErrorKind::Validation));

        let value = serde_json::to_value(&res).unwrap();
        assert_eq!(value["kind"], "validation");
    }

    #[test]
    fn task_commands_map_store_errors_to_kinds() {
        let (_dir, mut store) = make_store();

        let res = add_task(&mut store, "  ", Priority::High);
        assert_eq!(res.kind, Some(ErrorKind::Validation));

        let res = add_task(&mut store, "Call mom", Priority::High);
        assert!(res.ok);
        let id = res.data.unwrap().id;

        let res = clear_completed(&mut store);
        assert_eq!(res.kind, Some(ErrorKind::EmptyOperation));

        assert!(toggle_task(&mut store, id).data.unwrap().unwrap().completed);
        // Unknown ids are not errors.
        let res = toggle_task(&mut store, 77);
        assert!(res.ok && res.data.unwrap().is_none());

        let res = edit_task(&mut store, id, "Call dad");
        assert_eq!(res.data.unwrap().unwrap().text, "Call dad");
        assert_eq!(edit_task(&mut store, id, "").kind, Some(ErrorKind::Validation));

        assert_eq!(clear_completed(&mut store).data, Some(1));
        assert!(delete_task(&mut store, id).data.unwrap().is_none());
        assert_eq!(stats(&store).data.unwrap().total, 0);
    }

    #[test]
    fn persistence_failure_is_reported_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_DATA_FILE);
        let (mut store, error) = open_store(Storage::new(path.clone()));
        assert!(error.is_none());
        fs::create_dir_all(&path).unwrap();

        let res = add_task(&mut store, "unsaved", Priority::Low);
        assert!(!res.ok);
        assert_eq!(res.kind, Some(ErrorKind::Persistence));
        assert!(res.error.unwrap().contains("may not survive a restart"));
        assert_eq!(store.stats().total, 1);
    }

    #[test]
    fn exhausted_id_counter_is_its_own_error_kind() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join(DEFAULT_DATA_FILE));
        let data = crate::models::TasksFile {
            next_id: u64::MAX,
            tasks: Vec::new(),
        };
        let mut store = TaskStore::new(storage, data);
        let res = add_task(&mut store, "late", Priority::Medium);
        assert_eq!(res.kind, Some(ErrorKind::IdsExhausted));
        assert_eq!(store.stats().total, 0);
        assert_eq!(
            serde_json::to_value(&res).unwrap()["kind"],
            "ids_exhausted"
        );
    }

    #[test]
    fn open_store_reports_corrupt_file_and_continues_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_DATA_FILE);
        fs::write(&path, b"garbage").unwrap();
        let (store, error) = open_store(Storage::new(path.clone()));
        assert!(matches!(error, Some(StorageError::Corrupt { .. })));
        assert_eq!(store.stats().total, 0);
        // The unreadable file is left alone until something is saved.
        assert_eq!(fs::read(&path).unwrap(), b"garbage");
    }

    #[test]
    fn list_tasks_returns_sorted_view_with_stats() {
        let (_dir, mut store) = make_store();
        store.add("Buy milk", Priority::Medium).unwrap();
        store.add("Call mom", Priority::High).unwrap();
        store.toggle(1).unwrap();

        let payload = list_tasks(&store, Filter::All).data.unwrap();
        let texts: Vec<_> = payload.tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Call mom", "Buy milk"]);
        assert_eq!(
            payload.stats,
            Stats {
                total: 2,
                active: 1,
                completed: 1
            }
        );

        let active = list_tasks(&store, Filter::Active).data.unwrap();
        assert_eq!(active.tasks.len(), 1);
        assert_eq!(active.stats.total, 2);
    }

    #[test]
    fn settings_default_when_missing_or_corrupt_and_persist_updates() {
        let (dir, store) = make_store();
        let storage = store.storage();
        assert_eq!(load_settings(storage).backup_keep, 5);

        fs::write(dir.path().join("settings.json"), b"{").unwrap();
        assert_eq!(load_settings(storage).default_filter, Filter::All);

        let mut settings = Settings::default();
        settings.default_priority = Priority::High;
        assert!(update_settings(storage, settings).ok);
        assert_eq!(load_settings(storage).default_priority, Priority::High);
    }

    #[test]
    fn backup_commands_create_list_and_restore() {
        let (_dir, mut store) = make_store();
        assert!(list_backups(&store).data.unwrap().is_empty());

        // A fresh list is flushed before it is copied.
        store.add("keep me", Priority::High).unwrap();
        let name = create_backup(&store, &Settings::default()).data.unwrap();
        assert_eq!(list_backups(&store).data.unwrap().len(), 1);

        store.add("later", Priority::Low).unwrap();
        store.toggle(1).unwrap();
        let restored = restore_backup(&mut store, &name).data.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].text, "keep me");
        assert!(!restored[0].completed);
        // Ids handed out after the backup are not reused.
        assert_eq!(store.add("next", Priority::Low).unwrap().id, 3);

        let res = restore_backup(&mut store, "nope.json");
        assert_eq!(res.kind, Some(ErrorKind::Persistence));
    }

    #[test]
    fn render_csv_quotes_text_fields() {
        let task = Task {
            id: 4,
            text: "say \"hi\", then leave".into(),
            priority: Priority::Low,
            completed: true,
            created_at: noon(),
        };
        assert_eq!(
            render_csv([&task]),
            "id,text,priority,completed,created_at\n\
             4,\"say \"\"hi\"\", then leave\",Low,true,\"2024-05-04 12:00:00\"\n"
        );
    }

    #[test]
    fn render_markdown_splits_active_and_completed() {
        let open = Task {
            id: 1,
            text: "line one\nline two".into(),
            priority: Priority::High,
            completed: false,
            created_at: noon(),
        };
        let done = Task {
            id: 2,
            text: "done".into(),
            priority: Priority::Medium,
            completed: true,
            created_at: noon(),
        };
        let md = render_markdown([&open, &done], noon());
        assert!(md.starts_with("# Task List\n\nGenerated at: 2024-05-04 12:00:00\n\n"));
        assert!(md.contains("## Active\n\n- [ ] line one line two (High)\n"));
        assert!(md.contains("## Completed\n\n- [x] done (Medium)\n"));

        let empty = render_markdown(std::iter::empty(), noon());
        assert!(empty.contains("## Active\n\n_Empty_"));
    }

    #[test]
    fn export_commands_write_files_and_return_paths() {
        let (_dir, mut store) = make_store();
        store.add("export me", Priority::Medium).unwrap();

        let csv_path = export_csv(&store).data.unwrap();
        let csv = fs::read_to_string(&csv_path).unwrap();
        assert!(csv.contains("\"export me\""));

        let md_path = export_markdown(&store).data.unwrap();
        assert!(md_path.ends_with(".md"));
        assert!(fs::read_to_string(&md_path).unwrap().contains("- [ ] export me (Medium)"));
    }

    #[test]
    fn export_fails_when_exports_path_is_a_file() {
        let (dir, store) = make_store();
        fs::write(dir.path().join("exports"), b"x").unwrap();
        assert_eq!(export_csv(&store).kind, Some(ErrorKind::Persistence));
    }
}
