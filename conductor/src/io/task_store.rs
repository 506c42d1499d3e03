//! One JSON record per task under `.conductor/tasks/<id>.json`.
//!
//! Records are schema-checked on load and written atomically. Saves carry an
//! optimistic revision check so a record edited since it was loaded is
//! reported as [`StaleTask`] instead of being overwritten.

use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::Validator;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::invariants::{validate_id, validate_task, validate_task_set};
use crate::error::{ConfigurationError, StaleTask};
use crate::task::Task;

const TASK_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/task.schema.json"
));

/// Durable task storage.
pub trait TaskStore {
    /// Load one record; `Ok(None)` if no record has that id.
    fn load(&self, id: &str) -> Result<Option<Task>>;

    /// Load every record, sorted by id. Any malformed record fails the call.
    fn load_all(&self) -> Result<Vec<Task>>;

    /// Persist an existing record.
    ///
    /// The stored revision must equal `task.revision`; on success the
    /// revision is bumped in both the record and `task`.
    fn save(&self, task: &mut Task) -> Result<()>;

    /// Persist a new record. Fails if the id is taken.
    fn insert(&self, task: &mut Task) -> Result<()>;
}

/// [`TaskStore`] backed by a directory of JSON files.
pub struct FsTaskStore {
    dir: PathBuf,
    validator: Validator,
}

impl FsTaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let schema: Value = serde_json::from_str(TASK_SCHEMA).context("parse task schema")?;
        let validator =
            jsonschema::validator_for(&schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
        Ok(Self {
            dir: dir.into(),
            validator,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn read_record(&self, path: &Path) -> Result<Task> {
        let malformed = |reason: String| ConfigurationError::MalformedTask {
            path: path.display().to_string(),
            reason,
        };

        let contents =
            fs::read_to_string(path).with_context(|| format!("read task {}", path.display()))?;
        let value: Value =
            serde_json::from_str(&contents).map_err(|err| malformed(err.to_string()))?;
        let errors: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(malformed(format!("schema: {}", errors.join("; "))).into());
        }
        let task: Task =
            serde_json::from_value(value).map_err(|err| malformed(err.to_string()))?;

        let invariants = validate_task(&task);
        if !invariants.is_empty() {
            return Err(malformed(invariants.join("; ")).into());
        }
        if path.file_stem() != Some(OsStr::new(&task.id)) {
            return Err(malformed(format!("file name does not match id '{}'", task.id)).into());
        }
        Ok(task)
    }

    fn stored_revision(&self, path: &Path) -> Result<Option<u64>> {
        match fs::metadata(path) {
            Ok(_) => Ok(Some(self.read_record(path)?.revision)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("stat {}", path.display())),
        }
    }

    fn write_record(&self, path: &Path, task: &mut Task) -> Result<()> {
        let previous = task.revision;
        task.revision += 1;
        let written = super::to_json_pretty(task)
            .and_then(|json| super::write_atomic(path, json.as_bytes()));
        if written.is_err() {
            task.revision = previous;
        }
        written.with_context(|| format!("write task {}", path.display()))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create task directory {}", self.dir.display()))
    }

    fn check_writable(&self, task: &Task) -> Result<()> {
        validate_id(&task.id).map_err(|reason| ConfigurationError::MalformedTask {
            path: self.path_for(&task.id).display().to_string(),
            reason,
        })?;
        let errors = validate_task(task);
        if !errors.is_empty() {
            return Err(ConfigurationError::InvalidTaskSet(errors).into());
        }
        Ok(())
    }
}

impl TaskStore for FsTaskStore {
    fn load(&self, id: &str) -> Result<Option<Task>> {
        if validate_id(id).is_err() {
            return Ok(None);
        }
        let path = self.path_for(id);
        match fs::metadata(&path) {
            Ok(_) => self.read_record(&path).map(Some),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("stat {}", path.display())),
        }
    }

    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    fn load_all(&self) -> Result<Vec<Task>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("list tasks {}", self.dir.display()));
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("list tasks {}", self.dir.display()))?
                .path();
            if path.extension() == Some(OsStr::new("json")) && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut tasks = paths
            .iter()
            .map(|path| self.read_record(path))
            .collect::<Result<Vec<_>>>()?;
        tasks.sort_by(|a, b| a.id.cmp(&b.id));

        let errors = validate_task_set(&tasks);
        if !errors.is_empty() {
            return Err(ConfigurationError::InvalidTaskSet(errors).into());
        }
        debug!(count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    fn save(&self, task: &mut Task) -> Result<()> {
        self.check_writable(task)?;
        let path = self.path_for(&task.id);
        self.ensure_dir()?;
        let _lock = WriteLock::acquire(&path, &task.id, task.revision)?;
        let found = self.stored_revision(&path)?;
        if found != Some(task.revision) {
            warn!(task_id = %task.id, expected = task.revision, ?found, "stale task record");
            return Err(StaleTask {
                task_id: task.id.clone(),
                expected: task.revision,
                found,
            }
            .into());
        }
        self.write_record(&path, task)
    }

    fn insert(&self, task: &mut Task) -> Result<()> {
        self.check_writable(task)?;
        let path = self.path_for(&task.id);
        self.ensure_dir()?;
        let _lock = WriteLock::acquire(&path, &task.id, task.revision)?;
        if self.stored_revision(&path)?.is_some() {
            return Err(anyhow!("task {} already exists", task.id));
        }
        task.revision = 0;
        self.write_record(&path, task)
    }
}

/// A lock older than this was left behind by a writer that died mid-save.
///
/// Locks are only held across one read and one small write.
const ORPHANED_LOCK_AGE: Duration = Duration::from_secs(30);

/// Exclusive `<record>.lock` file held across a check-and-write.
struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    fn acquire(record: &Path, task_id: &str, expected: u64) -> Result<Self> {
        let mut name = record.as_os_str().to_os_string();
        name.push(".lock");
        let path = PathBuf::from(name);

        let created = match create_lock(&path) {
            Err(err) if err.kind() == ErrorKind::AlreadyExists && is_orphaned(&path) => {
                warn!(lock = %path.display(), "breaking orphaned task lock");
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(err)
                            .with_context(|| format!("remove lock {}", path.display()));
                    }
                }
                create_lock(&path)
            }
            other => other,
        };
        match created {
            Ok(()) => Ok(Self { path }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                warn!(lock = %path.display(), "task record locked by another writer");
                Err(StaleTask {
                    task_id: task_id.to_string(),
                    expected,
                    found: None,
                }
                .into())
            }
            Err(err) => Err(err).with_context(|| format!("create lock {}", path.display())),
        }
    }
}

fn create_lock(path: &Path) -> std::io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(drop)
}

fn is_orphaned(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= ORPHANED_LOCK_AGE)
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), err = %err, "failed to release task lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use crate::test_support::{task, task_with_deps};

    fn store() -> (tempfile::TempDir, FsTaskStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FsTaskStore::new(temp.path().join("tasks")).expect("store");
        (temp, store)
    }

    #[test]
    fn insert_then_load_round_trips() {
        let (_temp, store) = store();
        let mut t = task_with_deps("b", 3, &["a"]);
        t.files = vec!["grok/x.py".to_string()];
        store.insert(&mut t).expect("insert");
        assert_eq!(t.revision, 1);

        let loaded = store.load("b").expect("load").expect("present");
        assert_eq!(loaded, t);
        assert!(store.load("missing").expect("load").is_none());
    }

    #[test]
    fn records_are_pretty_json_with_trailing_newline() {
        let (_temp, store) = store();
        let mut t = task("a", 1);
        store.insert(&mut t).expect("insert");
        let raw = fs::read_to_string(store.dir().join("a.json")).expect("read");
        assert!(raw.starts_with("{\n  \"id\": \"a\""));
        assert!(raw.ends_with("}\n"));
        assert!(!raw.contains("blocked_by"));
    }

    #[test]
    fn load_all_sorts_by_id_and_skips_other_files() {
        let (_temp, store) = store();
        store.insert(&mut task("c", 1)).expect("c");
        store.insert(&mut task("a", 1)).expect("a");
        fs::write(store.dir().join("notes.txt"), "ignore me").expect("notes");
        let ids: Vec<String> = store
            .load_all()
            .expect("load")
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let (_temp, store) = store();
        assert!(store.load_all().expect("load").is_empty());
    }

    #[test]
    fn save_detects_concurrent_edit() {
        let (_temp, store) = store();
        let mut t = task("a", 1);
        store.insert(&mut t).expect("insert");

        let mut first = store.load("a").expect("load").expect("present");
        let mut second = first.clone();
        first.priority = 2;
        store.save(&mut first).expect("first save");
        assert_eq!(first.revision, 2);

        second.status = TaskStatus::Completed;
        let err = store.save(&mut second).unwrap_err();
        let stale = err.downcast_ref::<StaleTask>().expect("stale");
        assert_eq!(stale.expected, 1);
        assert_eq!(stale.found, Some(2));
        assert_eq!(second.revision, 1);
        assert_eq!(store.load("a").expect("load").expect("present").priority, 2);
    }

    #[test]
    fn insert_refuses_existing_id() {
        let (_temp, store) = store();
        store.insert(&mut task("a", 1)).expect("insert");
        let err = store.insert(&mut task("a", 2)).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn held_lock_reports_stale() {
        let (_temp, store) = store();
        let mut t = task("a", 1);
        store.insert(&mut t).expect("insert");
        fs::write(store.dir().join("a.json.lock"), "").expect("lock");
        let err = store.save(&mut t).unwrap_err();
        assert!(err.downcast_ref::<StaleTask>().is_some());
    }

    #[test]
    fn orphaned_lock_is_broken() {
        let (_temp, store) = store();
        let mut t = task("a", 1);
        store.insert(&mut t).expect("insert");
        let lock = store.dir().join("a.json.lock");
        let file = fs::File::create(&lock).expect("lock");
        let past = std::time::SystemTime::now() - Duration::from_secs(120);
        file.set_modified(past).expect("backdate lock");
        drop(file);

        t.priority = 7;
        store.save(&mut t).expect("save past orphaned lock");
        assert_eq!(store.load("a").expect("load").expect("present").priority, 7);
        assert!(!lock.exists());
    }

    #[test]
    fn insert_creates_missing_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("nested").join("tasks");
        let store = FsTaskStore::new(&dir).expect("store");
        assert!(store.load_all().expect("load").is_empty());
        store.insert(&mut task("a", 1)).expect("insert");
        assert!(dir.join("a.json").is_file());
    }

    #[test]
    fn malformed_record_is_configuration_error() {
        let (_temp, store) = store();
        fs::create_dir_all(store.dir()).expect("dir");
        fs::write(
            store.dir().join("bad.json"),
            r#"{"id": "bad", "description": "x", "assignee": "a", "updated_at": "2024-01-01T00:00:00Z", "priority": "high"}"#,
        )
        .expect("write");
        let err = store.load_all().unwrap_err();
        let cfg = err.downcast_ref::<ConfigurationError>().expect("config error");
        assert!(matches!(cfg, ConfigurationError::MalformedTask { .. }));
        assert!(cfg.to_string().contains("schema"));
    }

    #[test]
    fn record_must_live_under_its_own_id() {
        let (_temp, store) = store();
        let mut t = task("a", 1);
        store.insert(&mut t).expect("insert");
        fs::rename(store.dir().join("a.json"), store.dir().join("b.json")).expect("rename");
        let err = store.load_all().unwrap_err();
        assert!(err.to_string().contains("does not match id 'a'"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let (_temp, store) = store();
        fs::create_dir_all(store.dir()).expect("dir");
        fs::write(
            store.dir().join("x.json"),
            r#"{"id": "x", "description": "d", "assignee": "a", "updated_at": "2024-01-01T00:00:00Z", "owner": "me"}"#,
        )
        .expect("write");
        assert!(store.load("x").is_err());
    }
}
