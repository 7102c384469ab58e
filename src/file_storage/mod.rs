//! File-based storage helpers
//!
//! Runtime state that must survive restarts (anti-thrash counters, the JSON
//! kanban, the instance identity) is persisted as pretty-printed JSON files.
//!
//! ## Storage Locations
//!
//! Repository-local storage (`.fleet/` in the repository root):
//! - `config.yaml` - Orchestrator configuration
//! - `tasks.json` - JSON kanban used by the file task backend
//! - `state/` - Runtime executor state (gitignored)
//!
//! Global user storage (`~/.fleet/`):
//! - `instance-id` - Stable identity of this workstation

use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Common file operations result type
pub type FileResult<T> = Result<T, String>;

/// Get the global .fleet directory in user home
pub fn get_global_fleet_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fleet")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Write data to a file atomically (temp file + rename)
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    fs::write(&temp_path, content)
        .map_err(|e| format!("Failed to write temp file {:?}: {}", temp_path, e))?;

    fs::rename(&temp_path, path)
        .map_err(|e| format!("Failed to rename {:?} to {:?}: {}", temp_path, path, e))?;

    Ok(())
}

/// Read a JSON file and deserialize it
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read file {:?}: {}", path, e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse JSON from {:?}: {}", path, e))
}

/// Read a JSON file, returning the default value when it does not exist
pub fn read_json_or_default<T>(path: &Path) -> FileResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    read_json(path)
}

/// Write data as pretty-printed JSON atomically
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;

    atomic_write(path, &content)
}

/// Run `f` while holding an exclusive advisory lock on `<path>.lock`.
///
/// Guards read-modify-write cycles on files that several processes on the
/// same checkout may touch (the kanban file, the anti-thrash store).
pub fn with_file_lock<T, F>(path: &Path, f: F) -> FileResult<T>
where
    F: FnOnce() -> FileResult<T>,
{
    let lock_path = path.with_extension("lock");
    if let Some(parent) = lock_path.parent() {
        ensure_dir(parent)?;
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| format!("Failed to open lock file {:?}: {}", lock_path, e))?;

    lock_file
        .lock_exclusive()
        .map_err(|e| format!("Failed to lock {:?}: {}", lock_path, e))?;

    let result = f();

    if let Err(e) = lock_file.unlock() {
        log::warn!("Failed to unlock {:?}: {}", lock_path, e);
    }

    result
}

/// Initialize the .fleet directory for a repository with .gitignore
pub fn init_fleet_dir(repo_root: &Path) -> FileResult<PathBuf> {
    let fleet_dir = crate::utils::fleet_dir(repo_root);
    ensure_dir(&fleet_dir)?;
    ensure_dir(&fleet_dir.join("state"))?;

    let gitignore_path = fleet_dir.join(".gitignore");
    if !gitignore_path.exists() {
        let gitignore_content = r#"# Runtime files (not for sharing)
*.lock
*.tmp
state/
"#;
        fs::write(&gitignore_path, gitignore_content)
            .map_err(|e| format!("Failed to write .gitignore: {}", e))?;
    }

    Ok(fleet_dir)
}

/// Load the persisted instance id from `dir/instance-id`, generating and
/// storing a new UUID on first use.
pub fn load_or_create_instance_id(dir: &Path) -> FileResult<String> {
    let path = dir.join("instance-id");
    if let Ok(existing) = fs::read_to_string(&path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    atomic_write(&path, &id)?;
    log::info!("Generated new instance id {}", id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_ensure_dir() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("c");

        assert!(!nested_path.exists());
        ensure_dir(&nested_path).unwrap();
        assert!(nested_path.exists());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("state").join("test.json");

        atomic_write(&file_path, "{}").unwrap();

        assert!(file_path.exists());
        assert!(!file_path.with_extension("tmp").exists());
    }

    #[test]
    fn test_read_write_json() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        write_json(&file_path, &data).unwrap();
        let read_data: TestData = read_json(&file_path).unwrap();

        assert_eq!(data, read_data);
    }

    #[test]
    fn test_read_json_or_default_missing() {
        let temp_dir = TempDir::new().unwrap();
        let data: TestData = read_json_or_default(&temp_dir.path().join("missing.json")).unwrap();
        assert_eq!(data, TestData::default());
    }

    #[test]
    fn test_read_json_reports_parse_errors() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("broken.json");
        fs::write(&file_path, "{not json").unwrap();

        let result: FileResult<TestData> = read_json(&file_path);
        assert!(result.unwrap_err().contains("Failed to parse JSON"));
    }

    #[test]
    fn test_with_file_lock_returns_inner_result() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("data.json");

        let value = with_file_lock(&file_path, || Ok(7)).unwrap();
        assert_eq!(value, 7);
        assert!(file_path.with_extension("lock").exists());

        let err: FileResult<()> = with_file_lock(&file_path, || Err("inner".to_string()));
        assert_eq!(err.unwrap_err(), "inner");
    }

    #[test]
    fn test_init_fleet_dir() {
        let temp_dir = TempDir::new().unwrap();

        let dir = init_fleet_dir(temp_dir.path()).unwrap();

        assert!(dir.join("state").exists());
        let gitignore = fs::read_to_string(dir.join(".gitignore")).unwrap();
        assert!(gitignore.contains("state/"));
    }

    #[test]
    fn test_instance_id_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let first = load_or_create_instance_id(temp_dir.path()).unwrap();
        let second = load_or_create_instance_id(temp_dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 36);
    }
}
