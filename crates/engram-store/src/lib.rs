//! Persistence gate for the shared-state file
//!
//! One JSON file holds every store. Mutating operations serialize across
//! processes through an exclusive `<path>.lock` file: acquire, hydrate,
//! execute, commit via temp-file rename, release. Pure queries skip the lock
//! entirely and execute against whatever consistent snapshot they hydrate.
//! A partially written state file is never observable.

use engram_core::{canonical, EngramError, EngramResult};
use engram_engine::{Engine, Operation};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default lock acquisition timeout.
pub const LOCK_TIMEOUT_MS: u64 = 5_000;

/// Default delay between lock acquisition attempts.
pub const LOCK_RETRY_MS: u64 = 25;

/// Persistence gate configuration.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Shared-state file path
    pub state_path: PathBuf,
    /// Lock acquisition timeout in milliseconds
    pub lock_timeout_ms: u64,
    /// Delay between lock attempts in milliseconds
    pub lock_retry_ms: u64,
}

impl PersistenceConfig {
    /// Config with default lock timing.
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            lock_timeout_ms: LOCK_TIMEOUT_MS,
            lock_retry_ms: LOCK_RETRY_MS,
        }
    }
}

/// Dispatches operations against the shared-state file.
#[derive(Debug, Clone)]
pub struct PersistenceGate {
    config: PersistenceConfig,
}

impl PersistenceGate {
    /// Gate over a configured state path.
    pub fn new(config: PersistenceConfig) -> Self {
        Self { config }
    }

    /// Execute one operation with hydrate/commit semantics.
    ///
    /// Read-only operations hydrate without locking. Everything else holds
    /// the exclusive lock from hydrate to commit.
    pub fn dispatch(&self, operation: &str, request: &Value) -> EngramResult<Value> {
        let name = operation.trim().to_lowercase();
        let read_only = Operation::parse(&name)
            .map(|op| op.read_only())
            .unwrap_or(false);

        if read_only {
            let mut engine = self.hydrate()?;
            return engine.execute(operation, request);
        }

        let _lock = LockFile::acquire(
            &lock_path(&self.config.state_path),
            Duration::from_millis(self.config.lock_timeout_ms),
            Duration::from_millis(self.config.lock_retry_ms),
        )?;
        let mut engine = self.hydrate()?;
        let result = engine.execute(operation, request)?;
        self.commit(&engine)?;
        Ok(result)
    }

    /// Load the engine from the state file; a missing file is an empty state.
    pub fn hydrate(&self) -> EngramResult<Engine> {
        let mut engine = Engine::new();
        let raw = match fs::read_to_string(&self.config.state_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(engine),
            Err(err) => {
                return Err(EngramError::storage(format!(
                    "failed reading state file: {err}"
                )));
            }
        };
        let snapshot: Value = serde_json::from_str(&raw).map_err(|err| EngramError::StateCorrupt {
            path: self.config.state_path.display().to_string(),
            message: err.to_string(),
        })?;
        engine.import_snapshot(&snapshot).map_err(|err| EngramError::StateCorrupt {
            path: self.config.state_path.display().to_string(),
            message: err.to_string(),
        })?;
        Ok(engine)
    }

    /// Write the snapshot atomically: temp file, then rename over the target.
    fn commit(&self, engine: &Engine) -> EngramResult<()> {
        let snapshot = canonical::canonicalize(&engine.export_snapshot()?);
        let mut rendered = serde_json::to_string_pretty(&snapshot)
            .map_err(|err| EngramError::storage(format!("snapshot serialization failed: {err}")))?;
        rendered.push('\n');

        let temp_path = self.config.state_path.with_extension("json.tmp");
        fs::write(&temp_path, rendered.as_bytes())
            .map_err(|err| EngramError::storage(format!("failed writing snapshot: {err}")))?;
        fs::rename(&temp_path, &self.config.state_path)
            .map_err(|err| EngramError::storage(format!("failed committing snapshot: {err}")))?;
        debug!(path = %self.config.state_path.display(), "snapshot committed");
        Ok(())
    }
}

fn lock_path(state_path: &Path) -> PathBuf {
    let mut path = state_path.as_os_str().to_owned();
    path.push(".lock");
    PathBuf::from(path)
}

/// Exclusive lock file; removed on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: &Path, timeout: Duration, retry: Duration) -> EngramResult<Self> {
        let started = Instant::now();
        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if started.elapsed() >= timeout {
                        warn!(path = %path.display(), "lock acquisition timed out");
                        return Err(EngramError::LockTimeout {
                            path: path.display().to_string(),
                        });
                    }
                    std::thread::sleep(retry);
                }
                Err(err) => {
                    return Err(EngramError::storage(format!(
                        "failed creating lock file: {err}"
                    )));
                }
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "failed removing lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate_at(dir: &tempfile::TempDir) -> PersistenceGate {
        let mut config = PersistenceConfig::new(dir.path().join("state.json"));
        config.lock_timeout_ms = 100;
        config.lock_retry_ms = 5;
        PersistenceGate::new(config)
    }

    #[test]
    fn mutations_round_trip_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_at(&dir);

        let request = json!({
            "storeId": "space-a",
            "events": [{ "type": "note", "source": "test", "content": "remembered" }],
        });
        let first = gate.dispatch("ingest", &request).unwrap();
        assert_eq!(first["accepted"], 1);

        // A second gate over the same path sees the committed state.
        let second = gate_at(&dir)
            .dispatch("ingest", &request)
            .unwrap();
        assert_eq!(second["accepted"], 0);
        assert_eq!(second["duplicates"], 1);
        assert_eq!(first["ledgerDigest"], second["ledgerDigest"]);
    }

    #[test]
    fn read_only_operations_do_not_create_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_at(&dir);
        let result = gate.dispatch("doctor", &json!({})).unwrap();
        assert_eq!(result["healthy"], true);
        assert!(!dir.path().join("state.json").exists());
    }

    #[test]
    fn held_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_at(&dir);
        std::fs::write(dir.path().join("state.json.lock"), b"").unwrap();

        let err = gate
            .dispatch("ingest", &json!({ "events": ["x"] }))
            .unwrap_err();
        assert_eq!(err.code(), "STATE_LOCK_TIMEOUT");
        assert!(!dir.path().join("state.json").exists());
    }

    #[test]
    fn corrupt_state_file_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state.json"), b"{ not json").unwrap();
        let err = gate_at(&dir)
            .dispatch("doctor", &json!({}))
            .unwrap_err();
        assert_eq!(err.code(), "STATE_FILE_CORRUPT");
    }

    #[test]
    fn snapshot_file_is_pretty_sorted_with_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_at(&dir);
        gate.dispatch("ingest", &json!({ "events": ["alpha"] })).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        assert!(raw.ends_with('\n'));
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed["stores"]["coding-agent"]["profiles"]["__store_default__"].is_object());
    }
}
