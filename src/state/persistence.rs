//! State Persistence Backends
//!
//! - **JSON**: one `<stack>.json` file per stack in a state directory
//! - **Memory**: in-process storage for tests
//!
//! Both implement [`StatePersistence`].

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::StackState;
use crate::error::{Error, Result};

/// Persistence backend type
#[derive(Debug, Clone)]
pub enum PersistenceBackend {
    /// JSON files in a directory
    Json(PathBuf),
    /// In-memory storage (for testing)
    Memory,
}

impl PersistenceBackend {
    /// Open the backend.
    pub fn open(&self) -> Result<Arc<dyn StatePersistence>> {
        Ok(match self {
            PersistenceBackend::Json(dir) => Arc::new(JsonPersistence::new(dir.clone())?),
            PersistenceBackend::Memory => Arc::new(MemoryPersistence::new()),
        })
    }
}

/// Trait for state persistence implementations
pub trait StatePersistence: Send + Sync {
    /// Load the state of a stack, if it was ever saved
    fn load(&self, stack: &str) -> Result<Option<StackState>>;

    /// Save the state of a stack
    fn save(&self, state: &StackState) -> Result<()>;

    /// Remove the state of a stack
    fn delete(&self, stack: &str) -> Result<()>;

    /// Names of all stacks with saved state
    fn list(&self) -> Result<Vec<String>>;

    /// Load the state or start an empty one
    fn load_or_new(&self, stack: &str) -> Result<StackState> {
        Ok(self.load(stack)?.unwrap_or_else(|| StackState::new(stack)))
    }
}

// ============================================================================
// JSON Persistence Backend
// ============================================================================

/// JSON file-based persistence backend
#[derive(Debug, Clone)]
pub struct JsonPersistence {
    base_dir: PathBuf,
}

impl JsonPersistence {
    /// Create a new JSON persistence backend, creating the directory if needed
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// The state directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the file path for a stack
    pub fn state_path(&self, stack: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", stack))
    }
}

impl StatePersistence for JsonPersistence {
    fn load(&self, stack: &str) -> Result<Option<StackState>> {
        let path = self.state_path(stack);
        if !path.exists() {
            return Ok(None);
        }

        let reader = BufReader::new(File::open(&path)?);
        let state: StackState =
            serde_json::from_reader(reader).map_err(|e| Error::CorruptState {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if state.stack != stack {
            return Err(Error::CorruptState {
                path,
                message: format!("file holds state for stack '{}'", state.stack),
            });
        }

        debug!(stack, serial = state.serial, "Loaded state");
        Ok(Some(state))
    }

    fn save(&self, state: &StackState) -> Result<()> {
        // Write to a sibling temp file and rename so a crash never leaves half a file
        let mut temp = tempfile::NamedTempFile::new_in(&self.base_dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, state)?;
            writer.flush()?;
        }

        let path = self.state_path(&state.stack);
        temp.persist(&path).map_err(|e| Error::State {
            stack: state.stack.clone(),
            message: format!("cannot write {}: {}", path.display(), e.error),
        })?;

        debug!(stack = %state.stack, serial = state.serial, "Saved state");
        Ok(())
    }

    fn delete(&self, stack: &str) -> Result<()> {
        let path = self.state_path(stack);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut stacks = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    stacks.push(stem.to_string());
                }
            }
        }
        stacks.sort();
        Ok(stacks)
    }
}

// ============================================================================
// Memory Persistence Backend
// ============================================================================

/// In-memory persistence backend for testing
#[derive(Debug, Default, Clone)]
pub struct MemoryPersistence {
    states: Arc<DashMap<String, StackState>>,
}

impl MemoryPersistence {
    /// Create a new in-memory persistence backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatePersistence for MemoryPersistence {
    fn load(&self, stack: &str) -> Result<Option<StackState>> {
        Ok(self.states.get(stack).map(|r| r.value().clone()))
    }

    fn save(&self, state: &StackState) -> Result<()> {
        self.states.insert(state.stack.clone(), state.clone());
        Ok(())
    }

    fn delete(&self, stack: &str) -> Result<()> {
        self.states.remove(stack);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut stacks: Vec<String> = self.states.iter().map(|r| r.key().clone()).collect();
        stacks.sort();
        Ok(stacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeployedResource;

    fn sample() -> StackState {
        let mut state = StackState::new("demo");
        state.record(DeployedResource::new("Vpc", "AWS::EC2::VPC", "vpc-1"));
        state.bump();
        state
    }

    #[test]
    fn test_memory_persistence() {
        let persistence = MemoryPersistence::new();
        assert!(persistence.load("demo").unwrap().is_none());

        persistence.save(&sample()).unwrap();
        let loaded = persistence.load("demo").unwrap().unwrap();
        assert_eq!(loaded.serial, 1);
        assert_eq!(persistence.list().unwrap(), vec!["demo"]);

        persistence.delete("demo").unwrap();
        assert!(persistence.load("demo").unwrap().is_none());
    }

    #[test]
    fn test_json_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let persistence = JsonPersistence::new(temp_dir.path().join("state")).unwrap();

        let state = sample();
        persistence.save(&state).unwrap();
        assert!(persistence.state_path("demo").exists());

        let loaded = persistence.load("demo").unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(persistence.list().unwrap(), vec!["demo"]);

        persistence.delete("demo").unwrap();
        assert!(persistence.list().unwrap().is_empty());
    }

    #[test]
    fn test_backend_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let json = PersistenceBackend::Json(temp_dir.path().to_path_buf())
            .open()
            .unwrap();
        json.save(&sample()).unwrap();
        assert!(temp_dir.path().join("demo.json").exists());

        let memory = PersistenceBackend::Memory.open().unwrap();
        assert!(memory.list().unwrap().is_empty());
    }

    #[test]
    fn test_load_or_new() {
        let persistence = MemoryPersistence::new();
        let state = persistence.load_or_new("fresh").unwrap();
        assert_eq!(state.stack, "fresh");
        assert!(state.is_empty());
    }

    #[test]
    fn test_corrupt_state_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let persistence = JsonPersistence::new(temp_dir.path().to_path_buf()).unwrap();
        fs::write(persistence.state_path("demo"), "{ not json").unwrap();

        let err = persistence.load("demo").unwrap_err();
        assert!(matches!(err, Error::CorruptState { .. }));
    }
}
