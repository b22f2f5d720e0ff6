//! File-backed session store
//!
//! ```text
//! <base_dir>/<session_id>/metadata.json
//! <base_dir>/<session_id>/transcript.jsonl
//! ```
//!
//! The transcript is append-only, one message per line. A process killed
//! mid-append leaves at most one torn line at the end; loading drops it.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::core::{AgentError, AgentResult};
use crate::memory::{Message, TranscriptStore};

use super::metadata::SessionMetadata;

const METADATA_FILE: &str = "metadata.json";
const TRANSCRIPT_FILE: &str = "transcript.jsonl";

#[derive(Debug, Clone)]
pub struct SessionStorage {
    base_dir: PathBuf,
}

impl SessionStorage {
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(session_id)
    }

    pub fn metadata_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(METADATA_FILE)
    }

    pub fn transcript_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(TRANSCRIPT_FILE)
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        self.metadata_path(session_id).is_file()
    }

    /// Write metadata through a temp file so readers never see half of it
    pub fn save_metadata(&self, metadata: &SessionMetadata) -> AgentResult<()> {
        let dir = self.session_dir(&metadata.session_id);
        fs::create_dir_all(&dir)?;

        let tmp = dir.join(format!("{}.tmp", METADATA_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(metadata)?)?;
        fs::rename(&tmp, dir.join(METADATA_FILE))?;
        Ok(())
    }

    pub fn load_metadata(&self, session_id: &str) -> AgentResult<SessionMetadata> {
        let raw = fs::read(self.metadata_path(session_id)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AgentError::SessionNotFound(session_id.to_string()),
            _ => e.into(),
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn append_message(&self, session_id: &str, message: &Message) -> AgentResult<()> {
        fs::create_dir_all(self.session_dir(session_id))?;
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.transcript_path(session_id))?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Transcript in append order.
    ///
    /// A session with metadata but no transcript yet has an empty one. A
    /// line that fails to parse is an error unless it is the last line.
    pub fn load_messages(&self, session_id: &str) -> AgentResult<Vec<Message>> {
        let file = match fs::File::open(self.transcript_path(session_id)) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return if self.session_exists(session_id) {
                    Ok(Vec::new())
                } else {
                    Err(AgentError::SessionNotFound(session_id.to_string()))
                };
            }
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()?;
        let last = lines.iter().rposition(|l| !l.trim().is_empty());

        let mut messages = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(message) => messages.push(message),
                Err(e) if Some(index) == last => {
                    tracing::warn!(
                        session_id = %session_id,
                        line = index + 1,
                        error = %e,
                        "[Storage] Dropping torn transcript tail"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(messages)
    }

    /// Ids of every stored session, sorted
    pub fn list_sessions(&self) -> AgentResult<Vec<String>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(id) = name.to_str() {
                if self.session_exists(id) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn delete_session(&self, session_id: &str) -> AgentResult<()> {
        match fs::remove_dir_all(self.session_dir(session_id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl TranscriptStore for SessionStorage {
    fn append(&self, session_id: &str, message: &Message) -> AgentResult<()> {
        self.append_message(session_id, message)
    }

    fn load(&self, session_id: &str) -> AgentResult<Vec<Message>> {
        self.load_messages(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SessionStatus;
    use crate::memory::{Draft, MemoryManager, WindowConfig};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn storage() -> (SessionStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        (SessionStorage::with_dir(dir.path()), dir)
    }

    #[test]
    fn test_metadata_round_trip_leaves_no_temp_file() {
        let (storage, _dir) = storage();
        let mut meta = SessionMetadata::new("s1").with_model("gpt-4o-mini");
        meta.set_status(SessionStatus::Failed);
        storage.save_metadata(&meta).unwrap();

        let loaded = storage.load_metadata("s1").unwrap();
        assert_eq!(loaded.model, "gpt-4o-mini");
        assert_eq!(loaded.status, SessionStatus::Failed);

        let files: Vec<_> = fs::read_dir(storage.session_dir("s1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec![METADATA_FILE]);
    }

    #[test]
    fn test_unknown_session() {
        let (storage, _dir) = storage();
        assert!(matches!(
            storage.load_metadata("nope"),
            Err(AgentError::SessionNotFound(_))
        ));
        assert!(matches!(
            storage.load_messages("nope"),
            Err(AgentError::SessionNotFound(_))
        ));

        storage.save_metadata(&SessionMetadata::new("fresh")).unwrap();
        assert!(storage.load_messages("fresh").unwrap().is_empty());
    }

    #[test]
    fn test_write_through_and_restore() {
        let (storage, _dir) = storage();
        storage.save_metadata(&SessionMetadata::new("s1")).unwrap();
        let store: Arc<dyn TranscriptStore> = Arc::new(storage.clone());

        let mut memory = MemoryManager::new("s1", WindowConfig::default(), Some(store.clone()));
        memory.append(Draft::user("Hello"));
        memory.append(Draft::assistant("Hi there"));

        let raw = fs::read_to_string(storage.transcript_path("s1")).unwrap();
        assert_eq!(raw.lines().count(), 2);

        let restored = MemoryManager::restore("s1", WindowConfig::default(), store).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.messages()[1].content, "Hi there");
        assert_eq!(restored.last().map(|m| m.seq), Some(2));
    }

    #[test]
    fn test_torn_tail_is_dropped_but_corruption_is_not() {
        let (storage, _dir) = storage();
        storage.save_metadata(&SessionMetadata::new("s1")).unwrap();
        let store: Arc<dyn TranscriptStore> = Arc::new(storage.clone());
        let mut memory = MemoryManager::new("s1", WindowConfig::default(), Some(store));
        memory.append(Draft::user("kept"));

        let path = storage.transcript_path("s1");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"seq\":2,\"ro").unwrap();

        let loaded = storage.load_messages("s1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "kept");

        let good = fs::read_to_string(&path).unwrap();
        let first = good.lines().next().unwrap();
        fs::write(&path, format!("garbage\n{}\n", first)).unwrap();
        assert!(storage.load_messages("s1").is_err());
    }

    #[test]
    fn test_list_and_delete() {
        let (storage, _dir) = storage();
        assert!(storage.list_sessions().unwrap().is_empty());

        storage.save_metadata(&SessionMetadata::new("b")).unwrap();
        storage.save_metadata(&SessionMetadata::new("a")).unwrap();
        fs::create_dir_all(storage.session_dir("stray")).unwrap();
        assert_eq!(storage.list_sessions().unwrap(), vec!["a", "b"]);

        storage.delete_session("a").unwrap();
        storage.delete_session("a").unwrap();
        assert_eq!(storage.list_sessions().unwrap(), vec!["b"]);
    }
}
