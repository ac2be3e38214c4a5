use std::{fs, path::PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CheckpointData {
    last_seq: u64,
    saved_at: String,
}

/// Durable record of the last stream position the pipeline finished with.
///
/// On restart the agent resumes strictly after the stored `seq`. A missing or
/// unreadable file means "no checkpoint"; the agent then starts from the
/// present rather than refusing to start or replaying from stream start.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Option<u64> {
        let txt = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<CheckpointData>(&txt) {
            Ok(data) => Some(data.last_seq),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "ignoring corrupt checkpoint file"
                );
                None
            }
        }
    }

    pub fn save(&self, seq: u64) -> Result<()> {
        let data = CheckpointData {
            last_seq: seq,
            saved_at: Utc::now().to_rfc3339(),
        };
        fs::write(&self.path, serde_json::to_string(&data)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.json"))
    }

    #[test]
    fn missing_file_is_no_checkpoint() {
        let store = CheckpointStore::new(tmp("chatsafe-cp-missing"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let path = tmp("chatsafe-cp-roundtrip");
        let store = CheckpointStore::new(path.clone());

        store.save(41).unwrap();
        assert_eq!(store.load(), Some(41));

        store.save(42).unwrap();
        assert_eq!(store.load(), Some(42));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let path = tmp("chatsafe-cp-corrupt");
        fs::write(&path, "not json at all").unwrap();

        let store = CheckpointStore::new(path.clone());
        assert_eq!(store.load(), None);

        let _ = fs::remove_file(path);
    }
}
