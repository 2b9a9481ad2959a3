//! Chat sessions as JSON files.
//!
//! The host application owns sessions; this crate only reads their messages.
//! [`Session`] exists so the CLI and tests can load and store a
//! conversation in the same camelCase shape the host uses:
//!
//! ```json
//! {
//!   "id": "a1b2",
//!   "agentId": "travel-planner",
//!   "modelId": "z-ai/glm-5",
//!   "systemPrompt": "You plan trips.",
//!   "messages": [{"role": "user", "content": [{"text": "Hi"}]}]
//! }
//! ```

use crate::{ContextError, Message, validate_messages};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A conversation with its append-only message history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_id: String::new(),
            model_id: String::new(),
            system_prompt: None,
            messages: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Append a message, returning its index.
    pub fn push(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Load and validate a session file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ContextError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ContextError::FileIo {
            path: path.to_path_buf(),
            source,
        })?;
        let session: Self =
            serde_json::from_str(&json).map_err(|source| ContextError::FileParse {
                path: path.to_path_buf(),
                source,
            })?;
        validate_messages(&session.messages)?;
        Ok(session)
    }

    /// Write the session to `path` atomically (temp file + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ContextError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| ContextError::FileIo {
            path: path.to_path_buf(),
            source,
        };

        let json = serde_json::to_string_pretty(self).map_err(|e| io_err(e.into()))?;
        let tmp_path = temp_path_for(path);
        std::fs::write(&tmp_path, json).map_err(io_err)?;
        std::fs::rename(&tmp_path, path).map_err(io_err)?;
        Ok(())
    }
}

/// `dir/.name.tmp` next to `path`.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "session".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut session = Session::new("s1").with_system_prompt("Be brief.");
        assert_eq!(session.push(Message::user("hi")), 0);
        assert_eq!(session.push(Message::assistant("hello")), 1);
        session.save(&path).unwrap();

        assert!(!dir.path().join(".session.json.tmp").exists());
        assert_eq!(Session::load(&path).unwrap(), session);
    }

    #[test]
    fn loads_host_shaped_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let body = json!({
            "id": "a1b2",
            "agentId": "travel-planner",
            "modelId": "z-ai/glm-5",
            "messages": [
                {"role": "user", "content": [{"text": "Find flights"}], "id": "m1"},
                {"role": "assistant", "content": [
                    {"toolUse": {"id": "t1", "name": "search", "input": {"to": "LIS"}}}
                ]},
                {"role": "user", "content": [
                    {"toolResult": {"toolUseId": "t1", "content": [{"text": "3 results"}], "status": "success"}}
                ]}
            ]
        });
        std::fs::write(&path, body.to_string()).unwrap();

        let session = Session::load(&path).unwrap();
        assert_eq!(session.agent_id, "travel-planner");
        assert!(session.system_prompt.is_none());
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.messages[2].tool_result_ids().collect::<Vec<_>>(), vec!["t1"]);
    }

    #[test]
    fn load_rejects_malformed_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        let body = json!({
            "id": "x",
            "messages": [{"role": "assistant", "content": [{"toolUse": {"id": "", "name": "n"}}]}]
        });
        std::fs::write(&path, body.to_string()).unwrap();
        assert!(matches!(
            Session::load(&path),
            Err(ContextError::MalformedMessage { index: 0, .. })
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            Session::load("/nonexistent/session.json"),
            Err(ContextError::FileIo { .. })
        ));
    }
}
