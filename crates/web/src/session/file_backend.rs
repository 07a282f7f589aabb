use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::trace;

use super::{SessionBackend, SessionMap};
use crate::error::SessionError;

/// Stores each session as `<directory>/session_<id>.txt` with one `key=value` pair per line.
///
/// Keys must not contain `=` and neither keys nor values may contain line breaks; such
/// entries do not survive a round trip.
#[derive(Debug, Clone)]
pub struct FileSessionBackend {
    directory: PathBuf,
}

impl FileSessionBackend {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.directory.join(format!("session_{session_id}.txt"))
    }
}

fn parse_record(content: &str) -> SessionMap {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn render_record(session: &SessionMap) -> String {
    let mut keys: Vec<_> = session.keys().collect();
    keys.sort();
    keys.into_iter().fold(String::new(), |mut out, key| {
        out.push_str(key);
        out.push('=');
        out.push_str(&session[key]);
        out.push('\n');
        out
    })
}

#[async_trait]
impl SessionBackend for FileSessionBackend {
    async fn read(&self, session_id: &str) -> Result<Option<SessionMap>, SessionError> {
        let path = self.path_for(session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(parse_record(&content))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::io(path, e)),
        }
    }

    async fn write(&self, session_id: &str, session: &SessionMap) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.directory).await.map_err(|e| SessionError::io(&self.directory, e))?;

        // readers don't take the merge lock, so replace the file in one rename
        let path = self.path_for(session_id);
        let staging = self.directory.join(format!(".session_{session_id}.txt.tmp"));
        tokio::fs::write(&staging, render_record(session)).await.map_err(|e| SessionError::io(&staging, e))?;
        tokio::fs::rename(&staging, &path).await.map_err(|e| SessionError::io(&path, e))?;

        trace!(path = %path.display(), entries = session.len(), "session written");
        Ok(())
    }
}
