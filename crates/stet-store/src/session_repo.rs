use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use stet_core::error::StoreError;
use stet_core::store::{SESSION_FILE, SessionRepository};
use stet_core::types::Session;
use tempfile::NamedTempFile;

pub struct SessionRepo<'a> {
    state_dir: &'a Path,
}

impl<'a> SessionRepo<'a> {
    pub fn new(state_dir: &'a Path) -> Self {
        Self { state_dir }
    }

    pub fn path(&self) -> PathBuf {
        self.state_dir.join(SESSION_FILE)
    }
}

impl SessionRepository for SessionRepo<'_> {
    fn load(&self) -> Result<Session, StoreError> {
        let content = match fs::read_to_string(self.path()) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Session::default()),
            Err(err) => return Err(err.into()),
        };
        if content.trim().is_empty() {
            return Ok(Session::default());
        }
        serde_json::from_str(&content).map_err(|err| StoreError::JsonDecode {
            message: format!("{}: {err}", SESSION_FILE),
        })
    }

    fn exists(&self) -> bool {
        self.path().is_file()
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        fs::create_dir_all(self.state_dir)?;
        let json = serde_json::to_vec_pretty(session).map_err(|err| StoreError::JsonEncode {
            message: err.to_string(),
        })?;
        let mut temp = NamedTempFile::new_in(self.state_dir)?;
        temp.write_all(&json)?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(self.path()).map_err(|err| StoreError::Io {
            message: format!("persist {}: {}", SESSION_FILE, err.error),
        })?;
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stet_core::types::{Category, Finding, Severity, Strictness};

    fn sample() -> Session {
        let mut session = Session {
            session_id: "abc".to_string(),
            baseline_ref: "a".repeat(40),
            last_reviewed_at: "b".repeat(40),
            findings: vec![Finding {
                id: "f1".to_string(),
                file: "src/a.go".to_string(),
                line: Some(3),
                range: None,
                severity: Severity::Error,
                category: Category::Bug,
                confidence: 0.9,
                message: "nil deref".to_string(),
                suggestion: Some("check for nil".to_string()),
                cursor_uri: None,
            }],
            ..Session::default()
        };
        session.options.strictness = Strictness::StrictPlus;
        session
            .finding_prompt_context
            .insert("f1".to_string(), "@@ -1 +1 @@".to_string());
        session
    }

    #[test]
    fn load_missing_is_zero_value() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SessionRepo::new(dir.path());
        assert!(!repo.exists());
        assert_eq!(repo.load().unwrap(), Session::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join(".review");
        let repo = SessionRepo::new(&state);
        let session = sample();
        repo.save(&session).unwrap();
        assert!(repo.exists());
        assert_eq!(repo.load().unwrap(), session);

        let leftovers: Vec<_> = fs::read_dir(&state)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from(SESSION_FILE)]);
    }

    #[test]
    fn corrupt_document_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SESSION_FILE), "{not json").unwrap();
        assert!(matches!(
            SessionRepo::new(dir.path()).load(),
            Err(StoreError::JsonDecode { .. })
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SessionRepo::new(dir.path());
        repo.save(&sample()).unwrap();
        repo.delete().unwrap();
        repo.delete().unwrap();
        assert!(!repo.exists());
    }
}
