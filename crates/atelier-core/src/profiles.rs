//! Free-text user profiles, one plain-text file per user id.

use std::io;
use std::path::PathBuf;

use tracing::info;

use crate::error::{AtelierError, Result};
use crate::types::UserId;

pub const MAX_PROFILE_CHARS: usize = 1500;

pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, user_id: UserId) -> PathBuf {
        self.dir.join(format!("{user_id}.txt"))
    }

    pub async fn get(&self, user_id: UserId) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(user_id)).await {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Creates or overwrites the profile.
    pub async fn set(&self, user_id: UserId, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AtelierError::InvalidRequest("profile text is empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > MAX_PROFILE_CHARS {
            return Err(AtelierError::InvalidRequest(format!(
                "profile is {chars} characters, limit is {MAX_PROFILE_CHARS}"
            )));
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(user_id), text).await?;
        info!("profile saved: user_id={} chars={}", user_id, chars);
        Ok(())
    }

    /// Returns false when there was nothing to delete.
    pub async fn delete(&self, user_id: UserId) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(user_id)).await {
            Ok(()) => {
                info!("profile deleted: user_id={}", user_id);
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_overwrite_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::new(dir.path().join("profiles"));

        assert_eq!(store.get(42).await.expect("get"), None);
        store.set(42, "  Likes ink drawings. ").await.expect("set");
        assert_eq!(store.get(42).await.expect("get").as_deref(), Some("Likes ink drawings."));
        assert!(dir.path().join("profiles/42.txt").exists());

        store.set(42, "Prefers oils.").await.expect("overwrite");
        assert_eq!(store.get(42).await.expect("get").as_deref(), Some("Prefers oils."));

        assert!(store.delete(42).await.expect("delete"));
        assert!(!store.delete(42).await.expect("delete again"));
        assert_eq!(store.get(42).await.expect("get"), None);
    }

    #[tokio::test]
    async fn empty_and_oversized_profiles_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::new(dir.path());
        assert!(matches!(store.set(1, "   ").await, Err(AtelierError::InvalidRequest(_))));
        let long = "p".repeat(MAX_PROFILE_CHARS + 1);
        assert!(matches!(store.set(1, &long).await, Err(AtelierError::InvalidRequest(_))));
        assert_eq!(store.get(1).await.expect("get"), None);
    }
}
