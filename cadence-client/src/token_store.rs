//! Client-local persistence for session credentials.

use cadence_core::TokenPair;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Token store lock poisoned")]
    LockPoisoned,
}

/// Storage backend for the current credentials.
///
/// Only [`crate::auth::AuthFlow`] writes through this trait; every other
/// component reads via [`crate::auth::TokenReader`].
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<TokenPair>, TokenStoreError>;
    fn save(&self, tokens: &TokenPair) -> Result<(), TokenStoreError>;
    fn clear(&self) -> Result<(), TokenStoreError>;
}

/// Process-local store, used by tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<TokenPair>, TokenStoreError> {
        let tokens = self.tokens.lock().map_err(|_| TokenStoreError::LockPoisoned)?;
        Ok(tokens.clone())
    }

    fn save(&self, tokens: &TokenPair) -> Result<(), TokenStoreError> {
        let mut current = self.tokens.lock().map_err(|_| TokenStoreError::LockPoisoned)?;
        *current = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        let mut current = self.tokens.lock().map_err(|_| TokenStoreError::LockPoisoned)?;
        *current = None;
        Ok(())
    }
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<TokenPair>, TokenStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let tokens = serde_json::from_str::<TokenPair>(&contents)?;
        Ok(Some(tokens))
    }

    fn save(&self, tokens: &TokenPair) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(tokens)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("tokens.json"));
        assert!(store.load().unwrap().is_none());

        let tokens = TokenPair::new("access", Some("refresh".to_string()));
        store.save(&tokens).unwrap();
        assert_eq!(store.load().unwrap(), Some(tokens));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "not json").unwrap();
        let store = FileTokenStore::new(path);
        assert!(matches!(store.load(), Err(TokenStoreError::Serde(_))));
    }

    #[test]
    fn memory_store_replaces_tokens() {
        let store = MemoryTokenStore::with_tokens(TokenPair::new("a", None));
        store.save(&TokenPair::new("b", None)).unwrap();
        assert_eq!(store.load().unwrap().unwrap().access_token.as_str(), "b");
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
