use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::store::write_json_atomic;

const USERS_FILE_NAME: &str = "users.json";

/// Per-user choice of which translation to read. Users without a preference
/// fall back to their locale when a message is displayed.
pub trait UserPreferences: Send + Sync {
    fn language(&self, user_id: &str) -> Result<Option<String>>;

    /// `None` (or a blank language) clears the preference.
    fn set_language(&self, user_id: &str, language: Option<&str>) -> Result<()>;
}

fn normalize(language: Option<&str>) -> Option<String> {
    language
        .map(str::trim)
        .filter(|language| !language.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Default)]
pub struct MemoryUserPreferences {
    languages: Mutex<HashMap<String, String>>,
}

impl MemoryUserPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserPreferences for MemoryUserPreferences {
    fn language(&self, user_id: &str) -> Result<Option<String>> {
        let languages = self.languages.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(languages.get(user_id).cloned())
    }

    fn set_language(&self, user_id: &str, language: Option<&str>) -> Result<()> {
        let mut languages = self.languages.lock().unwrap_or_else(PoisonError::into_inner);
        match normalize(language) {
            Some(language) => languages.insert(user_id.to_string(), language),
            None => languages.remove(user_id),
        };
        Ok(())
    }
}

/// Preferences kept in `users.json` inside the store directory.
#[derive(Debug)]
pub struct FileUserPreferences {
    dir: PathBuf,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileUserPreferences {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create store dir: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            path: dir.join(USERS_FILE_NAME),
            write_lock: Mutex::new(()),
        })
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read user preferences: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse user preferences: {}", self.path.display()))
    }
}

impl UserPreferences for FileUserPreferences {
    fn language(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(user_id))
    }

    fn set_language(&self, user_id: &str, language: Option<&str>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut languages = self.read_all()?;
        match normalize(language) {
            Some(language) => languages.insert(user_id.to_string(), language),
            None => languages.remove(user_id),
        };
        write_json_atomic(&self.dir, &self.path, &languages)
    }
}
