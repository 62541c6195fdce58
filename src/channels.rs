use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::store::write_json_atomic;

const CHANNELS_FILE_NAME: &str = "channels.json";

/// Per-channel switch for message translation. Channels never configured
/// are disabled.
pub trait ChannelSettings: Send + Sync {
    fn is_enabled(&self, channel_id: &str) -> Result<bool>;
    fn set_enabled(&self, channel_id: &str, enabled: bool) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryChannelSettings {
    channels: Mutex<HashMap<String, bool>>,
}

impl MemoryChannelSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(channel_ids: &[&str]) -> Self {
        let settings = Self::new();
        {
            let mut channels = settings
                .channels
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for id in channel_ids {
                channels.insert(id.to_string(), true);
            }
        }
        settings
    }
}

impl ChannelSettings for MemoryChannelSettings {
    fn is_enabled(&self, channel_id: &str) -> Result<bool> {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(channels.get(channel_id).copied().unwrap_or(false))
    }

    fn set_enabled(&self, channel_id: &str, enabled: bool) -> Result<()> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel_id.to_string(), enabled);
        Ok(())
    }
}

/// Channel switches kept in `channels.json` inside the store directory.
#[derive(Debug)]
pub struct FileChannelSettings {
    dir: PathBuf,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileChannelSettings {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create store dir: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            path: dir.join(CHANNELS_FILE_NAME),
            write_lock: Mutex::new(()),
        })
    }

    fn read_all(&self) -> Result<BTreeMap<String, bool>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read channels: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse channels: {}", self.path.display()))
    }
}

impl ChannelSettings for FileChannelSettings {
    fn is_enabled(&self, channel_id: &str) -> Result<bool> {
        Ok(self.read_all()?.get(channel_id).copied().unwrap_or(false))
    }

    fn set_enabled(&self, channel_id: &str, enabled: bool) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut channels = self.read_all()?;
        channels.insert(channel_id.to_string(), enabled);
        write_json_atomic(&self.dir, &self.path, &channels)
    }
}
