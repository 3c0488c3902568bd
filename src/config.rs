//! Store configuration
use crate::error::StoreError;
use std::path::PathBuf;

pub const STORE_PATH_ENV: &str = "AGREEMENT_STORE_PATH";
const DEFAULT_PATH: &str = "agreements.db";
const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub temporary: bool,
    pub cache_capacity: u64,
    pub flush_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PATH),
            temporary: false,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            flush_on_commit: false,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
    /// Reads the database path from `AGREEMENT_STORE_PATH`, falling back to the default.
    pub fn from_env() -> Self {
        match std::env::var(STORE_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::new(path),
            _ => Self::default(),
        }
    }
    /// An in-memory style database that is removed when dropped.
    pub fn temporary() -> Self {
        Self {
            temporary: true,
            ..Self::default()
        }
    }
    pub fn set_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }
    pub fn set_flush_on_commit(mut self, flush: bool) -> Self {
        self.flush_on_commit = flush;
        self
    }
    pub fn open(&self) -> Result<sled::Db, StoreError> {
        let mut config = sled::Config::new().cache_capacity(self.cache_capacity);
        config = if self.temporary {
            config.temporary(true)
        } else {
            config.path(&self.path)
        };
        log::debug!("opening agreement store (temporary: {})", self.temporary);
        Ok(config.open()?)
    }
}
