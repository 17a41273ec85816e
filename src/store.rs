//! Public operations of the store, the surface the http collaborator
//! and the operational command call into.

use std::{ffi, fs, io};

use crate::{
    cache,
    config::{Config, DEFAULT_CONFIG_FILE},
    err_at,
    id::Id,
    info::Info,
    merge, pack, retrieve, staging, Error, Result,
};

/// Handle over one configuration file, realms resolve lazily. The
/// handle is cheap, configuration is re-read per operation so an
/// operator can adjust thresholds without restarting writers.
pub struct Store {
    config_file: ffi::OsString,
}

impl Store {
    /// Open the store against `config_file`, falling back to
    /// `aostor.toml` in the working directory.
    pub fn open(config_file: Option<&ffi::OsStr>) -> Store {
        let config_file = match config_file {
            Some(file) => file.to_os_string(),
            None => ffi::OsString::from(DEFAULT_CONFIG_FILE),
        };
        Store { config_file }
    }

    /// Expanded configuration for `realm`.
    pub fn to_config(&self, realm: &str) -> Result<Config> {
        Config::from_file(&self.config_file, realm)
    }

    /// Store one object under `realm`, returns its fresh identifier.
    pub fn put(&self, realm: &str, info: Info, data: &mut dyn io::Read) -> Result<Id> {
        let config = self.to_config(realm)?;
        staging::put(&config, info, data)
    }

    /// Fetch the object `id` from `realm`: metadata and a streaming
    /// reader over the uncompressed payload.
    pub fn get(&self, realm: &str, id: &Id) -> Result<(Info, Box<dyn io::Read>)> {
        let config = self.to_config(realm)?;
        retrieve::get(&config, id)
    }

    /// Drain staging into packs, then merge the index levels from the
    /// bottom. `on_change` fires after the caches are refreshed.
    pub fn compact(&self, realm: &str, on_change: Option<&dyn Fn()>) -> Result<()> {
        let config = self.to_config(realm)?;
        pack::compact_staging(&config)?;
        merge::compact_indices(&config, 0)?;
        cache::fill(&config, true)?;
        if let Some(notify) = on_change {
            notify();
        }
        Ok(())
    }

    /// Merge the index levels from `start_level` upwards. `on_change`
    /// fires after the caches are refreshed.
    pub fn compact_indices(
        &self,
        realm: &str,
        start_level: usize,
        on_change: Option<&dyn Fn()>,
    ) -> Result<()> {
        let config = self.to_config(realm)?;
        merge::compact_indices(&config, start_level)?;
        cache::fill(&config, true)?;
        if let Some(notify) = on_change {
            notify();
        }
        Ok(())
    }

    /// Refresh the file-list caches for every configured realm.
    pub fn fill_caches(&self, force: bool) -> Result<()> {
        let text = err_at!(
            IOError,
            fs::read_to_string(&self.config_file),
            "{:?}",
            self.config_file
        )?;
        let value: toml::Value = err_at!(FailConfig, text.parse(), "{:?}", self.config_file)?;
        for realm in Config::from_toml(&value, "")?.realms {
            let config = Config::from_toml(&value, &realm)?;
            config.init_dirs()?;
            cache::fill(&config, force)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
