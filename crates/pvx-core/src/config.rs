//! Process-wide settings read from the environment.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use dirs_next::home_dir;
use which::which;

pub const HOME_ENV: &str = "PVX_HOME";
pub const VENVS_DIR_ENV: &str = "PVX_VENVS_DIR";
pub const SHARED_LIBS_ENV: &str = "PVX_SHARED_LIBS";
pub const DEFAULT_PYTHON_ENV: &str = "PVX_DEFAULT_PYTHON";
pub const MAX_CAPTURE_ENV: &str = "PVX_MAX_CAPTURE_BYTES";

pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    #[must_use]
    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    home: PathBuf,
    venvs_dir: PathBuf,
    shared_libs_dir: PathBuf,
    default_python: Option<String>,
    max_capture_bytes: usize,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if no home directory can be determined.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    /// # Errors
    /// Returns an error if no home directory can be determined.
    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let home = match snapshot.var(HOME_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => home_dir()
                .ok_or_else(|| anyhow!("home directory not found; set {HOME_ENV}"))?
                .join(".local")
                .join("pvx"),
        };
        let venvs_dir = snapshot
            .var(VENVS_DIR_ENV)
            .map_or_else(|| home.join("venvs"), PathBuf::from);
        let shared_libs_dir = snapshot
            .var(SHARED_LIBS_ENV)
            .map_or_else(|| home.join("shared"), PathBuf::from);
        let max_capture_bytes = snapshot
            .var(MAX_CAPTURE_ENV)
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_CAPTURE_BYTES);
        Ok(Self {
            home,
            venvs_dir,
            shared_libs_dir,
            default_python: snapshot.var(DEFAULT_PYTHON_ENV).map(ToOwned::to_owned),
            max_capture_bytes,
        })
    }

    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    #[must_use]
    pub fn venvs_dir(&self) -> &Path {
        &self.venvs_dir
    }

    #[must_use]
    pub fn shared_libs_dir(&self) -> &Path {
        &self.shared_libs_dir
    }

    #[must_use]
    pub fn max_capture_bytes(&self) -> usize {
        self.max_capture_bytes
    }

    /// Interpreter used to create new environments.
    ///
    /// # Errors
    /// Returns an error when neither the override nor a `python3`/`python`
    /// on `PATH` is available.
    pub fn default_python(&self) -> Result<String> {
        if let Some(explicit) = &self.default_python {
            return Ok(explicit.clone());
        }
        for candidate in ["python3", "python"] {
            if let Ok(path) = which(candidate) {
                return path
                    .into_os_string()
                    .into_string()
                    .map_err(|_| anyhow!("non-utf8 path"));
            }
        }
        bail!("no python interpreter found; set {DEFAULT_PYTHON_ENV}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn layout_derives_from_home() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[(HOME_ENV, "/data/pvx")]);
        let config = Config::from_snapshot(&snapshot)?;
        assert_eq!(config.venvs_dir(), Path::new("/data/pvx/venvs"));
        assert_eq!(config.shared_libs_dir(), Path::new("/data/pvx/shared"));
        assert_eq!(config.max_capture_bytes(), DEFAULT_MAX_CAPTURE_BYTES);
        Ok(())
    }

    #[test]
    fn explicit_directories_win() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            (HOME_ENV, "/data/pvx"),
            (VENVS_DIR_ENV, "/srv/venvs"),
            (SHARED_LIBS_ENV, "/srv/shared"),
            (DEFAULT_PYTHON_ENV, "/opt/python3.12/bin/python3"),
            (MAX_CAPTURE_ENV, "4096"),
        ]);
        let config = Config::from_snapshot(&snapshot)?;
        assert_eq!(config.venvs_dir(), Path::new("/srv/venvs"));
        assert_eq!(config.shared_libs_dir(), Path::new("/srv/shared"));
        assert_eq!(config.default_python()?, "/opt/python3.12/bin/python3");
        assert_eq!(config.max_capture_bytes(), 4096);
        Ok(())
    }

    #[test]
    fn blank_values_fall_back_to_defaults() -> Result<()> {
        let snapshot = EnvSnapshot::testing(&[
            (HOME_ENV, "/data/pvx"),
            (VENVS_DIR_ENV, "  "),
            (MAX_CAPTURE_ENV, "0"),
        ]);
        let config = Config::from_snapshot(&snapshot)?;
        assert_eq!(config.venvs_dir(), Path::new("/data/pvx/venvs"));
        assert_eq!(config.max_capture_bytes(), DEFAULT_MAX_CAPTURE_BYTES);
        Ok(())
    }

    #[test]
    #[serial]
    fn process_environment_is_read() -> Result<()> {
        let previous_home = env::var_os(HOME_ENV);
        let previous_python = env::var_os(DEFAULT_PYTHON_ENV);
        env::set_var(HOME_ENV, "/tmp/pvx-config-home");
        env::set_var(DEFAULT_PYTHON_ENV, "/usr/bin/python3.11");

        let config = Config::from_env();

        match previous_home {
            Some(value) => env::set_var(HOME_ENV, value),
            None => env::remove_var(HOME_ENV),
        }
        match previous_python {
            Some(value) => env::set_var(DEFAULT_PYTHON_ENV, value),
            None => env::remove_var(DEFAULT_PYTHON_ENV),
        }

        let config = config?;
        assert_eq!(config.home(), Path::new("/tmp/pvx-config-home"));
        assert_eq!(config.default_python()?, "/usr/bin/python3.11");
        Ok(())
    }
}
