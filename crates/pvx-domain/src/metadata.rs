//! Per-environment metadata document (`pvx_metadata.json`).

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tempfile::NamedTempFile;

use crate::paths::{path_list, path_map};

pub const METADATA_FILENAME: &str = "pvx_metadata.json";
pub const METADATA_FORMAT_VERSION: &str = "0.1";

/// Facts recorded about one package installed into an environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub package: String,
    pub package_or_url: String,
    #[serde(default)]
    pub pip_args: Vec<String>,
    #[serde(default)]
    pub include_dependencies: bool,
    #[serde(default = "default_true")]
    pub include_apps: bool,
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(default, with = "path_list")]
    pub app_paths: Vec<PathBuf>,
    #[serde(default)]
    pub apps_of_dependencies: Vec<String>,
    #[serde(default, with = "path_map")]
    pub app_paths_of_dependencies: BTreeMap<String, Vec<PathBuf>>,
    pub package_version: String,
    #[serde(default)]
    pub suffix: String,
}

fn default_true() -> bool {
    true
}

/// Everything persisted for one environment.
///
/// A missing `main_package` marks an environment created before metadata
/// was written; such environments are still valid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvironmentMetadata {
    pub main_package: Option<PackageRecord>,
    pub python_version: Option<String>,
    pub venv_args: Vec<String>,
    pub injected_packages: BTreeMap<String, PackageRecord>,
}

#[derive(Serialize)]
struct MetadataFileRef<'a> {
    main_package: Option<&'a PackageRecord>,
    python_version: Option<&'a str>,
    venv_args: &'a [String],
    injected_packages: &'a BTreeMap<String, PackageRecord>,
    pvx_metadata_version: &'static str,
}

#[derive(Deserialize)]
struct MetadataFile {
    #[serde(default, deserialize_with = "main_package_or_legacy")]
    main_package: Option<PackageRecord>,
    #[serde(default)]
    python_version: Option<String>,
    #[serde(default)]
    venv_args: Vec<String>,
    #[serde(default)]
    injected_packages: BTreeMap<String, PackageRecord>,
    pvx_metadata_version: String,
}

// Older writers emitted a main package whose fields were all null.
fn main_package_or_legacy<'de, D>(deserializer: D) -> Result<Option<PackageRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<serde_json::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if matches!(value.get("package"), None | Some(serde_json::Value::Null)) {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

impl EnvironmentMetadata {
    #[must_use]
    pub fn file_path(venv_dir: &Path) -> PathBuf {
        venv_dir.join(METADATA_FILENAME)
    }

    /// Reads the document stored in `venv_dir`, or an empty one when the
    /// environment has never been written.
    pub fn load(venv_dir: &Path) -> Result<Self> {
        let path = Self::file_path(venv_dir);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        Self::from_json(&contents)
            .with_context(|| format!("invalid metadata in {}", path.display()))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let file: MetadataFile = serde_json::from_str(contents)?;
        if file.pvx_metadata_version != METADATA_FORMAT_VERSION {
            bail!(
                "unsupported metadata version {} (expected {METADATA_FORMAT_VERSION})",
                file.pvx_metadata_version
            );
        }
        Ok(Self {
            main_package: file.main_package,
            python_version: file.python_version,
            venv_args: file.venv_args,
            injected_packages: file.injected_packages,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        let file = MetadataFileRef {
            main_package: self.main_package.as_ref(),
            python_version: self.python_version.as_deref(),
            venv_args: &self.venv_args,
            injected_packages: &self.injected_packages,
            pvx_metadata_version: METADATA_FORMAT_VERSION,
        };
        let mut json = serde_json::to_string_pretty(&file)?;
        json.push('\n');
        Ok(json)
    }

    /// Replaces the stored document in full.
    ///
    /// The new contents land in a sibling temporary file first so a reader
    /// never observes a half-written document.
    pub fn write(&self, venv_dir: &Path) -> Result<()> {
        let path = Self::file_path(venv_dir);
        let json = self.to_json()?;
        let mut tmp = NamedTempFile::new_in(venv_dir)
            .with_context(|| format!("creating temporary metadata in {}", venv_dir.display()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "wrote environment metadata");
        Ok(())
    }

    /// Stores `record` as the main package or as an injected package.
    pub fn set_package(&mut self, record: PackageRecord, is_main: bool) {
        if is_main {
            self.main_package = Some(record);
        } else {
            self.injected_packages.insert(record.package.clone(), record);
        }
    }

    /// Every recorded package, injected ones first and the main package
    /// winning on name clashes.
    #[must_use]
    pub fn package_records(&self) -> BTreeMap<String, PackageRecord> {
        let mut records = self.injected_packages.clone();
        if let Some(main) = &self.main_package {
            records.insert(main.package.clone(), main.clone());
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(name: &str, version: &str) -> PackageRecord {
        PackageRecord {
            package: name.to_string(),
            package_or_url: format!("{name}=={version}"),
            pip_args: vec!["--pre".to_string()],
            include_dependencies: false,
            include_apps: true,
            apps: vec![name.to_string()],
            app_paths: vec![PathBuf::from(format!("/venvs/{name}/bin/{name}"))],
            apps_of_dependencies: vec!["helper".to_string()],
            app_paths_of_dependencies: BTreeMap::from([(
                "helper-dist".to_string(),
                vec![PathBuf::from(format!("/venvs/{name}/bin/helper"))],
            )]),
            package_version: version.to_string(),
            suffix: String::new(),
        }
    }

    #[test]
    fn missing_document_loads_as_legacy() -> Result<()> {
        let temp = tempdir()?;
        let metadata = EnvironmentMetadata::load(temp.path())?;
        assert_eq!(metadata, EnvironmentMetadata::default());
        assert!(metadata.main_package.is_none());
        Ok(())
    }

    #[test]
    fn written_document_reads_back_identically() -> Result<()> {
        let temp = tempdir()?;
        let mut metadata = EnvironmentMetadata {
            python_version: Some("Python 3.12.1".to_string()),
            venv_args: vec!["--system-site-packages".to_string()],
            ..EnvironmentMetadata::default()
        };
        metadata.set_package(record("black", "24.1.0"), true);
        metadata.set_package(record("black-plugin", "0.3.0"), false);
        metadata.write(temp.path())?;

        let loaded = EnvironmentMetadata::load(temp.path())?;
        assert_eq!(loaded, metadata);
        assert_eq!(
            loaded.package_records().keys().collect::<Vec<_>>(),
            vec!["black", "black-plugin"]
        );
        Ok(())
    }

    #[test]
    fn null_main_package_is_legacy() -> Result<()> {
        let doc = json!({
            "main_package": {"package": null, "package_or_url": null, "package_version": null},
            "python_version": null,
            "venv_args": [],
            "injected_packages": {},
            "pvx_metadata_version": "0.1"
        });
        let metadata = EnvironmentMetadata::from_json(&doc.to_string())?;
        assert!(metadata.main_package.is_none());
        Ok(())
    }

    #[test]
    fn unknown_format_version_is_rejected() {
        let doc = json!({ "pvx_metadata_version": "9.9" });
        let err = EnvironmentMetadata::from_json(&doc.to_string())
            .expect_err("version mismatch should fail");
        assert!(err.to_string().contains("unsupported metadata version 9.9"));
    }

    #[test]
    fn corrupt_document_reports_its_path() -> Result<()> {
        let temp = tempdir()?;
        fs::write(EnvironmentMetadata::file_path(temp.path()), "{not json")?;
        let err = EnvironmentMetadata::load(temp.path()).expect_err("corrupt json should fail");
        assert!(format!("{err}").contains(METADATA_FILENAME));
        Ok(())
    }

    #[test]
    fn main_package_shadows_injected_with_same_name() {
        let mut metadata = EnvironmentMetadata::default();
        metadata.set_package(record("tool", "1.0.0"), false);
        metadata.set_package(record("tool", "2.0.0"), true);
        let records = metadata.package_records();
        assert_eq!(records["tool"].package_version, "2.0.0");
    }
}
