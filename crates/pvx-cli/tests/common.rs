#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use assert_cmd::{assert::Assert, cargo::cargo_bin_cmd, Command};
use pvx_domain::{EnvironmentMetadata, PackageRecord};
use serde_json::Value;
use tempfile::TempDir;

pub const MISSING_PYTHON: &str = "/nonexistent/pvx-test/python";

pub fn pvx_home(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("tempdir")
}

pub fn pvx_cmd(home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("pvx");
    cmd.env("PVX_HOME", home)
        .env("PVX_DEFAULT_PYTHON", MISSING_PYTHON)
        .env_remove("PVX_VENVS_DIR")
        .env_remove("PVX_SHARED_LIBS")
        .env("NO_COLOR", "1");
    cmd
}

pub fn venvs_dir(home: &Path) -> PathBuf {
    home.join("venvs")
}

/// Lays out an environment directory the way `python -m venv` would,
/// without a shared-libraries link.
pub fn seed_env(home: &Path, name: &str) -> PathBuf {
    let root = venvs_dir(home).join(name);
    fs::create_dir_all(root.join("lib").join("python3.12").join("site-packages"))
        .expect("site-packages");
    fs::create_dir_all(root.join("bin")).expect("bin");
    fs::write(root.join("pyvenv.cfg"), "home = /usr/bin\n").expect("pyvenv.cfg");
    root
}

pub fn seed_env_with_metadata(home: &Path, name: &str, version: &str) -> PathBuf {
    let root = seed_env(home, name);
    let mut metadata = EnvironmentMetadata {
        python_version: Some("Python 3.12.1".to_string()),
        ..EnvironmentMetadata::default()
    };
    metadata.set_package(
        PackageRecord {
            package: name.to_string(),
            package_or_url: name.to_string(),
            pip_args: Vec::new(),
            include_dependencies: false,
            include_apps: true,
            apps: vec![name.to_string()],
            app_paths: vec![root.join("bin").join(name)],
            apps_of_dependencies: Vec::new(),
            app_paths_of_dependencies: Default::default(),
            package_version: version.to_string(),
            suffix: String::new(),
        },
        true,
    );
    metadata.write(&root).expect("write metadata");
    root
}

/// Writes an executable stand-in interpreter that runs `body` under `sh`.
#[cfg(unix)]
pub fn fake_python(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-python");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake python");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake python");
    path
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("json")
}
