//! Reconciling user-supplied package specs with the names pip reports.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use pep508_rs::Requirement as PepRequirement;
use tracing::warn;

use crate::errors::VenvIssue;
use pvx_domain::canonicalize_package_name;

const ARCHIVE_EXTENSIONS: [&str; 6] = [".whl", ".tar.gz", ".zip", ".tar.bz2", ".tgz", ".tar"];
const EDITABLE_FLAGS: [&str; 2] = ["--editable", "-e"];

#[derive(Debug)]
enum ParsedSpec {
    Requirement(Box<PepRequirement>),
    Url(String),
    LocalPath(PathBuf),
}

fn is_archive_name(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    ARCHIVE_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
}

fn parse_spec(spec: &str) -> Result<ParsedSpec> {
    let trimmed = spec.trim();
    if trimmed.is_empty() {
        return Err(VenvIssue::InvalidSpec {
            spec: spec.to_string(),
        }
        .into());
    }
    if let Ok(requirement) = PepRequirement::from_str(trimmed) {
        if !is_archive_name(&requirement.name.to_string()) {
            return Ok(ParsedSpec::Requirement(Box::new(requirement)));
        }
    }
    if trimmed.contains("://") && !trimmed.chars().any(char::is_whitespace) {
        return Ok(ParsedSpec::Url(trimmed.to_string()));
    }
    let path = Path::new(trimmed);
    if path.exists() {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", path.display()))?;
        return Ok(ParsedSpec::LocalPath(absolute));
    }
    Err(VenvIssue::InvalidSpec {
        spec: trimmed.to_string(),
    }
    .into())
}

/// Length of the distribution name that starts a requirement string.
fn leading_name_len(spec: &str) -> usize {
    spec.char_indices()
        .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')))
        .map_or(spec.len(), |(idx, _)| idx)
}

/// Rewrites the distribution name of `package_or_url` to `package` when the
/// two disagree. URLs, local paths and unparsable specs are returned as given.
#[must_use]
pub fn fix_package_name(package_or_url: &str, package: &str) -> String {
    let trimmed = package_or_url.trim();
    let Ok(ParsedSpec::Requirement(requirement)) = parse_spec(trimmed) else {
        return package_or_url.to_string();
    };
    let declared = requirement.name.to_string();
    if canonicalize_package_name(&declared) == canonicalize_package_name(package) {
        return package_or_url.to_string();
    }
    warn!(
        spec = trimmed,
        package, "package name in spec does not match the requested package; using {package}"
    );
    let name_len = leading_name_len(trimmed);
    format!("{package}{}", &trimmed[name_len..])
}

/// Normalizes a spec for `pip install` and drops editable flags unless the
/// spec is a local path.
///
/// # Errors
/// Returns [`VenvIssue::InvalidSpec`] when the spec is neither a requirement,
/// a URL nor an existing path.
pub fn parse_specifier_for_install(
    package_spec: &str,
    pip_args: &[String],
) -> Result<(String, Vec<String>)> {
    let parsed = parse_spec(package_spec)?;
    let mut args = pip_args.to_vec();
    let spec = match parsed {
        ParsedSpec::LocalPath(path) => return Ok((path.display().to_string(), args)),
        ParsedSpec::Requirement(requirement) => requirement.to_string(),
        ParsedSpec::Url(url) => url,
    };
    if args.iter().any(|arg| EDITABLE_FLAGS.contains(&arg.as_str())) {
        warn!(
            spec = %spec,
            "ignoring --editable: only local paths can be installed in editable mode"
        );
        args.retain(|arg| !EDITABLE_FLAGS.contains(&arg.as_str()));
    }
    Ok((spec, args))
}

/// Distribution name declared by a requirement spec, if the spec is one.
///
/// URLs and local paths carry no reliable name; callers infer it by installing.
#[must_use]
pub fn requirement_name(package_spec: &str) -> Option<String> {
    match parse_spec(package_spec) {
        Ok(ParsedSpec::Requirement(requirement)) => Some(requirement.name.to_string()),
        _ => None,
    }
}

/// Canonical form of a spec as recorded in metadata.
#[must_use]
pub fn parse_specifier_for_metadata(package_spec: &str) -> String {
    match parse_spec(package_spec) {
        Ok(ParsedSpec::Requirement(requirement)) => requirement.to_string(),
        Ok(ParsedSpec::Url(url)) => url,
        Ok(ParsedSpec::LocalPath(path)) => path.display().to_string(),
        Err(_) => package_spec.to_string(),
    }
}

/// Human-readable description used in log and error messages.
#[must_use]
pub fn full_package_description(package: &str, package_spec: &str) -> String {
    if package == package_spec {
        package.to_string()
    } else {
        format!("{package} from spec {package_spec:?}")
    }
}
