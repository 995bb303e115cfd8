#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod metadata;
pub mod name;
mod paths;

pub use metadata::{
    EnvironmentMetadata, PackageRecord, METADATA_FILENAME, METADATA_FORMAT_VERSION,
};
pub use name::canonicalize_package_name;
