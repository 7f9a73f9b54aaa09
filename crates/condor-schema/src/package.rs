//! The `info/index.json` descriptor embedded in every package archive.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Package container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    /// bzip2-compressed tarball, `.tar.bz2`.
    TarBz2,
    /// zip wrapping zstd-compressed tarballs, `.conda`.
    Conda,
}

impl ArchiveKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveKind::TarBz2 => ".tar.bz2",
            ArchiveKind::Conda => ".conda",
        }
    }

    /// Key of the repodata mapping that lists archives of this kind.
    pub fn repodata_key(self) -> &'static str {
        match self {
            ArchiveKind::TarBz2 => "packages",
            ArchiveKind::Conda => "packages.conda",
        }
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.ends_with(".tar.bz2") {
            Some(ArchiveKind::TarBz2)
        } else if filename.ends_with(".conda") {
            Some(ArchiveKind::Conda)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Remaining descriptor fields, passed through to repodata untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageInfo {
    pub fn from_bytes(data: &[u8]) -> Result<Self, SchemaError> {
        serde_json::from_slice(data)
            .map_err(|e| SchemaError::Malformed(format!("info/index.json: {e}")))
    }

    /// Check name, version, build and (declared) subdir syntax.
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_package_name(&self.name)?;
        validate_version(&self.version)?;
        validate_build_string(&self.build)?;
        match self.subdir.as_deref() {
            None | Some("") => Ok(()),
            Some(subdir) => validate_subdir(subdir),
        }
    }

    pub fn filename(&self, kind: ArchiveKind) -> String {
        canonical_filename(&self.name, &self.version, &self.build, kind)
    }
}

pub fn canonical_filename(name: &str, version: &str, build: &str, kind: ArchiveKind) -> String {
    format!("{name}-{version}-{build}{}", kind.extension())
}

pub fn validate_package_name(name: &str) -> Result<(), SchemaError> {
    let invalid = |reason| SchemaError::InvalidPackageField {
        field: "name",
        value: name.to_owned(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.starts_with('.') || name.starts_with('-') {
        return Err(invalid("must start with a letter, digit or '_'"));
    }
    if !name.bytes().all(|b| {
        b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'.' | b'-' | b'+')
    }) {
        return Err(invalid("must match [a-z0-9_.+-]"));
    }
    Ok(())
}

pub fn validate_version(version: &str) -> Result<(), SchemaError> {
    let invalid = |reason| SchemaError::InvalidPackageField {
        field: "version",
        value: version.to_owned(),
        reason,
    };
    if version.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if version.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }
    if version.contains('-') {
        return Err(invalid("must not contain '-'"));
    }
    if !version
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'+' | b'!' | b'*'))
    {
        return Err(invalid("must match [A-Za-z0-9._+!*]"));
    }
    Ok(())
}

/// `noarch`, or lowercase `os-arch` tokens such as `linux-64` or `osx-arm64`.
pub fn validate_subdir(subdir: &str) -> Result<(), SchemaError> {
    let invalid = |reason| SchemaError::InvalidPackageField {
        field: "subdir",
        value: subdir.to_owned(),
        reason,
    };
    let mut tokens = subdir.split('-');
    let platform = tokens.next().unwrap_or("");
    if platform.is_empty()
        || !platform
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Err(invalid("must start with a lowercase platform name"));
    }
    for token in tokens {
        if token.is_empty()
            || !token
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(invalid("must match [a-z0-9]+(-[a-z0-9_]+)*"));
        }
    }
    Ok(())
}

pub fn validate_build_string(build: &str) -> Result<(), SchemaError> {
    let invalid = |reason| SchemaError::InvalidPackageField {
        field: "build",
        value: build.to_owned(),
        reason,
    };
    if build.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if !build
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'+'))
    {
        return Err(invalid("must match [A-Za-z0-9_.+]"));
    }
    Ok(())
}
