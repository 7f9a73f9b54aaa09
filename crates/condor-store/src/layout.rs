use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Current on-disk format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a condor data directory.
///
/// ```text
/// {root}/store/version          format marker
/// {root}/store/.lock            index lock
/// {root}/index/channels/*.json  channel records
/// {root}/index/packages/{channel}/*.json
/// {root}/index/users.json
/// {root}/files/{channel}/...    content cache
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.store_dir().join(".lock")
    }

    #[inline]
    pub fn channels_dir(&self) -> PathBuf {
        self.root.join("index").join("channels")
    }

    #[inline]
    pub fn channel_record(&self, channel: &str) -> PathBuf {
        self.channels_dir().join(format!("{channel}.json"))
    }

    #[inline]
    pub fn packages_dir(&self, channel: &str) -> PathBuf {
        self.root.join("index").join("packages").join(channel)
    }

    #[inline]
    pub fn package_record(&self, channel: &str, package: &str) -> PathBuf {
        self.packages_dir(channel).join(format!("{package}.json"))
    }

    #[inline]
    pub fn users_file(&self) -> PathBuf {
        self.root.join("index").join("users.json")
    }

    #[inline]
    pub fn files_dir(&self, channel: &str) -> PathBuf {
        self.root.join("files").join(channel)
    }

    /// Resolve a channel-relative file path inside the content cache,
    /// rejecting anything that could escape the channel directory.
    pub fn file_path(&self, channel: &str, path: &str) -> Result<PathBuf, StoreError> {
        Ok(self.files_dir(channel).join(sanitize_relative(path)?))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.store_dir())?;
        fs::create_dir_all(self.channels_dir())?;
        fs::create_dir_all(self.root.join("index").join("packages"))?;
        fs::create_dir_all(self.root.join("files"))?;

        let version_path = self.store_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            crate::write_atomic(&version_path, serde_json::to_string_pretty(&ver)?.as_bytes())?;
        }
        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.store_dir().join(VERSION_FILE))?;
        let ver: StoreVersion = serde_json::from_str(&content)?;
        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

fn sanitize_relative(path: &str) -> Result<PathBuf, StoreError> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.contains('\\') {
        return Err(StoreError::InvalidPath(path.to_owned()));
    }
    let mut out = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => out.push(part),
            _ => return Err(StoreError::InvalidPath(path.to_owned())),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(StoreError::InvalidPath(path.to_owned()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/srv/condor");
        assert_eq!(
            layout.channel_record("conda-forge"),
            PathBuf::from("/srv/condor/index/channels/conda-forge.json")
        );
        assert_eq!(
            layout.package_record("conda-forge", "numpy"),
            PathBuf::from("/srv/condor/index/packages/conda-forge/numpy.json")
        );
        assert_eq!(
            layout.file_path("conda-forge", "linux-64/repodata.json").unwrap(),
            PathBuf::from("/srv/condor/files/conda-forge/linux-64/repodata.json")
        );
        assert_eq!(layout.lock_file(), PathBuf::from("/srv/condor/store/.lock"));
    }

    #[test]
    fn file_path_rejects_traversal() {
        let layout = StoreLayout::new("/srv/condor");
        assert!(layout.file_path("c", "../other/file").is_err());
        assert!(layout.file_path("c", "linux-64/../../x").is_err());
        assert!(layout.file_path("c", "./x").is_err());
        assert!(layout.file_path("c", "").is_err());
        assert!(layout.file_path("c", "a\\b").is_err());
        assert!(layout.file_path("c", "/linux-64/x.conda").is_ok());
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
        assert!(layout.channels_dir().is_dir());
        assert!(layout.root().join("files").is_dir());
    }

    #[test]
    fn version_mismatch_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(
            layout.store_dir().join(VERSION_FILE),
            r#"{"format_version": 99}"#,
        )
        .unwrap();
        assert!(matches!(
            layout.verify_version(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }
}
