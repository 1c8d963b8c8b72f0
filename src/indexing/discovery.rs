use crate::core::config::SyncSettings;
use crate::core::error::{Error, Result};
use crate::storage::state::content_digest;
use ignore::WalkBuilder;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

/// Maximum decompressed bytes read from a single archive member.
const MAX_ARCHIVE_ENTRY_BYTES: u64 = 16 * 1024 * 1024;

/// Where a unit's bytes come from
#[derive(Debug, Clone)]
pub enum UnitContent {
    /// A file on disk, read on demand
    File(PathBuf),
    /// Bytes already extracted (archive members)
    Bytes(Vec<u8>),
}

/// One addressable item of an external source
#[derive(Debug, Clone)]
pub struct SourceUnit {
    /// `/`-separated path relative to the source root
    pub relative_path: String,
    pub content: UnitContent,
}

impl SourceUnit {
    /// Read the unit's text. Content that is not UTF-8 is a parsing error
    /// whichever source the unit came from.
    pub fn load(&self) -> Result<String> {
        let bytes = match &self.content {
            UnitContent::File(path) => std::fs::read(path)?,
            UnitContent::Bytes(bytes) => bytes.clone(),
        };
        String::from_utf8(bytes).map_err(|e| {
            Error::Parsing(format!("{} is not valid UTF-8: {}", self.relative_path, e))
        })
    }

    /// Load the text together with its digest
    pub fn load_with_digest(&self) -> Result<(String, String)> {
        let text = self.load()?;
        let digest = content_digest(&text);
        Ok((text, digest))
    }
}

/// A tree of documents living outside the corpus
pub trait ExternalSource: Send + Sync {
    /// Human-readable origin, for logs
    fn describe(&self) -> String;

    /// List every unit that passes the extension filter
    fn enumerate(&self, settings: &SyncSettings) -> Result<Vec<SourceUnit>>;
}

/// Join path components with `/` regardless of platform.
///
/// `None` when the path cannot name a document: a component that is not
/// UTF-8, contains `\`, or leaves the source root.
fn unix_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str()?;
                if part.contains('\\') {
                    return None;
                }
                parts.push(part.to_string());
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// A directory on disk, walked respecting .gitignore rules
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ExternalSource for DirectorySource {
    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }

    fn enumerate(&self, settings: &SyncSettings) -> Result<Vec<SourceUnit>> {
        if !self.root.exists() {
            return Err(Error::Config(format!(
                "Directory does not exist: {}",
                self.root.display()
            )));
        }
        if !self.root.is_dir() {
            return Err(Error::Config(format!(
                "Path is not a directory: {}",
                self.root.display()
            )));
        }

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false)
            .build();

        let mut units = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping inaccessible entry");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) || !settings.accepts(path)
            {
                continue;
            }

            let relative = path.strip_prefix(&self.root).map_err(|e| {
                Error::InvalidPath(format!("{}: {}", path.display(), e))
            })?;
            match unix_path(relative) {
                Some(relative_path) => units.push(SourceUnit {
                    relative_path,
                    content: UnitContent::File(path.to_path_buf()),
                }),
                None => tracing::warn!(path = %path.display(), "skipping unaddressable path"),
            }
        }

        units.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(units)
    }
}

/// A local `.zip` archive, such as a downloaded source snapshot
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    path: PathBuf,
}

impl ArchiveSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Drop a single top-level folder shared by every member.
fn strip_common_root(units: &mut [SourceUnit]) {
    let first = match units.first() {
        Some(unit) => match unit.relative_path.split_once('/') {
            Some((top, _)) => top.to_string(),
            None => return,
        },
        None => return,
    };
    let prefix = format!("{}/", first);
    if units.iter().all(|u| u.relative_path.starts_with(&prefix)) {
        for unit in units.iter_mut() {
            unit.relative_path = unit.relative_path[prefix.len()..].to_string();
        }
    }
}

impl ExternalSource for ArchiveSource {
    fn describe(&self) -> String {
        format!("archive {}", self.path.display())
    }

    fn enumerate(&self, settings: &SyncSettings) -> Result<Vec<SourceUnit>> {
        let file = std::fs::File::open(&self.path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| Error::Archive(format!("{}: {}", self.path.display(), e)))?;

        let mut units = Vec::new();
        for i in 0..archive.len() {
            let entry = archive
                .by_index(i)
                .map_err(|e| Error::Archive(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let Some(name) = entry.enclosed_name() else {
                tracing::warn!(member = entry.name(), "skipping unsafe archive member");
                continue;
            };
            if !settings.accepts(&name) {
                continue;
            }
            let Some(relative_path) = unix_path(&name) else {
                tracing::warn!(member = entry.name(), "skipping unaddressable path");
                continue;
            };

            let mut bytes = Vec::new();
            entry
                .take(MAX_ARCHIVE_ENTRY_BYTES)
                .read_to_end(&mut bytes)
                .map_err(|e| Error::Archive(format!("{}: {}", relative_path, e)))?;
            if bytes.len() as u64 >= MAX_ARCHIVE_ENTRY_BYTES {
                return Err(Error::Archive(format!(
                    "{} exceeds size limit ({} bytes)",
                    relative_path, MAX_ARCHIVE_ENTRY_BYTES
                )));
            }
            units.push(SourceUnit {
                relative_path,
                content: UnitContent::Bytes(bytes),
            });
        }

        strip_common_root(&mut units);
        units.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(units)
    }
}
