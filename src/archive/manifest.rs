//! Names already present in an existing container.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::debug;
use zip::ZipArchive;

use super::ArchiveError;

/// Entry names of the previous container. Read-only for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveManifest {
    names: HashSet<String>,
}

impl ArchiveManifest {
    /// Reads the central directory of `path`. A missing file yields an
    /// empty manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] or [`ArchiveError::Zip`] if the file
    /// exists but is not a readable ZIP.
    pub fn load(path: &Path) -> Result<Self, ArchiveError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => return Err(ArchiveError::io(path, source)),
        };
        let archive =
            ZipArchive::new(BufReader::new(file)).map_err(|source| ArchiveError::zip(path, source))?;
        let names: HashSet<String> = archive.file_names().map(ToString::to_string).collect();
        debug!(path = %path.display(), entries = names.len(), "loaded archive manifest");
        Ok(Self { names })
    }

    /// Builds a manifest from names.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `name` is already archived.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Number of archived entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true for an empty or missing container.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
