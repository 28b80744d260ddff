//! Locating metastore snapshots and shard archives in a backup directory.
//!
//! Metastore snapshots are named `meta.{generation}`; shard archives are named
//! `{database}.{shardID}.{generation}`. Both live directly in the backup
//! directory.

use crate::{RestoreError, Result};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Base name of metastore snapshot files.
pub const METAFILE_BASE_NAME: &str = "meta";

/// A shard backup archive and the identifiers encoded in its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardArchiveFile {
    /// Full path to the archive
    pub path: PathBuf,

    /// Database the shard was backed up from
    pub database: String,

    /// Shard ID in the source cluster
    pub shard_id: u64,

    /// Backup generation suffix
    pub generation: u64,
}

impl ShardArchiveFile {
    /// Parse `{database}.{shardID}.{generation}` from the file name.
    pub fn parse(path: &Path) -> Result<Self> {
        let file_name = file_name(path)?;
        let fields: Vec<&str> = file_name.split('.').collect();

        let [database, shard_id, generation] = fields.as_slice() else {
            return Err(RestoreError::Consistency(format!(
                "backup file {} is not named database.shard.generation",
                path.display()
            )));
        };

        let number = |field: &str, what: &str| {
            field.parse::<u64>().map_err(|_| {
                RestoreError::Consistency(format!(
                    "backup file {} has a non-numeric {} {:?}",
                    path.display(),
                    what,
                    field
                ))
            })
        };

        Ok(Self {
            path: path.to_path_buf(),
            database: database.to_string(),
            shard_id: number(*shard_id, "shard ID")?,
            generation: number(*generation, "generation")?,
        })
    }
}

/// Regular files directly inside `dir`, sorted by file name.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            RestoreError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RestoreError::Consistency(format!("backup file {} has no UTF-8 name", path.display())))
}

/// The metastore snapshot with the highest generation in `dir`.
pub fn latest_metadata_snapshot(dir: &Path) -> Result<PathBuf> {
    let prefix = format!("{}.", METAFILE_BASE_NAME);
    let mut newest: Option<(u64, PathBuf)> = None;

    for path in list_files(dir)? {
        let Some(suffix) = file_name(&path)?.strip_prefix(&prefix) else {
            continue;
        };
        let Ok(generation) = suffix.parse::<u64>() else {
            warn!("Ignoring metastore file with unexpected suffix: {}", path.display());
            continue;
        };
        // Files are visited in name order, so equal generations keep the later name.
        if newest.as_ref().map_or(true, |(best, _)| generation >= *best) {
            newest = Some((generation, path));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| RestoreError::Consistency(format!("no metastore backups in {}", dir.display())))
}

/// Every shard archive of `database` in `dir`, in file-name order.
///
/// A file whose name starts with `{database}.` but does not parse aborts the
/// whole listing.
pub fn shard_archives(dir: &Path, database: &str) -> Result<Vec<ShardArchiveFile>> {
    let prefix = format!("{}.", database);
    let mut archives = Vec::new();

    for path in list_files(dir)? {
        if !file_name(&path)?.starts_with(&prefix) {
            continue;
        }
        let archive = ShardArchiveFile::parse(&path)?;
        if archive.database == database {
            archives.push(archive);
        }
    }

    if archives.is_empty() {
        return Err(RestoreError::Consistency(format!(
            "no backup files for {}.* in {}",
            database,
            dir.display()
        )));
    }

    Ok(archives)
}
