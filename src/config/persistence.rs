use crate::{CfgEditError, Result};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Marker between a file stem and its backup sequence number.
const BACKUP_MARKER: &str = ".bak";

/// One numbered backup sibling of a script file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub sequence: u32,
}

/// A config script read once from disk, with write access already checked.
#[derive(Debug)]
pub struct ScriptFile {
    path: PathBuf,
    content: String,
}

impl ScriptFile {
    /// Reads the file and checks it can be reopened for read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(CfgEditError::FileNotFound(path));
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| CfgEditError::permission(&path, format!("not readable: {}", e)))?;
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| CfgEditError::permission(&path, format!("not writable: {}", e)))?;
        debug!(path = %path.display(), bytes = content.len(), "Read config script");
        Ok(Self { path, content })
    }

    /// Existence check only, for operations that never write.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(CfgEditError::FileNotFound(path));
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| CfgEditError::permission(&path, format!("not readable: {}", e)))?;
        Ok(Self { path, content })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Copies the content as read into the next numbered backup sibling.
    pub fn backup(&self) -> Result<BackupRecord> {
        let sequence = next_sequence(&self.path)?;
        let backup_path = backup_path(&self.path, sequence)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&backup_path)
            .map_err(|e| {
                CfgEditError::permission(&backup_path, format!("cannot create backup: {}", e))
            })?;
        file.write_all(self.content.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| {
                CfgEditError::permission(&backup_path, format!("cannot write backup: {}", e))
            })?;
        drop(file);
        make_shared(&backup_path)?;

        info!(path = %backup_path.display(), sequence, "Created backup");
        Ok(BackupRecord {
            path: backup_path,
            sequence,
        })
    }

    /// Overwrites the file line by line, each line followed by `\n`.
    pub fn write(&self, content: &str) -> Result<()> {
        let failed = |e: std::io::Error| {
            CfgEditError::permission(&self.path, format!("write failed: {}", e))
        };
        let file = File::create(&self.path).map_err(failed)?;
        let mut writer = BufWriter::new(file);
        for line in content.split_terminator('\n') {
            writer.write_all(line.as_bytes()).map_err(failed)?;
            writer.write_all(b"\n").map_err(failed)?;
        }
        writer.flush().map_err(failed)?;
        drop(writer);
        make_writable(&self.path)?;
        debug!(path = %self.path.display(), bytes = content.len(), "Wrote config script");
        Ok(())
    }
}

fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| CfgEditError::permission(path, "file name is not valid UTF-8"))
}

/// `<stem>.bak<NNN>` next to `path`.
pub fn backup_path(path: &Path, sequence: u32) -> Result<PathBuf> {
    let stem = file_stem(path)?;
    Ok(path.with_file_name(format!("{}{}{:03}", stem, BACKUP_MARKER, sequence)))
}

/// Sequence number encoded in `name`, if it is a backup of `stem`.
fn parse_sequence(stem: &str, name: &str) -> Option<u32> {
    let digits = name.strip_prefix(stem)?.strip_prefix(BACKUP_MARKER)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Existing backups of `path`, ordered by sequence number.
pub fn list_backups(path: &Path) -> Result<Vec<BackupRecord>> {
    let stem = file_stem(path)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let entries = fs::read_dir(&dir)
        .map_err(|e| CfgEditError::permission(&dir, format!("cannot list directory: {}", e)))?;

    let mut records: Vec<BackupRecord> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let sequence = parse_sequence(&stem, name.to_str()?)?;
            Some(BackupRecord {
                path: entry.path(),
                sequence,
            })
        })
        .collect();
    records.sort_by_key(|r| r.sequence);
    Ok(records)
}

/// One more than the highest existing backup sequence, starting at 1.
pub fn next_sequence(path: &Path) -> Result<u32> {
    let highest = list_backups(path)?
        .last()
        .map(|r| r.sequence)
        .unwrap_or(0);
    Ok(highest + 1)
}

/// Copies `backup` over `target`.
pub fn restore(target: &Path, backup: &Path) -> Result<()> {
    if !backup.is_file() {
        return Err(CfgEditError::FileNotFound(backup.to_path_buf()));
    }
    fs::copy(backup, target).map_err(|e| {
        CfgEditError::permission(target, format!("cannot restore from {}: {}", backup.display(), e))
    })?;
    make_writable(target)?;
    info!(target = %target.display(), backup = %backup.display(), "Restored from backup");
    Ok(())
}

fn make_shared(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o666))
            .map_err(|e| CfgEditError::permission(path, format!("cannot set permissions: {}", e)))?;
    }
    #[cfg(not(unix))]
    make_writable(path)?;
    Ok(())
}

fn make_writable(path: &Path) -> Result<()> {
    let failed = |e: std::io::Error| {
        CfgEditError::permission(path, format!("cannot set permissions: {}", e))
    };
    let mut permissions = fs::metadata(path).map_err(failed)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o200);
    }
    #[cfg(not(unix))]
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions).map_err(failed)
}
