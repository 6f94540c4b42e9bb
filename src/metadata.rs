use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

use crate::error::{WorkspaceError, WorkspaceResult};

/// Current time as an ISO-8601 UTC string with a `Z` suffix.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn system_time_iso(time: std::time::SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn unix_seconds_iso(secs: i64, nanos: u32) -> String {
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePermissions {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTimestamps {
    pub access_time: String,
    pub modify_time: String,
    pub change_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub is_hidden: bool,
    pub is_symlink: bool,
    pub is_readonly: bool,
    pub symlink_target: Option<String>,
}

/// Real-filesystem attributes carried on every node so simulated tool calls
/// see realistic permissions and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub permissions: FilePermissions,
    pub timestamps: FileTimestamps,
    pub attributes: FileAttributes,
}

impl FileMetadata {
    pub fn default_file() -> Self {
        Self::with_mode(0o644)
    }

    pub fn default_directory() -> Self {
        Self::with_mode(0o755)
    }

    fn with_mode(mode: u32) -> Self {
        let now = now_iso();
        Self {
            permissions: FilePermissions {
                mode,
                uid: 1000,
                gid: 1000,
            },
            timestamps: FileTimestamps {
                access_time: now.clone(),
                modify_time: now.clone(),
                change_time: now,
            },
            attributes: FileAttributes {
                is_hidden: false,
                is_symlink: false,
                is_readonly: false,
                symlink_target: None,
            },
        }
    }
}

/// Reads the real file's size-independent attributes into metadata: the three
/// timestamps, permission bits, ownership and symlink status. Symlinks are
/// not followed.
pub fn collect(path: &Path) -> WorkspaceResult<FileMetadata> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::symlink_metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => WorkspaceError::NotFound(format!("{}", path.display())),
        ErrorKind::PermissionDenied => {
            WorkspaceError::PermissionDenied(format!("stat {}", path.display()))
        }
        _ => WorkspaceError::Metadata(format!("stat {}: {}", path.display(), e)),
    })?;

    let is_symlink = meta.file_type().is_symlink();
    let symlink_target = if is_symlink {
        std::fs::read_link(path)
            .ok()
            .map(|t| t.to_string_lossy().into_owned())
    } else {
        None
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let access_time = meta
        .accessed()
        .map(system_time_iso)
        .unwrap_or_else(|_| now_iso());
    let modify_time = meta
        .modified()
        .map(system_time_iso)
        .unwrap_or_else(|_| now_iso());
    // ctime is kernel managed; collected for fidelity but never re-applied.
    let change_time = unix_seconds_iso(meta.ctime(), meta.ctime_nsec() as u32);

    let mode = meta.mode() & 0o7777;

    Ok(FileMetadata {
        permissions: FilePermissions {
            mode,
            uid: meta.uid(),
            gid: meta.gid(),
        },
        timestamps: FileTimestamps {
            access_time,
            modify_time,
            change_time,
        },
        attributes: FileAttributes {
            is_hidden: file_name.starts_with('.'),
            is_symlink,
            is_readonly: mode & 0o200 == 0,
            symlink_target,
        },
    })
}

/// Writes permission bits and timestamps back to a real file. In strict mode
/// any failure propagates as a `Metadata` error; otherwise failures are
/// logged and swallowed so one bad file cannot abort a whole sync.
pub fn apply(path: &Path, metadata: &FileMetadata, strict: bool) -> WorkspaceResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let is_symlink = std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);

    if !is_symlink {
        let mut mode = metadata.permissions.mode;
        if metadata.attributes.is_readonly {
            mode &= !0o222;
        } else {
            mode |= 0o200;
        }
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
            let msg = format!("chmod {}: {}", path.display(), e);
            if strict {
                return Err(WorkspaceError::Metadata(msg));
            }
            warn!("{}", msg);
        }
    }

    let atime = parse_file_time(&metadata.timestamps.access_time)
        .or_else(|| parse_file_time(&metadata.timestamps.modify_time));
    let mtime = parse_file_time(&metadata.timestamps.modify_time);
    if let (Some(atime), Some(mtime)) = (atime, mtime) {
        let result = if is_symlink {
            filetime::set_symlink_file_times(path, atime, mtime)
        } else {
            filetime::set_file_times(path, atime, mtime)
        };
        if let Err(e) = result {
            let msg = format!("utime {}: {}", path.display(), e);
            if strict {
                return Err(WorkspaceError::Metadata(msg));
            }
            warn!("{}", msg);
        }
    }

    Ok(())
}

fn parse_file_time(iso: &str) -> Option<FileTime> {
    let parsed = DateTime::parse_from_rfc3339(iso).ok()?;
    Some(FileTime::from_unix_time(
        parsed.timestamp(),
        parsed.timestamp_subsec_nanos(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn collect_reads_mode_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::File::create(&file)
            .unwrap()
            .write_all(b"hi")
            .unwrap();

        let meta = collect(&file).unwrap();
        assert!(!meta.attributes.is_symlink);
        assert!(!meta.attributes.is_hidden);
        assert!(meta.timestamps.modify_time.ends_with('Z'));
        assert!(meta.permissions.mode > 0);
    }

    #[test]
    fn collect_missing_path_is_not_found() {
        let err = collect(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, WorkspaceError::NotFound(_)));
    }

    #[test]
    fn apply_round_trips_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "hi").unwrap();

        let mut meta = collect(&file).unwrap();
        meta.timestamps.modify_time = "2024-03-01T12:00:00Z".to_string();
        meta.timestamps.access_time = "2024-03-01T12:00:00Z".to_string();
        apply(&file, &meta, true).unwrap();

        let reread = collect(&file).unwrap();
        assert!(reread.timestamps.modify_time.starts_with("2024-03-01T12:00:00"));
    }

    #[test]
    fn hidden_flag_follows_dot_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".secret");
        std::fs::write(&file, "x").unwrap();
        assert!(collect(&file).unwrap().attributes.is_hidden);
    }
}
