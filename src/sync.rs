use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::metadata;
use crate::path::lexical_normalize;
use crate::tree::{FileContent, FileNode, PlaceholderKind};
use crate::workspace::WorkspaceState;

/// Files above this size keep a placeholder instead of content.
pub const MAX_FILE_SIZE_BYTES: u64 = 50 * 1024 * 1024;
/// Archives above this size are not held as raw bytes.
pub const MAX_ARCHIVE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "bz2", "xz", "7z", "rar", "tgz"];

/// Version-control directories are left on disk, never pulled into the tree.
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "mdx", "rst"];
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "pdf", "exe", "dll", "so", "dylib", "o", "a",
    "class", "jar", "war", "wasm", "pyc", "sqlite", "db",
];

const GIT_BACKUP_NAME: &str = ".git.presync";

/// Archive detection by extension, case-insensitive. Compound extensions
/// like `.tar.gz` count through their final component.
pub fn is_archive_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    match lower.rsplit('.').next() {
        Some(ext) if !ext.contains('/') => ARCHIVE_EXTENSIONS.contains(&ext),
        _ => false,
    }
}

/// Heuristic binary check: known text extensions are always text, known
/// binary extensions always binary, everything else decided by a sample
/// (null bytes or a high non-printable ratio).
pub fn is_likely_binary(path: &str, sample: &[u8]) -> bool {
    let lower = path.to_lowercase();
    if let Some(ext) = lower.rsplit('.').next() {
        if !ext.contains('/') {
            if TEXT_EXTENSIONS.contains(&ext) {
                return false;
            }
            if BINARY_EXTENSIONS.contains(&ext) {
                return true;
            }
        }
    }

    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }

    let non_printable = sample
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t' || b == 0x7f)
        .count();
    non_printable as f64 / sample.len() as f64 > 0.30
}

/// Normalized absolute form of a real path, resolved lexically against the
/// process working directory when relative.
pub fn absolute_norm(path: &Path) -> String {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    lexical_normalize(&joined.to_string_lossy())
}

fn is_vcs_dir_name(name: &str) -> bool {
    VCS_DIRS.contains(&name)
}

/// Populates the virtual tree from a real directory. The scan root becomes
/// `workspace_root` and `cwd`. Version-control directories stay on disk and
/// are not loaded; a single unreadable entry is warned about and skipped
/// rather than aborting the whole hydration.
pub fn hydrate(state: &mut WorkspaceState, real_dir: &Path) -> WorkspaceResult<()> {
    if !real_dir.is_dir() {
        return Err(WorkspaceError::NotFound(format!(
            "Root directory for hydration not found or is not a directory: '{}'",
            real_dir.display()
        )));
    }

    let root = absolute_norm(real_dir);
    state.workspace_root = Some(root.clone());
    state.cwd = Some(root.clone());
    state.tree.clear();

    info!("Starting hydration from workspace root: {}", root);

    let walker = walkdir::WalkDir::new(real_dir)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .map(is_vcs_dir_name)
                    .unwrap_or(false))
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry during hydration: {}", e);
                continue;
            }
        };

        let key = absolute_norm(entry.path());

        if entry.file_type().is_dir() {
            let mut node = FileNode::directory(&key);
            match metadata::collect(entry.path()) {
                Ok(meta) => {
                    node.last_modified = meta.timestamps.modify_time.clone();
                    node.metadata = meta;
                }
                Err(e) => warn!("Could not collect metadata for '{}': {}", key, e),
            }
            if key == root {
                state.tree.insert_root(node);
            } else {
                state.tree.insert(node);
            }
            continue;
        }

        match hydrate_file(entry.path(), &key) {
            Ok(node) => {
                debug!("Hydrated {}", key);
                state.tree.insert(node);
            }
            Err(e) => warn!("Skipping '{}' during hydration: {}", key, e),
        }
    }

    info!("Hydration complete. Total items: {}", state.tree.len());
    Ok(())
}

fn hydrate_file(real_path: &Path, key: &str) -> WorkspaceResult<FileNode> {
    let meta = metadata::collect(real_path)?;

    if meta.attributes.is_symlink {
        let target_len = meta
            .attributes
            .symlink_target
            .as_ref()
            .map(|t| t.len() as u64)
            .unwrap_or(0);
        let mut node = FileNode::file(key, FileContent::empty(), target_len);
        node.last_modified = meta.timestamps.modify_time.clone();
        node.metadata = meta;
        return Ok(node);
    }

    let size = std::fs::metadata(real_path)?.len();
    let content = read_content(real_path, key, size);

    let mut node = FileNode::file(key, content, size);
    node.last_modified = meta.timestamps.modify_time.clone();
    node.metadata = meta;
    Ok(node)
}

fn read_content(real_path: &Path, key: &str, size: u64) -> FileContent {
    if size == 0 {
        return FileContent::empty();
    }
    if size > MAX_FILE_SIZE_BYTES {
        info!("File '{}' exceeds size limit; content not loaded", key);
        return FileContent::Placeholder(PlaceholderKind::LargeFile);
    }

    if is_archive_file(key) {
        if size > MAX_ARCHIVE_SIZE_BYTES {
            info!("Archive '{}' exceeds archive limit; content not loaded", key);
            return FileContent::Placeholder(PlaceholderKind::Binary);
        }
        return match std::fs::read(real_path) {
            Ok(bytes) => FileContent::Binary(bytes),
            Err(e) => {
                warn!("Error reading archive '{}': {}", key, e);
                FileContent::Placeholder(PlaceholderKind::Binary)
            }
        };
    }

    let bytes = match std::fs::read(real_path) {
        Ok(b) => b,
        Err(e) => {
            warn!("Error reading file '{}': {}", key, e);
            return FileContent::Placeholder(PlaceholderKind::ReadError);
        }
    };

    let sample_len = bytes.len().min(1024);
    if is_likely_binary(key, &bytes[..sample_len]) {
        return FileContent::Binary(bytes);
    }

    match String::from_utf8(bytes) {
        Ok(text) => FileContent::text_from_str(&text),
        // Latin-1 fallback: every byte maps to a char, exact line endings kept.
        Err(e) => {
            let text: String = e.into_bytes().iter().map(|&b| b as char).collect();
            FileContent::text_from_str(&text)
        }
    }
}

/// Writes the virtual tree out to a real directory. A pre-existing `.git`
/// under the target is moved aside first and restored afterwards, so a sync
/// can never destroy version-control history the tree knows nothing about.
/// Per-file failures are warned about and skipped; each file write is atomic
/// (sibling temp file plus rename).
pub fn dehydrate(state: &WorkspaceState, target_dir: &Path) -> WorkspaceResult<()> {
    let old_root = state.workspace_root.as_deref().ok_or_else(|| {
        WorkspaceError::WorkspaceNotAvailable("workspace_root not configured".to_string())
    })?;

    let new_root = absolute_norm(target_dir);
    std::fs::create_dir_all(target_dir)?;

    info!("Writing workspace state to disk: {}", new_root);

    let git_backup = preserve_git_dir(target_dir);

    // Pass 1: directories, parents before children (key order guarantees it).
    for (path, node) in state.tree.iter() {
        if !node.is_directory {
            continue;
        }
        if let Some(dest) = map_to_target(path, old_root, &new_root) {
            if let Err(e) = std::fs::create_dir_all(&dest) {
                warn!("Could not create directory '{}': {}", dest.display(), e);
            }
        }
    }

    // Pass 2: file contents, metadata applied immediately after each write.
    for (path, node) in state.tree.iter() {
        if node.is_directory {
            continue;
        }
        let Some(dest) = map_to_target(path, old_root, &new_root) else {
            warn!("Path '{}' not relative to workspace root '{}'", path, old_root);
            continue;
        };
        if let Err(e) = materialize_file(node, &dest) {
            warn!("Could not write '{}': {}", dest.display(), e);
            continue;
        }
        let _ = metadata::apply(&dest, &node.metadata, false);
    }

    // Pass 3: directory metadata, deepest first so content writes cannot
    // invalidate timestamps already applied to a parent.
    let mut dirs: Vec<(&String, &FileNode)> =
        state.tree.iter().filter(|(_, n)| n.is_directory).collect();
    dirs.reverse();
    for (path, node) in dirs {
        if let Some(dest) = map_to_target(path, old_root, &new_root) {
            let _ = metadata::apply(&dest, &node.metadata, false);
        }
    }

    if let Some(backup) = git_backup {
        restore_git_dir(target_dir, &backup);
    }

    info!("Workspace state written to {}", new_root);
    Ok(())
}

fn map_to_target(path: &str, old_root: &str, new_root: &str) -> Option<PathBuf> {
    if path == old_root {
        return Some(PathBuf::from(new_root));
    }
    let rel = path.strip_prefix(&format!("{}/", old_root))?;
    Some(Path::new(new_root).join(rel))
}

fn preserve_git_dir(target_dir: &Path) -> Option<PathBuf> {
    let git_dir = target_dir.join(".git");
    if !git_dir.exists() {
        return None;
    }
    let backup = target_dir.join(GIT_BACKUP_NAME);
    match std::fs::rename(&git_dir, &backup) {
        Ok(()) => {
            info!("Preserving .git directory during dehydration");
            Some(backup)
        }
        Err(e) => {
            // Non-fatal: the sync proceeds, preservation failure is reported.
            warn!("Could not move .git aside for preservation: {}", e);
            None
        }
    }
}

fn restore_git_dir(target_dir: &Path, backup: &Path) {
    let git_dir = target_dir.join(".git");
    if let Err(e) = std::fs::rename(backup, &git_dir) {
        warn!("Could not restore preserved .git directory: {}", e);
    }
}

fn materialize_file(node: &FileNode, dest: &Path) -> WorkspaceResult<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if node.metadata.attributes.is_symlink {
        if let Some(target) = &node.metadata.attributes.symlink_target {
            if dest.symlink_metadata().is_ok() {
                std::fs::remove_file(dest)?;
            }
            std::os::unix::fs::symlink(target, dest)?;
            return Ok(());
        }
    }

    // A read-only leftover from a previous sync would block the rename.
    if let Ok(meta) = dest.symlink_metadata() {
        let mut perms = meta.permissions();
        if perms.mode() & 0o200 == 0 {
            perms.set_mode(perms.mode() | 0o200);
            let _ = std::fs::set_permissions(dest, perms);
        }
    }

    let bytes: Vec<u8> = match &node.content {
        FileContent::Text(lines) => lines.concat().into_bytes(),
        FileContent::Binary(data) => data.clone(),
        FileContent::Placeholder(kind) => format!("{}\n", kind.marker()).into_bytes(),
    };

    // Atomic from the caller's perspective: full content lands via rename or
    // the pre-sync file is left untouched.
    let file_name = dest
        .file_name()
        .ok_or_else(|| WorkspaceError::InvalidInput(format!("Bad path: {}", dest.display())))?
        .to_string_lossy()
        .into_owned();
    let tmp = dest.with_file_name(format!(".{}.sync-tmp", file_name));
    std::fs::write(&tmp, &bytes).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        WorkspaceError::Io(e)
    })?;
    std::fs::rename(&tmp, dest).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        WorkspaceError::Io(e)
    })?;

    Ok(())
}

/// Validates and switches the common-directory mirror. The previous common
/// directory (if any) is dehydrated first; hydration from the new directory
/// happens against a scratch state so a failure leaves everything, including
/// `common_directory`, unchanged.
pub fn update_common_directory(state: &mut WorkspaceState, new_dir: &str) -> WorkspaceResult<()> {
    if new_dir.trim().is_empty() {
        return Err(WorkspaceError::InvalidInput(
            "Common directory path must be a non-empty string".to_string(),
        ));
    }

    let normalized = lexical_normalize(new_dir.trim());
    if !normalized.starts_with('/') {
        return Err(WorkspaceError::InvalidInput(
            "Common directory must be an absolute path".to_string(),
        ));
    }

    let dir = Path::new(&normalized);
    if !dir.exists() {
        return Err(WorkspaceError::InvalidInput(format!(
            "Common directory '{}' does not exist",
            normalized
        )));
    }
    if !dir.is_dir() {
        return Err(WorkspaceError::InvalidInput(format!(
            "Common directory '{}' is not a directory",
            normalized
        )));
    }
    if tempfile::tempfile_in(dir).is_err() {
        return Err(WorkspaceError::InvalidInput(format!(
            "Common directory '{}' is not writable",
            normalized
        )));
    }

    if let Some(previous) = state.common_directory.clone() {
        if state.workspace_root.is_some() && !state.tree.is_empty() {
            dehydrate(state, Path::new(&previous))?;
        }
    }

    let mut scratch = WorkspaceState::new();
    if let Err(e) = hydrate(&mut scratch, dir) {
        return Err(WorkspaceError::Hydration(format!(
            "Failed to hydrate from new common directory '{}': {}",
            normalized, e
        )));
    }

    state.workspace_root = scratch.workspace_root;
    state.cwd = scratch.cwd;
    state.tree = scratch.tree;
    state.common_directory = Some(normalized.clone());

    info!("Common directory updated to: {}", normalized);
    Ok(())
}

/// Hydrates the tree from the configured common directory.
pub fn hydrate_from_common(state: &mut WorkspaceState) -> WorkspaceResult<()> {
    let common = state.common_directory.clone().ok_or_else(|| {
        WorkspaceError::WorkspaceNotAvailable("No common directory has been set".to_string())
    })?;
    hydrate(state, Path::new(&common))
}

/// Dehydrates the tree to the configured common directory, clearing stale
/// entries first. A `.git` directory in the mirror always survives.
pub fn dehydrate_to_common(state: &mut WorkspaceState) -> WorkspaceResult<()> {
    let common = state.common_directory.clone().ok_or_else(|| {
        WorkspaceError::WorkspaceNotAvailable("No common directory has been set".to_string())
    })?;
    let dir = Path::new(&common);

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        let removed = if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = removed {
            warn!("Could not clear '{}' before dehydration: {}", path.display(), e);
        }
    }

    dehydrate(state, dir)
}

/// Wraps an operation in common-filesystem synchronization: hydrate before,
/// dehydrate after, with the dehydration guaranteed even when the operation
/// fails so state is never left only in memory. When common-filesystem mode
/// is disabled the operation runs unmodified.
pub fn run_with_sync<T, F>(state: &mut WorkspaceState, op: F) -> WorkspaceResult<T>
where
    F: FnOnce(&mut WorkspaceState) -> WorkspaceResult<T>,
{
    if !state.common_file_system_enabled {
        return op(state);
    }

    hydrate_from_common(state)?;
    let result = op(state);
    let sync_result = dehydrate_to_common(state);

    match (result, sync_result) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(sync_err)) => Err(sync_err),
        (Err(op_err), Ok(())) => Err(op_err),
        (Err(op_err), Err(sync_err)) => {
            warn!("Dehydration after failed operation also failed: {}", sync_err);
            Err(op_err)
        }
    }
}
