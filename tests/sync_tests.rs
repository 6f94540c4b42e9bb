use std::path::Path;

use workspace_sandbox::sync;
use workspace_sandbox::tree::FileContent;
use workspace_sandbox::workspace::WorkspaceState;

fn hydrated_fixture() -> (tempfile::TempDir, WorkspaceState) {
    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("a.txt"), "hello\nworld\n").unwrap();
    std::fs::create_dir(src.path().join("sub")).unwrap();
    std::fs::write(src.path().join("sub").join("b.py"), "print(1)\n").unwrap();

    let mut state = WorkspaceState::new();
    sync::hydrate(&mut state, src.path()).unwrap();
    (src, state)
}

#[test]
fn hydration_loads_files_and_directories() {
    let (_src, state) = hydrated_fixture();
    let root = state.workspace_root.clone().unwrap();

    // Root, a.txt, sub, sub/b.py.
    assert_eq!(state.tree.len(), 4);
    let node = state.tree.get(&format!("{}/a.txt", root)).unwrap();
    assert!(!node.is_directory);
    assert_eq!(node.size_bytes, 12);
    match &node.content {
        FileContent::Text(lines) => assert_eq!(lines, &["hello\n", "world\n"]),
        other => panic!("expected text content, got {:?}", other),
    }
    assert!(state.tree.get(&format!("{}/sub", root)).unwrap().is_directory);
}

#[test]
fn hydration_creates_no_nodes_above_workspace_root() {
    // Temp directories always sit under ancestor directories; none of those
    // ancestors belong in the tree.
    let (_src, state) = hydrated_fixture();
    let root = state.workspace_root.clone().unwrap();

    assert!(state.tree.contains(&root));
    for path in state.tree.paths() {
        assert!(
            path == &root || path.starts_with(&format!("{}/", root)),
            "node outside workspace root: {}",
            path
        );
    }
}

#[test]
fn hydration_skips_version_control_directories() {
    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("a.txt"), "hello").unwrap();
    std::fs::create_dir(src.path().join("sub")).unwrap();
    std::fs::write(src.path().join("sub").join("b.py"), "print(1)").unwrap();
    std::fs::create_dir(src.path().join(".git")).unwrap();
    std::fs::write(src.path().join(".git").join("config"), "[core]\n").unwrap();

    let mut state = WorkspaceState::new();
    sync::hydrate(&mut state, src.path()).unwrap();

    assert_eq!(state.tree.len(), 4);
    let root = state.workspace_root.clone().unwrap();
    assert!(!state.tree.contains(&format!("{}/.git", root)));
    assert!(!state.tree.contains(&format!("{}/.git/config", root)));

    // Dehydrating to a fresh directory reproduces the files with no .git.
    let dest = tempfile::tempdir().unwrap();
    sync::dehydrate(&state, dest.path()).unwrap();
    assert_eq!(
        std::fs::read_to_string(dest.path().join("a.txt")).unwrap(),
        "hello"
    );
    assert_eq!(
        std::fs::read_to_string(dest.path().join("sub").join("b.py")).unwrap(),
        "print(1)"
    );
    assert!(!dest.path().join(".git").exists());
}

#[test]
fn dehydration_preserves_destination_git_directory() {
    let (_src, state) = hydrated_fixture();

    let dest = tempfile::tempdir().unwrap();
    let git = dest.path().join(".git");
    std::fs::create_dir(&git).unwrap();
    std::fs::create_dir(git.join("refs")).unwrap();
    std::fs::write(git.join("config"), "[core]\n\trepositoryformatversion = 0\n").unwrap();
    std::fs::write(git.join("HEAD"), "ref: refs/heads/main\n").unwrap();

    sync::dehydrate(&state, dest.path()).unwrap();

    assert!(dest.path().join("a.txt").exists());
    assert_eq!(
        std::fs::read_to_string(git.join("config")).unwrap(),
        "[core]\n\trepositoryformatversion = 0\n"
    );
    assert_eq!(
        std::fs::read_to_string(git.join("HEAD")).unwrap(),
        "ref: refs/heads/main\n"
    );
    assert!(git.join("refs").is_dir());
}

#[test]
fn roundtrip_reproduces_text_and_binary_content() {
    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("notes.txt"), "line one\nno trailing newline").unwrap();
    let png: Vec<u8> = vec![0x89, b'P', b'N', b'G', 0x00, 0x01, 0xff, 0xfe];
    std::fs::write(src.path().join("logo.png"), &png).unwrap();

    let mut state = WorkspaceState::new();
    sync::hydrate(&mut state, src.path()).unwrap();

    let dest = tempfile::tempdir().unwrap();
    sync::dehydrate(&state, dest.path()).unwrap();

    assert_eq!(
        std::fs::read_to_string(dest.path().join("notes.txt")).unwrap(),
        "line one\nno trailing newline"
    );
    assert_eq!(std::fs::read(dest.path().join("logo.png")).unwrap(), png);
}

#[test]
fn small_archives_survive_byte_identical() {
    let src = tempfile::tempdir().unwrap();
    // Not a real zip, but carries the extension and binary-looking bytes.
    let payload: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    std::fs::write(src.path().join("bundle.zip"), &payload).unwrap();

    let mut state = WorkspaceState::new();
    sync::hydrate(&mut state, src.path()).unwrap();

    let root = state.workspace_root.clone().unwrap();
    let node = state.tree.get(&format!("{}/bundle.zip", root)).unwrap();
    assert!(matches!(node.content, FileContent::Binary(_)));
    assert_eq!(node.size_bytes, 4096);

    let dest = tempfile::tempdir().unwrap();
    sync::dehydrate(&state, dest.path()).unwrap();
    assert_eq!(std::fs::read(dest.path().join("bundle.zip")).unwrap(), payload);
}

#[test]
fn empty_files_roundtrip_as_empty_text() {
    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("empty.log"), "").unwrap();

    let mut state = WorkspaceState::new();
    sync::hydrate(&mut state, src.path()).unwrap();

    let root = state.workspace_root.clone().unwrap();
    let node = state.tree.get(&format!("{}/empty.log", root)).unwrap();
    assert_eq!(node.content, FileContent::Text(vec![]));
    assert_eq!(node.size_bytes, 0);

    let dest = tempfile::tempdir().unwrap();
    sync::dehydrate(&state, dest.path()).unwrap();
    assert_eq!(std::fs::read(dest.path().join("empty.log")).unwrap(), b"");
}

#[cfg(unix)]
#[test]
fn symlinks_are_recreated_not_followed() {
    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("target.txt"), "real content\n").unwrap();
    std::os::unix::fs::symlink("target.txt", src.path().join("link.txt")).unwrap();

    let mut state = WorkspaceState::new();
    sync::hydrate(&mut state, src.path()).unwrap();

    let root = state.workspace_root.clone().unwrap();
    let node = state.tree.get(&format!("{}/link.txt", root)).unwrap();
    assert!(node.metadata.attributes.is_symlink);
    assert_eq!(
        node.metadata.attributes.symlink_target.as_deref(),
        Some("target.txt")
    );

    let dest = tempfile::tempdir().unwrap();
    sync::dehydrate(&state, dest.path()).unwrap();

    let link = dest.path().join("link.txt");
    let meta = link.symlink_metadata().unwrap();
    assert!(meta.file_type().is_symlink());
    assert_eq!(
        std::fs::read_link(&link).unwrap(),
        Path::new("target.txt")
    );
    assert_eq!(
        std::fs::read_to_string(&link).unwrap(),
        "real content\n"
    );
}

#[cfg(unix)]
#[test]
fn file_permissions_survive_roundtrip() {
    use std::os::unix::fs::PermissionsExt;

    let src = tempfile::tempdir().unwrap();
    let script = src.path().join("run.sh");
    std::fs::write(&script, "#!/bin/sh\necho ok\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut state = WorkspaceState::new();
    sync::hydrate(&mut state, src.path()).unwrap();

    let dest = tempfile::tempdir().unwrap();
    sync::dehydrate(&state, dest.path()).unwrap();

    let mode = dest
        .path()
        .join("run.sh")
        .metadata()
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn modification_times_survive_roundtrip() {
    let src = tempfile::tempdir().unwrap();
    let file = src.path().join("old.txt");
    std::fs::write(&file, "aged\n").unwrap();
    let stamp = filetime::FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_times(&file, stamp, stamp).unwrap();

    let mut state = WorkspaceState::new();
    sync::hydrate(&mut state, src.path()).unwrap();

    let dest = tempfile::tempdir().unwrap();
    sync::dehydrate(&state, dest.path()).unwrap();

    let meta = dest.path().join("old.txt").metadata().unwrap();
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    assert_eq!(mtime.unix_seconds(), 1_600_000_000);
}

#[test]
fn repeated_dehydration_is_idempotent() {
    let (_src, state) = hydrated_fixture();

    let dest = tempfile::tempdir().unwrap();
    sync::dehydrate(&state, dest.path()).unwrap();
    sync::dehydrate(&state, dest.path()).unwrap();

    assert_eq!(
        std::fs::read_to_string(dest.path().join("a.txt")).unwrap(),
        "hello\nworld\n"
    );
    // No stray temp files from the atomic write path.
    let leftovers: Vec<_> = std::fs::read_dir(dest.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".sync-tmp"))
        .collect();
    assert!(leftovers.is_empty());
}
