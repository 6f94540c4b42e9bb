//! Workspace Sandbox - Virtual Filesystem Synchronization Engine
//!
//! An in-memory virtual workspace for shell-sandbox environments, with
//! bidirectional synchronization against a real "common" directory,
//! metadata-faithful emulation, and shell-command security screening.
//!
//! # Features
//!
//! - **Hydrate/Dehydrate**: Load a real directory tree into memory and write
//!   it back out, preserving permissions, timestamps, and symlinks
//! - **Common-Directory Mirroring**: Wrap operations so the mirror on disk
//!   never drifts from the in-memory tree, even on failure
//! - **`.git` Preservation**: Dehydration never destroys version-control
//!   history found in a destination
//! - **Binary/Archive Classification**: Archives and binaries are carried as
//!   opaque bytes; oversized files become placeholders with true sizes
//! - **Command Screening**: Dangerous-pattern rejection, allow/block lists,
//!   workspace path extraction, and access-time policy emulation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use workspace_sandbox::sync;
//! use workspace_sandbox::workspace::WorkspaceState;
//!
//! let mut state = WorkspaceState::new();
//! sync::hydrate(&mut state, Path::new("/tmp/project"))?;
//!
//! // ... mutate the virtual tree ...
//!
//! sync::dehydrate(&state, Path::new("/tmp/project"))?;
//! # Ok::<(), workspace_sandbox::error::WorkspaceError>(())
//! ```

pub mod error;
pub mod metadata;
pub mod path;
pub mod shell;
pub mod sync;
pub mod tree;
pub mod workspace;

// Re-export main types
pub use error::{WorkspaceError, WorkspaceResult};
pub use metadata::{FileAttributes, FileMetadata, FilePermissions, FileTimestamps};
pub use shell::{AccessTimeMode, ShellConfig};
pub use sync::{dehydrate, hydrate, run_with_sync, update_common_directory};
pub use tree::{FileContent, FileNode, PlaceholderKind, VirtualTree};
pub use workspace::{JsonStateStore, StateStore, WorkspaceState};
