//! Per-request scratch directories.
//!
//! Each execution gets its own directory under the configured root, named
//! from a nanosecond timestamp plus a random component. The directory holds
//! the submitted source and its stdin payload and is bind-mounted into the
//! container. `WorkspaceManager::destroy` consumes the handle, so a
//! workspace can be released at most once; if a handle is dropped without
//! being destroyed (panic, cancelled task) it removes itself synchronously.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ExecError, Result};
use crate::language::INPUT_FILE;

/// How many fresh names to try before giving up on a colliding root.
const CREATE_ATTEMPTS: usize = 3;

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

/// Allocates and releases workspaces under one root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

/// An exclusively owned scratch directory.
#[derive(Debug)]
pub struct Workspace {
    id: String,
    path: PathBuf,
    source_file: Option<PathBuf>,
    stdin_file: PathBuf,
    released: bool,
}

impl Workspace {
    /// Directory name, unique across concurrent requests.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Absolute path of the directory on the host.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Source file, once populated.
    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    /// Stdin payload file.
    pub fn stdin_file(&self) -> &Path {
        &self.stdin_file
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(workspace = %self.id, "Workspace removed on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(workspace = %self.id, error = %e, "Failed to remove workspace on drop"),
        }
    }
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Parent directory shared by all workspaces.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh, empty workspace directory.
    pub async fn create(&self) -> Result<Workspace> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ExecError::WorkspaceCreation {
                path: self.root.clone(),
                source,
            })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let id = unique_name();
            let path = self.root.join(&id);

            // `create_dir` (not `_all`) so an existing directory is a hard
            // collision rather than silent sharing.
            match tokio::fs::create_dir(&path).await {
                Ok(()) => {
                    let workspace = Workspace {
                        stdin_file: path.join(INPUT_FILE),
                        id,
                        path,
                        source_file: None,
                        released: false,
                    };
                    // On failure the handle is dropped and removes the directory.
                    set_mode(&workspace.path, DIR_MODE).await.map_err(|source| {
                        ExecError::WorkspaceCreation {
                            path: workspace.path.clone(),
                            source,
                        }
                    })?;
                    debug!(workspace = %workspace.id, "Created workspace");
                    return Ok(workspace);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < CREATE_ATTEMPTS => {
                    warn!(workspace = %id, "Workspace name collision, retrying");
                }
                Err(source) => return Err(ExecError::WorkspaceCreation { path, source }),
            }
        }
    }

    /// Write the source under `source_filename` and the stdin payload under
    /// the fixed input file name.
    pub async fn populate(
        &self,
        workspace: &mut Workspace,
        source_filename: &str,
        source_code: &str,
        stdin: &str,
    ) -> Result<()> {
        let source_path = workspace.path.join(source_filename);
        if Path::new(source_filename).file_name().and_then(|n| n.to_str()) != Some(source_filename)
        {
            return Err(ExecError::WorkspaceWrite {
                path: source_path,
                source: std::io::Error::new(
                    ErrorKind::InvalidInput,
                    "source file name must not contain path components",
                ),
            });
        }

        write_file(&source_path, source_code).await?;
        write_file(&workspace.stdin_file, stdin).await?;
        workspace.source_file = Some(source_path);

        debug!(
            workspace = %workspace.id,
            source = %source_filename,
            code_len = source_code.len(),
            stdin_len = stdin.len(),
            "Populated workspace"
        );
        Ok(())
    }

    /// Recursively remove the workspace. Removing an already missing
    /// directory is not an error.
    pub async fn destroy(&self, mut workspace: Workspace) {
        match tokio::fs::remove_dir_all(&workspace.path).await {
            Ok(()) => {
                workspace.released = true;
                debug!(workspace = %workspace.id, "Destroyed workspace");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => workspace.released = true,
            // Leave `released` unset so the drop guard retries.
            Err(e) => warn!(workspace = %workspace.id, error = %e, "Failed to destroy workspace"),
        }
    }
}

async fn write_file(path: &Path, contents: &str) -> Result<()> {
    let written = match tokio::fs::write(path, contents).await {
        Ok(()) => set_mode(path, FILE_MODE).await,
        Err(e) => Err(e),
    };
    written.map_err(|source| ExecError::WorkspaceWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Programs run as an unprivileged user, so the mount must be readable by
/// everyone whatever the host umask is.
#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn unique_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{nanos}_{}", Uuid::new_v4().simple())
}
