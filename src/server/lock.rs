//! Server lock file
//!
//! Written to `<repo>/.osgrep/server.lock` at startup so clients (editor
//! plugins, the CLI) can discover the port and bearer token of a running
//! server. Rewritten by a replacement process after a memory restart.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Contents of `server.lock`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerLock {
    pub port: u16,
    pub pid: u32,
    #[serde(rename = "authToken")]
    pub auth_token: String,
    pub root: String,
}

impl ServerLock {
    pub fn new(port: u16, auth_token: String, root: &Path) -> ServerLock {
        ServerLock {
            port,
            pid: std::process::id(),
            auth_token,
            root: root.to_string_lossy().into_owned(),
        }
    }

    /// Location of the lock file for a repository root.
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(crate::REPO_DIR).join("server.lock")
    }

    /// Write the lock file (temp-file rename, restrictive permissions).
    pub fn write(&self, root: &Path) -> std::io::Result<PathBuf> {
        let path = Self::path_for(root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("lock.tmp");
        std::fs::write(&tmp, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // The token inside grants query access; owner-only
            let _ = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600));
        }
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Read an existing lock file, if any.
    pub fn read(root: &Path) -> Option<ServerLock> {
        let raw = std::fs::read_to_string(Self::path_for(root)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(lock) => Some(lock),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable server.lock");
                None
            }
        }
    }

    /// Remove the lock file; only when it still names this process.
    pub fn remove_if_owned(root: &Path) {
        if let Some(existing) = Self::read(root) {
            if existing.pid == std::process::id() {
                let _ = std::fs::remove_file(Self::path_for(root));
            }
        }
    }
}

/// Generate a fresh bearer token (hex, 256 bits).
pub fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ServerLock::new(4815, "token123".into(), dir.path());
        lock.write(dir.path()).unwrap();

        let read = ServerLock::read(dir.path()).unwrap();
        assert_eq!(read, lock);
        assert_eq!(read.pid, std::process::id());
    }

    #[test]
    fn test_lock_json_field_names() {
        let lock = ServerLock::new(9, "t".into(), Path::new("/repo"));
        let json = serde_json::to_string(&lock).unwrap();
        assert!(json.contains("\"authToken\""));
        assert!(json.contains("\"port\""));
        assert!(json.contains("\"pid\""));
        assert!(json.contains("\"root\""));
    }

    #[test]
    fn test_remove_if_owned_respects_foreign_pid() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = ServerLock::new(1, "t".into(), dir.path());
        lock.pid = u32::MAX; // some other process
        lock.write(dir.path()).unwrap();

        ServerLock::remove_if_owned(dir.path());
        assert!(ServerLock::path_for(dir.path()).exists());
    }

    #[test]
    fn test_generate_token_shape() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
