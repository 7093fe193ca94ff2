//! OS-level link state.

use async_trait::async_trait;
use std::path::PathBuf;

/// Source of the local link state (is any non-loopback interface up).
#[async_trait]
pub trait LinkStatus: Send + Sync {
    async fn is_link_up(&self) -> bool;
}

/// Reads interface operstate from sysfs.
///
/// On systems without `/sys/class/net` the link is reported as up and the
/// reachability probe alone decides the network state.
#[derive(Debug, Clone)]
pub struct SystemLinkStatus {
    root: PathBuf,
}

impl SystemLinkStatus {
    pub fn new() -> Self {
        Self::with_root("/sys/class/net")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SystemLinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkStatus for SystemLinkStatus {
    async fn is_link_up(&self) -> bool {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(path = ?self.root, error = %e, "No interface list; assuming link up");
                return true;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name() == "lo" {
                continue;
            }
            let operstate = entry.path().join("operstate");
            if let Ok(state) = tokio::fs::read_to_string(&operstate).await {
                // Tunnels and some virtual NICs report "unknown" while passing traffic.
                match state.trim() {
                    "up" | "unknown" => return true,
                    _ => {}
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(root: &std::path::Path, name: &str, state: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("operstate"), format!("{}\n", state)).unwrap();
    }

    #[tokio::test]
    async fn test_loopback_only_is_down() {
        let root = tempfile::tempdir().unwrap();
        iface(root.path(), "lo", "unknown");
        iface(root.path(), "eth0", "down");

        let link = SystemLinkStatus::with_root(root.path());
        assert!(!link.is_link_up().await);
    }

    #[tokio::test]
    async fn test_any_interface_up() {
        let root = tempfile::tempdir().unwrap();
        iface(root.path(), "eth0", "down");
        iface(root.path(), "wlan0", "up");

        let link = SystemLinkStatus::with_root(root.path());
        assert!(link.is_link_up().await);
    }

    #[tokio::test]
    async fn test_missing_sysfs_assumes_up() {
        let link = SystemLinkStatus::with_root("/nonexistent/sys/class/net");
        assert!(link.is_link_up().await);
    }
}
