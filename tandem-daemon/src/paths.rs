use std::path::{Path, PathBuf};

use tandem_core::config::tandem_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.tandem/daemon.sock`
pub fn socket_path(home: &Path) -> PathBuf {
    tandem_root(home).join(DAEMON_SOCKET)
}
