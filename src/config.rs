//! Plain, cloneable bags of limits handed to spawn and connect calls,
//! instead of the magic numbers a smaller program would inline.

/// Configuration for the process runtime.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Capacity of every process mailbox.
    pub mailbox_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
        }
    }
}

/// Configuration for a [`crate::net::TcpMessenger`].
#[derive(Debug, Clone)]
pub struct MessengerConfig {
    /// Backlog passed to `TcpListener`'s equivalent of `listen(2)`.
    pub accept_backlog: u32,
    /// Maximum payload size, in bytes, for a single wire frame.
    pub max_frame_payload: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            accept_backlog: 1,
            max_frame_payload: 0xFFFC,
        }
    }
}

/// Configuration for a [`crate::transfer::Transfer`].
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Size, in bytes, of every block except possibly the last one.
    pub block_size: usize,
    /// Directory downloaded files are written into. Defaults to the user's
    /// Desktop directory.
    pub download_dir: std::path::PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            download_dir: default_desktop_dir(),
        }
    }
}

fn default_desktop_dir() -> std::path::PathBuf {
    let home = std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    home.join("Desktop")
}
