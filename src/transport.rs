pub mod bootloader;
pub mod owner;
pub mod repl;

pub use bootloader::BootloaderTransport;
pub use owner::{ConnectionOwner, Transport};
pub use repl::{ReplClient, ReplTransport};

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::models::TransportKind;

/// Connection owner shared between the UI state and running tasks
pub type SharedConnection = Arc<Mutex<ConnectionOwner<Connection>>>;

/// The one serial adapter the installer may hold at a time
pub enum Connection {
    Bootloader(BootloaderTransport),
    Repl(ReplTransport),
}

impl Connection {
    pub fn as_bootloader(&self) -> Option<&BootloaderTransport> {
        match self {
            Connection::Bootloader(t) => Some(t),
            Connection::Repl(_) => None,
        }
    }

    pub fn as_bootloader_mut(&mut self) -> Option<&mut BootloaderTransport> {
        match self {
            Connection::Bootloader(t) => Some(t),
            Connection::Repl(_) => None,
        }
    }

    pub fn as_repl_mut(&mut self) -> Option<&mut ReplTransport> {
        match self {
            Connection::Repl(t) => Some(t),
            Connection::Bootloader(_) => None,
        }
    }
}

impl Transport for Connection {
    fn kind(&self) -> TransportKind {
        match self {
            Connection::Bootloader(t) => t.kind(),
            Connection::Repl(t) => t.kind(),
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Connection::Bootloader(t) => t.is_connected(),
            Connection::Repl(t) => t.is_connected(),
        }
    }

    async fn disconnect(&mut self) {
        match self {
            Connection::Bootloader(t) => t.disconnect().await,
            Connection::Repl(t) => t.disconnect().await,
        }
    }
}
