// Public library interface for circuitpython-installer
//
// The installer UI lives in `ui`; board resolution, transports and the
// download and settings helpers can be used without it.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod style;
pub mod transport;
pub mod ui;
pub mod utils;
