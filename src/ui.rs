pub mod application;
pub mod dialogs;
pub mod flow;
pub mod messages;
pub mod steps;
mod view;

pub use application::CircuitPythonInstaller;
pub use messages::Message;
