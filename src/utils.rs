pub mod bootloader_info;
pub mod download;
pub mod release;
pub mod repo;
pub mod settings;
pub mod tracker;
pub mod validation;

pub use download::Downloader;
pub use repo::BoardRepo;
