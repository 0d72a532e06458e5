use clap::Parser;
use tracing::{error, info};

use circuitpython_installer::config::{CliArgs, InstallerConfig};
use circuitpython_installer::ui::CircuitPythonInstaller;
use circuitpython_installer::{logging, style};

pub fn main() -> iced::Result {
    let args = CliArgs::parse();

    if let Err(e) = logging::init() {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    let config = match InstallerConfig::load(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}, using defaults", e);
            InstallerConfig::default().with_overrides(&args)
        }
    };
    info!("Offering boards {:?}", config.boards);

    iced::application(
        move || CircuitPythonInstaller::new(config.clone()),
        CircuitPythonInstaller::update,
        CircuitPythonInstaller::view,
    )
    .title(CircuitPythonInstaller::title)
    .window_size(iced::Size::new(560f32, 720f32))
    .theme(|_: &CircuitPythonInstaller| style::custom_theme())
    .centered()
    .run()
}
