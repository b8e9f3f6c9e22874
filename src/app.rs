//! Process level wiring
//!
//! Builds a controller for a host emulator and runs it until SIGINT or
//! SIGTERM. The serial coax interface and the TN3270 client are supplied by
//! the embedding program, along with its own command line.

use std::io;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::coax::Interface;
use crate::config::{Config, ConfigError};
use crate::controller::{Controller, ControllerOptions, SessionFactory};
use crate::ebcdic::Codepage;
use crate::interface::InterfaceWrapper;
use crate::session::tn3270::{HostError, Tn3270Connector, Tn3270Options, Tn3270eProfile};
use crate::session::vt100::{HostCommand, PtySpawner};
use crate::session::{Session, Tn3270Session, Vt100Session};
use crate::terminal::Terminal;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid TN3270 host: {0}")]
    Host(#[from] HostError),

    #[error("Unable to register signal handler: {0}")]
    Signal(#[source] io::Error),
}

/// Host emulator each attached terminal is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emulator {
    Tn3270 {
        /// `[lu[,lu...]@]host[:port]`
        host: String,
        codepage: Codepage,
        tn3270e: Tn3270eProfile,
    },
    Vt100 {
        command: String,
        args: Vec<String>,
    },
}

/// Log to stderr, filtered by `RUST_LOG`
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Set `stop` on SIGINT or SIGTERM
pub fn register_signals(stop: &Arc<AtomicBool>) -> Result<(), AppError> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(stop)).map_err(AppError::Signal)?;
    }

    Ok(())
}

/// Read the config file, if any, and overlay the environment
pub fn load_config(path: Option<&Path>) -> Result<Config, AppError> {
    let mut config = match path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());

            Config::load(path)?
        },
        None => Config::default(),
    };

    config.apply_env();

    Ok(config)
}

/// Session factory for `emulator`
pub fn session_factory(emulator: &Emulator, connector: Rc<dyn Tn3270Connector>) -> Result<SessionFactory, AppError> {
    match emulator {
        Emulator::Tn3270 {
            host,
            codepage,
            tn3270e,
        } => {
            let options = Tn3270Options::new(host.parse()?, *codepage, *tn3270e);

            Ok(Box::new(move |_terminal: &Terminal| -> Box<dyn Session> {
                Box::new(Tn3270Session::new(connector.clone(), options.clone()))
            }))
        },
        Emulator::Vt100 { command, args } => {
            let command = HostCommand::new(command.clone(), args.clone());
            let spawner = Rc::new(PtySpawner);

            Ok(Box::new(move |_terminal: &Terminal| -> Box<dyn Session> {
                Box::new(Vt100Session::new(spawner.clone(), command.clone()))
            }))
        },
    }
}

/// Build the controller for `emulator` on top of an open coax interface
pub fn build_controller(
    emulator: &Emulator,
    config: &Config,
    interface: Box<dyn Interface>,
    connector: Rc<dyn Tn3270Connector>,
) -> Result<Controller, AppError> {
    let create_session = session_factory(emulator, connector)?;

    let interface = InterfaceWrapper::new(interface, config.jumbo_write_strategy, config.receive_timeout());

    tracing::info!("Interface = {}", interface.identifier());

    Ok(Controller::new(interface, ControllerOptions::from(config), create_session))
}

/// Run the controller until a stop signal arrives
pub fn run(
    emulator: &Emulator,
    config_path: Option<&Path>,
    interface: Box<dyn Interface>,
    connector: Rc<dyn Tn3270Connector>,
) -> Result<(), AppError> {
    let config = load_config(config_path)?;

    let mut controller = build_controller(emulator, &config, interface, connector)?;

    register_signals(&controller.stop_handle())?;

    controller.run();

    Ok(())
}
