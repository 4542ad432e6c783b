pub mod chain;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod presets;
pub mod session;
pub mod undo;

pub use chain::{Chain, PluginDescriptor, PluginInstanceRecord};
pub use config::SessionConfig;
pub use controller::{BatchReport, SessionController, SessionPhase, SkippedPlugin};
pub use engine::{EngineError, EngineGateway, InstanceId, LoadedPlugin, StateToken};
pub use error::{SessionError, StorageError};
pub use events::SessionEvent;
pub use presets::{ChainTemplate, FilePresetStore, Preset, PresetStore, TemplateLibrary};
pub use undo::{RemovedPlugin, ReversibleAction, UndoRemove};

/// Load `<data_dir>/config.json` (defaults when absent) and start file logging.
/// Host applications call this once before building a [`SessionController`].
pub fn init(data_dir: Option<&std::path::Path>) -> Result<SessionConfig, StorageError> {
    let data_dir = data_dir
        .map(|d| d.to_path_buf())
        .unwrap_or_else(config::default_data_dir);
    let config = SessionConfig::load(&data_dir)?;
    logging::init_logging(&config);
    log::info!("Session data in {}", config.data_dir.display());
    Ok(config)
}
