mod config;
mod error;

pub use config::{
    load_from_path, load_from_str, AuthScheme, DeduplicationSettings, ModelRouteConfig,
    PhaseTimeouts, ProviderConfig, ProviderKind, RootDocument, SelectionStrategy, Settings,
    StreamingMode, TimeoutSettings,
};
pub use error::ConfigError;
