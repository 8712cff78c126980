#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("provider {name:?} referenced by a model route does not exist")]
    UnknownProvider { name: String },
    #[error("duplicate provider name: {0:?}")]
    DuplicateProvider(String),
}
