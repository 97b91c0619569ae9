use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "config file not found. Checked:\n\
        - current directory: ulbflow.local.yaml, ulbflow.yaml\n\
        - ./.ulbflow/ directory\n\
        - ~/.config/ulbflow/config.yaml\n\
        A path can also be given with the ULBFLOW_CONFIG_PATH environment variable"
    )]
    ConfigFileNotFound,

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("YAML parse error in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
