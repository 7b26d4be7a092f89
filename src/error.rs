#[derive(Debug, thiserror::Error)]
pub enum WorkgraphError {
    #[error("manifest error: {0}")]
    ManifestError(String),

    #[error("workspace error: {0}")]
    WorkspaceError(String),

    #[error("duplicate project name '{name}': declared at {first} and {second}")]
    DuplicateProject {
        name: String,
        first: String,
        second: String,
    },

    #[error("graph error: {0}")]
    GraphError(String),

    #[error("plan error: {0}")]
    PlanError(String),

    #[error("generator error: {0}")]
    GeneratorError(String),

    #[error("build error: {0}")]
    BuildError(String),

    #[error("watch error: {0}")]
    WatchError(String),

    #[error("task error: {0}")]
    TaskError(String),

    #[error("scan error: {0}")]
    ScanError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON deserialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, WorkgraphError>;
