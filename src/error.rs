//! Error types for the che-gateway-operator

use crate::solver::RoutingError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Operator-wide error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("there are {workspaces} workspaces associated with this Che manager")]
    FinalizationBlocked { workspaces: usize },

    #[error("multi-host routing mode is not supported at the moment")]
    UnsupportedRoutingMode,

    #[error("routing solver error: {0}")]
    Routing(#[from] RoutingError),

    #[error("finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(err))
    }
}

impl Error {
    /// Whether the reconciler should retry on a short interval.
    ///
    /// Terminal errors (bad configuration, unsupported mode) get the long
    /// interval so they don't hot-loop while the user fixes the object.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_) => true,
            Error::FinalizationBlocked { .. } => true,
            Error::Routing(e) => e.is_retriable(),
            Error::FinalizerError(_) => true,
            Error::SerializationError(_)
            | Error::YamlError(_)
            | Error::ConfigError(_)
            | Error::UnsupportedRoutingMode => false,
        }
    }
}
