use thiserror::Error;

/// Reconcile-level error. Every variant aborts the current pass; the controller's
/// error policy decides when the key is retried.
#[derive(Error, Debug)]
pub enum Error {
    #[error("kube api error: {0}")]
    Kube(#[source] kube::Error),
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },
    #[error("{kind} {key} was modified concurrently")]
    Conflict { kind: String, key: String },
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("application {0} has no usable image source")]
    NoImageSource(String),
    #[error("managed service {name} is still bound to {}", apps.join(", "))]
    ServiceBound { name: String, apps: Vec<String> },
    #[error("managed service {0} is being deleted")]
    ServiceDeleting(String),
    #[error("object is missing {0}")]
    MissingField(&'static str),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, namespace: &str, name: &str) -> Self {
        Self::NotFound { kind: kind.into(), key: format!("{namespace}/{name}") }
    }

    /// Short label used as the `error` dimension on metrics.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kube",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Conflict { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::Serialization(_) => "serialization",
            Self::NoImageSource(_) => "no_image_source",
            Self::ServiceBound { .. } => "service_bound",
            Self::ServiceDeleting(_) => "service_deleting",
            Self::MissingField(_) => "missing_field",
        }
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self { Self::Kube(e) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
