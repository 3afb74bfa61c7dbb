pub mod binding;
pub mod builders;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod external;
pub mod extract;
pub mod logging;
pub mod store;
pub mod telemetry;
pub mod test_support;

// Re-export commonly used symbols for convenience in binaries/tests.
pub use crd::{Application, ApplicationSpec, ApplicationStatus, DataSource, DataSourceSpec, ManagedService, ManagedServiceSpec, ManagedServiceStatus};
pub use error::{Error, Result};
