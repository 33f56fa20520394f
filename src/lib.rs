// QuantumVault - Personal cloud file vault client
// Session gating, uploads with live progress and a searchable file listing
// on top of a managed auth service and object store.

pub mod config;
pub mod format;
pub mod logging;
pub mod providers;
pub mod registry;
pub mod session;
pub mod upload;

pub use config::{load_config, AppConfig};
pub use providers::{Backend, ProviderFactory};
pub use registry::FileRegistry;
pub use session::{LoginForm, SessionGate};
pub use upload::{LocalFile, UploadOrchestrator};
