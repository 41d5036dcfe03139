//! Autocaliweb installation subsystem
//!
//! Detection, scenario resolution, migration planning and execution, plus the
//! host provisioning steps that surround them.

pub mod detection;
pub mod environment;
mod error;
pub mod heartbeat;
pub mod identity;
pub mod interrupt;
pub mod linux;
pub mod migrate;
pub mod plan;
pub mod runners;
pub mod scenario;
pub mod settings;
pub mod source;
pub mod space;
pub mod uninstall;
pub mod wizard;

pub use detection::{InstallationState, probe};
pub use error::{InstallerError, MigrationError};
pub use plan::{MigrationComponent, MigrationPlan};
pub use scenario::{Scenario, resolve};
