//! Configuration and dependency initialization.
//!
//! - [`settings`]: environment variables
//! - [`apps_file`]: the declarative apps, relations and feeds table
//! - [`dependencies`]: connects the backends and wires everything together

pub mod apps_file;
pub mod dependencies;
pub mod settings;

pub use apps_file::{ActivityFeedSpec, AppsFile};
pub use dependencies::Dependencies;
pub use settings::{ConnectionMode, SyncSettings};
