pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;

pub use crate::infrastructure::bootstrap::{build, init_tracing, spawn_maintenance, AppContext};
pub use crate::infrastructure::config::Settings;
