pub mod config;
pub mod scheduler;
pub mod selector;
pub mod service;
pub mod stats;
pub mod task;
pub mod tile;
pub mod viewport;

pub use config::*;
pub use scheduler::*;
pub use selector::*;
pub use service::*;
pub use stats::*;
pub use task::*;
pub use tile::*;
pub use viewport::*;
