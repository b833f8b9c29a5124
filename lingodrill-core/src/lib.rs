pub mod errors;
pub mod filters;
pub mod models;
pub mod repo;
pub mod rotation;
pub mod scheduler;
pub mod service;
pub mod stats;

pub use errors::*;
pub use filters::*;
pub use models::*;
pub use repo::*;
pub use rotation::*;
pub use scheduler::*;
pub use stats::*;
