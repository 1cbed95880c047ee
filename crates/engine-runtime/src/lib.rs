pub mod error;
pub mod execution;
pub mod extract;
pub mod scheduler;
