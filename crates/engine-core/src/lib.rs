pub mod callback;
pub mod error;
pub mod metrics;
pub mod migration_state;
pub mod retry;
pub mod state;
