pub mod migration;
pub mod remote;
pub mod stage;
pub mod transfer;
