pub mod cb;
pub mod error;
pub mod remote;
pub mod transfer;
