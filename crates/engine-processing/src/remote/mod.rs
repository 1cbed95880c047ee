pub mod command;
pub mod poller;
pub mod stack;
