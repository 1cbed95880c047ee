pub mod crawler;
pub mod local;
pub mod multipart;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod uploader;
