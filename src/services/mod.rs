pub mod blob;
pub mod materializer;
pub mod pacing;
pub mod poller;
pub mod queue;
pub mod sas;
pub mod speaker;
pub mod speech;
pub mod webhook;
