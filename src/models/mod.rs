pub mod event;
pub mod identification;
pub mod job;
pub mod transcription;
