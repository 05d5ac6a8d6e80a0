//! Audio LRO pipeline
//!
//! Turns uploaded recordings into transcriptions and speaker identifications
//! by submitting long-running jobs to remote speech services, handing their
//! handles across a queue, and materializing the finished results into blob
//! storage or a document store.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;
