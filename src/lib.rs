//! Terminal client for the AI tutor chat service.
//!
//! Answers stream in over HTTP and are decoded incrementally into the
//! conversation state owned by the chat loop.

pub mod cli;
pub mod config;
pub mod error;
pub mod session;
pub mod stream;
pub mod tutor_client;
