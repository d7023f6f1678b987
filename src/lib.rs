//! code-runner daemon library
//!
//! This crate provides the core functionality for the code-runner daemon:
//! - Language registry mapping identifiers to images and invocations
//! - Per-request scratch workspaces on the host
//! - Backend trait and a Docker implementation for isolated execution
//! - Execution engine with a wall-clock timeout race
//! - HTTP server implementation using axum

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod language;
pub mod result;
pub mod service;
pub mod workspace;
