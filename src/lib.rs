//! Online judge submission pipeline
//!
//! Producers call [`api::accept_submission`] to store a submission and queue
//! its job. Worker processes run [`jobs::run_consumer`], which judges each
//! submission in Docker containers and writes progress and the final verdict
//! back to the store. Clients read results through [`api::PollResponse`].

pub mod api;
pub mod components;
pub mod config;
pub mod contest;
pub mod core;
pub mod engine;
pub mod jobs;
pub mod queue;
pub mod redis_manager;
pub mod store;
