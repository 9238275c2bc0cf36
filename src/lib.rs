pub mod config;
pub mod errors;
pub mod history;
pub mod http;
pub mod logging;
pub mod pipeline;
pub mod privilege;
pub mod queue;
pub mod repo;
pub mod runner;
pub mod task;
