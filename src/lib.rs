pub mod artifact;
pub mod config;
pub mod db;
pub mod errors;
pub mod generation;
pub mod llm;
pub mod logging;
pub mod project;
pub mod queue;
pub mod sandbox;
pub mod server;
pub mod sink;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;
