pub mod config;
pub mod runner;
pub mod vulkan_core;

#[cfg(test)]
mod test;

pub use config::RunConfig;
pub use runner::{run, run_with, RunError, RunReport, Stage};
