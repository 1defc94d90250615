//! Integration tests for managed executors and context propagation

mod cli_commands;
mod config_integration;
mod context_isolation;
mod hung_detection;
mod restore_on_panic;
mod scheduled_tasks;
mod test_utils;
mod thread_factory;
mod wire_propagation;
