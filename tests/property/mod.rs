//! Property-based tests module

pub mod codec_robustness;
pub mod instance_propagation;
pub mod location_paths;
pub mod view_propagation;
