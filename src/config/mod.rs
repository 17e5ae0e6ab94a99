//! Configuration management
//!
//! Node settings come from an optional TOML file with environment variable
//! overrides. The resulting [`NodeConfig`] is an owned value passed to the
//! node at startup.

pub mod settings;

pub use settings::NodeConfig;
