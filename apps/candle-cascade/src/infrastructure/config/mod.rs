//! Configuration Module
//!
//! Configuration loading for the aggregation service.

mod settings;

pub use settings::{
    CascadeSettings, Config, ConfigError, FeedSettings, IngestionSettings, ServerSettings,
};
