// ABOUTME: Shared types and configuration for bitgrid.
// ABOUTME: Defines colors, rendering policies, and config file handling.

pub mod color;
pub mod config;

pub use color::Color;
pub use config::{
    ascii_mapping, Backend, Config, ConfigError, FontConfig, GridConfig, RecolorMode,
    UnmappedGlyph,
};
