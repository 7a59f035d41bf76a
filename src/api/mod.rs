pub mod artifacts;
pub mod error;
pub mod generation;
pub mod handler_utils;
pub mod postprocess;
pub mod presets;
pub mod server;
pub mod video;
