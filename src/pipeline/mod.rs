pub mod artifacts;
pub mod generation;
pub mod inspect;
pub mod post_ops;
pub mod presets;
pub mod providers;
pub mod templates;
pub mod video;
