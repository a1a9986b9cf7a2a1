//! Core library for on-demand webcam snapshot classification.
//!
//! Everything UI-independent lives here: the validated configuration,
//! the model loader and inference backend, the camera manager, the
//! predict-once pipeline and the presentation helpers the UI adapter
//! renders with.

pub mod config;
pub mod events;
pub mod nn;
pub mod pipeline;
pub mod render;
pub mod sensors;
