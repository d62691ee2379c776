//! Landmark Camera
//!
//! Live camera view with a landmark overlay: a cancelable per-frame loop pulls
//! camera frames, runs a face-mesh detector on them and publishes the results
//! into shared state, from which a vector overlay is rendered in model input
//! coordinates.
//!
//! # Architecture
//!
//! - `camera`: frame sources, tensor conversion and coordinate transforms
//! - `ml`: detector traits, the set-once detector slot and the ONNX face mesh
//! - `inference`: the loop, its frame scheduler and cancellation
//! - `state`: overlay state shared between loop and host
//! - `overlay`: detection → primitive rendering
//! - `lifecycle`: mount/unmount hooks owning the loop
//! - `config`, `telemetry`: JSON configuration and logging

pub mod app;
pub mod camera;
pub mod config;
pub mod error;
pub mod inference;
pub mod lifecycle;
pub mod ml;
pub mod overlay;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use app::App;
