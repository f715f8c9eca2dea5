//! Burn modules for two-stream action recognition.
//!
//! This crate defines the network used by the training harness:
//! - `Backbone`: a VGG-style convolutional feature stack (classifier head never built).
//! - `TwoStream`: an RGB backbone and an optical-flow backbone whose feature maps are
//!   concatenated channel-wise and reduced by two valid convolutions and a linear layer.
//!
//! These are pure Burn modules. Dataset access, optimisation and checkpoint policy live in
//! the `clip_dataset` and `training` crates.

pub mod backbone;
pub mod error;
pub mod two_stream;

pub use backbone::{adapt_input_conv, Backbone, BackboneConfig, BackboneLayer};
pub use error::{ModelConfigError, ShapeError};
pub use two_stream::{FusionPlan, TwoStream, TwoStreamConfig, RGB_CHANNELS};

pub mod prelude {
    pub use super::{
        Backbone, BackboneConfig, FusionPlan, ModelConfigError, ShapeError, TwoStream,
        TwoStreamConfig,
    };
}
