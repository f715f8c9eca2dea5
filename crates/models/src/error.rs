use std::path::PathBuf;
use thiserror::Error;

/// Raised while building a `TwoStream` when the architecture cannot be wired together.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelConfigError {
    #[error("num_classes must be at least 1")]
    NoClasses,
    #[error("{stream} stream must have at least one input channel")]
    NoInputChannels { stream: &'static str },
    #[error("backbone has no convolution layers")]
    EmptyBackbone,
    #[error(
        "stream feature maps differ: rgb {rgb:?} vs flow {flow:?}; both streams must reach the fusion head with the same spatial size"
    )]
    StreamMismatch {
        rgb: (usize, usize),
        flow: (usize, usize),
    },
    #[error("feature map {size:?} is too small for two {kernel}x{kernel} fusion convolutions")]
    FeatureMapTooSmall { size: (usize, usize), kernel: usize },
    #[error("fusion channels must be non-zero, got {0:?}")]
    NoFusionChannels([usize; 2]),
    #[error("failed to load pretrained backbone {path}: {message}")]
    Pretrained { path: PathBuf, message: String },
}

/// Raised by `TwoStream::forward` when a batch does not match the configured inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("batch size mismatch: rgb has {rgb} samples, flow has {flow}")]
    BatchMismatch { rgb: usize, flow: usize },
    #[error("{stream} input expected [C, H, W] = {expected:?}, got {actual:?}")]
    Input {
        stream: &'static str,
        expected: [usize; 3],
        actual: [usize; 3],
    },
}
