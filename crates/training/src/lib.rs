#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod metrics;
pub mod run_log;
pub mod scheduler;
pub mod trainer;
pub mod util;

pub use checkpoint::{checkpoint_file_name, load_two_stream_from_checkpoint, CheckpointPolicy};
pub use config::{EvalArgs, PlateauSignal, TrainArgs, TrainConfig};
pub use metrics::{EpochStats, Phase};
pub use models::{TwoStream, TwoStreamConfig};
pub use scheduler::{PlateauConfig, PlateauScheduler};
pub use trainer::{evaluate, EpochOutcome, TrainingSession};
pub use util::{run_eval, run_train};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
