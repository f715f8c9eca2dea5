use crate::checkpoint::CheckpointPolicy;
use crate::scheduler::PlateauConfig;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::SgdConfig;
use clap::{Args, Parser, ValueEnum};
use clip_dataset::{ClipConfig, LoaderConfig, Split};
use models::TwoStreamConfig;
use std::fmt;
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

/// Which validation loss drives the plateau scheduler.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlateauSignal {
    /// Per-sample mean loss over the whole validation pass.
    #[default]
    EpochMean,
    /// Mean loss of the final validation batch only.
    LastBatch,
}

impl fmt::Display for PlateauSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlateauSignal::EpochMean => f.write_str("epoch-mean"),
            PlateauSignal::LastBatch => f.write_str("last-batch"),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Number of action classes.
    #[arg(long, default_value_t = 7)]
    pub num_classes: usize,
    /// Square input size fed to both streams.
    #[arg(long, default_value_t = 224)]
    pub image_size: usize,
    /// Flow frames per clip (each contributes an x and a y channel).
    #[arg(long, default_value_t = 10)]
    pub flow_frames: usize,
    /// Pretrained 3-channel VGG16 backbone record shared by both streams.
    #[arg(long)]
    pub pretrained: Option<PathBuf>,
}

impl ModelArgs {
    pub fn model_config(&self) -> TwoStreamConfig {
        TwoStreamConfig {
            num_classes: self.num_classes,
            flow_channels: self.flow_frames * 2,
            rgb_size: (self.image_size, self.image_size),
            flow_size: (self.image_size, self.image_size),
            ..TwoStreamConfig::default()
        }
    }

    pub fn clip_config(&self) -> ClipConfig {
        ClipConfig {
            size: (self.image_size, self.image_size),
            flow_frames: self.flow_frames,
            num_classes: self.num_classes,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Root that clip directories in the manifests are relative to.
    #[arg(long, default_value = "data/clips")]
    pub data_root: PathBuf,
    /// Directory holding `train.txt` and `val.txt`.
    #[arg(long, default_value = "data/split")]
    pub split_data: PathBuf,
    /// Decode workers per loader.
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,
    /// Shuffle seed (entropy-seeded when omitted).
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "train", about = "Train the two-stream RGB + optical-flow action classifier")]
pub struct TrainArgs {
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// GPU index for the wgpu backend.
    #[arg(long, default_value_t = 0)]
    pub device_index: usize,
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub data: DataArgs,
    /// Number of epochs.
    #[arg(long, default_value_t = 150)]
    pub epochs: usize,
    /// Initial learning rate.
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,
    #[arg(long, default_value_t = 5e-4)]
    pub weight_decay: f32,
    #[arg(long, default_value_t = 8)]
    pub train_batch_size: usize,
    #[arg(long, default_value_t = 4)]
    pub val_batch_size: usize,
    /// Emit running metrics every N training batches.
    #[arg(long, default_value_t = 50)]
    pub log_interval: usize,
    /// Minimum validation accuracy that triggers a checkpoint.
    #[arg(long, default_value_t = 0.70)]
    pub checkpoint_threshold: f64,
    #[arg(long, default_value = "trained_model")]
    pub checkpoint_dir: PathBuf,
    /// Epoch log file (defaults to `<binary name>.txt`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    /// Validation loss fed to the plateau scheduler.
    #[arg(long, value_enum, default_value_t = PlateauSignal::EpochMean)]
    pub plateau_signal: PlateauSignal,
    #[arg(long, default_value_t = 5)]
    pub plateau_patience: usize,
    #[arg(long, default_value_t = 0.2)]
    pub plateau_factor: f64,
    /// Append one JSON object per epoch to this file.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "eval", about = "Evaluate a two-stream checkpoint on a clip split")]
pub struct EvalArgs {
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    #[arg(long, default_value_t = 0)]
    pub device_index: usize,
    /// Checkpoint written by `train`.
    #[arg(long)]
    pub checkpoint: PathBuf,
    /// Split to evaluate (train or val).
    #[arg(long, default_value = "val")]
    pub split: Split,
    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub data: DataArgs,
}

impl EvalArgs {
    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            batch_size: self.batch_size,
            shuffle: false,
            num_workers: self.data.num_workers,
            seed: self.data.seed,
            ..LoaderConfig::val()
        }
    }
}

/// Loop settings handed to `TrainingSession`; free of CLI concerns.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub lr: f64,
    pub log_interval: usize,
    pub log_path: PathBuf,
    pub plateau: PlateauConfig,
    pub plateau_signal: PlateauSignal,
    pub checkpoints: CheckpointPolicy,
    pub metrics_out: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 150,
            lr: 1e-4,
            log_interval: 50,
            log_path: default_log_path(),
            plateau: PlateauConfig::default(),
            plateau_signal: PlateauSignal::default(),
            checkpoints: CheckpointPolicy::default(),
            metrics_out: None,
        }
    }
}

/// `./<binary stem>.txt`, falling back to `train.txt`.
pub fn default_log_path() -> PathBuf {
    let stem = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "train".to_string());
    PathBuf::from(format!("{stem}.txt"))
}

impl TrainArgs {
    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            epochs: self.epochs,
            lr: self.lr,
            log_interval: self.log_interval,
            log_path: self.log_file.clone().unwrap_or_else(default_log_path),
            plateau: PlateauConfig {
                factor: self.plateau_factor,
                patience: self.plateau_patience,
                ..PlateauConfig::default()
            },
            plateau_signal: self.plateau_signal,
            checkpoints: CheckpointPolicy {
                threshold: self.checkpoint_threshold,
                dir: self.checkpoint_dir.clone(),
            },
            metrics_out: self.metrics_out.clone(),
        }
    }

    pub fn train_loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            batch_size: self.train_batch_size,
            num_workers: self.data.num_workers,
            seed: self.data.seed,
            ..LoaderConfig::train()
        }
    }

    pub fn val_loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            batch_size: self.val_batch_size,
            num_workers: self.data.num_workers,
            seed: self.data.seed.map(|s| s.wrapping_add(1)),
            ..LoaderConfig::val()
        }
    }

    /// SGD with classical momentum (no dampening, no Nesterov) and L2 weight decay.
    pub fn sgd_config(&self) -> SgdConfig {
        SgdConfig::new()
            .with_momentum(Some(
                MomentumConfig::new()
                    .with_momentum(self.momentum)
                    .with_dampening(0.0)
                    .with_nesterov(false),
            ))
            .with_weight_decay(Some(WeightDecayConfig::new(self.weight_decay)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_training_recipe() {
        let args = TrainArgs::parse_from(["train"]);
        let cfg = args.train_config();
        assert_eq!(cfg.epochs, 150);
        assert_eq!(cfg.lr, 1e-4);
        assert_eq!(cfg.log_interval, 50);
        assert_eq!(cfg.checkpoints.threshold, 0.70);
        assert_eq!(cfg.checkpoints.dir, PathBuf::from("trained_model"));
        assert_eq!(cfg.plateau, PlateauConfig::default());
        assert_eq!(cfg.plateau_signal, PlateauSignal::EpochMean);
        assert_eq!(args.train_loader_config().batch_size, 8);
        assert_eq!(args.val_loader_config().batch_size, 4);
        assert!(args.val_loader_config().shuffle);
        assert_eq!(args.model.model_config(), TwoStreamConfig::default());
        assert_eq!(args.model.clip_config(), ClipConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let args = TrainArgs::parse_from([
            "train",
            "--epochs",
            "3",
            "--plateau-signal",
            "last-batch",
            "--log-file",
            "runs/a.txt",
            "--image-size",
            "112",
            "--seed",
            "9",
        ]);
        let cfg = args.train_config();
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.plateau_signal, PlateauSignal::LastBatch);
        assert_eq!(cfg.log_path, PathBuf::from("runs/a.txt"));
        assert_eq!(args.model.model_config().flow_size, (112, 112));
        assert_eq!(args.train_loader_config().seed, Some(9));
        assert_eq!(args.val_loader_config().seed, Some(10));
    }

    #[test]
    fn eval_args_parse_split() {
        let args = EvalArgs::parse_from(["eval", "--checkpoint", "m.bin", "--split", "train"]);
        assert_eq!(args.split, Split::Train);
        assert!(!args.loader_config().shuffle);
    }
}
