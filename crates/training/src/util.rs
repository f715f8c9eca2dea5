use anyhow::Context;
use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use clip_dataset::{ClipLoader, Split, VideoClipDataset};
use models::TwoStream;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::checkpoint::load_two_stream_from_checkpoint;
use crate::config::{BackendKind, DataArgs, EvalArgs, ModelArgs, TrainArgs};
use crate::metrics::Phase;
use crate::trainer::{evaluate, TrainingSession};
use crate::TrainBackend;

type ADBackend = Autodiff<TrainBackend>;

/// Installs the fmt subscriber; `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

#[cfg(feature = "backend-wgpu")]
pub fn train_device(index: usize) -> <TrainBackend as Backend>::Device {
    burn_wgpu::WgpuDevice::DiscreteGpu(index)
}

#[cfg(not(feature = "backend-wgpu"))]
pub fn train_device(index: usize) -> <TrainBackend as Backend>::Device {
    if index != 0 {
        warn!(index, "device index ignored by the ndarray backend");
    }
    Default::default()
}

pub fn open_split(
    data: &DataArgs,
    split: Split,
    model: &ModelArgs,
) -> anyhow::Result<VideoClipDataset> {
    VideoClipDataset::open_with(&data.data_root, &data.split_data, split, model.clip_config())
        .with_context(|| {
            format!(
                "failed to open {split} split (root {}, manifests {})",
                data.data_root.display(),
                data.split_data.display()
            )
        })
}

/// Two-stream model from `--pretrained` when given, otherwise from default initialisation.
pub fn build_model<B: Backend>(
    args: &ModelArgs,
    device: &B::Device,
) -> anyhow::Result<TwoStream<B>> {
    let config = args.model_config();
    let model = match &args.pretrained {
        Some(path) => {
            info!(path = %path.display(), "loading pretrained backbone for both streams");
            TwoStream::with_pretrained(config, path, device)?
        }
        None => {
            warn!("no pretrained backbone given; both streams start from random initialisation");
            TwoStream::new(config, device)?
        }
    };
    Ok(model)
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let device = train_device(args.device_index);

    let train_set = open_split(&args.data, Split::Train, &args.model)?;
    let val_set = open_split(&args.data, Split::Val, &args.model)?;
    let train_loader = ClipLoader::new(Arc::new(train_set), args.train_loader_config())?;
    let val_loader = ClipLoader::new(Arc::new(val_set), args.val_loader_config())?;

    let model = build_model::<ADBackend>(&args.model, &device)?;
    let optim = args
        .sgd_config()
        .init::<ADBackend, TwoStream<ADBackend>>();

    let mut session = TrainingSession::new(model, optim, args.train_config(), device)?;
    let outcomes = session.run(&train_loader, &val_loader)?;

    let checkpoints = outcomes.iter().filter(|o| o.checkpoint.is_some()).count();
    let best = outcomes
        .iter()
        .map(|o| o.val.accuracy())
        .fold(0.0_f64, f64::max);
    info!(
        epochs = outcomes.len(),
        checkpoints,
        best_val_acc = best,
        log = %session.log_path().display(),
        "training finished"
    );
    Ok(())
}

pub fn run_eval(args: EvalArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let device = train_device(args.device_index);

    let dataset = open_split(&args.data, args.split, &args.model)?;
    let loader = ClipLoader::new(Arc::new(dataset), args.loader_config())?;
    if loader.num_batches() == 0 {
        anyhow::bail!("{} split yields no batches", args.split);
    }

    let model = load_two_stream_from_checkpoint::<TrainBackend, _>(
        &args.checkpoint,
        args.model.model_config(),
        &device,
    )?;
    let stats = evaluate(&model, &loader, &device)?;
    info!("{}", stats.phase_line(Phase::Eval));
    Ok(())
}
