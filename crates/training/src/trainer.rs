use crate::config::{PlateauSignal, TrainConfig};
use crate::metrics::{count_correct, predicted_labels, scalar, EpochStats, Phase};
use crate::run_log::{EpochMetrics, MetricsWriter, RunLog};
use crate::scheduler::PlateauScheduler;
use anyhow::Context;
use burn::module::AutodiffModule;
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use clip_dataset::ClipLoader;
use models::TwoStream;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Per-epoch results returned by `TrainingSession::run`.
#[derive(Debug, Clone)]
pub struct EpochOutcome {
    pub epoch: usize,
    /// Learning rate used for this epoch's training phase.
    pub lr: f64,
    pub train: EpochStats,
    pub val: EpochStats,
    pub checkpoint: Option<PathBuf>,
}

/// Owns everything the epoch loop mutates: model, optimizer, scheduler and logs.
pub struct TrainingSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<TwoStream<B>, B>,
{
    device: B::Device,
    model: TwoStream<B>,
    optim: O,
    loss_fn: CrossEntropyLoss<B>,
    scheduler: PlateauScheduler,
    config: TrainConfig,
    log: RunLog,
    metrics: Option<MetricsWriter>,
}

impl<B, O> TrainingSession<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<TwoStream<B>, B>,
{
    /// Truncates the run log and sets up the scheduler at `config.lr`.
    pub fn new(
        model: TwoStream<B>,
        optim: O,
        config: TrainConfig,
        device: B::Device,
    ) -> anyhow::Result<Self> {
        let log = RunLog::create(&config.log_path)
            .with_context(|| format!("failed to create log file {}", config.log_path.display()))?;
        let metrics = config
            .metrics_out
            .as_ref()
            .map(|path| MetricsWriter::new(path.clone()));
        let scheduler = PlateauScheduler::new(config.lr, config.plateau);
        let loss_fn = CrossEntropyLossConfig::new().init(&device);
        info!(
            signal = %config.plateau_signal,
            factor = config.plateau.factor,
            patience = config.plateau.patience,
            "plateau scheduler driven by validation loss"
        );
        Ok(Self {
            device,
            model,
            optim,
            loss_fn,
            scheduler,
            config,
            log,
            metrics,
        })
    }

    pub fn model(&self) -> &TwoStream<B> {
        &self.model
    }

    pub fn into_model(self) -> TwoStream<B> {
        self.model
    }

    pub fn scheduler(&self) -> &PlateauScheduler {
        &self.scheduler
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Runs `config.epochs` rounds of a training pass followed by a validation pass.
    pub fn run(
        &mut self,
        train: &ClipLoader,
        val: &ClipLoader,
    ) -> anyhow::Result<Vec<EpochOutcome>> {
        if train.num_batches() == 0 {
            anyhow::bail!("training split yields no batches ({} samples)", train.len());
        }
        if val.num_batches() == 0 {
            anyhow::bail!("validation split yields no batches ({} samples)", val.len());
        }
        info!(
            epochs = self.config.epochs,
            train_samples = train.len(),
            val_samples = val.len(),
            "start training"
        );

        let mut outcomes = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            let lr = self.scheduler.lr();
            let train_stats = self.train_epoch(epoch, train)?;
            let (val_stats, checkpoint) = self.validate_epoch(epoch, val)?;
            if let Some(metrics) = &self.metrics {
                metrics.write(&EpochMetrics {
                    epoch,
                    lr,
                    train: (&train_stats).into(),
                    val: (&val_stats).into(),
                    checkpoint: checkpoint.as_deref(),
                })?;
            }
            outcomes.push(EpochOutcome {
                epoch,
                lr,
                train: train_stats,
                val: val_stats,
                checkpoint,
            });
        }
        Ok(outcomes)
    }

    /// One full pass over `loader` with an SGD step per batch.
    pub fn train_epoch(&mut self, epoch: usize, loader: &ClipLoader) -> anyhow::Result<EpochStats> {
        let lr = self.scheduler.lr();
        let mut stats = EpochStats::default();
        let mut batches = loader.iter();
        while let Some(batch) = batches.next_batch::<B>(&self.device)? {
            let n = batch.len();
            let logits = self.model.forward(batch.rgb, batch.flow)?;
            let loss = self.loss_fn.forward(logits.clone(), batch.labels);

            let predicted = predicted_labels(logits.detach());
            let correct = count_correct(&predicted, &batch.label_ids);
            stats.record(correct, n, scalar(loss.clone().detach()));
            info!(pred = ?predicted, truth = ?batch.label_ids, "train batch");

            if self.config.log_interval > 0 && stats.batches % self.config.log_interval == 0 {
                info!("{}", stats.running_line());
            }

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            // Parameters are reference counted; the clone shares storage with `self.model`.
            self.model = self.optim.step(lr, self.model.clone(), grads);
        }

        let line = stats.summary_line(Phase::Train, epoch, self.config.epochs);
        info!("{line}");
        self.log
            .append(&line)
            .with_context(|| format!("failed to append to {}", self.log.path().display()))?;
        Ok(stats)
    }

    /// Gradient-free pass; steps the scheduler and checkpoints on a good accuracy.
    pub fn validate_epoch(
        &mut self,
        epoch: usize,
        loader: &ClipLoader,
    ) -> anyhow::Result<(EpochStats, Option<PathBuf>)> {
        let stats = {
            let model = self.model.valid();
            evaluate(&model, loader, &self.device)?
        };

        let signal = match self.config.plateau_signal {
            PlateauSignal::EpochMean => stats.mean_loss(),
            PlateauSignal::LastBatch => stats.last_loss,
        };
        if let Some(lr) = self.scheduler.step(signal) {
            info!(epoch, lr, "validation loss plateaued; learning rate reduced");
        }

        let line = stats.summary_line(Phase::Val, epoch, self.config.epochs);
        info!("{line}");
        self.log
            .append(&line)
            .with_context(|| format!("failed to append to {}", self.log.path().display()))?;

        let checkpoint = match self
            .config
            .checkpoints
            .maybe_save(&self.model, stats.accuracy())
        {
            Ok(Some(path)) => {
                info!(path = %path.display(), accuracy = stats.accuracy(), "saved checkpoint");
                Some(path)
            }
            Ok(None) => None,
            Err(e) => {
                let message = format!("{e:#}");
                error!("{message}");
                self.log.error(&message);
                None
            }
        };
        Ok((stats, checkpoint))
    }
}

/// Forward-only pass over `loader`, accumulating loss and accuracy.
pub fn evaluate<B: Backend>(
    model: &TwoStream<B>,
    loader: &ClipLoader,
    device: &B::Device,
) -> anyhow::Result<EpochStats> {
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut stats = EpochStats::default();
    let mut batches = loader.iter();
    while let Some(batch) = batches.next_batch::<B>(device)? {
        let n = batch.len();
        let logits = model.forward(batch.rgb, batch.flow)?;
        let loss = scalar(loss_fn.forward(logits.clone(), batch.labels));
        let correct = count_correct(&predicted_labels(logits), &batch.label_ids);
        stats.record(correct, n, loss);
    }
    Ok(stats)
}
