//! Batch iteration for training and validation.

use crate::types::{
    check_sample, ClipDatasetError, ClipSample, ClipShape, ClipSource, DatasetResult,
};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use crossbeam_channel::{bounded, Receiver};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    /// Decode threads per loader.
    pub num_workers: usize,
    /// Batches buffered per worker.
    pub prefetch_factor: usize,
    pub seed: Option<u64>,
    pub drop_last: bool,
}

impl LoaderConfig {
    pub fn train() -> Self {
        Self {
            batch_size: 8,
            shuffle: true,
            num_workers: 4,
            prefetch_factor: 2,
            seed: None,
            drop_last: false,
        }
    }

    pub fn val() -> Self {
        Self {
            batch_size: 4,
            ..Self::train()
        }
    }
}

/// Device-resident batch. `label_ids` mirrors `labels` on the host.
pub struct ClipBatch<B: Backend> {
    pub rgb: Tensor<B, 4>,
    pub flow: Tensor<B, 4>,
    pub labels: Tensor<B, 1, Int>,
    pub label_ids: Vec<usize>,
}

impl<B: Backend> ClipBatch<B> {
    pub fn len(&self) -> usize {
        self.label_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_ids.is_empty()
    }
}

struct HostBatch {
    rgb: Vec<f32>,
    flow: Vec<f32>,
    labels: Vec<usize>,
}

pub struct ClipLoader {
    source: Arc<dyn ClipSource>,
    cfg: LoaderConfig,
    pool: Arc<rayon::ThreadPool>,
    epochs_started: AtomicU64,
}

impl ClipLoader {
    pub fn new(source: Arc<dyn ClipSource>, cfg: LoaderConfig) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(ClipDatasetError::Other("batch_size must be at least 1".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.num_workers.max(1))
            .thread_name(|i| format!("clip-loader-{i}"))
            .build()
            .map_err(|e| {
                ClipDatasetError::Other(format!("failed to start loader workers: {e}"))
            })?;
        Ok(Self {
            source,
            cfg,
            pool: Arc::new(pool),
            epochs_started: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    /// Samples in the underlying split.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        let n = self.source.len();
        if self.cfg.drop_last {
            n / self.cfg.batch_size
        } else {
            n.div_ceil(self.cfg.batch_size)
        }
    }

    /// Starts one pass over the split. Batches are decoded in the background and buffered
    /// until the iterator asks for them; dropping the iterator stops the producer.
    pub fn iter(&self) -> ClipBatchIter {
        let epoch = self.epochs_started.fetch_add(1, Ordering::Relaxed);
        let mut order: Vec<usize> = (0..self.source.len()).collect();
        if self.cfg.shuffle {
            let mut rng = match self.cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(epoch)),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }

        let depth = (self.cfg.num_workers.max(1) * self.cfg.prefetch_factor.max(1)).max(1);
        let (tx, rx) = bounded(depth);
        let source = self.source.clone();
        let pool = self.pool.clone();
        let shape = source.shape();
        let batch_size = self.cfg.batch_size;
        let drop_last = self.cfg.drop_last;
        thread::spawn(move || {
            for chunk in order.chunks(batch_size) {
                if drop_last && chunk.len() < batch_size {
                    break;
                }
                let loaded: DatasetResult<Vec<(usize, ClipSample)>> = pool.install(|| {
                    chunk
                        .par_iter()
                        .map(|&i| source.get(i).map(|s| (i, s)))
                        .collect()
                });
                let batch = loaded.and_then(|samples| assemble(samples, &shape));
                let failed = batch.is_err();
                if tx.send(batch).is_err() || failed {
                    break;
                }
            }
        });

        ClipBatchIter {
            rx,
            shape,
            processed_samples: 0,
            processed_batches: 0,
            started: Instant::now(),
            last_log: Instant::now(),
            last_logged_samples: 0,
            log_every_samples: log_every_from_env(),
        }
    }
}

fn log_every_from_env() -> Option<usize> {
    match std::env::var("CLIP_DATASET_LOG_EVERY") {
        Ok(val) => {
            if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                None
            } else {
                val.trim().parse::<usize>().ok().filter(|v| *v > 0)
            }
        }
        Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
    }
}

fn assemble(samples: Vec<(usize, ClipSample)>, shape: &ClipShape) -> DatasetResult<HostBatch> {
    let n = samples.len();
    let mut batch = HostBatch {
        rgb: Vec::with_capacity(n * shape.rgb_len()),
        flow: Vec::with_capacity(n * shape.flow_len()),
        labels: Vec::with_capacity(n),
    };
    for (index, sample) in samples {
        check_sample(index, &sample, shape)?;
        batch.rgb.extend_from_slice(&sample.rgb_chw);
        batch.flow.extend_from_slice(&sample.flow_chw);
        batch.labels.push(sample.label);
    }
    Ok(batch)
}

pub struct ClipBatchIter {
    rx: Receiver<DatasetResult<HostBatch>>,
    shape: ClipShape,
    processed_samples: usize,
    processed_batches: usize,
    started: Instant,
    last_log: Instant,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
}

impl ClipBatchIter {
    /// Blocks until the next batch is decoded; `Ok(None)` once the split is exhausted.
    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<ClipBatch<B>>> {
        let host = match self.rx.recv() {
            Ok(batch) => batch?,
            Err(_) => return Ok(None),
        };
        let n = host.labels.len();
        let (h, w) = (self.shape.height, self.shape.width);
        let rgb = Tensor::<B, 1>::from_floats(host.rgb.as_slice(), device).reshape([
            n,
            self.shape.rgb_channels,
            h,
            w,
        ]);
        let flow = Tensor::<B, 1>::from_floats(host.flow.as_slice(), device).reshape([
            n,
            self.shape.flow_channels,
            h,
            w,
        ]);
        let ids: Vec<i64> = host.labels.iter().map(|l| *l as i64).collect();
        let labels = Tensor::<B, 1, Int>::from_data(TensorData::new(ids, [n]), device);

        self.processed_samples += n;
        self.processed_batches += 1;
        self.maybe_log_progress();

        Ok(Some(ClipBatch {
            rgb,
            flow,
            labels,
            label_ids: host.labels,
        }))
    }

    pub fn processed_samples(&self) -> usize {
        self.processed_samples
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        let should_log =
            processed_since >= threshold || self.last_log.elapsed() >= Duration::from_secs(30);
        if !should_log {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        tracing::debug!(
            batches = self.processed_batches,
            samples = self.processed_samples,
            elapsed_s = secs,
            rate = self.processed_samples as f32 / secs,
            "[dataset] progress"
        );
        self.last_logged_samples = self.processed_samples;
        self.last_log = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryClipSource;

    type TestBackend = burn_ndarray::NdArray<f32>;

    const SHAPE: ClipShape = ClipShape {
        height: 2,
        width: 2,
        rgb_channels: 3,
        flow_channels: 4,
    };

    /// Sample `i` carries the value `i` in every rgb/flow element and label `i % 7`.
    fn source(n: usize) -> Arc<dyn ClipSource> {
        let samples = (0..n)
            .map(|i| ClipSample {
                rgb_chw: vec![i as f32; SHAPE.rgb_len()],
                flow_chw: vec![i as f32; SHAPE.flow_len()],
                label: i % 7,
            })
            .collect();
        Arc::new(MemoryClipSource::new(SHAPE, samples).unwrap())
    }

    fn drain(loader: &ClipLoader) -> Vec<ClipBatch<TestBackend>> {
        let device = Default::default();
        let mut iter = loader.iter();
        let mut out = Vec::new();
        while let Some(batch) = iter.next_batch::<TestBackend>(&device).unwrap() {
            out.push(batch);
        }
        out
    }

    #[test]
    fn shuffled_batches_keep_triples_together_and_cover_every_sample() {
        let cfg = LoaderConfig {
            batch_size: 4,
            seed: Some(7),
            ..LoaderConfig::train()
        };
        let loader = ClipLoader::new(source(10), cfg).unwrap();
        assert_eq!(loader.num_batches(), 3);
        let batches = drain(&loader);
        assert_eq!(
            batches.iter().map(|b| b.len()).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );

        let mut seen = Vec::new();
        for batch in &batches {
            assert_eq!(&batch.rgb.dims()[1..], &[3, 2, 2]);
            assert_eq!(&batch.flow.dims()[1..], &[4, 2, 2]);
            let rgb = batch.rgb.clone().into_data().to_vec::<f32>().unwrap();
            let flow = batch.flow.clone().into_data().to_vec::<f32>().unwrap();
            let labels: Vec<i64> = batch.labels.clone().into_data().iter::<i64>().collect();
            for (j, label) in batch.label_ids.iter().enumerate() {
                let id = rgb[j * SHAPE.rgb_len()] as usize;
                assert_eq!(flow[j * SHAPE.flow_len()] as usize, id);
                assert_eq!(*label, id % 7);
                assert_eq!(labels[j] as usize, *label);
                seen.push(id);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn unshuffled_loader_yields_source_order() {
        let cfg = LoaderConfig {
            batch_size: 3,
            shuffle: false,
            ..LoaderConfig::val()
        };
        let loader = ClipLoader::new(source(5), cfg).unwrap();
        let ids: Vec<usize> = drain(&loader)
            .iter()
            .flat_map(|b| b.label_ids.clone())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drop_last_skips_partial_batch() {
        let cfg = LoaderConfig {
            batch_size: 4,
            drop_last: true,
            ..LoaderConfig::train()
        };
        let loader = ClipLoader::new(source(10), cfg).unwrap();
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(drain(&loader).len(), 2);
    }

    struct FailingSource;

    impl ClipSource for FailingSource {
        fn len(&self) -> usize {
            6
        }

        fn shape(&self) -> ClipShape {
            SHAPE
        }

        fn get(&self, index: usize) -> DatasetResult<ClipSample> {
            if index == 4 {
                return Err(ClipDatasetError::Other("corrupt clip".into()));
            }
            Ok(ClipSample {
                rgb_chw: vec![0.0; SHAPE.rgb_len()],
                flow_chw: vec![0.0; SHAPE.flow_len()],
                label: 0,
            })
        }
    }

    #[test]
    fn decode_error_surfaces_from_next_batch() {
        let cfg = LoaderConfig {
            batch_size: 2,
            shuffle: false,
            ..LoaderConfig::train()
        };
        let loader = ClipLoader::new(Arc::new(FailingSource), cfg).unwrap();
        let device = Default::default();
        let mut iter = loader.iter();
        assert!(iter.next_batch::<TestBackend>(&device).unwrap().is_some());
        assert!(iter.next_batch::<TestBackend>(&device).unwrap().is_some());
        assert!(iter.next_batch::<TestBackend>(&device).is_err());
        assert!(iter.next_batch::<TestBackend>(&device).unwrap().is_none());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let cfg = LoaderConfig {
            batch_size: 0,
            ..LoaderConfig::train()
        };
        assert!(ClipLoader::new(source(1), cfg).is_err());
    }
}
