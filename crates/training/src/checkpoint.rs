use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use models::{TwoStream, TwoStreamConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// `two_stream_0.7312.bin`: validation accuracy rounded to four decimals.
pub fn checkpoint_file_name(accuracy: f64) -> String {
    format!("two_stream_{accuracy:.4}.bin")
}

/// Saves the model whenever validation accuracy reaches `threshold`.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    pub threshold: f64,
    pub dir: PathBuf,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.70,
            dir: PathBuf::from("trained_model"),
        }
    }
}

impl CheckpointPolicy {
    pub fn should_save(&self, accuracy: f64) -> bool {
        accuracy >= self.threshold
    }

    pub fn path_for(&self, accuracy: f64) -> PathBuf {
        self.dir.join(checkpoint_file_name(accuracy))
    }

    /// Writes a checkpoint when `accuracy` qualifies; `Ok(None)` when it does not.
    pub fn maybe_save<B: Backend>(
        &self,
        model: &TwoStream<B>,
        accuracy: f64,
    ) -> anyhow::Result<Option<PathBuf>> {
        if !self.should_save(accuracy) {
            return Ok(None);
        }
        let path = self.path_for(accuracy);
        save_two_stream(model, &path)?;
        Ok(Some(path))
    }
}

pub fn save_two_stream<B: Backend>(model: &TwoStream<B>, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!("failed to create checkpoint dir {}: {e}", parent.display())
        })?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint {}: {e}", path.display()))
}

pub fn load_two_stream_from_checkpoint<B: Backend, P: AsRef<Path>>(
    path: P,
    config: TwoStreamConfig,
    device: &B::Device,
) -> anyhow::Result<TwoStream<B>> {
    let path = path.as_ref();
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    TwoStream::<B>::new(config, device)?
        .load_file(path, &recorder, device)
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint {}: {e}", path.display()))
}
