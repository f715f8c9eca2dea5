//! Core types, error definitions, and the clip source contract.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, ClipDatasetError>;

#[derive(Debug, Error)]
pub enum ClipDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest {path} line {line}: {msg}")]
    Manifest {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    #[error("clip {clip} is missing frame {frame}")]
    MissingFrame { clip: PathBuf, frame: String },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("sample {index}: {msg}")]
    Shape { index: usize, msg: String },
    #[error("unknown split {0:?} (expected train or val)")]
    UnknownSplit(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = ClipDatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            other => Err(ClipDatasetError::UnknownSplit(other.to_string())),
        }
    }
}

/// One manifest entry: a clip directory (already joined to the data root) and its class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipIndex {
    pub clip_dir: PathBuf,
    pub label: usize,
}

/// Per-sample tensor layout shared by every clip of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipShape {
    pub height: usize,
    pub width: usize,
    pub rgb_channels: usize,
    pub flow_channels: usize,
}

impl ClipShape {
    pub fn rgb_len(&self) -> usize {
        self.rgb_channels * self.height * self.width
    }

    pub fn flow_len(&self) -> usize {
        self.flow_channels * self.height * self.width
    }
}

#[derive(Debug, Clone)]
pub struct ClipSample {
    /// RGB frame in CHW layout.
    pub rgb_chw: Vec<f32>,
    /// Stacked flow frames in CHW layout.
    pub flow_chw: Vec<f32>,
    pub label: usize,
}

/// Indexed access to `(rgb, flow, label)` triples of one split.
pub trait ClipSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shape(&self) -> ClipShape;

    fn get(&self, index: usize) -> DatasetResult<ClipSample>;
}

/// Clips held in memory; used for synthetic runs and tests.
#[derive(Debug, Clone)]
pub struct MemoryClipSource {
    shape: ClipShape,
    samples: Vec<ClipSample>,
}

impl MemoryClipSource {
    pub fn new(shape: ClipShape, samples: Vec<ClipSample>) -> DatasetResult<Self> {
        for (index, sample) in samples.iter().enumerate() {
            check_sample(index, sample, &shape)?;
        }
        Ok(Self { shape, samples })
    }
}

impl ClipSource for MemoryClipSource {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn shape(&self) -> ClipShape {
        self.shape
    }

    fn get(&self, index: usize) -> DatasetResult<ClipSample> {
        self.samples
            .get(index)
            .cloned()
            .ok_or_else(|| ClipDatasetError::Other(format!("index {index} out of range")))
    }
}

pub(crate) fn check_sample(
    index: usize,
    sample: &ClipSample,
    shape: &ClipShape,
) -> DatasetResult<()> {
    if sample.rgb_chw.len() != shape.rgb_len() {
        return Err(ClipDatasetError::Shape {
            index,
            msg: format!(
                "rgb buffer has {} values, expected {}",
                sample.rgb_chw.len(),
                shape.rgb_len()
            ),
        });
    }
    if sample.flow_chw.len() != shape.flow_len() {
        return Err(ClipDatasetError::Shape {
            index,
            msg: format!(
                "flow buffer has {} values, expected {}",
                sample.flow_chw.len(),
                shape.flow_len()
            ),
        });
    }
    Ok(())
}
