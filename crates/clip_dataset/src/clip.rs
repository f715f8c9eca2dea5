//! On-disk clips: one RGB frame plus stacked horizontal/vertical flow frames per directory.
//!
//! Layout of a clip directory:
//! - `rgb.png` or `rgb.jpg`
//! - `flow_x_00.png`, `flow_y_00.png`, ... `flow_x_{N-1}.png`, `flow_y_{N-1}.png` (grayscale)

use crate::manifest::read_split_manifest;
use crate::types::{
    ClipDatasetError, ClipIndex, ClipSample, ClipShape, ClipSource, DatasetResult, Split,
};
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;

/// ImageNet statistics expected by pretrained VGG weights.
pub const RGB_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const RGB_STD: [f32; 3] = [0.229, 0.224, 0.225];

const RGB_NAMES: [&str; 2] = ["rgb.png", "rgb.jpg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipConfig {
    /// Target (height, width) for both streams.
    pub size: (usize, usize),
    /// Flow frames per clip; each contributes an x and a y channel.
    pub flow_frames: usize,
    pub num_classes: usize,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            size: (224, 224),
            flow_frames: 10,
            num_classes: 7,
        }
    }
}

impl ClipConfig {
    pub fn shape(&self) -> ClipShape {
        ClipShape {
            height: self.size.0,
            width: self.size.1,
            rgb_channels: 3,
            flow_channels: 2 * self.flow_frames,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoClipDataset {
    split: Split,
    clips: Vec<ClipIndex>,
    cfg: ClipConfig,
}

impl VideoClipDataset {
    pub fn open(root: &Path, split_data: &Path, split: Split) -> DatasetResult<Self> {
        Self::open_with(root, split_data, split, ClipConfig::default())
    }

    pub fn open_with(
        root: &Path,
        split_data: &Path,
        split: Split,
        cfg: ClipConfig,
    ) -> DatasetResult<Self> {
        let clips = read_split_manifest(root, split_data, split, cfg.num_classes)?;
        tracing::info!(
            split = %split,
            clips = clips.len(),
            root = %root.display(),
            "opened clip split"
        );
        Ok(Self { split, clips, cfg })
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn clips(&self) -> &[ClipIndex] {
        &self.clips
    }

    fn load_rgb(&self, clip_dir: &Path, out: &mut Vec<f32>) -> DatasetResult<()> {
        let path = RGB_NAMES
            .iter()
            .map(|name| clip_dir.join(name))
            .find(|p| p.exists())
            .ok_or_else(|| ClipDatasetError::MissingFrame {
                clip: clip_dir.to_path_buf(),
                frame: RGB_NAMES.join(" | "),
            })?;
        let img = self.open_resized(&path)?.to_rgb8();
        let (w, h) = (self.cfg.size.1, self.cfg.size.0);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let v = img.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
                    out.push((v - RGB_MEAN[c]) / RGB_STD[c]);
                }
            }
        }
        Ok(())
    }

    fn load_flow(&self, clip_dir: &Path, out: &mut Vec<f32>) -> DatasetResult<()> {
        for i in 0..self.cfg.flow_frames {
            for axis in ["x", "y"] {
                let name = format!("flow_{axis}_{i:02}.png");
                let path = clip_dir.join(&name);
                if !path.exists() {
                    return Err(ClipDatasetError::MissingFrame {
                        clip: clip_dir.to_path_buf(),
                        frame: name,
                    });
                }
                let img = self.open_resized(&path)?.to_luma8();
                out.extend(img.as_raw().iter().map(|v| *v as f32 / 127.5 - 1.0));
            }
        }
        Ok(())
    }

    fn open_resized(&self, path: &Path) -> DatasetResult<DynamicImage> {
        let img = image::open(path).map_err(|e| ClipDatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })?;
        let (h, w) = self.cfg.size;
        if img.width() as usize == w && img.height() as usize == h {
            Ok(img)
        } else {
            Ok(img.resize_exact(w as u32, h as u32, FilterType::Triangle))
        }
    }
}

impl ClipSource for VideoClipDataset {
    fn len(&self) -> usize {
        self.clips.len()
    }

    fn shape(&self) -> ClipShape {
        self.cfg.shape()
    }

    fn get(&self, index: usize) -> DatasetResult<ClipSample> {
        let clip = self.clips.get(index).ok_or_else(|| {
            ClipDatasetError::Other(format!(
                "index {index} out of range for {} clips in {}",
                self.clips.len(),
                self.split
            ))
        })?;
        let shape = self.cfg.shape();
        let mut rgb_chw = Vec::with_capacity(shape.rgb_len());
        let mut flow_chw = Vec::with_capacity(shape.flow_len());
        self.load_rgb(&clip.clip_dir, &mut rgb_chw)?;
        self.load_flow(&clip.clip_dir, &mut flow_chw)?;
        Ok(ClipSample {
            rgb_chw,
            flow_chw,
            label: clip.label,
        })
    }
}
