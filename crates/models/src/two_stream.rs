//! Two-stream fusion classifier.
//!
//! Shapes (VGG16 backbones, 224x224 inputs):
//! - RGB input: `[B, 3, 224, 224]`, flow input: `[B, 20, 224, 224]`
//! - Each stream: `[B, 512, 7, 7]`, concatenated: `[B, 1024, 7, 7]`
//! - Fusion convs: `[B, 512, 5, 5]` then `[B, 32, 3, 3]`
//! - Logits: `[B, num_classes]`

use crate::backbone::{Backbone, BackboneConfig};
use crate::error::{ModelConfigError, ShapeError};
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::{backend::Backend, Tensor};
use std::path::Path;

pub const RGB_CHANNELS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoStreamConfig {
    pub num_classes: usize,
    /// Stacked flow frames (x/y per frame).
    pub flow_channels: usize,
    pub rgb_size: (usize, usize),
    pub flow_size: (usize, usize),
    pub backbone: BackboneConfig,
    pub fusion_channels: [usize; 2],
    pub fusion_kernel: usize,
}

impl Default for TwoStreamConfig {
    fn default() -> Self {
        Self {
            num_classes: 7,
            flow_channels: 20,
            rgb_size: (224, 224),
            flow_size: (224, 224),
            backbone: BackboneConfig::vgg16(),
            fusion_channels: [512, 32],
            fusion_kernel: 3,
        }
    }
}

/// Sizes derived from a `TwoStreamConfig` before any parameter is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionPlan {
    /// Channels after concatenation (both streams).
    pub fused_channels: usize,
    pub feature_size: (usize, usize),
    pub head_size: (usize, usize),
    pub fc_inputs: usize,
}

impl TwoStreamConfig {
    pub fn plan(&self) -> Result<FusionPlan, ModelConfigError> {
        if self.num_classes == 0 {
            return Err(ModelConfigError::NoClasses);
        }
        if self.flow_channels == 0 {
            return Err(ModelConfigError::NoInputChannels { stream: "flow" });
        }
        if self.fusion_channels.contains(&0) {
            return Err(ModelConfigError::NoFusionChannels(self.fusion_channels));
        }
        let stream_channels = self
            .backbone
            .out_channels()
            .ok_or(ModelConfigError::EmptyBackbone)?;

        let rgb = self.backbone.output_size(self.rgb_size);
        let flow = self.backbone.output_size(self.flow_size);
        if rgb != flow {
            return Err(ModelConfigError::StreamMismatch { rgb, flow });
        }

        // Two valid convolutions, stride 1.
        let shrink = 2 * self.fusion_kernel.saturating_sub(1);
        if self.fusion_kernel == 0 || rgb.0 <= shrink || rgb.1 <= shrink {
            return Err(ModelConfigError::FeatureMapTooSmall {
                size: rgb,
                kernel: self.fusion_kernel,
            });
        }
        let head_size = (rgb.0 - shrink, rgb.1 - shrink);

        Ok(FusionPlan {
            fused_channels: 2 * stream_channels,
            feature_size: rgb,
            head_size,
            fc_inputs: self.fusion_channels[1] * head_size.0 * head_size.1,
        })
    }
}

#[derive(Module, Debug)]
pub struct TwoStream<B: Backend> {
    rgb: Backbone<B>,
    flow: Backbone<B>,
    fuse_reduce: Conv2d<B>,
    fuse_squeeze: Conv2d<B>,
    classifier: Linear<B>,
    config: Ignored<TwoStreamConfig>,
    plan: Ignored<FusionPlan>,
}

impl<B: Backend> TwoStream<B> {
    /// Builds both streams from default initialisation; the flow input filter is still derived
    /// from a 3-channel filter so the layout matches a pretrained build.
    pub fn new(config: TwoStreamConfig, device: &B::Device) -> Result<Self, ModelConfigError> {
        let plan = config.plan()?;
        let rgb = Backbone::new(&config.backbone, RGB_CHANNELS, device);
        let flow_source = Backbone::new(&config.backbone, RGB_CHANNELS, device);
        Ok(Self::assemble(config, plan, rgb, flow_source, device))
    }

    /// Builds both streams from the same pretrained 3-channel backbone record.
    pub fn with_pretrained<P: AsRef<Path>>(
        config: TwoStreamConfig,
        backbone_record: P,
        device: &B::Device,
    ) -> Result<Self, ModelConfigError> {
        let plan = config.plan()?;
        let path = backbone_record.as_ref();
        let load = || {
            Backbone::load_pretrained(&config.backbone, path, device).map_err(|e| {
                ModelConfigError::Pretrained {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            })
        };
        let rgb = load()?;
        let flow_source = load()?;
        Ok(Self::assemble(config, plan, rgb, flow_source, device))
    }

    fn assemble(
        config: TwoStreamConfig,
        plan: FusionPlan,
        rgb: Backbone<B>,
        flow_source: Backbone<B>,
        device: &B::Device,
    ) -> Self {
        let flow = flow_source.adapt_input(config.flow_channels, device);
        let [reduce, squeeze] = config.fusion_channels;
        let kernel = [config.fusion_kernel, config.fusion_kernel];
        let fuse_reduce = Conv2dConfig::new([plan.fused_channels, reduce], kernel)
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        let fuse_squeeze = Conv2dConfig::new([reduce, squeeze], kernel)
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        let classifier = LinearConfig::new(plan.fc_inputs, config.num_classes).init(device);
        Self {
            rgb,
            flow,
            fuse_reduce,
            fuse_squeeze,
            classifier,
            config: Ignored(config),
            plan: Ignored(plan),
        }
    }

    pub fn config(&self) -> &TwoStreamConfig {
        &self.config
    }

    pub fn plan(&self) -> FusionPlan {
        *self.plan
    }

    pub fn rgb_backbone(&self) -> &Backbone<B> {
        &self.rgb
    }

    pub fn flow_backbone(&self) -> &Backbone<B> {
        &self.flow
    }

    /// Returns class logits `[B, num_classes]`.
    pub fn forward(
        &self,
        rgb: Tensor<B, 4>,
        flow: Tensor<B, 4>,
    ) -> Result<Tensor<B, 2>, ShapeError> {
        let [rgb_batch, rgb_c, rgb_h, rgb_w] = rgb.dims();
        let [flow_batch, flow_c, flow_h, flow_w] = flow.dims();
        if rgb_batch != flow_batch {
            return Err(ShapeError::BatchMismatch {
                rgb: rgb_batch,
                flow: flow_batch,
            });
        }
        let cfg = &*self.config;
        let expected_rgb = [RGB_CHANNELS, cfg.rgb_size.0, cfg.rgb_size.1];
        if [rgb_c, rgb_h, rgb_w] != expected_rgb {
            return Err(ShapeError::Input {
                stream: "rgb",
                expected: expected_rgb,
                actual: [rgb_c, rgb_h, rgb_w],
            });
        }
        let expected_flow = [cfg.flow_channels, cfg.flow_size.0, cfg.flow_size.1];
        if [flow_c, flow_h, flow_w] != expected_flow {
            return Err(ShapeError::Input {
                stream: "flow",
                expected: expected_flow,
                actual: [flow_c, flow_h, flow_w],
            });
        }

        let features = Tensor::cat(vec![self.rgb.forward(rgb), self.flow.forward(flow)], 1);
        let x = self.fuse_reduce.forward(features);
        let x = self.fuse_squeeze.forward(x);
        let x = x.reshape([rgb_batch, self.plan.fc_inputs]);
        Ok(self.classifier.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::BackboneLayer;

    type TestBackend = burn_ndarray::NdArray<f32>;

    fn small_config() -> TwoStreamConfig {
        TwoStreamConfig {
            rgb_size: (24, 24),
            flow_size: (24, 24),
            backbone: BackboneConfig {
                layers: vec![
                    BackboneLayer::Conv(4),
                    BackboneLayer::Pool,
                    BackboneLayer::Conv(8),
                    BackboneLayer::Pool,
                ],
            },
            fusion_channels: [8, 4],
            ..Default::default()
        }
    }

    #[test]
    fn default_plan_matches_vgg16_fusion_sizes() {
        let plan = TwoStreamConfig::default().plan().unwrap();
        assert_eq!(plan.fused_channels, 1024);
        assert_eq!(plan.feature_size, (7, 7));
        assert_eq!(plan.head_size, (3, 3));
        assert_eq!(plan.fc_inputs, 32 * 3 * 3);
    }

    #[test]
    fn forward_produces_one_logit_row_per_sample() {
        let device = Default::default();
        let model = TwoStream::<TestBackend>::new(small_config(), &device).unwrap();
        let rgb = Tensor::zeros([3, 3, 24, 24], &device);
        let flow = Tensor::zeros([3, 20, 24, 24], &device);
        let logits = model.forward(rgb, flow).unwrap();
        assert_eq!(logits.dims(), [3, 7]);
    }

    #[test]
    fn forward_rejects_batch_mismatch() {
        let device = Default::default();
        let model = TwoStream::<TestBackend>::new(small_config(), &device).unwrap();
        let rgb = Tensor::zeros([2, 3, 24, 24], &device);
        let flow = Tensor::zeros([3, 20, 24, 24], &device);
        let err = model.forward(rgb, flow).unwrap_err();
        assert_eq!(err, ShapeError::BatchMismatch { rgb: 2, flow: 3 });
    }

    #[test]
    fn forward_rejects_wrong_flow_channels() {
        let device = Default::default();
        let model = TwoStream::<TestBackend>::new(small_config(), &device).unwrap();
        let rgb = Tensor::zeros([1, 3, 24, 24], &device);
        let flow = Tensor::zeros([1, 3, 24, 24], &device);
        assert!(matches!(
            model.forward(rgb, flow),
            Err(ShapeError::Input { stream: "flow", .. })
        ));
    }

    #[test]
    fn construction_rejects_mismatched_streams() {
        let device = Default::default();
        let cfg = TwoStreamConfig {
            flow_size: (32, 32),
            ..small_config()
        };
        let err = TwoStream::<TestBackend>::new(cfg, &device).unwrap_err();
        assert_eq!(
            err,
            ModelConfigError::StreamMismatch {
                rgb: (6, 6),
                flow: (8, 8)
            }
        );
    }

    #[test]
    fn construction_rejects_feature_map_smaller_than_head() {
        let cfg = TwoStreamConfig {
            rgb_size: (16, 16),
            flow_size: (16, 16),
            ..small_config()
        };
        assert!(matches!(
            cfg.plan(),
            Err(ModelConfigError::FeatureMapTooSmall { size: (4, 4), .. })
        ));
    }

    #[test]
    fn invalid_config_fails_before_any_backbone_is_loaded() {
        let device = Default::default();
        let cfg = TwoStreamConfig {
            num_classes: 0,
            ..small_config()
        };
        // The record does not exist; reaching the loader would yield `Pretrained`.
        let err = TwoStream::<TestBackend>::with_pretrained(cfg, "does/not/exist.bin", &device)
            .unwrap_err();
        assert_eq!(err, ModelConfigError::NoClasses);
    }

    #[test]
    fn flow_stream_accepts_configured_channels() {
        let device = Default::default();
        let model = TwoStream::<TestBackend>::new(small_config(), &device).unwrap();
        let conv = model.flow_backbone().input_conv().unwrap();
        assert_eq!(conv.weight.val().dims(), [4, 20, 3, 3]);
        let conv = model.rgb_backbone().input_conv().unwrap();
        assert_eq!(conv.weight.val().dims(), [4, 3, 3, 3]);
    }
}
