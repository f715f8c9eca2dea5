//! VGG-style convolutional feature stacks.
//!
//! Shapes:
//! - Input: `[B, C, H, W]`
//! - Output: `[B, out_channels, H / 2^pools, W / 2^pools]` (floor at every pool)

use burn::module::{Ignored, Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};
use std::path::Path;

/// One entry of a feature stack: a padded 3x3 convolution + ReLU, or a 2x2 max pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackboneLayer {
    Conv(usize),
    Pool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackboneConfig {
    pub layers: Vec<BackboneLayer>,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self::vgg16()
    }
}

impl BackboneConfig {
    /// The 13-convolution VGG16 feature stack.
    pub fn vgg16() -> Self {
        use BackboneLayer::{Conv, Pool};
        Self {
            layers: vec![
                Conv(64),
                Conv(64),
                Pool,
                Conv(128),
                Conv(128),
                Pool,
                Conv(256),
                Conv(256),
                Conv(256),
                Pool,
                Conv(512),
                Conv(512),
                Conv(512),
                Pool,
                Conv(512),
                Conv(512),
                Conv(512),
                Pool,
            ],
        }
    }

    pub fn conv_count(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| matches!(l, BackboneLayer::Conv(_)))
            .count()
    }

    /// Channels of the final feature map (`None` when the stack has no convolution).
    pub fn out_channels(&self) -> Option<usize> {
        self.layers.iter().rev().find_map(|l| match l {
            BackboneLayer::Conv(c) => Some(*c),
            BackboneLayer::Pool => None,
        })
    }

    /// Spatial size of the feature map for an input of `(height, width)`.
    pub fn output_size(&self, size: (usize, usize)) -> (usize, usize) {
        self.layers.iter().fold(size, |(h, w), layer| match layer {
            BackboneLayer::Conv(_) => (h, w),
            BackboneLayer::Pool => (h / 2, w / 2),
        })
    }
}

#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    plan: Ignored<Vec<BackboneLayer>>,
}

impl<B: Backend> Backbone<B> {
    pub fn new(config: &BackboneConfig, in_channels: usize, device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(config.conv_count());
        let mut channels = in_channels;
        for layer in &config.layers {
            if let BackboneLayer::Conv(out) = *layer {
                convs.push(
                    Conv2dConfig::new([channels, out], [3, 3])
                        .with_padding(PaddingConfig2d::Explicit(1, 1))
                        .init(device),
                );
                channels = out;
            }
        }
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        Self {
            convs,
            pool,
            plan: Ignored(config.layers.clone()),
        }
    }

    /// Builds a 3-channel backbone and fills it from a full-precision Burn record.
    pub fn load_pretrained<P: AsRef<Path>>(
        config: &BackboneConfig,
        path: P,
        device: &B::Device,
    ) -> Result<Self, RecorderError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        Self::new(config, 3, device).load_file(path.as_ref(), &recorder, device)
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut convs = self.convs.iter();
        let mut x = input;
        for layer in self.plan.iter() {
            match layer {
                BackboneLayer::Conv(_) => {
                    if let Some(conv) = convs.next() {
                        x = relu(conv.forward(x));
                    }
                }
                BackboneLayer::Pool => x = self.pool.forward(x),
            }
        }
        x
    }

    pub fn input_conv(&self) -> Option<&Conv2d<B>> {
        self.convs.first()
    }

    /// Replaces the first convolution with one accepting `in_channels` inputs
    /// (see [`adapt_input_conv`]).
    pub fn adapt_input(mut self, in_channels: usize, device: &B::Device) -> Self {
        if let Some(first) = self.convs.first_mut() {
            let [out_channels, from, ..] = first.weight.val().dims();
            tracing::debug!(out_channels, from, to = in_channels, "adapting input convolution");
            *first = adapt_input_conv(first, in_channels, device);
        }
        self
    }
}

/// Re-targets a pretrained input convolution to `in_channels` inputs.
///
/// The kernel is averaged over its input-channel axis and the single averaged channel is
/// repeated `in_channels` times, so every new channel carries the channel-mean of the
/// original filter. Stride, padding and dilation are preserved; the bias comes from a freshly
/// initialised convolution of the new shape.
pub fn adapt_input_conv<B: Backend>(
    conv: &Conv2d<B>,
    in_channels: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let weight = conv.weight.val();
    let [out_channels, _, kh, kw] = weight.dims();
    // Detached so the new kernel is a leaf parameter on autodiff backends.
    let adapted = weight.mean_dim(1).repeat_dim(1, in_channels).detach();

    let mut replacement = Conv2dConfig::new([in_channels, out_channels], [kh, kw])
        .with_stride(conv.stride)
        .with_dilation(conv.dilation)
        .with_padding(conv.padding.0.clone())
        .with_bias(conv.bias.is_some())
        .init(device);
    replacement.weight = Param::from_tensor(adapted);
    replacement
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn_ndarray::NdArray<f32>;

    fn weights(conv: &Conv2d<TestBackend>) -> Vec<f32> {
        conv.weight.val().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn vgg16_output_size_and_channels() {
        let cfg = BackboneConfig::vgg16();
        assert_eq!(cfg.conv_count(), 13);
        assert_eq!(cfg.out_channels(), Some(512));
        assert_eq!(cfg.output_size((224, 224)), (7, 7));
        assert_eq!(cfg.output_size((112, 150)), (3, 4));
    }

    #[test]
    fn adapted_channels_equal_original_channel_mean() {
        let device = Default::default();
        let conv = Conv2dConfig::new([3, 4], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init::<TestBackend>(&device);
        let adapted = adapt_input_conv(&conv, 20, &device);
        assert_eq!(adapted.weight.val().dims(), [4, 20, 3, 3]);

        let original = weights(&conv);
        let new = weights(&adapted);
        for o in 0..4 {
            for k in 0..9 {
                let mean = (0..3).map(|c| original[(o * 3 + c) * 9 + k]).sum::<f32>() / 3.0;
                let first = new[(o * 20) * 9 + k];
                assert!((first - mean).abs() < 1e-6, "{first} vs {mean}");
                for c in 1..20 {
                    assert_eq!(new[(o * 20 + c) * 9 + k], first);
                }
            }
        }
    }

    #[test]
    fn adapting_twice_keeps_the_same_kernel() {
        let device = Default::default();
        let conv = Conv2dConfig::new([3, 2], [3, 3]).init::<TestBackend>(&device);
        let once = adapt_input_conv(&conv, 20, &device);
        let twice = adapt_input_conv(&once, 20, &device);
        for (a, b) in weights(&once).iter().zip(weights(&twice)) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn adapt_input_keeps_padding_and_stride() {
        let device = Default::default();
        let cfg = BackboneConfig {
            layers: vec![BackboneLayer::Conv(4), BackboneLayer::Pool],
        };
        let backbone = Backbone::<TestBackend>::new(&cfg, 3, &device).adapt_input(20, &device);
        let conv = backbone.input_conv().unwrap();
        assert_eq!(conv.stride, [1, 1]);
        assert_eq!(conv.weight.val().dims(), [4, 20, 3, 3]);

        let out = backbone.forward(Tensor::zeros([2, 20, 8, 8], &device));
        assert_eq!(out.dims(), [2, 4, 4, 4]);
    }
}
