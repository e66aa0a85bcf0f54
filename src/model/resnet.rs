//! ResNet-18, laid out like torchvision's so its published weights map onto it.
//!
//! Architecture:
//! - Stem: Conv 7x7 stride 2, BatchNorm, ReLU, MaxPool 3x3 stride 2
//! - Four stages of two BasicBlocks each (64, 128, 256, 512 channels)
//! - Global average pooling
//! - Linear classification head (`fc`)

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

use super::backbone::Backbone;

const STAGE_WIDTHS: [usize; 4] = [64, 128, 256, 512];
const BLOCKS_PER_STAGE: usize = 2;

fn conv_initializer() -> Initializer {
    Initializer::KaimingNormal {
        gain: std::f64::consts::SQRT_2,
        fan_out_only: true,
    }
}

fn conv(channels: [usize; 2], kernel: usize, stride: usize, padding: usize) -> Conv2dConfig {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .with_initializer(conv_initializer())
}

/// 1x1 projection on the skip path when shape changes
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: conv([in_channels, out_channels], 1, stride, 0).init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions with a residual connection
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1: conv([in_channels, out_channels], 3, stride, 1).init(device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2: conv([out_channels, out_channels], 3, 1, 1).init(device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = relu(self.bn1.forward(self.conv1.forward(input)));
        let x = self.bn2.forward(self.conv2.forward(x));
        relu(x + identity)
    }
}

fn stage<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    device: &B::Device,
) -> Vec<BasicBlock<B>> {
    (0..BLOCKS_PER_STAGE)
        .map(|index| match index {
            0 => BasicBlock::new(in_channels, out_channels, stride, device),
            _ => BasicBlock::new(out_channels, out_channels, 1, device),
        })
        .collect()
}

/// ResNet-18 image classifier
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    maxpool: MaxPool2d,
    layer1: Vec<BasicBlock<B>>,
    layer2: Vec<BasicBlock<B>>,
    layer3: Vec<BasicBlock<B>>,
    layer4: Vec<BasicBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> ResNet<B> {
    /// Build the network with a `num_classes`-wide head
    pub fn new(backbone: Backbone, num_classes: usize, device: &B::Device) -> Self {
        let [w1, w2, w3, w4] = STAGE_WIDTHS;

        Self {
            conv1: conv([3, w1], 7, 2, 3).init(device),
            bn1: BatchNormConfig::new(w1).init(device),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: stage(w1, w1, 1, device),
            layer2: stage(w1, w2, 2, device),
            layer3: stage(w2, w3, 2, device),
            layer4: stage(w3, w4, 2, device),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(backbone.feature_dim(), num_classes).init(device),
        }
    }

    /// Swap the classification head for a freshly initialized one
    pub fn with_head(mut self, num_classes: usize, device: &B::Device) -> Self {
        let [features, _] = self.fc.weight.dims();
        self.fc = LinearConfig::new(features, num_classes).init(device);
        self
    }

    /// Width of the classification head
    pub fn num_classes(&self) -> usize {
        self.fc.weight.dims()[1]
    }

    /// Pooled feature vectors, shape `[batch, 512]`
    pub fn features(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.bn1.forward(self.conv1.forward(input)));
        let x = self.maxpool.forward(x);

        let x = [&self.layer1, &self.layer2, &self.layer3, &self.layer4]
            .into_iter()
            .flatten()
            .fold(x, |x, block| block.forward(x));

        self.avgpool.forward(x).flatten(1, 3)
    }

    /// Logits, shape `[batch, num_classes]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        self.fc.forward(self.features(input))
    }
}

/// Check that `record` has the block layout [`ResNet::new`] builds.
///
/// Loading a record whose stage lengths differ from the module's panics in
/// Burn, so this must pass before `load_record`.
pub fn check_record_layout<B: Backend>(record: &ResNetRecord<B>) -> Result<(), String> {
    let stages = [&record.layer1, &record.layer2, &record.layer3, &record.layer4];

    for (index, blocks) in stages.into_iter().enumerate() {
        if blocks.len() != BLOCKS_PER_STAGE {
            return Err(format!(
                "layer{} has {} blocks, expected {}",
                index + 1,
                blocks.len(),
                BLOCKS_PER_STAGE
            ));
        }
        for (position, block) in blocks.iter().enumerate() {
            // Only the first block of stages 2-4 changes stride and width
            let projects = index > 0 && position == 0;
            if block.downsample.is_some() != projects {
                return Err(format!(
                    "layer{}.{} {} a downsample projection",
                    index + 1,
                    position,
                    if projects { "lacks" } else { "has an unexpected" }
                ));
            }
        }
    }
    Ok(())
}
