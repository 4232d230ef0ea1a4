//! Convolutional backbone and fully-connected heads shared by all scoring networks

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{LeakyRelu, LeakyReluConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;

/// Layer widths of the scoring networks
#[derive(Debug, Config)]
pub struct CnnConfig {
    /// Output channels of the 3x3 convolution
    pub conv1_channels: usize,
    /// Output channels of the 2x2 convolution, also the flattened feature width
    pub conv2_channels: usize,
    /// First fully-connected layer
    pub fc1_size: usize,
    /// Second fully-connected layer
    pub fc2_size: usize,
    /// Slope of the leaky ReLU for negative inputs
    pub negative_slope: f64,
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            conv1_channels: 20,
            conv2_channels: 30,
            fc1_size: 120,
            fc2_size: 84,
            negative_slope: 0.2,
        }
    }
}

/// conv 3x3 (same) -> leaky -> max-pool 2x2 stride 1 -> conv 2x2 (valid) -> leaky -> flatten
///
/// `[B, C, 3, 3]` -> `[B, conv2_channels]`
#[derive(Module, Debug)]
pub struct ConvBackbone<B: Backend> {
    conv1: Conv2d<B>,
    pool: MaxPool2d,
    conv2: Conv2d<B>,
    activation: LeakyRelu,
    out_size: usize,
}

impl<B: Backend> ConvBackbone<B> {
    pub fn new(device: &B::Device, in_channels: usize, config: &CnnConfig) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, config.conv1_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([1, 1]).init();
        let conv2 =
            Conv2dConfig::new([config.conv1_channels, config.conv2_channels], [2, 2]).init(device);

        Self {
            conv1,
            pool,
            conv2,
            activation: LeakyReluConfig::new()
                .with_negative_slope(config.negative_slope)
                .init(),
            out_size: config.conv2_channels,
        }
    }

    pub fn out_size(&self) -> usize {
        self.out_size
    }

    pub fn forward(&self, grid: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(self.activation.forward(self.conv1.forward(grid))); // [B, c1, 2, 2]
        let x = self.activation.forward(self.conv2.forward(x)); // [B, c2, 1, 1]
        let [batch, _, _, _] = x.dims();
        x.reshape([batch, self.out_size])
    }
}

/// Two leaky fully-connected layers and a linear output layer
#[derive(Module, Debug)]
pub struct MlpHead<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    activation: LeakyRelu,
}

impl<B: Backend> MlpHead<B> {
    pub fn new(device: &B::Device, input_size: usize, output_size: usize, config: &CnnConfig) -> Self {
        Self {
            fc1: LinearConfig::new(input_size, config.fc1_size).init(device),
            fc2: LinearConfig::new(config.fc1_size, config.fc2_size).init(device),
            fc3: LinearConfig::new(config.fc2_size, output_size).init(device),
            activation: LeakyReluConfig::new()
                .with_negative_slope(config.negative_slope)
                .init(),
        }
    }

    /// `[B, input_size]` -> `[B, output_size]`
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.activation.forward(self.fc2.forward(x));
        self.fc3.forward(x)
    }
}

#[cfg(test)]
impl<B: Backend> MlpHead<B> {
    /// Same head with the output weights zeroed: every input maps to the output bias.
    pub(crate) fn constant(mut self) -> Self {
        let weight = self.fc3.weight.val().zeros_like();
        self.fc3.weight = burn::module::Param::from_tensor(weight);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBackend;

    #[test]
    fn test_cnn_config_default() {
        let config = CnnConfig::default();
        assert_eq!(config.conv1_channels, 20);
        assert_eq!(config.conv2_channels, 30);
        assert_eq!(config.fc1_size, 120);
        assert_eq!(config.fc2_size, 84);
        assert!((config.negative_slope - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_backbone_flattens_grid() {
        let device = Default::default();
        let backbone = ConvBackbone::<TestBackend>::new(&device, 5, &CnnConfig::default());

        let grid = Tensor::<TestBackend, 4>::ones([4, 5, 3, 3], &device);
        let out = backbone.forward(grid);
        assert_eq!(out.dims(), [4, 30]);
        assert_eq!(backbone.out_size(), 30);
    }

    #[test]
    fn test_mlp_head_shape() {
        let device = Default::default();
        let head = MlpHead::<TestBackend>::new(&device, 38, 1, &CnnConfig::default());

        let out = head.forward(Tensor::<TestBackend, 2>::zeros([3, 38], &device));
        assert_eq!(out.dims(), [3, 1]);
    }

    #[test]
    fn test_constant_head_ignores_input() {
        let device = Default::default();
        let head = MlpHead::<TestBackend>::new(&device, 4, 1, &CnnConfig::default()).constant();

        let x = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0, 0.0, 0.0], [1.0, -2.0, 3.0, 5.0]], &device);
        let out: Vec<f32> = head.forward(x).into_data().to_vec().unwrap();
        assert!((out[0] - out[1]).abs() < 1e-6);
    }
}
