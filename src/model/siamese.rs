//! Siamese convolutional network
//!
//! One embedding function with a single parameter set is applied to both
//! inputs; the element-wise L1 distance of the two embeddings feeds a
//! two-way match/mismatch head.

use super::config::SiameseConfig;
use burn::{
    module::{Ignored, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{
        activation::{sigmoid, softmax},
        backend::Backend,
        Tensor,
    },
};

/// Index of the "same class" column in the head output
pub const MATCH_CLASS: usize = 1;

/// Siamese network for one-shot character recognition
#[derive(Module, Debug)]
pub struct SiameseNetwork<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool1: MaxPool2d,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    pool2: MaxPool2d,
    /// Projection to the embedding space
    embedding: Linear<B>,
    /// Two-way match head over the L1 distance
    head: Linear<B>,
    activation: Relu,
    config: Ignored<SiameseConfig>,
}

impl<B: Backend> SiameseNetwork<B> {
    /// Create a freshly initialized network
    pub fn new(device: &B::Device, config: &SiameseConfig) -> Self {
        let channels = config.input_shape.channels;
        let kernel = [config.kernel_size, config.kernel_size];
        let pad = config.padding();

        let conv = |input: usize, output: usize| {
            Conv2dConfig::new([input, output], kernel)
                .with_padding(PaddingConfig2d::Explicit(pad, pad))
                .init(device)
        };
        let pool = || MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv1: conv(channels, config.block1_filters),
            conv2: conv(config.block1_filters, config.block1_filters),
            pool1: pool(),
            conv3: conv(config.block1_filters, config.block2_filters),
            conv4: conv(config.block2_filters, config.block2_filters),
            pool2: pool(),
            embedding: LinearConfig::new(config.flatten_size(), config.embedding_dim)
                .init(device),
            head: LinearConfig::new(config.embedding_dim, 2).init(device),
            activation: Relu::new(),
            config: Ignored(config.clone()),
        }
    }

    /// Architecture this network was built with
    pub fn config(&self) -> &SiameseConfig {
        &self.config
    }

    /// Embed a batch of images `[batch, channels, height, width]`
    ///
    /// Returns `[batch, embedding_dim]` with every component in `[0, 1]`.
    pub fn embed(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(images));
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.pool1.forward(x);

        let x = self.activation.forward(self.conv3.forward(x));
        let x = self.activation.forward(self.conv4.forward(x));
        let x = self.pool2.forward(x);

        let x = x.flatten::<2>(1, 3);
        sigmoid(self.embedding.forward(x))
    }

    /// Compare two batches of images pairwise, returning `[batch, 2]` logits
    pub fn forward(&self, left: Tensor<B, 4>, right: Tensor<B, 4>) -> Tensor<B, 2> {
        let distance = (self.embed(left) - self.embed(right)).abs();
        self.head.forward(distance)
    }

    /// Probability that each pair shows the same character, `[batch]`
    pub fn match_probability(&self, left: Tensor<B, 4>, right: Tensor<B, 4>) -> Tensor<B, 1> {
        let probs = softmax(self.forward(left, right), 1);
        let batch = probs.dims()[0];
        probs
            .slice([0..batch, MATCH_CLASS..MATCH_CLASS + 1])
            .squeeze::<1>(1)
    }
}
