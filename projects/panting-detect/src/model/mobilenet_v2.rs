//! MobileNetV2 with a single-logit classification head.
//!
//! Parameter names follow the torchvision layout (`features.N...`,
//! `classifier.1...`) so a PyTorch `state_dict` loads without renaming.

use candle_core::{DType, Device, Error, Module, ModuleT, Result, Tensor};
use candle_nn::{
    batch_norm, conv2d_no_bias, linear, BatchNorm, Conv2d, Conv2dConfig, Linear, VarBuilder, VarMap,
};
use std::collections::HashSet;

pub const LAST_CHANNEL: usize = 1280;
const FIRST_CHANNEL: usize = 32;
const BN_EPS: f64 = 1e-5;

/// (expand ratio, output channels, repeats, first stride)
const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

/// Conv -> BatchNorm -> optional ReLU6.
struct ConvBn {
    conv: Conv2d,
    bn: BatchNorm,
    relu6: bool,
}

impl ConvBn {
    #[allow(clippy::too_many_arguments)]
    fn new(
        conv_vb: VarBuilder,
        bn_vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
        relu6: bool,
    ) -> Result<Self> {
        let config = Conv2dConfig {
            padding: (kernel - 1) / 2,
            stride,
            groups,
            ..Default::default()
        };
        let conv = conv2d_no_bias(in_channels, out_channels, kernel, config, conv_vb)?;
        let bn = batch_norm(out_channels, BN_EPS, bn_vb)?;
        Ok(Self { conv, bn, relu6 })
    }

    /// torchvision `Conv2dNormActivation`: conv at `.0`, norm at `.1`.
    fn activated(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        groups: usize,
    ) -> Result<Self> {
        Self::new(
            vb.pp("0"),
            vb.pp("1"),
            in_channels,
            out_channels,
            kernel,
            stride,
            groups,
            true,
        )
    }
}

impl Module for ConvBn {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        // Inference mode: running statistics, no batch statistics.
        let xs = self.bn.forward_t(&xs, false)?;
        if self.relu6 {
            xs.clamp(0f32, 6f32)
        } else {
            Ok(xs)
        }
    }
}

struct InvertedResidual {
    layers: Vec<ConvBn>,
    use_residual: bool,
}

impl InvertedResidual {
    fn new(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expand_ratio: usize,
    ) -> Result<Self> {
        let hidden = in_channels * expand_ratio;
        let vb = vb.pp("conv");
        let mut layers = Vec::with_capacity(3);
        let mut idx = 0;

        if expand_ratio != 1 {
            layers.push(ConvBn::activated(vb.pp(idx), in_channels, hidden, 1, 1, 1)?);
            idx += 1;
        }
        // depthwise
        layers.push(ConvBn::activated(vb.pp(idx), hidden, hidden, 3, stride, hidden)?);
        idx += 1;
        // pointwise-linear: bare conv and norm as siblings
        layers.push(ConvBn::new(
            vb.pp(idx),
            vb.pp(idx + 1),
            hidden,
            out_channels,
            1,
            1,
            1,
            false,
        )?);

        Ok(Self {
            layers,
            use_residual: stride == 1 && in_channels == out_channels,
        })
    }
}

impl Module for InvertedResidual {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut out = xs.clone();
        for layer in &self.layers {
            out = layer.forward(&out)?;
        }
        if self.use_residual {
            out + xs
        } else {
            Ok(out)
        }
    }
}

enum Feature {
    Conv(ConvBn),
    Block(InvertedResidual),
}

impl Module for Feature {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Feature::Conv(c) => c.forward(xs),
            Feature::Block(b) => b.forward(xs),
        }
    }
}

pub struct MobileNetV2 {
    features: Vec<Feature>,
    classifier: Linear,
}

impl MobileNetV2 {
    /// Builds the network, pulling every parameter from `vb`. Any missing
    /// tensor or shape mismatch is an error.
    pub fn new(vb: VarBuilder, num_outputs: usize) -> Result<Self> {
        let fvb = vb.pp("features");
        let mut features = Vec::new();

        features.push(Feature::Conv(ConvBn::activated(
            fvb.pp(0),
            3,
            FIRST_CHANNEL,
            3,
            2,
            1,
        )?));

        let mut in_channels = FIRST_CHANNEL;
        for (t, c, n, s) in INVERTED_RESIDUAL_SETTINGS {
            for i in 0..n {
                let stride = if i == 0 { s } else { 1 };
                let block = InvertedResidual::new(fvb.pp(features.len()), in_channels, c, stride, t)?;
                features.push(Feature::Block(block));
                in_channels = c;
            }
        }

        features.push(Feature::Conv(ConvBn::activated(
            fvb.pp(features.len()),
            in_channels,
            LAST_CHANNEL,
            1,
            1,
            1,
        )?));

        // classifier.0 is dropout, which has no parameters and is a no-op at inference.
        let classifier = linear(LAST_CHANNEL, num_outputs, vb.pp("classifier").pp(1))?;

        Ok(Self {
            features,
            classifier,
        })
    }
}

/// Every tensor name the architecture reads from a state dict.
pub fn parameter_names(num_outputs: usize) -> Result<HashSet<String>> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    MobileNetV2::new(vb, num_outputs)?;
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Msg("parameter map lock poisoned".to_string()))?;
    Ok(data.keys().cloned().collect())
}

impl Module for MobileNetV2 {
    /// `xs` is NCHW f32; returns raw logits of shape (N, num_outputs).
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for feature in &self.features {
            xs = feature.forward(&xs)?;
        }
        // global average pool over H and W
        let xs = xs.mean((2, 3))?;
        self.classifier.forward(&xs)
    }
}
