//! Neural network layer implementations
//!
//! Layers hold their scoped name and hyper-parameters only. `build` registers
//! the weights in a [`ParamStore`]; `forward` reads them. Image tensors use
//! NHWC order: [batch, height, width, channels].

use super::params::{scoped, Initializer, ParamStore};
use crate::error::{ModelError, Result};
use ndarray::{s, Array2, Array4, Axis};

/// Activation functions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    /// No activation (identity)
    Linear,
    /// Rectified Linear Unit: max(0, x)
    Relu,
    /// Sigmoid: 1 / (1 + exp(-x))
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
}

impl Activation {
    /// Apply activation function element-wise
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
        }
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Padding mode for convolutions and pooling
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Padding {
    /// No padding
    Valid,
    /// Output size is ceil(input / stride)
    Same,
}

impl Padding {
    /// Output size and leading padding along one spatial axis
    pub fn geometry(&self, input: usize, kernel: usize, stride: usize) -> Result<(usize, usize)> {
        match self {
            Padding::Same => {
                let out = (input + stride - 1) / stride;
                let pad_total = ((out.saturating_sub(1)) * stride + kernel).saturating_sub(input);
                Ok((out, pad_total / 2))
            }
            Padding::Valid => {
                if input < kernel {
                    return Err(ModelError::shape_mismatch(
                        "valid padding input",
                        format!(">= {}", kernel),
                        input,
                    ));
                }
                Ok(((input - kernel) / stride + 1, 0))
            }
        }
    }
}

/// Views an NHWC tensor as rows of channels: [batch * height * width, channels]
fn to_rows(x: &Array4<f32>) -> Result<Array2<f32>> {
    let (b, h, w, c) = x.dim();
    Ok(Array2::from_shape_vec((b * h * w, c), x.iter().cloned().collect())?)
}

/// Flattens everything but the batch axis
pub fn flatten(x: &Array4<f32>) -> Result<Array2<f32>> {
    let (b, h, w, c) = x.dim();
    Ok(Array2::from_shape_vec((b, h * w * c), x.iter().cloned().collect())?)
}

/// Fully connected layer
#[derive(Debug, Clone)]
pub struct Dense {
    pub name: String,
    pub in_features: usize,
    pub out_features: usize,
    pub activation: Activation,
}

impl Dense {
    pub fn new(name: impl Into<String>, in_features: usize, out_features: usize, activation: Activation) -> Self {
        Self {
            name: name.into(),
            in_features,
            out_features,
            activation,
        }
    }

    fn kernel_name(&self) -> String {
        scoped(&self.name, "kernel")
    }

    fn bias_name(&self) -> String {
        scoped(&self.name, "bias")
    }

    pub fn build(&self, store: &mut ParamStore) -> Result<()> {
        store.get_or_create(
            &self.kernel_name(),
            &[self.in_features, self.out_features],
            Initializer::GlorotUniform,
            true,
        )?;
        store.get_or_create(&self.bias_name(), &[self.out_features], Initializer::Zeros, true)?;
        Ok(())
    }

    /// Input: [batch, in_features], output: [batch, out_features]
    pub fn forward(&self, store: &ParamStore, x: &Array2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.in_features {
            return Err(ModelError::shape_mismatch(&self.name, self.in_features, x.ncols()));
        }
        let kernel = store.get2(&self.kernel_name())?;
        let bias = store.get1(&self.bias_name())?;

        let mut output = x.dot(&kernel) + &bias;
        if self.activation != Activation::Linear {
            output.mapv_inplace(|v| self.activation.apply(v));
        }
        Ok(output)
    }

    pub fn num_params(&self) -> usize {
        self.in_features * self.out_features + self.out_features
    }
}

/// 2D convolution, kernel layout [kh, kw, in_channels, out_channels]
#[derive(Debug, Clone)]
pub struct Conv2d {
    pub name: String,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: Padding,
    pub use_bias: bool,
    pub activation: Activation,
}

impl Conv2d {
    /// Same-padded, stride 1, biased, no activation
    pub fn new(name: impl Into<String>, in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            name: name.into(),
            in_channels,
            out_channels,
            kernel_size,
            stride: 1,
            padding: Padding::Same,
            use_bias: true,
            activation: Activation::Linear,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Convolutions followed by batch norm carry no bias
    pub fn without_bias(mut self) -> Self {
        self.use_bias = false;
        self
    }

    fn kernel_name(&self) -> String {
        scoped(&self.name, "kernel")
    }

    fn bias_name(&self) -> String {
        scoped(&self.name, "bias")
    }

    pub fn build(&self, store: &mut ParamStore) -> Result<()> {
        let k = self.kernel_size;
        store.get_or_create(
            &self.kernel_name(),
            &[k, k, self.in_channels, self.out_channels],
            Initializer::GlorotUniform,
            true,
        )?;
        if self.use_bias {
            store.get_or_create(&self.bias_name(), &[self.out_channels], Initializer::Zeros, true)?;
        }
        Ok(())
    }

    /// Forward pass through patch extraction and one matrix product
    pub fn forward(&self, store: &ParamStore, x: &Array4<f32>) -> Result<Array4<f32>> {
        let (batch, in_h, in_w, in_c) = x.dim();
        if in_c != self.in_channels {
            return Err(ModelError::shape_mismatch(&self.name, self.in_channels, in_c));
        }
        let k = self.kernel_size;
        let (out_h, pad_top) = self.padding.geometry(in_h, k, self.stride)?;
        let (out_w, pad_left) = self.padding.geometry(in_w, k, self.stride)?;

        let patch_len = k * k * in_c;
        let mut patches = Array2::<f32>::zeros((batch * out_h * out_w, patch_len));
        for b in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let row = (b * out_h + oy) * out_w + ox;
                    for ky in 0..k {
                        let iy = (oy * self.stride + ky) as isize - pad_top as isize;
                        if iy < 0 || iy >= in_h as isize {
                            continue;
                        }
                        for kx in 0..k {
                            let ix = (ox * self.stride + kx) as isize - pad_left as isize;
                            if ix < 0 || ix >= in_w as isize {
                                continue;
                            }
                            let offset = (ky * k + kx) * in_c;
                            for ic in 0..in_c {
                                patches[[row, offset + ic]] = x[[b, iy as usize, ix as usize, ic]];
                            }
                        }
                    }
                }
            }
        }

        let kernel = store
            .get4(&self.kernel_name())?
            .into_shape((patch_len, self.out_channels))?;
        let mut output = patches.dot(&kernel);
        if self.use_bias {
            let bias = store.get1(&self.bias_name())?;
            output += &bias;
        }
        if self.activation != Activation::Linear {
            output.mapv_inplace(|v| self.activation.apply(v));
        }

        Ok(output.into_shape((batch, out_h, out_w, self.out_channels))?)
    }
}

/// Depthwise 2D convolution with channel multiplier 1
///
/// Applies a separate k×k filter to each input channel.
/// Kernel layout: [kh, kw, channels, 1]
#[derive(Debug, Clone)]
pub struct DepthwiseConv2d {
    pub name: String,
    pub channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
}

impl DepthwiseConv2d {
    pub fn new(name: impl Into<String>, channels: usize, kernel_size: usize, stride: usize) -> Self {
        Self {
            name: name.into(),
            channels,
            kernel_size,
            stride,
        }
    }

    fn kernel_name(&self) -> String {
        scoped(&self.name, "depthwise_kernel")
    }

    pub fn build(&self, store: &mut ParamStore) -> Result<()> {
        let k = self.kernel_size;
        store.get_or_create(
            &self.kernel_name(),
            &[k, k, self.channels, 1],
            Initializer::GlorotUniform,
            true,
        )?;
        Ok(())
    }

    pub fn forward(&self, store: &ParamStore, x: &Array4<f32>) -> Result<Array4<f32>> {
        let (batch, in_h, in_w, channels) = x.dim();
        if channels != self.channels {
            return Err(ModelError::shape_mismatch(&self.name, self.channels, channels));
        }
        let k = self.kernel_size;
        let (out_h, pad_top) = Padding::Same.geometry(in_h, k, self.stride)?;
        let (out_w, pad_left) = Padding::Same.geometry(in_w, k, self.stride)?;
        let kernel = store.get4(&self.kernel_name())?;

        let mut output = Array4::<f32>::zeros((batch, out_h, out_w, channels));
        for b in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    for ky in 0..k {
                        let iy = (oy * self.stride + ky) as isize - pad_top as isize;
                        if iy < 0 || iy >= in_h as isize {
                            continue;
                        }
                        for kx in 0..k {
                            let ix = (ox * self.stride + kx) as isize - pad_left as isize;
                            if ix < 0 || ix >= in_w as isize {
                                continue;
                            }
                            for c in 0..channels {
                                output[[b, oy, ox, c]] +=
                                    x[[b, iy as usize, ix as usize, c]] * kernel[[ky, kx, c, 0]];
                            }
                        }
                    }
                }
            }
        }
        Ok(output)
    }
}

/// Batch normalisation over the channel axis of NHWC tensors
#[derive(Debug, Clone)]
pub struct BatchNorm {
    pub name: String,
    pub num_features: usize,
    pub eps: f32,
}

impl BatchNorm {
    pub fn new(name: impl Into<String>, num_features: usize) -> Self {
        Self {
            name: name.into(),
            num_features,
            eps: 1e-3,
        }
    }

    pub fn build(&self, store: &mut ParamStore) -> Result<()> {
        let n = [self.num_features];
        store.get_or_create(&scoped(&self.name, "gamma"), &n, Initializer::Ones, true)?;
        store.get_or_create(&scoped(&self.name, "beta"), &n, Initializer::Zeros, true)?;
        store.get_or_create(&scoped(&self.name, "moving_mean"), &n, Initializer::Zeros, false)?;
        store.get_or_create(&scoped(&self.name, "moving_variance"), &n, Initializer::Ones, false)?;
        Ok(())
    }

    /// Uses batch statistics in training mode, moving statistics otherwise
    pub fn forward(&self, store: &ParamStore, x: &Array4<f32>, is_training: bool) -> Result<Array4<f32>> {
        let (b, h, w, c) = x.dim();
        if c != self.num_features {
            return Err(ModelError::shape_mismatch(&self.name, self.num_features, c));
        }
        let gamma = store.get1(&scoped(&self.name, "gamma"))?;
        let beta = store.get1(&scoped(&self.name, "beta"))?;

        let rows = to_rows(x)?;
        let (mean, var) = if is_training {
            let n = rows.nrows().max(1) as f32;
            let mean = rows.sum_axis(Axis(0)) / n;
            let centered = &rows - &mean;
            let var = centered.mapv(|v| v * v).sum_axis(Axis(0)) / n;
            (mean, var)
        } else {
            (
                store.get1(&scoped(&self.name, "moving_mean"))?.to_owned(),
                store.get1(&scoped(&self.name, "moving_variance"))?.to_owned(),
            )
        };

        let scale = &gamma / &var.mapv(|v| (v + self.eps).sqrt());
        let normalized = (&rows - &mean) * &scale + &beta;
        Ok(normalized.into_shape((b, h, w, c))?)
    }
}

/// Layer normalisation over the last axis of [batch, features]
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub name: String,
    pub num_features: usize,
    pub eps: f32,
}

impl LayerNorm {
    pub fn new(name: impl Into<String>, num_features: usize) -> Self {
        Self {
            name: name.into(),
            num_features,
            eps: 1e-12,
        }
    }

    pub fn build(&self, store: &mut ParamStore) -> Result<()> {
        let n = [self.num_features];
        store.get_or_create(&scoped(&self.name, "gamma"), &n, Initializer::Ones, true)?;
        store.get_or_create(&scoped(&self.name, "beta"), &n, Initializer::Zeros, true)?;
        Ok(())
    }

    pub fn forward(&self, store: &ParamStore, x: &Array2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.num_features {
            return Err(ModelError::shape_mismatch(&self.name, self.num_features, x.ncols()));
        }
        let gamma = store.get1(&scoped(&self.name, "gamma"))?;
        let beta = store.get1(&scoped(&self.name, "beta"))?;

        let mut output = x.clone();
        for mut row in output.rows_mut() {
            let mean = row.mean().unwrap_or(0.0);
            let var = row.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
            let inv_std = 1.0 / (var + self.eps).sqrt();
            row.mapv_inplace(|v| (v - mean) * inv_std);
        }
        Ok(output * &gamma + &beta)
    }
}

/// Element-wise ReLU
pub fn relu(x: &Array4<f32>) -> Array4<f32> {
    x.mapv(|v| v.max(0.0))
}

/// Max pooling; padded positions never win
pub fn max_pool2d(x: &Array4<f32>, kernel: usize, stride: usize, padding: Padding) -> Result<Array4<f32>> {
    pool2d(x, kernel, stride, padding, PoolKind::Max)
}

/// Average pooling; padded positions are excluded from the count
pub fn avg_pool2d(x: &Array4<f32>, kernel: usize, stride: usize, padding: Padding) -> Result<Array4<f32>> {
    pool2d(x, kernel, stride, padding, PoolKind::Average)
}

#[derive(Clone, Copy, PartialEq)]
enum PoolKind {
    Max,
    Average,
}

fn pool2d(
    x: &Array4<f32>,
    kernel: usize,
    stride: usize,
    padding: Padding,
    kind: PoolKind,
) -> Result<Array4<f32>> {
    let (batch, in_h, in_w, channels) = x.dim();
    let (out_h, pad_top) = padding.geometry(in_h, kernel, stride)?;
    let (out_w, pad_left) = padding.geometry(in_w, kernel, stride)?;

    let mut output = Array4::<f32>::zeros((batch, out_h, out_w, channels));
    for b in 0..batch {
        for oy in 0..out_h {
            let y0 = (oy * stride) as isize - pad_top as isize;
            let y_range = y0.max(0) as usize..((y0 + kernel as isize).min(in_h as isize)) as usize;
            for ox in 0..out_w {
                let x0 = (ox * stride) as isize - pad_left as isize;
                let x_range = x0.max(0) as usize..((x0 + kernel as isize).min(in_w as isize)) as usize;

                let window = x.slice(s![b, y_range.clone(), x_range, ..]);
                let count = (window.len() / channels.max(1)).max(1) as f32;
                for c in 0..channels {
                    let lane = window.slice(s![.., .., c]);
                    output[[b, oy, ox, c]] = match kind {
                        PoolKind::Max => lane.iter().cloned().fold(f32::NEG_INFINITY, f32::max),
                        PoolKind::Average => lane.sum() / count,
                    };
                }
            }
        }
    }
    Ok(output)
}

/// Global average pooling to [batch, 1, 1, channels]
pub fn global_avg_pool(x: &Array4<f32>) -> Array4<f32> {
    let (_, h, w, _) = x.dim();
    let pooled = x.sum_axis(Axis(1)).sum_axis(Axis(1)) / (h * w).max(1) as f32;
    pooled.insert_axis(Axis(1)).insert_axis(Axis(1))
}
