//! Weight-normalized convolution layers.
//!
//! Every convolution in the generator and discriminators is weight
//! normalized: W = g * (v / ||v||), with the norm taken over every axis but
//! the first. `remove_weight_norm` folds g and v into a plain weight for
//! inference and records that with an explicit flag, so a second call is a
//! no-op.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Result, VocoderError};
use crate::nn::{join, StateDict};
use mlx_rs::module::Param;
use mlx_rs::ops::indexing::IndexOp;
use mlx_rs::Array;

/// Padding that keeps the length of a stride-1 dilated convolution.
pub fn get_padding(kernel_size: i32, dilation: i32) -> i32 {
    (kernel_size * dilation - dilation) / 2
}

/// Weight-norm reparameterized kernel shared by all conv layers.
#[derive(Debug)]
pub struct WeightNormWeight {
    /// Direction parameter. Holds the plain weight once fused.
    pub weight_v: Param<Array>,
    /// Magnitude parameter, shape `[dim0, 1, ...]`.
    pub weight_g: Param<Array>,
    fused: bool,
}

impl WeightNormWeight {
    /// Wrap an initial direction tensor; g starts at ||v||.
    pub fn new(weight_v: Array) -> Result<Self> {
        let weight_g = weight_norm(&weight_v)?;
        Ok(Self {
            weight_v: Param::new(weight_v),
            weight_g: Param::new(weight_g),
            fused: false,
        })
    }

    /// Kaiming-uniform initialisation over `shape`.
    pub fn kaiming_uniform(shape: &[i32], fan_in: i32) -> Result<Self> {
        let bound = (1.0 / fan_in as f32).sqrt();
        Self::new(mlx_rs::random::uniform::<_, f32>(-bound, bound, shape, None)?)
    }

    /// Re-draw v from N(0, std) and reset g to ||v||.
    pub fn init_normal(&mut self, std: f32) -> Result<()> {
        let shape = self.weight_v.as_ref().shape().to_vec();
        *self = Self::new(mlx_rs::random::normal::<f32>(&shape, None, Some(std), None)?)?;
        Ok(())
    }

    /// Whether g and v have been folded into a plain weight.
    pub fn is_fused(&self) -> bool {
        self.fused
    }

    /// Effective kernel.
    pub fn weight(&self) -> Result<Array> {
        if self.fused {
            return Ok(self.weight_v.as_ref().clone());
        }
        let v = self.weight_v.as_ref();
        let v_normalized = v.divide(&weight_norm(v)?)?;
        Ok(v_normalized.multiply(self.weight_g.as_ref())?)
    }

    /// Fold the normalization into the weight. Idempotent.
    pub fn remove_weight_norm(&mut self) -> Result<()> {
        if self.fused {
            return Ok(());
        }
        let weight = self.weight()?;
        self.weight_v = Param::new(weight);
        self.fused = true;
        Ok(())
    }

    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        if self.fused {
            out.insert(
                Rc::from(join(prefix, "weight")),
                self.weight_v.as_ref().clone(),
            );
        } else {
            out.insert(
                Rc::from(join(prefix, "weight_g")),
                self.weight_g.as_ref().clone(),
            );
            out.insert(
                Rc::from(join(prefix, "weight_v")),
                self.weight_v.as_ref().clone(),
            );
        }
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        let expected = self.weight_v.as_ref().shape().to_vec();
        if let Some(weight) = params.get(join(prefix, "weight").as_str()) {
            check_shape(prefix, &expected, weight)?;
            self.weight_v = Param::new(weight.clone());
            self.fused = true;
            return Ok(());
        }
        let v = require(params, &join(prefix, "weight_v"))?;
        let g = require(params, &join(prefix, "weight_g"))?;
        check_shape(prefix, &expected, v)?;
        let mut expected_g = vec![1; expected.len()];
        expected_g[0] = expected[0];
        check_shape(prefix, &expected_g, g)?;
        self.weight_v = Param::new(v.clone());
        self.weight_g = Param::new(g.clone());
        self.fused = false;
        Ok(())
    }
}

/// Weight-normalized 1D convolution.
#[derive(Debug)]
pub struct WeightNormConv1d {
    /// Kernel, `[out_channels, in_channels, kernel_size]`.
    pub weight: WeightNormWeight,
    /// Optional bias.
    pub bias: Option<Param<Array>>,
    /// Input channels.
    pub in_channels: i32,
    /// Output channels.
    pub out_channels: i32,
    /// Kernel size.
    pub kernel_size: i32,
    /// Stride.
    pub stride: i32,
    /// Padding.
    pub padding: i32,
    /// Dilation.
    pub dilation: i32,
}

impl WeightNormConv1d {
    /// Create a new weight-normalized Conv1d.
    ///
    /// # Arguments
    /// * `stride` - Stride (default 1)
    /// * `padding` - Padding (default 0)
    /// * `dilation` - Dilation (default 1)
    /// * `bias` - Whether to use bias (default true)
    pub fn new(
        in_channels: i32,
        out_channels: i32,
        kernel_size: i32,
        stride: Option<i32>,
        padding: Option<i32>,
        dilation: Option<i32>,
        bias: Option<bool>,
    ) -> Result<Self> {
        let weight = WeightNormWeight::kaiming_uniform(
            &[out_channels, in_channels, kernel_size],
            in_channels * kernel_size,
        )?;
        let bias = if bias.unwrap_or(true) {
            Some(Param::new(mlx_rs::ops::zeros::<f32>(&[out_channels])?))
        } else {
            None
        };

        Ok(Self {
            weight,
            bias,
            in_channels,
            out_channels,
            kernel_size,
            stride: stride.unwrap_or(1),
            padding: padding.unwrap_or(0),
            dilation: dilation.unwrap_or(1),
        })
    }

    /// Forward pass, `[batch, in_channels, length]` to `[batch, out_channels, new_length]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let weight = self.weight.weight()?;

        // MLX conv1d is channels-last: input NLC, weight OKI.
        let x_nlc = x.transpose_axes(&[0, 2, 1])?;
        let weight_oki = weight.transpose_axes(&[0, 2, 1])?;
        let output = mlx_rs::ops::conv1d(
            &x_nlc,
            &weight_oki,
            self.stride,
            self.padding,
            self.dilation,
            1,
        )?;
        let output = output.transpose_axes(&[0, 2, 1])?;

        add_bias(output, self.bias.as_ref(), &[1, self.out_channels, 1])
    }

    /// Fold weight norm into the kernel. Idempotent.
    pub fn remove_weight_norm(&mut self) -> Result<()> {
        self.weight.remove_weight_norm()
    }
}

impl StateDict for WeightNormConv1d {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        self.weight.state_dict_into(prefix, out);
        bias_into(self.bias.as_ref(), prefix, out);
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        self.weight.load_state_dict_from(prefix, params)?;
        load_bias(&mut self.bias, prefix, params)
    }
}

/// Weight-normalized transposed 1D convolution, used for upsampling.
#[derive(Debug)]
pub struct WeightNormConvTranspose1d {
    /// Kernel, `[in_channels, out_channels, kernel_size]`.
    pub weight: WeightNormWeight,
    /// Optional bias.
    pub bias: Option<Param<Array>>,
    /// Input channels.
    pub in_channels: i32,
    /// Output channels.
    pub out_channels: i32,
    /// Kernel size.
    pub kernel_size: i32,
    /// Stride.
    pub stride: i32,
    /// Padding.
    pub padding: i32,
}

impl WeightNormConvTranspose1d {
    /// Create a new weight-normalized ConvTranspose1d.
    pub fn new(
        in_channels: i32,
        out_channels: i32,
        kernel_size: i32,
        stride: i32,
        padding: i32,
    ) -> Result<Self> {
        let weight = WeightNormWeight::kaiming_uniform(
            &[in_channels, out_channels, kernel_size],
            in_channels * kernel_size,
        )?;
        Ok(Self {
            weight,
            bias: Some(Param::new(mlx_rs::ops::zeros::<f32>(&[out_channels])?)),
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
        })
    }

    /// Output length for an input of `length` samples.
    pub fn output_length(&self, length: i32) -> i32 {
        (length - 1) * self.stride - 2 * self.padding + self.kernel_size
    }

    /// Forward pass, `[batch, in_channels, length]` to
    /// `[batch, out_channels, (length - 1) * stride - 2 * padding + kernel_size]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        // [in, out, K] -> [out, in, K]
        let weight = self.weight.weight()?.transpose_axes(&[1, 0, 2])?;
        let output = conv_transpose_1d(x, &weight, self.stride, self.padding)?;
        add_bias(output, self.bias.as_ref(), &[1, self.out_channels, 1])
    }

    /// Fold weight norm into the kernel. Idempotent.
    pub fn remove_weight_norm(&mut self) -> Result<()> {
        self.weight.remove_weight_norm()
    }
}

impl StateDict for WeightNormConvTranspose1d {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        self.weight.state_dict_into(prefix, out);
        bias_into(self.bias.as_ref(), prefix, out);
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        self.weight.load_state_dict_from(prefix, params)?;
        load_bias(&mut self.bias, prefix, params)
    }
}

/// Weight-normalized 2D convolution over `[batch, channels, height, width]`.
#[derive(Debug)]
pub struct WeightNormConv2d {
    /// Kernel, `[out_channels, in_channels, kh, kw]`.
    pub weight: WeightNormWeight,
    /// Bias.
    pub bias: Option<Param<Array>>,
    /// Output channels.
    pub out_channels: i32,
    /// (height, width) stride.
    pub stride: (i32, i32),
    /// (height, width) padding.
    pub padding: (i32, i32),
    /// (height, width) dilation.
    pub dilation: (i32, i32),
}

impl WeightNormConv2d {
    /// Create a new weight-normalized Conv2d with bias.
    pub fn new(
        in_channels: i32,
        out_channels: i32,
        kernel_size: (i32, i32),
        stride: (i32, i32),
        padding: (i32, i32),
        dilation: (i32, i32),
    ) -> Result<Self> {
        let weight = WeightNormWeight::kaiming_uniform(
            &[out_channels, in_channels, kernel_size.0, kernel_size.1],
            in_channels * kernel_size.0 * kernel_size.1,
        )?;
        Ok(Self {
            weight,
            bias: Some(Param::new(mlx_rs::ops::zeros::<f32>(&[out_channels])?)),
            out_channels,
            stride,
            padding,
            dilation,
        })
    }

    /// Forward pass, NCHW in and out.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let weight = self.weight.weight()?;
        let output = conv2d_nchw(x, &weight, self.stride, self.padding, self.dilation)?;
        add_bias(output, self.bias.as_ref(), &[1, self.out_channels, 1, 1])
    }

    /// Fold weight norm into the kernel. Idempotent.
    pub fn remove_weight_norm(&mut self) -> Result<()> {
        self.weight.remove_weight_norm()
    }
}

impl StateDict for WeightNormConv2d {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        self.weight.state_dict_into(prefix, out);
        bias_into(self.bias.as_ref(), prefix, out);
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        self.weight.load_state_dict_from(prefix, params)?;
        load_bias(&mut self.bias, prefix, params)
    }
}

/// Plain 2D convolution with bias, `weight`/`bias` in the state dict.
#[derive(Debug)]
pub struct Conv2d {
    /// Kernel, `[out_channels, in_channels, kh, kw]`.
    pub weight: Param<Array>,
    /// Bias.
    pub bias: Param<Array>,
    /// Output channels.
    pub out_channels: i32,
    /// (height, width) stride.
    pub stride: (i32, i32),
    /// (height, width) padding.
    pub padding: (i32, i32),
}

impl Conv2d {
    /// Weight and bias drawn from U(-1/sqrt(fan_in), 1/sqrt(fan_in)).
    pub fn new(
        in_channels: i32,
        out_channels: i32,
        kernel_size: (i32, i32),
        stride: (i32, i32),
        padding: (i32, i32),
    ) -> Result<Self> {
        let fan_in = in_channels * kernel_size.0 * kernel_size.1;
        let bound = (1.0 / fan_in as f32).sqrt();
        let shape = [out_channels, in_channels, kernel_size.0, kernel_size.1];
        Ok(Self {
            weight: Param::new(mlx_rs::random::uniform::<_, f32>(-bound, bound, &shape, None)?),
            bias: Param::new(mlx_rs::random::uniform::<_, f32>(
                -bound,
                bound,
                &[out_channels],
                None,
            )?),
            out_channels,
            stride,
            padding,
        })
    }

    /// Forward pass, NCHW in and out.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let output = conv2d_nchw(x, self.weight.as_ref(), self.stride, self.padding, (1, 1))?;
        add_bias(output, Some(&self.bias), &[1, self.out_channels, 1, 1])
    }
}

impl StateDict for Conv2d {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        out.insert(Rc::from(join(prefix, "weight")), self.weight.as_ref().clone());
        out.insert(Rc::from(join(prefix, "bias")), self.bias.as_ref().clone());
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        let weight = require(params, &join(prefix, "weight"))?;
        check_shape(prefix, self.weight.as_ref().shape(), weight)?;
        let bias = require(params, &join(prefix, "bias"))?;
        check_shape(prefix, self.bias.as_ref().shape(), bias)?;
        self.weight = Param::new(weight.clone());
        self.bias = Param::new(bias.clone());
        Ok(())
    }
}

// MLX conv2d is channels-last: input NHWC, weight OHWI.
fn conv2d_nchw(
    x: &Array,
    weight: &Array,
    stride: (i32, i32),
    padding: (i32, i32),
    dilation: (i32, i32),
) -> Result<Array> {
    let x_nhwc = x.transpose_axes(&[0, 2, 3, 1])?;
    let weight_ohwi = weight.transpose_axes(&[0, 2, 3, 1])?;
    let output = mlx_rs::ops::conv2d(&x_nhwc, &weight_ohwi, stride, padding, dilation, 1)?;
    Ok(output.transpose_axes(&[0, 3, 1, 2])?)
}

fn add_bias(output: Array, bias: Option<&Param<Array>>, shape: &[i32]) -> Result<Array> {
    match bias {
        Some(bias) => Ok(output.add(&bias.as_ref().reshape(shape)?)?),
        None => Ok(output),
    }
}

fn bias_into(bias: Option<&Param<Array>>, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
    if let Some(bias) = bias {
        out.insert(Rc::from(join(prefix, "bias")), bias.as_ref().clone());
    }
}

fn load_bias(
    bias: &mut Option<Param<Array>>,
    prefix: &str,
    params: &HashMap<Rc<str>, Array>,
) -> Result<()> {
    if let Some(bias) = bias {
        let value = require(params, &join(prefix, "bias"))?;
        check_shape(prefix, bias.as_ref().shape(), value)?;
        *bias = Param::new(value.clone());
    }
    Ok(())
}

pub(crate) fn require<'a>(params: &'a HashMap<Rc<str>, Array>, key: &str) -> Result<&'a Array> {
    params
        .get(key)
        .ok_or_else(|| VocoderError::WeightLoad(format!("missing parameter {key}")))
}

pub(crate) fn check_shape(name: &str, expected: &[i32], actual: &Array) -> Result<()> {
    if expected != actual.shape() {
        return Err(VocoderError::WeightLoad(format!(
            "{name}: expected shape {expected:?}, got {:?}",
            actual.shape()
        )));
    }
    Ok(())
}

/// Compute weight norm along all dims except first (output channels).
/// Returns shape [dim0, 1, ...] for broadcasting.
fn weight_norm(weight: &Array) -> Result<Array> {
    let axes: Vec<i32> = (1..weight.ndim() as i32).collect();
    let norm = weight.square()?.sum_axes(&axes, Some(true))?.sqrt()?;
    Ok(norm.add(Array::from_f32(1e-12))?)
}

/// Flip array along an axis by reversing the indices.
fn flip_axis(arr: &Array, axis: i32) -> Result<Array> {
    let axis_len = arr.dim(axis);
    let indices: Vec<i32> = (0..axis_len).rev().collect();
    let indices_arr = Array::from_slice(&indices, &[axis_len]);
    Ok(arr.take_axis(&indices_arr, axis)?)
}

/// Insert `stride - 1` zeros after every sample of `[batch, channels, length]`.
pub(crate) fn zero_insert(x: &Array, stride: i32) -> Result<Array> {
    if stride == 1 {
        return Ok(x.clone());
    }
    let (batch, channels, length) = (x.dim(0), x.dim(1), x.dim(2));
    let zeros = mlx_rs::ops::zeros::<f32>(&[batch, channels, length, stride - 1])?;
    let expanded = x.reshape(&[batch, channels, length, 1])?;
    let interleaved = mlx_rs::ops::concatenate_axis(&[&expanded, &zeros], -1)?;
    Ok(interleaved.reshape(&[batch, channels, length * stride])?)
}

/// Transposed 1D convolution as zero insertion followed by a correlation
/// with the flipped kernel.
///
/// Input is NCL, weight is `[out_channels, in_channels, kernel_size]`.
fn conv_transpose_1d(x: &Array, weight: &Array, stride: i32, padding: i32) -> Result<Array> {
    let in_length = x.dim(2);
    let kernel_size = weight.dim(2);

    // Trailing zeros after the last sample are not part of the transposed conv.
    let upsampled_length = (in_length - 1) * stride + 1;
    let upsampled = zero_insert(x, stride)?.index((.., .., ..upsampled_length));

    let conv_padding = kernel_size - 1 - padding;
    if conv_padding < 0 {
        return Err(VocoderError::Config(format!(
            "transposed conv padding {padding} exceeds kernel_size - 1"
        )));
    }

    let weight_flipped = flip_axis(weight, 2)?;
    let x_nlc = upsampled.transpose_axes(&[0, 2, 1])?;
    let weight_oki = weight_flipped.transpose_axes(&[0, 2, 1])?;
    let output = mlx_rs::ops::conv1d(&x_nlc, &weight_oki, 1, conv_padding, 1, 1)?;
    Ok(output.transpose_axes(&[0, 2, 1])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::to_host;

    #[test]
    fn test_get_padding() {
        assert_eq!(get_padding(3, 1), 1);
        assert_eq!(get_padding(5, 2), 4);
        assert_eq!(get_padding(11, 5), 25);
    }

    #[test]
    fn test_weight_norm_conv1d_shape() {
        let conv = WeightNormConv1d::new(4, 8, 3, None, Some(1), None, None).unwrap();
        let x = mlx_rs::random::normal::<f32>(&[2, 4, 16], None, None, None).unwrap();
        let y = conv.forward(&x).unwrap();
        y.eval().unwrap();
        assert_eq!(y.shape(), &[2, 8, 16]);
    }

    #[test]
    fn test_weight_norm_conv1d_dilated_keeps_length() {
        let conv = WeightNormConv1d::new(4, 4, 5, None, Some(get_padding(5, 3)), Some(3), Some(false))
            .unwrap();
        let x = mlx_rs::random::normal::<f32>(&[1, 4, 40], None, None, None).unwrap();
        let y = conv.forward(&x).unwrap();
        y.eval().unwrap();
        assert_eq!(y.shape(), &[1, 4, 40]);
        assert!(conv.bias.is_none());
    }

    #[test]
    fn test_remove_weight_norm_idempotent() {
        let mut conv = WeightNormConv1d::new(3, 5, 3, None, Some(1), None, None).unwrap();
        let x = mlx_rs::random::normal::<f32>(&[1, 3, 12], None, None, None).unwrap();
        let before = to_host(&conv.forward(&x).unwrap()).unwrap();

        conv.remove_weight_norm().unwrap();
        assert!(conv.weight.is_fused());
        conv.remove_weight_norm().unwrap();
        assert!(conv.weight.is_fused());

        let after = to_host(&conv.forward(&x).unwrap()).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_conv_transpose1d_shape() {
        let conv = WeightNormConvTranspose1d::new(8, 4, 4, 2, 1).unwrap();
        let x = mlx_rs::random::normal::<f32>(&[1, 8, 16], None, None, None).unwrap();
        let y = conv.forward(&x).unwrap();
        y.eval().unwrap();
        // (16-1)*2 - 2*1 + 4 = 32
        assert_eq!(y.shape(), &[1, 4, 32]);
        assert_eq!(conv.output_length(16), 32);
    }

    #[test]
    fn test_conv_transpose1d_upsample_8x() {
        // Generator stage: kernel 16, stride 8, padding (16 - 8) / 2.
        let conv = WeightNormConvTranspose1d::new(32, 16, 16, 8, 4).unwrap();
        let x = mlx_rs::random::normal::<f32>(&[1, 32, 8], None, None, None).unwrap();
        let y = conv.forward(&x).unwrap();
        y.eval().unwrap();
        assert_eq!(y.shape(), &[1, 16, 64]);
    }

    #[test]
    fn test_conv_transpose1d_matches_scatter() {
        // One channel, kernel [1, 2, 3], stride 2, no padding:
        // y[n] = sum_i x[i] * w[n - 2i]
        let mut conv = WeightNormConvTranspose1d::new(1, 1, 3, 2, 0).unwrap();
        let mut params = HashMap::new();
        params.insert(
            Rc::from("up.weight"),
            Array::from_slice(&[1.0f32, 2.0, 3.0], &[1, 1, 3]),
        );
        params.insert(Rc::from("up.bias"), Array::from_slice(&[0.0f32], &[1]));
        conv.load_state_dict_from("up", &params).unwrap();

        let x = Array::from_slice(&[1.0f32, 10.0], &[1, 1, 2]);
        let y = to_host(&conv.forward(&x).unwrap()).unwrap();
        assert_eq!(y, vec![1.0, 2.0, 13.0, 20.0, 30.0]);
    }

    #[test]
    fn test_conv2d_shape() {
        let conv = WeightNormConv2d::new(1, 4, (5, 1), (3, 1), (2, 0), (1, 1)).unwrap();
        let x = mlx_rs::random::normal::<f32>(&[2, 1, 30, 3], None, None, None).unwrap();
        let y = conv.forward(&x).unwrap();
        y.eval().unwrap();
        // (30 + 4 - 5) / 3 + 1 = 10
        assert_eq!(y.shape(), &[2, 4, 10, 3]);
    }

    #[test]
    fn test_state_dict_names() {
        let conv = WeightNormConv2d::new(2, 3, (3, 3), (1, 1), (1, 1), (1, 1)).unwrap();
        let mut out = HashMap::new();
        conv.state_dict_into("convs.0", &mut out);
        let mut keys: Vec<&str> = out.keys().map(|k| k.as_ref()).collect();
        keys.sort();
        assert_eq!(keys, vec!["convs.0.bias", "convs.0.weight_g", "convs.0.weight_v"]);
        assert_eq!(out["convs.0.weight_g"].shape(), &[3, 1, 1, 1]);
    }

    #[test]
    fn test_load_rejects_wrong_shape() {
        let mut conv = WeightNormConv1d::new(2, 2, 3, None, None, None, None).unwrap();
        let mut params = HashMap::new();
        params.insert(
            Rc::from("c.weight_v"),
            mlx_rs::ops::zeros::<f32>(&[2, 2, 5]).unwrap(),
        );
        params.insert(
            Rc::from("c.weight_g"),
            mlx_rs::ops::zeros::<f32>(&[2, 1, 1]).unwrap(),
        );
        let err = conv.load_state_dict_from("c", &params).unwrap_err();
        assert!(matches!(err, VocoderError::WeightLoad(_)));
    }

    #[test]
    fn test_load_rejects_wrong_gain_shape() {
        let mut conv = WeightNormConv1d::new(2, 2, 3, None, None, None, None).unwrap();
        let mut params = HashMap::new();
        params.insert(
            Rc::from("c.weight_v"),
            mlx_rs::ops::zeros::<f32>(&[2, 2, 3]).unwrap(),
        );
        params.insert(
            Rc::from("c.weight_g"),
            mlx_rs::ops::zeros::<f32>(&[4, 1, 1]).unwrap(),
        );
        params.insert(Rc::from("c.bias"), mlx_rs::ops::zeros::<f32>(&[2]).unwrap());
        let err = conv.load_state_dict_from("c", &params).unwrap_err();
        assert!(matches!(err, VocoderError::WeightLoad(_)));

        params.insert(
            Rc::from("c.weight_g"),
            mlx_rs::ops::ones::<f32>(&[2, 1, 1]).unwrap(),
        );
        conv.load_state_dict_from("c", &params).unwrap();
    }

    #[test]
    fn test_plain_conv2d() {
        let conv = Conv2d::new(2, 2, (3, 9), (1, 1), (1, 4)).unwrap();
        let x = mlx_rs::random::normal::<f32>(&[1, 2, 5, 12], None, None, None).unwrap();
        let y = conv.forward(&x).unwrap();
        assert_eq!(y.shape(), &[1, 2, 5, 12]);

        let mut out = HashMap::new();
        conv.state_dict_into("conv_pres.0", &mut out);
        let mut keys: Vec<&str> = out.keys().map(|k| k.as_ref()).collect();
        keys.sort();
        assert_eq!(keys, vec!["conv_pres.0.bias", "conv_pres.0.weight"]);

        let mut other = Conv2d::new(2, 2, (3, 9), (1, 1), (1, 4)).unwrap();
        other.load_state_dict_from("conv_pres.0", &out).unwrap();
        let z = other.forward(&x).unwrap();
        z.eval().unwrap();
        y.eval().unwrap();
        for (a, b) in z.as_slice::<f32>().iter().zip(y.as_slice::<f32>()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
