//! Sequential 1-D convolutional classifier loaded from a JSON artifact.
//!
//! Activations flow as `(length, channels)` matrices.  The forward pass keeps
//! every intermediate activation so the backward pass can push a one-hot
//! class gradient all the way back to the input.

use ndarray::{s, Array1, Array2, Array3, Axis, Zip};
use serde::{Deserialize, Serialize};

use super::ModelArtifact;
use crate::error::{InferenceError, LoadError, SaliencyError};

// ---------------------------------------------------------------------------
// Artifact file format
// ---------------------------------------------------------------------------

/// On-disk artifact.
///
/// ```json
/// {
///   "name": "fra_classifier",
///   "input_shape": [null, 256, 1],
///   "labels": ["healthy", "axial_shift"],
///   "layers": [
///     { "type": "conv1d", "kernel": [[[...]]], "bias": [...], "activation": "relu" },
///     { "type": "global_average_pool1d" },
///     { "type": "dense", "weights": [[...]], "bias": [...], "activation": "softmax" }
///   ]
/// }
/// ```
///
/// `input_shape` follows the `(batch, length, channels)` convention; a `null`
/// length marks a dynamic input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactFile {
    #[serde(default = "default_name")]
    pub name: String,
    pub input_shape: Vec<Option<usize>>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub layers: Vec<LayerSpec>,
}

fn default_name() -> String {
    "classifier".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Softmax,
}

/// One layer as written in the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    /// `kernel[k][in][out]`, same padding, stride 1.
    Conv1d {
        kernel: Vec<Vec<Vec<f64>>>,
        bias: Vec<f64>,
        #[serde(default)]
        activation: Activation,
    },
    /// Inference-mode batch normalisation.
    BatchNorm {
        gamma: Vec<f64>,
        beta: Vec<f64>,
        moving_mean: Vec<f64>,
        moving_variance: Vec<f64>,
        #[serde(default = "default_bn_epsilon")]
        epsilon: f64,
    },
    /// Non-overlapping max pooling, trailing remainder dropped.
    MaxPool1d { size: usize },
    GlobalAveragePool1d,
    /// Identity at inference time.
    Dropout {
        #[serde(default)]
        rate: f64,
    },
    /// `weights[in][out]`, applied to every row.
    Dense {
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
        #[serde(default)]
        activation: Activation,
    },
}

fn default_bn_epsilon() -> f64 {
    1e-3
}

// ---------------------------------------------------------------------------
// Compiled network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Layer {
    Conv1d {
        kernel: Array3<f64>,
        bias: Array1<f64>,
        activation: Activation,
    },
    Affine {
        scale: Array1<f64>,
        shift: Array1<f64>,
    },
    MaxPool1d {
        size: usize,
    },
    GlobalAveragePool1d,
    Identity,
    Dense {
        weights: Array2<f64>,
        bias: Array1<f64>,
        activation: Activation,
    },
}

/// A validated, ready-to-run classifier.
#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    input_length: Option<usize>,
    labels: Vec<String>,
    classes: usize,
    layers: Vec<Layer>,
}

impl Network {
    /// Validate shapes layer by layer and compile to dense arrays.
    pub fn from_artifact(file: ArtifactFile) -> Result<Self, LoadError> {
        let incompatible = |msg: String| LoadError::Incompatible(msg);

        let input_length = match file.input_shape.as_slice() {
            [_, length, Some(1)] => *length,
            [_, _, channels] => {
                return Err(incompatible(format!(
                    "expected 1 input channel, artifact declares {channels:?}"
                )))
            }
            other => {
                return Err(incompatible(format!(
                    "input_shape must be [batch, length, channels], got {other:?}"
                )))
            }
        };
        if input_length == Some(0) {
            return Err(incompatible("declared input length is zero".into()));
        }

        let mut channels = 1usize;
        let mut layers = Vec::with_capacity(file.layers.len());

        for (idx, spec) in file.layers.into_iter().enumerate() {
            let layer = match spec {
                LayerSpec::Conv1d {
                    kernel,
                    bias,
                    activation,
                } => {
                    let k = kernel.len();
                    let out = bias.len();
                    if k == 0 || out == 0 {
                        return Err(incompatible(format!("layer {idx}: empty conv1d kernel")));
                    }
                    let mut flat = Vec::with_capacity(k * channels * out);
                    for tap in &kernel {
                        if tap.len() != channels {
                            return Err(incompatible(format!(
                                "layer {idx}: conv1d expects {channels} input channels, kernel has {}",
                                tap.len()
                            )));
                        }
                        for row in tap {
                            if row.len() != out {
                                return Err(incompatible(format!(
                                    "layer {idx}: conv1d kernel width {} != bias length {out}",
                                    row.len()
                                )));
                            }
                            flat.extend_from_slice(row);
                        }
                    }
                    let kernel = Array3::from_shape_vec((k, channels, out), flat)
                        .map_err(|e| incompatible(format!("layer {idx}: {e}")))?;
                    channels = out;
                    Layer::Conv1d {
                        kernel,
                        bias: Array1::from(bias),
                        activation,
                    }
                }
                LayerSpec::BatchNorm {
                    gamma,
                    beta,
                    moving_mean,
                    moving_variance,
                    epsilon,
                } => {
                    if [gamma.len(), beta.len(), moving_mean.len(), moving_variance.len()]
                        .iter()
                        .any(|&n| n != channels)
                    {
                        return Err(incompatible(format!(
                            "layer {idx}: batch_norm parameters must have {channels} entries"
                        )));
                    }
                    let mut scale = Array1::zeros(channels);
                    let mut shift = Array1::zeros(channels);
                    for c in 0..channels {
                        let denom = (moving_variance[c] + epsilon).sqrt();
                        if !(denom.is_finite() && denom > 0.0) {
                            return Err(incompatible(format!(
                                "layer {idx}: non-positive batch_norm variance"
                            )));
                        }
                        scale[c] = gamma[c] / denom;
                        shift[c] = beta[c] - moving_mean[c] * scale[c];
                    }
                    Layer::Affine { scale, shift }
                }
                LayerSpec::MaxPool1d { size } => {
                    if size == 0 {
                        return Err(incompatible(format!("layer {idx}: pool size is zero")));
                    }
                    Layer::MaxPool1d { size }
                }
                LayerSpec::GlobalAveragePool1d => Layer::GlobalAveragePool1d,
                LayerSpec::Dropout { .. } => Layer::Identity,
                LayerSpec::Dense {
                    weights,
                    bias,
                    activation,
                } => {
                    let out = bias.len();
                    if weights.len() != channels || out == 0 {
                        return Err(incompatible(format!(
                            "layer {idx}: dense expects {channels} inputs, weights have {} rows",
                            weights.len()
                        )));
                    }
                    let mut flat = Vec::with_capacity(channels * out);
                    for row in &weights {
                        if row.len() != out {
                            return Err(incompatible(format!(
                                "layer {idx}: dense row width {} != bias length {out}",
                                row.len()
                            )));
                        }
                        flat.extend_from_slice(row);
                    }
                    let weights = Array2::from_shape_vec((channels, out), flat)
                        .map_err(|e| incompatible(format!("layer {idx}: {e}")))?;
                    channels = out;
                    Layer::Dense {
                        weights,
                        bias: Array1::from(bias),
                        activation,
                    }
                }
            };
            layers.push(layer);
        }

        let head = layers.iter().rev().find(|l| !matches!(l, Layer::Identity));
        if !matches!(
            head,
            Some(Layer::Dense {
                activation: Activation::Softmax,
                ..
            })
        ) {
            return Err(incompatible("classifier must end in a softmax dense layer".into()));
        }
        if !file.labels.is_empty() && file.labels.len() != channels {
            return Err(incompatible(format!(
                "{} labels for {channels} classes",
                file.labels.len()
            )));
        }

        Ok(Network {
            name: file.name,
            input_length,
            labels: file.labels,
            classes: channels,
            layers,
        })
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    /// Run every layer, returning the input followed by each layer's output.
    fn trace(&self, input: &[f64]) -> Result<Vec<Array2<f64>>, InferenceError> {
        if input.is_empty() {
            return Err(InferenceError::EmptyInput);
        }
        if let Some(expected) = self.input_length {
            if input.len() != expected {
                return Err(InferenceError::InputLength {
                    expected,
                    actual: input.len(),
                });
            }
        }
        let x = Array2::from_shape_vec((input.len(), 1), input.to_vec()).map_err(|e| {
            InferenceError::Shape {
                layer: 0,
                reason: e.to_string(),
            }
        })?;

        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(x);
        for (idx, layer) in self.layers.iter().enumerate() {
            let prev = &acts[acts.len() - 1];
            let next = layer
                .forward(prev)
                .map_err(|reason| InferenceError::Shape { layer: idx, reason })?;
            acts.push(next);
        }
        Ok(acts)
    }
}

impl ModelArtifact for Network {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_length(&self) -> Option<usize> {
        self.input_length
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn class_count(&self) -> Option<usize> {
        Some(self.classes)
    }

    fn forward(&self, input: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let acts = self.trace(input)?;
        let out = &acts[acts.len() - 1];
        if out.nrows() != 1 {
            return Err(InferenceError::Shape {
                layer: self.layers.len(),
                reason: format!("output has {} rows; missing global pooling?", out.nrows()),
            });
        }
        let probs = out.row(0).to_vec();
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(InferenceError::NonFinite);
        }
        Ok(probs)
    }

    fn gradient(&self, input: &[f64], class_index: usize) -> Result<Vec<f64>, SaliencyError> {
        let acts = self.trace(input)?;
        let out = &acts[acts.len() - 1];
        if class_index >= out.ncols() {
            return Err(SaliencyError::ClassOutOfRange {
                index: class_index,
                classes: out.ncols(),
            });
        }

        let mut grad = Array2::<f64>::zeros(out.raw_dim());
        grad[[0, class_index]] = 1.0;
        for (idx, layer) in self.layers.iter().enumerate().rev() {
            grad = layer.backward(&acts[idx], &acts[idx + 1], &grad);
        }
        Ok(grad.column(0).to_vec())
    }
}

// ---------------------------------------------------------------------------
// Layer kernels
// ---------------------------------------------------------------------------

impl Layer {
    fn forward(&self, x: &Array2<f64>) -> Result<Array2<f64>, String> {
        let (len, channels) = x.dim();
        match self {
            Layer::Conv1d {
                kernel,
                bias,
                activation,
            } => {
                check_channels(kernel.dim().1, channels)?;
                let k = kernel.dim().0;
                let pad = (k - 1) / 2;
                let mut z = Array2::zeros((len, kernel.dim().2));
                z += bias;
                for j in 0..k {
                    let proj = x.dot(&kernel.index_axis(Axis(0), j));
                    for t in 0..len {
                        if let Some(src) = (t + j).checked_sub(pad).filter(|&s| s < len) {
                            let mut row = z.row_mut(t);
                            row += &proj.row(src);
                        }
                    }
                }
                Ok(activation.apply(z))
            }
            Layer::Affine { scale, shift } => {
                check_channels(scale.len(), channels)?;
                Ok(x * scale + shift)
            }
            Layer::MaxPool1d { size } => {
                let rows = len / size;
                if rows == 0 {
                    return Err(format!("pool size {size} exceeds length {len}"));
                }
                let mut y = Array2::zeros((rows, channels));
                for t in 0..rows {
                    let window = x.slice(s![t * size..(t + 1) * size, ..]);
                    for c in 0..channels {
                        y[[t, c]] = window
                            .column(c)
                            .iter()
                            .copied()
                            .fold(f64::NEG_INFINITY, f64::max);
                    }
                }
                Ok(y)
            }
            Layer::GlobalAveragePool1d => x
                .mean_axis(Axis(0))
                .map(|m| m.insert_axis(Axis(0)))
                .ok_or_else(|| "cannot pool an empty sequence".to_string()),
            Layer::Identity => Ok(x.clone()),
            Layer::Dense {
                weights,
                bias,
                activation,
            } => {
                check_channels(weights.nrows(), channels)?;
                Ok(activation.apply(x.dot(weights) + bias))
            }
        }
    }

    /// Gradient with respect to `x`, given the layer's input `x`, output `y`
    /// and the gradient `grad_y` arriving from above.
    fn backward(&self, x: &Array2<f64>, y: &Array2<f64>, grad_y: &Array2<f64>) -> Array2<f64> {
        let len = x.nrows();
        match self {
            Layer::Conv1d {
                kernel, activation, ..
            } => {
                let gz = activation.backward(y, grad_y);
                let k = kernel.dim().0;
                let pad = (k - 1) / 2;
                let mut gx = Array2::zeros(x.raw_dim());
                for j in 0..k {
                    let back = gz.dot(&kernel.index_axis(Axis(0), j).t());
                    for t in 0..len {
                        if let Some(src) = (t + j).checked_sub(pad).filter(|&s| s < len) {
                            let mut row = gx.row_mut(src);
                            row += &back.row(t);
                        }
                    }
                }
                gx
            }
            Layer::Affine { scale, .. } => grad_y * scale,
            Layer::MaxPool1d { size } => {
                let mut gx = Array2::zeros(x.raw_dim());
                for ((t, c), &g) in grad_y.indexed_iter() {
                    let start = t * size;
                    let window = x.slice(s![start..start + size, c]);
                    let best = window
                        .iter()
                        .enumerate()
                        .fold((0, f64::NEG_INFINITY), |acc, (i, &v)| {
                            if v > acc.1 {
                                (i, v)
                            } else {
                                acc
                            }
                        })
                        .0;
                    gx[[start + best, c]] += g;
                }
                gx
            }
            Layer::GlobalAveragePool1d => {
                let share = grad_y.row(0).mapv(|g| g / len as f64);
                share
                    .broadcast(x.raw_dim())
                    .map(|b| b.to_owned())
                    .unwrap_or_else(|| Array2::zeros(x.raw_dim()))
            }
            Layer::Identity => grad_y.clone(),
            Layer::Dense {
                weights,
                activation,
                ..
            } => activation.backward(y, grad_y).dot(&weights.t()),
        }
    }
}

fn check_channels(expected: usize, actual: usize) -> Result<(), String> {
    if expected != actual {
        return Err(format!("expected {expected} channels, got {actual}"));
    }
    Ok(())
}

impl Activation {
    fn apply(self, mut z: Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Linear => z,
            Activation::Relu => {
                z.mapv_inplace(|v| v.max(0.0));
                z
            }
            Activation::Softmax => {
                for mut row in z.rows_mut() {
                    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|v| v / sum);
                }
                z
            }
        }
    }

    /// Gradient with respect to the pre-activation, given the activation
    /// output `y`.
    fn backward(self, y: &Array2<f64>, grad_y: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Linear => grad_y.clone(),
            Activation::Relu => {
                let mut gz = grad_y.clone();
                Zip::from(&mut gz).and(y).for_each(|g, &out| {
                    if out <= 0.0 {
                        *g = 0.0;
                    }
                });
                gz
            }
            Activation::Softmax => {
                let mut gz = Array2::zeros(y.raw_dim());
                for ((mut gz_row, y_row), g_row) in gz
                    .rows_mut()
                    .into_iter()
                    .zip(y.rows())
                    .zip(grad_y.rows())
                {
                    let inner = y_row.dot(&g_row);
                    Zip::from(&mut gz_row)
                        .and(&y_row)
                        .and(&g_row)
                        .for_each(|out, &p, &g| *out = p * (g - inner));
                }
                gz
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two-class network: conv(k=3) → relu → batch_norm → max_pool(2) →
    /// gap → dropout → dense softmax.
    pub(crate) fn small_artifact(input_length: Option<usize>) -> ArtifactFile {
        serde_json::from_value(serde_json::json!({
            "name": "test_classifier",
            "input_shape": [null, input_length, 1],
            "labels": ["healthy", "faulty"],
            "layers": [
                {
                    "type": "conv1d",
                    "kernel": [[[0.5, -0.2]], [[1.0, 0.3]], [[-0.4, 0.8]]],
                    "bias": [0.1, 0.05],
                    "activation": "relu"
                },
                {
                    "type": "batch_norm",
                    "gamma": [1.2, 0.9],
                    "beta": [0.0, 0.1],
                    "moving_mean": [0.1, 0.2],
                    "moving_variance": [1.0, 0.5]
                },
                { "type": "max_pool1d", "size": 2 },
                { "type": "global_average_pool1d" },
                { "type": "dropout", "rate": 0.4 },
                {
                    "type": "dense",
                    "weights": [[1.5, -1.0], [-0.7, 2.0]],
                    "bias": [0.0, -0.1],
                    "activation": "softmax"
                }
            ]
        }))
        .unwrap()
    }

    fn linear_artifact() -> ArtifactFile {
        serde_json::from_value(serde_json::json!({
            "input_shape": [null, null, 1],
            "layers": [
                { "type": "conv1d", "kernel": [[[1.0]], [[2.0]], [[3.0]]], "bias": [0.0] },
                { "type": "global_average_pool1d" },
                { "type": "dense", "weights": [[1.0, -1.0]], "bias": [0.0, 0.0], "activation": "softmax" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn parses_and_reports_shape() {
        let net = Network::from_artifact(small_artifact(Some(8))).unwrap();
        assert_eq!(net.input_length(), Some(8));
        assert_eq!(net.classes(), 2);
        assert_eq!(net.class_count(), Some(2));
        assert_eq!(net.labels(), &["healthy".to_string(), "faulty".to_string()]);
        assert_eq!(net.name(), "test_classifier");

        let dynamic = Network::from_artifact(small_artifact(None)).unwrap();
        assert_eq!(dynamic.input_length(), None);
    }

    #[test]
    fn forward_is_a_distribution() {
        let net = Network::from_artifact(small_artifact(Some(8))).unwrap();
        let probs = net
            .forward(&[0.1, -0.3, 0.8, 1.2, -0.5, 0.0, 0.4, -1.0])
            .unwrap();
        assert_eq!(probs.len(), 2);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs.iter().all(|&p| p > 0.0));
    }

    #[test]
    fn same_padding_convolution() {
        // Input [1, 0, 0, 0] with taps [1, 2, 3]: outputs [2, 1, 0, 0] (mean 0.75).
        let net = Network::from_artifact(linear_artifact()).unwrap();
        let acts = net.trace(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(acts[1].column(0).to_vec(), vec![2.0, 1.0, 0.0, 0.0]);
        assert!((acts[2][[0, 0]] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let net = Network::from_artifact(small_artifact(Some(8))).unwrap();
        let input = [0.1, -0.3, 0.8, 1.2, -0.5, 0.05, 0.4, -1.0];
        for class in 0..2 {
            let grad = net.gradient(&input, class).unwrap();
            assert_eq!(grad.len(), input.len());
            let h = 1e-6;
            for i in 0..input.len() {
                let mut up = input;
                let mut down = input;
                up[i] += h;
                down[i] -= h;
                let numeric = (net.forward(&up).unwrap()[class]
                    - net.forward(&down).unwrap()[class])
                    / (2.0 * h);
                assert!(
                    (numeric - grad[i]).abs() < 1e-5,
                    "class {class} position {i}: analytic {} vs numeric {numeric}",
                    grad[i]
                );
            }
        }
    }

    #[test]
    fn rejects_bad_artifacts() {
        let mut bad = small_artifact(Some(8));
        bad.input_shape = vec![None, Some(8), Some(2)];
        assert!(matches!(
            Network::from_artifact(bad),
            Err(LoadError::Incompatible(_))
        ));

        let mut bad = small_artifact(Some(8));
        bad.layers.truncate(5);
        assert!(Network::from_artifact(bad).is_err());

        let mut bad = small_artifact(Some(8));
        bad.labels.push("extra".into());
        assert!(Network::from_artifact(bad).is_err());

        let mut bad = small_artifact(Some(8));
        if let LayerSpec::Dense { weights, .. } = &mut bad.layers[5] {
            weights.pop();
        }
        assert!(Network::from_artifact(bad).is_err());
    }

    #[test]
    fn input_length_is_enforced() {
        let net = Network::from_artifact(small_artifact(Some(8))).unwrap();
        assert!(matches!(
            net.forward(&[0.0; 4]),
            Err(InferenceError::InputLength {
                expected: 8,
                actual: 4
            })
        ));
        assert!(matches!(
            net.gradient(&[0.0; 8], 2),
            Err(SaliencyError::ClassOutOfRange { index: 2, classes: 2 })
        ));
    }
}
