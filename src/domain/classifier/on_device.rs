//! In-process dense network evaluated with nalgebra.
//!
//! Model file format (JSON):
//!
//! ```text
//! { "layers": [ { "weights": [[..in..] ..out..], "bias": [..out..],
//!                 "activation": "relu" | "tanh" | "sigmoid" | "softmax" | "linear" } ] }
//! ```

use super::InferenceBackend;
use crate::domain::gesture::{GestureSeries, SERIES_LEN};
use crate::domain::spells::SPELL_NAMES;
use crate::error::ClassifierError;
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

const INPUT_LEN: usize = SERIES_LEN * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
    Softmax,
    Linear,
}

impl Activation {
    fn apply(&self, mut v: DVector<f32>) -> DVector<f32> {
        match self {
            Self::Relu => v.apply(|x| *x = x.max(0.0)),
            Self::Tanh => v.apply(|x| *x = x.tanh()),
            Self::Sigmoid => v.apply(|x| *x = 1.0 / (1.0 + (-*x).exp())),
            Self::Linear => {}
            Self::Softmax => {
                let max = v.max();
                v.apply(|x| *x = (*x - max).exp());
                let sum = v.sum();
                if sum > 0.0 {
                    v /= sum;
                }
            }
        }
        v
    }
}

#[derive(Debug, Deserialize)]
struct LayerSpec {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    activation: Activation,
}

#[derive(Debug, Deserialize)]
struct ModelSpec {
    layers: Vec<LayerSpec>,
}

#[derive(Debug)]
struct DenseLayer {
    weights: DMatrix<f32>,
    bias: DVector<f32>,
    activation: Activation,
}

/// Feed-forward classifier loaded once at construction.
#[derive(Debug)]
pub struct OnDeviceBackend {
    layers: Vec<DenseLayer>,
}

impl OnDeviceBackend {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let backend = Self::from_json(&json)?;
        info!(
            "Loaded on-device model {} ({} layers)",
            path.display(),
            backend.layers.len()
        );
        Ok(backend)
    }

    pub fn from_json(json: &str) -> Result<Self, ClassifierError> {
        let file: ModelSpec = serde_json::from_str(json)
            .map_err(|e| ClassifierError::Model(format!("invalid model file: {}", e)))?;
        if file.layers.is_empty() {
            return Err(ClassifierError::Model("model has no layers".into()));
        }

        let mut inputs = INPUT_LEN;
        let mut layers = Vec::with_capacity(file.layers.len());
        for (i, layer) in file.layers.into_iter().enumerate() {
            let outputs = layer.weights.len();
            if outputs == 0 || layer.bias.len() != outputs {
                return Err(ClassifierError::Model(format!(
                    "layer {}: {} weight rows but {} biases",
                    i,
                    outputs,
                    layer.bias.len()
                )));
            }
            if let Some(row) = layer.weights.iter().find(|row| row.len() != inputs) {
                return Err(ClassifierError::Model(format!(
                    "layer {}: expected {} inputs, found a row of {}",
                    i,
                    inputs,
                    row.len()
                )));
            }

            let weights = DMatrix::from_row_iterator(
                outputs,
                inputs,
                layer.weights.into_iter().flatten(),
            );
            layers.push(DenseLayer {
                weights,
                bias: DVector::from_vec(layer.bias),
                activation: layer.activation,
            });
            inputs = outputs;
        }

        if inputs != SPELL_NAMES.len() {
            return Err(ClassifierError::Model(format!(
                "model has {} outputs, vocabulary has {}",
                inputs,
                SPELL_NAMES.len()
            )));
        }

        Ok(Self { layers })
    }

    /// Run the network on a flattened (50, 2) series.
    pub fn evaluate(&self, input: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        if input.len() != INPUT_LEN {
            return Err(ClassifierError::Model(format!(
                "expected {} inputs, got {}",
                INPUT_LEN,
                input.len()
            )));
        }

        let output = self
            .layers
            .iter()
            .fold(DVector::from_column_slice(input), |x, layer| {
                layer.activation.apply(&layer.weights * x + &layer.bias)
            });
        Ok(output.iter().copied().collect())
    }
}

impl InferenceBackend for OnDeviceBackend {
    fn name(&self) -> &'static str {
        "on-device"
    }

    async fn check_connectivity(&self) -> bool {
        true
    }

    async fn initialize(&self) -> Result<(), ClassifierError> {
        Ok(())
    }

    async fn infer(&self, series: &GestureSeries) -> Result<Vec<f32>, ClassifierError> {
        self.evaluate(&series.flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Single softmax layer whose logits favour `target` by x0 of the input.
    fn one_layer_model(target: usize, gain: f32) -> String {
        let classes = SPELL_NAMES.len();
        let weights: Vec<Vec<f32>> = (0..classes)
            .map(|c| {
                let mut row = vec![0.0; INPUT_LEN];
                if c == target {
                    row[0] = gain;
                }
                row
            })
            .collect();
        json!({
            "layers": [{
                "weights": weights,
                "bias": vec![0.0; classes],
                "activation": "softmax"
            }]
        })
        .to_string()
    }

    #[test]
    fn test_evaluate_softmax_peaks_on_target() {
        let backend = OnDeviceBackend::from_json(&one_layer_model(10, 50.0)).unwrap();
        let mut input = vec![0.0; INPUT_LEN];
        input[0] = 1.0;

        let probabilities = backend.evaluate(&input).unwrap();
        assert_eq!(probabilities.len(), SPELL_NAMES.len());
        assert!((probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert!(probabilities[10] > 0.99);

        // A zero input spreads probability evenly
        let flat = backend.evaluate(&vec![0.0; INPUT_LEN]).unwrap();
        assert!(flat.iter().all(|p| (p - 1.0 / 73.0).abs() < 1e-5));
    }

    #[test]
    fn test_hidden_layer_shapes_chain() {
        let hidden = 4;
        let classes = SPELL_NAMES.len();
        let model = json!({
            "layers": [
                {
                    "weights": vec![vec![0.01; INPUT_LEN]; hidden],
                    "bias": vec![0.0; hidden],
                    "activation": "relu"
                },
                {
                    "weights": vec![vec![0.5; hidden]; classes],
                    "bias": vec![0.0; classes],
                    "activation": "sigmoid"
                }
            ]
        });
        let backend = OnDeviceBackend::from_json(&model.to_string()).unwrap();
        let output = backend.evaluate(&vec![1.0; INPUT_LEN]).unwrap();
        // relu(1.0) per hidden unit, then sigmoid(4 * 0.5)
        let expected = 1.0 / (1.0 + (-2.0f32).exp());
        assert!(output.iter().all(|p| (p - expected).abs() < 1e-5));
    }

    #[test]
    fn test_rejects_malformed_models() {
        assert!(matches!(
            OnDeviceBackend::from_json("{\"layers\": []}"),
            Err(ClassifierError::Model(_))
        ));
        assert!(OnDeviceBackend::from_json("not json").is_err());

        let wrong_inputs = json!({
            "layers": [{ "weights": [[1.0, 2.0]], "bias": [0.0], "activation": "linear" }]
        });
        assert!(OnDeviceBackend::from_json(&wrong_inputs.to_string()).is_err());

        let wrong_outputs = json!({
            "layers": [{
                "weights": vec![vec![0.0; INPUT_LEN]; 3],
                "bias": [0.0, 0.0, 0.0],
                "activation": "softmax"
            }]
        });
        assert!(OnDeviceBackend::from_json(&wrong_outputs.to_string()).is_err());
    }

    #[test]
    fn test_evaluate_checks_input_length() {
        let backend = OnDeviceBackend::from_json(&one_layer_model(0, 1.0)).unwrap();
        assert!(backend.evaluate(&[0.0; 3]).is_err());
    }
}
