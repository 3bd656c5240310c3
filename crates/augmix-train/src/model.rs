//! Model interface for training on image batches.

use crate::{TrainError, TrainResult};
use scirs2_core::ndarray::{Array, Array2, ArrayView2, ArrayView4, Axis, Ix2};
use scirs2_core::random::{SeedableRng, StdRng};
use std::collections::HashMap;

/// Trait for trainable image classifiers.
///
/// `forward` maps an `N × H × W × C` batch to an `N × K` matrix of class
/// probabilities (rows sum to one). `backward` receives the gradient of the
/// loss with respect to those probabilities and returns a gradient for every
/// parameter.
pub trait Model {
    /// Perform a forward pass.
    fn forward(&self, input: &ArrayView4<f64>) -> TrainResult<Array2<f64>>;

    /// Perform a backward pass to compute gradients.
    ///
    /// # Arguments
    /// * `input` - Batch used in the forward pass
    /// * `grad_output` - Gradient of loss with respect to the output probabilities
    fn backward(
        &self,
        input: &ArrayView4<f64>,
        grad_output: &ArrayView2<f64>,
    ) -> TrainResult<HashMap<String, Array<f64, Ix2>>>;

    /// Get a reference to the model's parameters.
    fn parameters(&self) -> &HashMap<String, Array<f64, Ix2>>;

    /// Get a mutable reference to the model's parameters.
    fn parameters_mut(&mut self) -> &mut HashMap<String, Array<f64, Ix2>>;

    /// Set the model's parameters.
    fn set_parameters(&mut self, parameters: HashMap<String, Array<f64, Ix2>>);

    /// Get the number of parameters in the model.
    fn num_parameters(&self) -> usize {
        self.parameters().values().map(|p| p.len()).sum()
    }

    /// Save model state to a dictionary.
    fn state_dict(&self) -> HashMap<String, Vec<f64>> {
        self.parameters()
            .iter()
            .map(|(name, param)| (name.clone(), param.iter().copied().collect()))
            .collect()
    }

    /// Load model state from a dictionary.
    fn load_state_dict(&mut self, state: HashMap<String, Vec<f64>>) -> TrainResult<()> {
        let parameters = self.parameters_mut();

        for (name, values) in state {
            let param = parameters.get_mut(&name).ok_or_else(|| {
                TrainError::InvalidParameter(format!("Parameter '{}' not found in model", name))
            })?;
            if param.len() != values.len() {
                return Err(TrainError::InvalidParameter(format!(
                    "Parameter '{}' size mismatch: expected {}, got {}",
                    name,
                    param.len(),
                    values.len()
                )));
            }
            for (p, v) in param.iter_mut().zip(values) {
                *p = v;
            }
        }

        Ok(())
    }
}

/// Row-wise softmax with max subtraction.
pub fn softmax(logits: &ArrayView2<f64>) -> Array2<f64> {
    let mut out = logits.to_owned();
    for mut row in out.rows_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|z| (z - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|e| e / sum);
    }
    out
}

/// Flatten → linear → softmax classifier.
///
/// A minimal reference model; real architectures plug in through [`Model`].
#[derive(Debug, Clone)]
pub struct SoftmaxClassifier {
    parameters: HashMap<String, Array<f64, Ix2>>,
    input_dim: usize,
    num_classes: usize,
}

impl SoftmaxClassifier {
    /// Create a classifier for `img_size × img_size × channels` images.
    ///
    /// Weights use seeded Xavier/Glorot uniform initialization; biases start at zero.
    pub fn new(img_size: usize, channels: usize, num_classes: usize, seed: u64) -> TrainResult<Self> {
        let input_dim = img_size * img_size * channels;
        if input_dim == 0 || num_classes < 2 {
            return Err(TrainError::ModelError(format!(
                "invalid classifier shape: input_dim {}, num_classes {}",
                input_dim, num_classes
            )));
        }

        let limit = (6.0 / (input_dim + num_classes) as f64).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);
        let weights = Array2::from_shape_fn((input_dim, num_classes), |_| {
            rng.random_range(-limit..limit)
        });
        let biases = Array2::zeros((1, num_classes));

        let mut parameters = HashMap::new();
        parameters.insert("weight".to_string(), weights);
        parameters.insert("bias".to_string(), biases);

        Ok(Self {
            parameters,
            input_dim,
            num_classes,
        })
    }

    /// Flattened input dimension.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn flatten(&self, input: &ArrayView4<f64>) -> TrainResult<Array2<f64>> {
        let n = input.len_of(Axis(0));
        let per_image: usize = input.shape()[1..].iter().product();
        if per_image != self.input_dim {
            return Err(TrainError::ModelError(format!(
                "expected {} values per image, got {} (shape {:?})",
                self.input_dim,
                per_image,
                input.shape()
            )));
        }
        let flat: Vec<f64> = input.iter().copied().collect();
        Array2::from_shape_vec((n, per_image), flat)
            .map_err(|e| TrainError::ModelError(e.to_string()))
    }

    fn param(&self, name: &str) -> TrainResult<&Array<f64, Ix2>> {
        self.parameters
            .get(name)
            .ok_or_else(|| TrainError::ModelError(format!("{} not found", name)))
    }
}

impl Model for SoftmaxClassifier {
    fn forward(&self, input: &ArrayView4<f64>) -> TrainResult<Array2<f64>> {
        let x = self.flatten(input)?;
        let logits = x.dot(self.param("weight")?) + self.param("bias")?;
        Ok(softmax(&logits.view()))
    }

    fn backward(
        &self,
        input: &ArrayView4<f64>,
        grad_output: &ArrayView2<f64>,
    ) -> TrainResult<HashMap<String, Array<f64, Ix2>>> {
        let x = self.flatten(input)?;
        if grad_output.dim() != (x.nrows(), self.num_classes) {
            return Err(TrainError::ModelError(format!(
                "gradient shape {:?} does not match output ({}, {})",
                grad_output.shape(),
                x.nrows(),
                self.num_classes
            )));
        }

        let logits = x.dot(self.param("weight")?) + self.param("bias")?;
        let probs = softmax(&logits.view());

        // Softmax Jacobian: dz = p ⊙ (g − ⟨g, p⟩)
        let mut grad_logits = grad_output.to_owned();
        for (mut g, p) in grad_logits.rows_mut().into_iter().zip(probs.rows()) {
            let inner = g.dot(&p);
            g.zip_mut_with(&p, |gi, &pi| *gi = pi * (*gi - inner));
        }

        let mut gradients = HashMap::new();
        gradients.insert("weight".to_string(), x.t().dot(&grad_logits));
        gradients.insert(
            "bias".to_string(),
            grad_logits.sum_axis(Axis(0)).insert_axis(Axis(0)),
        );
        Ok(gradients)
    }

    fn parameters(&self) -> &HashMap<String, Array<f64, Ix2>> {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut HashMap<String, Array<f64, Ix2>> {
        &mut self.parameters
    }

    fn set_parameters(&mut self, parameters: HashMap<String, Array<f64, Ix2>>) {
        self.parameters = parameters;
    }
}
