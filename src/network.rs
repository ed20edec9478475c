//! Sequential network: a chain of layers closed by a loss layer.
//!
//! Lifecycle: layers are added with [`Network::add`], wired once by
//! [`Network::compile`] (shape inference, buffer allocation, weight
//! initialization), then trained with [`Network::fit`] or used for
//! [`Network::predict`] / [`Network::evaluate`].

use crate::dataset::{BatchIndices, Dataset};
use crate::error::{NnError, Result};
use crate::layers::{ActivationKind, Layer, LossKind, OutputLayer};
use crate::optimizers::Sgd;
use crate::report::{EpochStats, Evaluation, Reporter};
use crate::tensor::{Shape, Tensor};
use crate::utils::SeededRng;
use log::{debug, info, warn};
use std::time::Instant;

/// Fraction of predictions that differ from the labels.
pub fn calc_error(predictions: &[usize], labels: &[usize]) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }
    let wrong = predictions
        .iter()
        .zip(labels)
        .filter(|(p, l)| p != l)
        .count();
    wrong as f32 / labels.len() as f32
}

fn is_softmax(layer: &dyn Layer) -> bool {
    layer.name() == ActivationKind::Softmax.name()
}

/// Checks that the final activation suits `loss`.
///
/// Softmax passes the loss delta straight through. It must be the last
/// layer, and a trailing softmax pairs exactly with cross-entropy.
pub fn check_loss_pairing(layers: &[Box<dyn Layer>], loss: LossKind) -> Result<()> {
    let last = layers.len().saturating_sub(1);
    if let Some(i) = layers[..last].iter().position(|l| is_softmax(l.as_ref())) {
        return Err(NnError::config(format!(
            "layer {} (softmax) must be the last layer",
            i
        )));
    }
    let ends_in_softmax = layers.last().map_or(false, |l| is_softmax(l.as_ref()));
    match loss {
        LossKind::CrossEntropy if !ends_in_softmax => Err(NnError::config(
            "cross_entropy loss needs a softmax as the last layer",
        )),
        LossKind::Mse if ends_in_softmax => Err(NnError::config(
            "mse loss cannot follow a softmax; end with sigmoid or tanh",
        )),
        _ => Ok(()),
    }
}

pub struct Network {
    layers: Vec<Box<dyn Layer>>,
    output: OutputLayer,
    optimizer: Option<Sgd>,
    rng: SeededRng,
    input_shape: Option<Shape>,
    batch_size: usize,
    current_batch: usize,
}

impl Network {
    /// Empty network whose weights and shuffling draw from `seed`.
    pub fn new(seed: u64) -> Self {
        Self::with_rng(SeededRng::new(seed))
    }

    pub fn with_rng(rng: SeededRng) -> Self {
        Self {
            layers: Vec::new(),
            output: OutputLayer::new(LossKind::default()),
            optimizer: None,
            rng,
            input_shape: None,
            batch_size: 0,
            current_batch: 0,
        }
    }

    /// Appends a layer to the chain.
    pub fn add<L: Layer + 'static>(&mut self, layer: L) -> &mut Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn push(&mut self, layer: Box<dyn Layer>) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn is_compiled(&self) -> bool {
        self.optimizer.is_some()
    }

    pub fn input_shape(&self) -> Option<Shape> {
        self.input_shape
    }

    /// Training batch size fixed at compile time.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn optimizer(&self) -> Option<&Sgd> {
        self.optimizer.as_ref()
    }

    pub fn loss_kind(&self) -> LossKind {
        self.output.loss_kind()
    }

    /// Predictions of the last forward pass.
    pub fn output(&self) -> &Tensor {
        self.output.output()
    }

    /// Total number of trainable scalars.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }

    /// Wires the chain for `input_shape` samples and `batch_size` batches.
    ///
    /// Every layer receives the output shape of its predecessor; the first
    /// mismatch aborts with `ShapeMismatch` or `InvalidConfiguration`.
    pub fn compile(
        &mut self,
        input_shape: Shape,
        batch_size: usize,
        optimizer: Sgd,
        loss: LossKind,
    ) -> Result<()> {
        if self.layers.is_empty() {
            return Err(NnError::config("cannot compile a network without layers"));
        }
        if batch_size == 0 {
            return Err(NnError::config("batch size must be positive"));
        }

        let mut shape = input_shape;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer
                .set_layer(batch_size, shape, &mut self.rng)
                .map_err(|e| match e {
                    NnError::ShapeMismatch(msg) => {
                        NnError::ShapeMismatch(format!("layer {} ({}): {}", i, layer.name(), msg))
                    }
                    NnError::InvalidConfiguration(msg) => NnError::InvalidConfiguration(
                        format!("layer {} ({}): {}", i, layer.name(), msg),
                    ),
                    other => other,
                })?;
            let next = layer.output().shape();
            debug!(
                "layer {:>2} {:<14} {} -> {} ({} parameters)",
                i,
                layer.name(),
                shape,
                next,
                layer.parameter_count()
            );
            shape = next;
        }

        check_loss_pairing(&self.layers, loss)?;
        self.output = OutputLayer::new(loss);
        self.output.set_layer(batch_size, shape, &mut self.rng)?;
        self.optimizer = Some(optimizer);
        self.input_shape = Some(input_shape);
        self.batch_size = batch_size;
        self.current_batch = batch_size;
        info!(
            "compiled {} layers, {} trainable parameters, loss {}",
            self.layers.len(),
            self.parameter_count(),
            loss
        );
        Ok(())
    }

    fn ensure_compiled(&self) -> Result<Sgd> {
        self.optimizer
            .ok_or_else(|| NnError::config("network must be compiled first"))
    }

    /// Resizes every batch-dependent buffer.
    fn set_batch(&mut self, batch: usize) {
        if batch == self.current_batch {
            return;
        }
        for layer in self.layers.iter_mut() {
            layer.reset_batch(batch);
        }
        self.output.reset_batch(batch);
        self.current_batch = batch;
    }

    fn check_input(&self, x: &Tensor) -> Result<()> {
        let expected = self.input_shape.map_or(0, |s| s.size());
        if x.shape().size() != expected || x.batch() != self.current_batch {
            return Err(NnError::shape(format!(
                "network expects {} samples of {} values, got {} of {}",
                self.current_batch,
                expected,
                x.batch(),
                x.shape().size()
            )));
        }
        Ok(())
    }

    /// Runs the chain on `x`, which must hold exactly one batch.
    pub fn forward(&mut self, x: &Tensor, is_training: bool) -> Result<&Tensor> {
        self.ensure_compiled()?;
        self.check_input(x)?;

        self.layers[0].forward(x, is_training);
        for i in 1..self.layers.len() {
            let (done, rest) = self.layers.split_at_mut(i);
            rest[0].forward(done[i - 1].output(), is_training);
        }
        if let Some(last) = self.layers.last() {
            self.output.forward(last.output(), is_training);
        }
        Ok(self.output.output())
    }

    /// Back-propagates the loss of the last forward pass against `labels`
    /// and returns that loss. Gradients accumulate until [`Network::update`].
    pub fn backward(&mut self, x: &Tensor, labels: &[usize]) -> Result<f32> {
        self.ensure_compiled()?;
        let loss = self.output.compute_loss(labels)?;

        if let Some(last) = self.layers.last_mut() {
            let (out, delta) = last.output_and_delta_mut();
            self.output.backward(out, Some(delta));
        }
        for i in (0..self.layers.len()).rev() {
            if i == 0 {
                self.layers[0].backward(x, None);
            } else {
                let (before, after) = self.layers.split_at_mut(i);
                let (input, prev_delta) = before[i - 1].output_and_delta_mut();
                after[0].backward(input, Some(prev_delta));
            }
        }
        Ok(loss)
    }

    pub fn zero_grad(&mut self) {
        for layer in self.layers.iter_mut() {
            layer.zero_grad();
        }
        self.output.zero_grad();
    }

    /// Applies one SGD step to every parametric layer.
    pub fn update(&mut self) -> Result<()> {
        let sgd = self.ensure_compiled()?;
        for layer in self.layers.iter_mut() {
            layer.update_parameters(sgd.learning_rate(), sgd.weight_decay());
        }
        Ok(())
    }

    /// One full optimization step on a single batch; returns its loss.
    pub fn train_batch(&mut self, x: &Tensor, labels: &[usize]) -> Result<f32> {
        self.set_batch(self.batch_size);
        self.zero_grad();
        self.forward(x, true)?;
        let loss = self.backward(x, labels)?;
        self.update()?;
        Ok(loss)
    }

    /// Trains for `epochs` passes over `train`.
    ///
    /// Batches are regenerated every epoch (shuffled when `shuffle`); the
    /// last `len % batch_size` samples are left out of each epoch. After each
    /// epoch both datasets are evaluated without touching the weights.
    pub fn fit(
        &mut self,
        train: &Dataset,
        epochs: usize,
        shuffle: bool,
        validation: Option<&Dataset>,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<EpochStats>> {
        self.ensure_compiled()?;
        if train.len() < self.batch_size {
            return Err(NnError::config(format!(
                "training set of {} samples is smaller than the batch size {}",
                train.len(),
                self.batch_size
            )));
        }
        let dropped = train.len() % self.batch_size;
        if dropped > 0 {
            warn!(
                "{} samples do not fill a batch of {} and are skipped every epoch",
                dropped, self.batch_size
            );
        }

        let mut history = Vec::with_capacity(epochs);
        for epoch in 1..=epochs {
            let start = Instant::now();
            let batches = BatchIndices::generate(train.len(), self.batch_size, shuffle, &mut self.rng);
            reporter.on_epoch_start(epoch, batches.len());

            let mut loss_sum = 0.0f32;
            for (b, indices) in batches.iter().enumerate() {
                let (x, labels) = train.batch(indices)?;
                let loss = self.train_batch(&x, &labels)?;
                loss_sum += loss;
                reporter.on_batch(epoch, b, batches.len(), loss);
            }

            let train_eval = self.evaluate(train)?;
            let valid_eval = validation.map(|v| self.evaluate(v)).transpose()?;
            let stats = EpochStats {
                epoch,
                mean_batch_loss: loss_sum / batches.len().max(1) as f32,
                train: train_eval,
                validation: valid_eval,
                elapsed: start.elapsed(),
            };
            reporter.on_epoch(&stats);
            history.push(stats);
        }
        Ok(history)
    }

    /// Forward pass in inference mode over any number of samples.
    pub fn predict(&mut self, x: &Tensor) -> Result<Vec<usize>> {
        self.ensure_compiled()?;
        self.set_batch(x.batch());
        let result = self.forward(x, false).map(|out| out.argmax_rows());
        self.set_batch(self.batch_size);
        result
    }

    /// Mean loss and misclassification rate over `data`, in inference mode.
    ///
    /// Runs in batches of the compiled size; a trailing partial batch is
    /// processed with temporarily shrunk buffers.
    pub fn evaluate(&mut self, data: &Dataset) -> Result<Evaluation> {
        self.ensure_compiled()?;
        if data.is_empty() {
            return Err(NnError::config("cannot evaluate an empty dataset"));
        }
        let indices: Vec<usize> = (0..data.len()).collect();
        let mut loss_sum = 0.0f32;
        let mut wrong = 0.0f32;

        let result = (|| -> Result<()> {
            for chunk in indices.chunks(self.batch_size) {
                let (x, labels) = data.batch(chunk)?;
                self.set_batch(chunk.len());
                self.forward(&x, false)?;
                loss_sum += self.output.loss(&labels)? * chunk.len() as f32;
                wrong += calc_error(&self.output.predictions(), &labels) * chunk.len() as f32;
            }
            Ok(())
        })();
        self.set_batch(self.batch_size);
        result?;

        let n = data.len() as f32;
        Ok(Evaluation {
            loss: loss_sum / n,
            error_rate: wrong / n,
        })
    }
}
