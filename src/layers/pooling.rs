//! Max and average pooling over 2D feature maps.

use super::r#trait::{layer_buffers, Layer};
use crate::error::{NnError, Result};
use crate::tensor::{Shape, Tensor};
use crate::utils::SeededRng;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Reduction applied inside each pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    #[default]
    Max,
    #[serde(alias = "average")]
    Avg,
}

impl PoolKind {
    pub fn name(&self) -> &'static str {
        match self {
            PoolKind::Max => "max",
            PoolKind::Avg => "avg",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PoolKind {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(PoolKind::Max),
            "avg" | "average" => Ok(PoolKind::Avg),
            other => Err(NnError::config(format!(
                "unknown pooling '{}' (expected max or avg)",
                other
            ))),
        }
    }
}

/// How gradients land on input cells shared by overlapping windows
/// (`stride < kernel`). Irrelevant for non-overlapping pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Contributions from every window are summed.
    #[default]
    Accumulate,
    /// The last window visited in row-major order wins.
    Assign,
}

/// 2D pooling layer without padding.
///
/// Output size is `(in - kernel) / stride + 1` per spatial axis. Max pooling
/// remembers the winning input cell of every window (the first maximum in
/// row-major window order) and routes the whole upstream gradient there;
/// average pooling spreads `delta / kernel²` over the window.
#[derive(Debug, Clone)]
pub struct Pool2DLayer {
    kind: PoolKind,
    kernel: usize,
    stride: usize,
    policy: OverlapPolicy,
    input_shape: Option<Shape>,
    batch_size: usize,
    argmax: Vec<usize>,
    output: Tensor,
    delta: Tensor,
}

impl Pool2DLayer {
    pub fn new(kind: PoolKind, kernel: usize, stride: usize) -> Self {
        Self {
            kind,
            kernel,
            stride,
            policy: OverlapPolicy::default(),
            input_shape: None,
            batch_size: 0,
            argmax: Vec::new(),
            output: Tensor::zeros(0, Shape::Features(0)),
            delta: Tensor::zeros(0, Shape::Features(0)),
        }
    }

    pub fn max(kernel: usize, stride: usize) -> Self {
        Self::new(PoolKind::Max, kernel, stride)
    }

    pub fn avg(kernel: usize, stride: usize) -> Self {
        Self::new(PoolKind::Avg, kernel, stride)
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn kernel(&self) -> usize {
        self.kernel
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Flat input index selected by every output cell (max pooling only).
    pub fn argmax(&self) -> &[usize] {
        &self.argmax
    }

    fn dims(&self) -> ((usize, usize, usize), (usize, usize)) {
        let (c, h, w) = self.input_shape.map_or((0, 0, 0), |s| s.dims());
        let (oh, ow) = match self.output.shape() {
            Shape::Image { height, width, .. } => (height, width),
            Shape::Features(_) => (0, 0),
        };
        ((c, h, w), (oh, ow))
    }
}

impl Layer for Pool2DLayer {
    fn name(&self) -> &'static str {
        match self.kind {
            PoolKind::Max => "max_pool2d",
            PoolKind::Avg => "avg_pool2d",
        }
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        let Shape::Image {
            channels,
            height,
            width,
        } = input_shape
        else {
            return Err(NnError::shape(format!(
                "pooling expects an image input, got {}",
                input_shape
            )));
        };
        if self.kernel == 0 || self.stride == 0 {
            return Err(NnError::config("pooling kernel and stride must be positive"));
        }
        if height < self.kernel || width < self.kernel {
            return Err(NnError::shape(format!(
                "pooling window {} larger than input {}",
                self.kernel, input_shape
            )));
        }
        Ok(Shape::image(
            channels,
            (height - self.kernel) / self.stride + 1,
            (width - self.kernel) / self.stride + 1,
        ))
    }

    fn set_layer(
        &mut self,
        batch_size: usize,
        input_shape: Shape,
        _rng: &mut SeededRng,
    ) -> Result<()> {
        let out_shape = self.output_shape(input_shape)?;
        if self.input_shape != Some(input_shape) {
            self.input_shape = Some(input_shape);
            self.output = Tensor::zeros(batch_size, out_shape);
            self.delta = Tensor::zeros(batch_size, out_shape);
        }
        self.reset_batch(batch_size);
        Ok(())
    }

    fn reset_batch(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
        self.output.resize_batch(batch_size);
        self.delta.resize_batch(batch_size);
        if self.kind == PoolKind::Max {
            self.argmax = vec![0; self.output.len()];
        }
    }

    fn forward(&mut self, input: &Tensor, _is_training: bool) {
        let ((channels, h, w), (oh, ow)) = self.dims();
        assert_eq!(
            input.len(),
            self.batch_size * channels * h * w,
            "pooling input len mismatch"
        );
        let x = input.as_slice();
        let area = (self.kernel * self.kernel) as f32;
        let out = self.output.as_mut_slice();

        for plane in 0..self.batch_size * channels {
            let in_base = plane * h * w;
            let out_base = plane * oh * ow;
            for oi in 0..oh {
                for oj in 0..ow {
                    let top = oi * self.stride;
                    let left = oj * self.stride;
                    let o = out_base + oi * ow + oj;
                    match self.kind {
                        PoolKind::Max => {
                            let mut best = in_base + top * w + left;
                            for u in 0..self.kernel {
                                for v in 0..self.kernel {
                                    let idx = in_base + (top + u) * w + left + v;
                                    if x[idx] > x[best] {
                                        best = idx;
                                    }
                                }
                            }
                            self.argmax[o] = best;
                            out[o] = x[best];
                        }
                        PoolKind::Avg => {
                            let mut sum = 0.0f32;
                            for u in 0..self.kernel {
                                let row = in_base + (top + u) * w + left;
                                sum += x[row..row + self.kernel].iter().sum::<f32>();
                            }
                            out[o] = sum / area;
                        }
                    }
                }
            }
        }
    }

    fn backward(&mut self, _input: &Tensor, prev_delta: Option<&mut Tensor>) {
        let Some(prev_delta) = prev_delta else {
            return;
        };
        let ((channels, h, w), (oh, ow)) = self.dims();
        assert_eq!(
            prev_delta.len(),
            self.batch_size * channels * h * w,
            "pooling prev_delta len mismatch"
        );
        prev_delta.fill(0.0);
        let prev = prev_delta.as_mut_slice();
        let delta = self.delta.as_slice();
        let area = (self.kernel * self.kernel) as f32;
        let accumulate = self.policy == OverlapPolicy::Accumulate;

        match self.kind {
            PoolKind::Max => {
                for (&idx, &d) in self.argmax.iter().zip(delta) {
                    if accumulate {
                        prev[idx] += d;
                    } else {
                        prev[idx] = d;
                    }
                }
            }
            PoolKind::Avg => {
                for plane in 0..self.batch_size * channels {
                    let in_base = plane * h * w;
                    let out_base = plane * oh * ow;
                    for oi in 0..oh {
                        for oj in 0..ow {
                            let share = delta[out_base + oi * ow + oj] / area;
                            let top = oi * self.stride;
                            let left = oj * self.stride;
                            for u in 0..self.kernel {
                                let row = in_base + (top + u) * w + left;
                                for cell in &mut prev[row..row + self.kernel] {
                                    if accumulate {
                                        *cell += share;
                                    } else {
                                        *cell = share;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn zero_grad(&mut self) {
        self.delta.fill(0.0);
    }

    layer_buffers!();
}
