//! 2D Convolutional layer implementation
//!
//! This module provides a Conv2DLayer that performs 2D convolution (strictly a
//! cross-correlation) with zero padding and stride 1, optionally restricted
//! by an input/output channel connection table.

use super::r#trait::{layer_buffers, Layer};
use crate::error::{NnError, Result};
use crate::optimizers::sgd_step;
use crate::tensor::{Shape, Tensor};
use crate::utils::{InitScheme, SeededRng};
use rayon::prelude::*;

/// Stride of every convolution.
pub const CONV_STRIDE: usize = 1;

/// Connection table of the LeNet-5 C3 layer: `[input map][output map]`.
const LENET5_C3: [[u8; 16]; 6] = [
    [1, 0, 0, 0, 1, 1, 1, 0, 0, 1, 1, 1, 1, 0, 1, 1],
    [1, 1, 0, 0, 0, 1, 1, 1, 0, 0, 1, 1, 1, 1, 0, 1],
    [1, 1, 1, 0, 0, 0, 1, 1, 1, 0, 0, 1, 0, 1, 1, 1],
    [0, 1, 1, 1, 0, 0, 1, 1, 1, 1, 0, 0, 1, 0, 1, 1],
    [0, 0, 1, 1, 1, 0, 0, 1, 1, 1, 1, 0, 1, 1, 0, 1],
    [0, 0, 0, 1, 1, 1, 0, 0, 1, 1, 1, 1, 0, 1, 1, 1],
];

/// Dimensions resolved at `set_layer`, copied into the parallel closures.
#[derive(Debug, Clone, Copy, Default)]
struct Geometry {
    in_channels: usize,
    in_h: usize,
    in_w: usize,
    out_channels: usize,
    out_h: usize,
    out_w: usize,
    kernel_h: usize,
    kernel_w: usize,
    pad: usize,
}

impl Geometry {
    fn in_size(&self) -> usize {
        self.in_channels * self.in_h * self.in_w
    }

    fn out_size(&self) -> usize {
        self.out_channels * self.out_h * self.out_w
    }

    fn kernel_area(&self) -> usize {
        self.kernel_h * self.kernel_w
    }

    /// Offset of kernel `(k, c)` inside the kernel buffer.
    fn kernel_offset(&self, k: usize, c: usize) -> usize {
        (k * self.in_channels + c) * self.kernel_area()
    }

    /// Input coordinate hit by output `(i, j)` and tap `(u, v)`, if inside.
    fn input_coord(&self, i: usize, j: usize, u: usize, v: usize) -> Option<(usize, usize)> {
        let y = (i + u) as isize - self.pad as isize;
        let x = (j + v) as isize - self.pad as isize;
        if y < 0 || x < 0 || y >= self.in_h as isize || x >= self.in_w as isize {
            None
        } else {
            Some((y as usize, x as usize))
        }
    }
}

/// 2D Convolutional layer with learnable filters.
///
/// Kernels are stored as `out_channels × in_channels × kernel_h × kernel_w`;
/// every output channel carries one bias. When a connection table is given,
/// `connections[c][k]` decides whether input channel `c` feeds output
/// channel `k`. Disconnected kernels stay at zero for the whole run.
///
/// # Example
///
/// ```
/// use rust_lenet::layers::{Conv2DLayer, Layer};
/// use rust_lenet::tensor::Shape;
/// use rust_lenet::utils::{InitScheme, SeededRng};
///
/// let mut rng = SeededRng::new(42);
/// // 6 feature maps, 5x5 kernel, padding 2 keeps 28x28
/// let mut conv = Conv2DLayer::new(6, 5, 2, InitScheme::LecunUniform);
/// conv.set_layer(8, Shape::image(1, 28, 28), &mut rng).unwrap();
/// assert_eq!(conv.output().shape(), Shape::image(6, 28, 28));
/// ```
#[derive(Debug, Clone)]
pub struct Conv2DLayer {
    out_channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    pad: usize,
    init: InitScheme,
    connections: Option<Vec<Vec<bool>>>,
    links: Vec<bool>,
    geometry: Option<Geometry>,
    batch_size: usize,
    kernels: Vec<f32>,
    biases: Vec<f32>,
    grad_kernels: Vec<f32>,
    grad_biases: Vec<f32>,
    output: Tensor,
    delta: Tensor,
}

impl Conv2DLayer {
    /// Square-kernel convolution.
    pub fn new(out_channels: usize, kernel_size: usize, pad: usize, init: InitScheme) -> Self {
        Self::with_kernel(out_channels, kernel_size, kernel_size, pad, init)
    }

    /// Convolution with a `kernel_h × kernel_w` kernel.
    pub fn with_kernel(
        out_channels: usize,
        kernel_h: usize,
        kernel_w: usize,
        pad: usize,
        init: InitScheme,
    ) -> Self {
        Self {
            out_channels,
            kernel_h,
            kernel_w,
            pad,
            init,
            connections: None,
            links: Vec::new(),
            geometry: None,
            batch_size: 0,
            kernels: Vec::new(),
            biases: Vec::new(),
            grad_kernels: Vec::new(),
            grad_biases: Vec::new(),
            output: Tensor::zeros(0, Shape::Features(0)),
            delta: Tensor::zeros(0, Shape::Features(0)),
        }
    }

    /// Restricts which input channels feed which output channels
    /// (`connections[input][output]`). Checked against the input at
    /// `set_layer`.
    pub fn with_connections(mut self, connections: Vec<Vec<bool>>) -> Self {
        self.connections = Some(connections);
        self
    }

    /// The 6 → 16 sparse table of the original LeNet-5 C3 layer.
    pub fn lenet5_c3_connections() -> Vec<Vec<bool>> {
        LENET5_C3
            .iter()
            .map(|row| row.iter().map(|&v| v != 0).collect())
            .collect()
    }

    /// Get the number of output channels (filters).
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Get the number of input channels; zero until `set_layer`.
    pub fn in_channels(&self) -> usize {
        self.geometry.map_or(0, |g| g.in_channels)
    }

    /// Get the kernel size as `(height, width)`.
    pub fn kernel_size(&self) -> (usize, usize) {
        (self.kernel_h, self.kernel_w)
    }

    /// Get the padding amount.
    pub fn padding(&self) -> usize {
        self.pad
    }

    /// Whether input channel `c` feeds output channel `k`.
    pub fn is_connected(&self, c: usize, k: usize) -> bool {
        self.links
            .get(c * self.out_channels + k)
            .copied()
            .unwrap_or(false)
    }

    pub fn kernels(&self) -> &[f32] {
        &self.kernels
    }

    pub fn kernels_mut(&mut self) -> &mut [f32] {
        &mut self.kernels
    }

    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    pub fn biases_mut(&mut self) -> &mut [f32] {
        &mut self.biases
    }

    pub fn grad_kernels(&self) -> &[f32] {
        &self.grad_kernels
    }

    pub fn grad_biases(&self) -> &[f32] {
        &self.grad_biases
    }

    fn resolve(&self, input_shape: Shape) -> Result<Geometry> {
        let (in_channels, in_h, in_w) = match input_shape {
            Shape::Image {
                channels,
                height,
                width,
            } => (channels, height, width),
            Shape::Features(_) => {
                return Err(NnError::shape(format!(
                    "conv2d expects an image input, got {}",
                    input_shape
                )))
            }
        };
        if self.out_channels == 0 || self.kernel_h == 0 || self.kernel_w == 0 {
            return Err(NnError::config(
                "conv2d needs at least one output channel and a non-empty kernel",
            ));
        }
        let padded_h = in_h + 2 * self.pad;
        let padded_w = in_w + 2 * self.pad;
        if padded_h < self.kernel_h || padded_w < self.kernel_w {
            return Err(NnError::shape(format!(
                "kernel {}x{} does not fit input {} with padding {}",
                self.kernel_h, self.kernel_w, input_shape, self.pad
            )));
        }
        Ok(Geometry {
            in_channels,
            in_h,
            in_w,
            out_channels: self.out_channels,
            out_h: (padded_h - self.kernel_h) / CONV_STRIDE + 1,
            out_w: (padded_w - self.kernel_w) / CONV_STRIDE + 1,
            kernel_h: self.kernel_h,
            kernel_w: self.kernel_w,
            pad: self.pad,
        })
    }

    fn build_links(&self, in_channels: usize) -> Result<Vec<bool>> {
        match &self.connections {
            None => Ok(vec![true; in_channels * self.out_channels]),
            Some(table) => {
                if table.len() != in_channels
                    || table.iter().any(|row| row.len() != self.out_channels)
                {
                    return Err(NnError::config(format!(
                        "connection table must be {} x {} (input x output channels)",
                        in_channels, self.out_channels
                    )));
                }
                Ok(table.iter().flatten().copied().collect())
            }
        }
    }

    fn geometry(&self) -> Geometry {
        self.geometry.unwrap_or_default()
    }
}

impl Layer for Conv2DLayer {
    fn name(&self) -> &'static str {
        "conv2d"
    }

    fn output_shape(&self, input_shape: Shape) -> Result<Shape> {
        let g = self.resolve(input_shape)?;
        Ok(Shape::image(g.out_channels, g.out_h, g.out_w))
    }

    fn set_layer(
        &mut self,
        batch_size: usize,
        input_shape: Shape,
        rng: &mut SeededRng,
    ) -> Result<()> {
        let g = self.resolve(input_shape)?;
        let links = self.build_links(g.in_channels)?;
        let out_shape = Shape::image(g.out_channels, g.out_h, g.out_w);

        let same_shape = self.geometry.map_or(false, |old| {
            (old.in_channels, old.in_h, old.in_w) == (g.in_channels, g.in_h, g.in_w)
        });
        if !same_shape {
            let weight_count = g.out_channels * g.in_channels * g.kernel_area();
            let fan_in = g.in_channels * g.kernel_area();
            let fan_out = g.out_channels * g.kernel_area();
            self.kernels = vec![0.0f32; weight_count];
            self.init.fill(&mut self.kernels, fan_in, fan_out, rng);
            for c in 0..g.in_channels {
                for k in 0..g.out_channels {
                    if !links[c * g.out_channels + k] {
                        let start = g.kernel_offset(k, c);
                        self.kernels[start..start + g.kernel_area()]
                            .iter_mut()
                            .for_each(|w| *w = 0.0);
                    }
                }
            }
            self.biases = vec![0.0f32; g.out_channels];
            self.grad_kernels = vec![0.0f32; weight_count];
            self.grad_biases = vec![0.0f32; g.out_channels];
            self.output = Tensor::zeros(batch_size, out_shape);
            self.delta = Tensor::zeros(batch_size, out_shape);
            self.links = links;
            self.geometry = Some(g);
        }
        self.reset_batch(batch_size);
        Ok(())
    }

    fn reset_batch(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
        self.output.resize_batch(batch_size);
        self.delta.resize_batch(batch_size);
    }

    fn forward(&mut self, input: &Tensor, _is_training: bool) {
        let g = self.geometry();
        assert_eq!(
            input.len(),
            self.batch_size * g.in_size(),
            "conv2d input len mismatch"
        );
        if self.batch_size == 0 {
            return;
        }
        let kernels = &self.kernels;
        let biases = &self.biases;
        let links = &self.links;

        self.output
            .as_mut_slice()
            .par_chunks_mut(g.out_size())
            .zip(input.as_slice().par_chunks(g.in_size()))
            .for_each(|(out, inp)| {
                for k in 0..g.out_channels {
                    for i in 0..g.out_h {
                        for j in 0..g.out_w {
                            let mut sum = biases[k];
                            for c in 0..g.in_channels {
                                if !links[c * g.out_channels + k] {
                                    continue;
                                }
                                let kernel = &kernels[g.kernel_offset(k, c)..];
                                let plane = &inp[c * g.in_h * g.in_w..];
                                for u in 0..g.kernel_h {
                                    for v in 0..g.kernel_w {
                                        if let Some((y, x)) = g.input_coord(i, j, u, v) {
                                            sum += plane[y * g.in_w + x]
                                                * kernel[u * g.kernel_w + v];
                                        }
                                    }
                                }
                            }
                            out[(k * g.out_h + i) * g.out_w + j] = sum;
                        }
                    }
                }
            });
    }

    fn backward(&mut self, input: &Tensor, prev_delta: Option<&mut Tensor>) {
        let g = self.geometry();
        let batch = self.batch_size;
        let delta = self.delta.as_slice();
        let inp = input.as_slice();

        // Kernel and bias gradients, accumulated serially.
        for n in 0..batch {
            let d_sample = &delta[n * g.out_size()..(n + 1) * g.out_size()];
            let in_sample = &inp[n * g.in_size()..(n + 1) * g.in_size()];
            for k in 0..g.out_channels {
                let d_plane = &d_sample[k * g.out_h * g.out_w..(k + 1) * g.out_h * g.out_w];
                self.grad_biases[k] += d_plane.iter().sum::<f32>();
                for c in 0..g.in_channels {
                    if !self.links[c * g.out_channels + k] {
                        continue;
                    }
                    let plane = &in_sample[c * g.in_h * g.in_w..(c + 1) * g.in_h * g.in_w];
                    let offset = g.kernel_offset(k, c);
                    for u in 0..g.kernel_h {
                        for v in 0..g.kernel_w {
                            let mut sum = 0.0f32;
                            for i in 0..g.out_h {
                                for j in 0..g.out_w {
                                    if let Some((y, x)) = g.input_coord(i, j, u, v) {
                                        sum += d_plane[i * g.out_w + j] * plane[y * g.in_w + x];
                                    }
                                }
                            }
                            self.grad_kernels[offset + u * g.kernel_w + v] += sum;
                        }
                    }
                }
            }
        }

        let Some(prev_delta) = prev_delta else {
            return;
        };
        assert_eq!(
            prev_delta.len(),
            batch * g.in_size(),
            "conv2d prev_delta len mismatch"
        );
        if batch == 0 {
            return;
        }
        let kernels = &self.kernels;
        let links = &self.links;

        // Correlation of delta with the rotated kernel; delta taps outside
        // the output map contribute nothing.
        prev_delta
            .as_mut_slice()
            .par_chunks_mut(g.in_size())
            .zip(delta.par_chunks(g.out_size()))
            .for_each(|(prev, d_sample)| {
                for c in 0..g.in_channels {
                    for y in 0..g.in_h {
                        for x in 0..g.in_w {
                            let mut sum = 0.0f32;
                            for k in 0..g.out_channels {
                                if !links[c * g.out_channels + k] {
                                    continue;
                                }
                                let kernel = &kernels[g.kernel_offset(k, c)..];
                                let d_plane = &d_sample[k * g.out_h * g.out_w..];
                                for u in 0..g.kernel_h {
                                    let i = (y + g.pad) as isize - u as isize;
                                    if i < 0 || i >= g.out_h as isize {
                                        continue;
                                    }
                                    for v in 0..g.kernel_w {
                                        let j = (x + g.pad) as isize - v as isize;
                                        if j < 0 || j >= g.out_w as isize {
                                            continue;
                                        }
                                        sum += d_plane[i as usize * g.out_w + j as usize]
                                            * kernel[u * g.kernel_w + v];
                                    }
                                }
                            }
                            prev[(c * g.in_h + y) * g.in_w + x] = sum;
                        }
                    }
                }
            });
    }

    fn update_parameters(&mut self, learning_rate: f32, weight_decay: f32) {
        let batch = self.batch_size;
        sgd_step(
            &mut self.kernels,
            &mut self.grad_kernels,
            learning_rate,
            weight_decay,
            batch,
        );
        sgd_step(
            &mut self.biases,
            &mut self.grad_biases,
            learning_rate,
            weight_decay,
            batch,
        );
    }

    fn zero_grad(&mut self) {
        self.delta.fill(0.0);
        self.grad_kernels.iter_mut().for_each(|g| *g = 0.0);
        self.grad_biases.iter_mut().for_each(|g| *g = 0.0);
    }

    layer_buffers!();

    fn parameters(&self) -> Vec<&[f32]> {
        vec![self.kernels.as_slice(), self.biases.as_slice()]
    }

    fn parameters_mut(&mut self) -> Vec<&mut [f32]> {
        vec![self.kernels.as_mut_slice(), self.biases.as_mut_slice()]
    }

    fn gradients(&self) -> Vec<&[f32]> {
        vec![self.grad_kernels.as_slice(), self.grad_biases.as_slice()]
    }
}
