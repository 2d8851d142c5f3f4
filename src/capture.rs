//! Per-layer attention capture during a forward pass.
//!
//! Each backend pushes its post-softmax attention probabilities here, one
//! tensor per layer, shape `[batch, heads, seq, seq]`.

use candle_core::Tensor;

/// Captured attention weights, one tensor per layer
#[derive(Debug)]
pub struct AttentionCapture {
    patterns: Vec<Tensor>,
}

impl AttentionCapture {
    /// Create a capture with expected capacity
    pub fn with_capacity(n_layers: usize) -> Self {
        Self {
            patterns: Vec::with_capacity(n_layers),
        }
    }

    /// Add the attention pattern for the next layer
    pub fn push(&mut self, pattern: Tensor) {
        self.patterns.push(pattern);
    }

    /// Number of layers captured so far
    pub fn n_layers(&self) -> usize {
        self.patterns.len()
    }

    /// Pattern tensor for a specific layer
    pub fn get_layer(&self, layer: usize) -> Option<&Tensor> {
        self.patterns.get(layer)
    }

    /// All captured layers, in layer order
    pub fn layers(&self) -> &[Tensor] {
        &self.patterns
    }
}
