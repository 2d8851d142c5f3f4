//! Causal attention mask shared by the forward passes.

use anyhow::Result;
use candle_core::{DType, Device, Tensor};

/// Create a causal mask for the given sequence length.
///
/// Returns a tensor of shape `[1, 1, seq_len, seq_len]` with `0.0` where
/// position `i` may attend to position `j` (`j <= i`) and `-inf` elsewhere.
/// Added to the attention scores before softmax.
pub fn create_causal_mask(seq_len: usize, device: &Device, dtype: DType) -> Result<Tensor> {
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j <= i { 0.0 } else { f32::NEG_INFINITY }))
        .collect();
    let mask = Tensor::from_vec(mask, (1, 1, seq_len, seq_len), device)?.to_dtype(dtype)?;
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_causal_mask_shape_and_values() {
        let mask = create_causal_mask(3, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask.dims(), &[1, 1, 3, 3]);

        let values: Vec<f32> = mask.flatten_all().unwrap().to_vec1().unwrap();
        // Row 0 can only see position 0
        assert_eq!(values[0], 0.0);
        assert_eq!(values[1], f32::NEG_INFINITY);
        // Last row sees everything
        assert_eq!(values[6], 0.0);
        assert_eq!(values[7], 0.0);
        assert_eq!(values[8], 0.0);
    }
}
