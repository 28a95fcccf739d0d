//! Minimal tensor contract required by the conversion engine
//!
//! The engine treats tensor values as opaque. The only operations it ever
//! performs are splitting a tensor into two equal chunks along its first
//! axis and concatenating two chunks back together, which is all that
//! reordering a gated/up-projection split needs. Any type satisfying
//! [`TensorValue`] can be converted; an implementation for
//! [`candle_core::Tensor`] is provided.

use candle_core::Tensor;

use crate::error::{Error, Result};

/// Tensor operations required by [`convert`](crate::convert::convert)
pub trait TensorValue: Clone + Sized {
    /// Splits the tensor into two equal-size chunks along the first axis.
    ///
    /// Fails with [`Error::UnevenSplit`] when the first axis has odd length.
    fn split_half(&self) -> Result<(Self, Self)>;

    /// Concatenates two chunks along the first axis.
    fn concat(first: &Self, second: &Self) -> Result<Self>;

    /// Rebuilds the tensor with its two first-axis halves in swapped order.
    ///
    /// Applying this twice restores the original tensor.
    fn swap_halves(&self) -> Result<Self> {
        let (first, second) = self.split_half()?;
        Self::concat(&second, &first)
    }
}

impl TensorValue for Tensor {
    fn split_half(&self) -> Result<(Self, Self)> {
        let rows = self.dim(0)?;
        if rows % 2 != 0 {
            return Err(Error::uneven_split(rows));
        }
        let half = rows / 2;
        let first = self.narrow(0, 0, half)?;
        let second = self.narrow(0, half, half)?;
        Ok((first, second))
    }

    fn concat(first: &Self, second: &Self) -> Result<Self> {
        Ok(Tensor::cat(&[first, second], 0)?)
    }
}
