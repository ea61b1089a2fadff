//! Position-wise feed-forward network: `d_model -> 4*d_model -> ReLU -> d_model`.

use crate::layers::Linear;
use anyhow::{ensure, Result};
use bytegpt_kernels::config::ActivationKind;
use bytegpt_kernels::matmul::MatmulKernel;
use ndarray::{Array2, ArrayView2};

#[derive(Debug, Clone)]
pub struct FeedForward {
    up: Linear,
    down: Linear,
}

impl FeedForward {
    pub fn new(up: Linear, down: Linear) -> Result<Self> {
        ensure!(
            up.out_features() == down.in_features() && up.in_features() == down.out_features(),
            "feed-forward layers do not chain: {}->{} then {}->{}",
            up.in_features(),
            up.out_features(),
            down.in_features(),
            down.out_features()
        );
        Ok(Self { up, down })
    }

    pub fn forward(&self, kernel: &dyn MatmulKernel, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let hidden = self.up.forward(kernel, x, ActivationKind::Relu)?;
        self.down.forward(kernel, hidden.view(), ActivationKind::None)
    }
}
