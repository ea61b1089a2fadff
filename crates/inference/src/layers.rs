//! Linear projection and layer normalization building blocks.

use anyhow::Result;
use bytegpt_kernels::config::ActivationKind;
use bytegpt_kernels::layernorm::layer_norm;
use bytegpt_kernels::matmul::{MatmulInputs, MatmulKernel};
use ndarray::{Array1, Array2, ArrayView2};
use tracing::trace;

/// `x @ weight + bias` with `weight` stored `(in_features, out_features)`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Self {
        Self { weight, bias }
    }

    pub fn in_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn out_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn forward(
        &self,
        kernel: &dyn MatmulKernel,
        x: ArrayView2<'_, f32>,
        activation: ActivationKind,
    ) -> Result<Array2<f32>> {
        let inputs = MatmulInputs::new(
            x.view(),
            self.weight.view(),
            self.bias.as_ref().map(|bias| bias.view()),
            activation,
        );
        let problem = inputs.problem();
        trace!(
            kernel = kernel.name(),
            m = problem.m,
            n = problem.n,
            k = problem.k,
            flops = problem.flops(),
            "matmul"
        );
        kernel.run(&problem, &inputs)
    }
}

/// Per-row layer normalization with learned gain and shift.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Array1<f32>,
    bias: Array1<f32>,
    eps: f32,
}

impl LayerNorm {
    pub fn new(weight: Array1<f32>, bias: Array1<f32>, eps: f32) -> Self {
        Self { weight, bias, eps }
    }

    pub fn forward(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        layer_norm(x, self.weight.view(), self.bias.view(), self.eps)
    }
}
