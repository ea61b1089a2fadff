//! Matrix multiplication kernels.

use crate::config::{ActivationKind, MatmulProblem};
use crate::utils::{apply_bias_activation, validate_matmul_inputs};
use anyhow::{ensure, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::sync::Arc;

pub struct MatmulInputs<'a> {
    pub lhs: ArrayView2<'a, f32>,
    pub rhs: ArrayView2<'a, f32>,
    pub bias: Option<ArrayView1<'a, f32>>,
    pub activation: ActivationKind,
}

impl<'a> MatmulInputs<'a> {
    pub fn new(
        lhs: ArrayView2<'a, f32>,
        rhs: ArrayView2<'a, f32>,
        bias: Option<ArrayView1<'a, f32>>,
        activation: ActivationKind,
    ) -> Self {
        Self {
            lhs,
            rhs,
            bias,
            activation,
        }
    }

    pub fn problem(&self) -> MatmulProblem {
        MatmulProblem::new(self.lhs.nrows(), self.rhs.ncols(), self.lhs.ncols())
    }
}

/// A dense `lhs @ rhs + bias` kernel with an activation epilogue.
pub trait MatmulKernel: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, problem: &MatmulProblem, inputs: &MatmulInputs<'_>) -> Result<Array2<f32>>;
}

pub type DynMatmulKernel = Arc<dyn MatmulKernel>;

fn check_problem(problem: &MatmulProblem, inputs: &MatmulInputs<'_>) -> Result<()> {
    validate_matmul_inputs(&inputs.lhs, &inputs.rhs)?;
    ensure!(
        *problem == inputs.problem(),
        "problem {:?} does not describe inputs {:?}",
        problem,
        inputs.problem()
    );
    Ok(())
}

#[derive(Default)]
pub struct ReferenceMatmul;

impl ReferenceMatmul {
    pub fn new() -> Self {
        Self
    }
}

impl MatmulKernel for ReferenceMatmul {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn run(&self, problem: &MatmulProblem, inputs: &MatmulInputs<'_>) -> Result<Array2<f32>> {
        check_problem(problem, inputs)?;

        let result = inputs.lhs.dot(&inputs.rhs);
        apply_bias_activation(result, inputs.bias.as_ref(), inputs.activation)
    }
}

/// Row-parallel matmul; each output row is computed on the rayon pool.
#[derive(Default)]
pub struct ParallelMatmul;

impl ParallelMatmul {
    pub fn new() -> Self {
        Self
    }
}

impl MatmulKernel for ParallelMatmul {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn run(&self, problem: &MatmulProblem, inputs: &MatmulInputs<'_>) -> Result<Array2<f32>> {
        check_problem(problem, inputs)?;

        let lhs = inputs.lhs;
        let rhs = inputs.rhs;
        let mut output = Array2::<f32>::zeros((problem.m, problem.n));

        output
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row_idx, mut row)| {
                let lhs_row = lhs.row(row_idx);
                for (col_idx, value) in row.iter_mut().enumerate() {
                    let rhs_col = rhs.column(col_idx);
                    *value = lhs_row.dot(&rhs_col);
                }
            });

        apply_bias_activation(output, inputs.bias.as_ref(), inputs.activation)
    }
}
