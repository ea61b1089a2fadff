//! Kernel registry for lookup and discovery.

use crate::matmul::{DynMatmulKernel, MatmulKernel};
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct KernelRegistry {
    matmul_kernels: Vec<DynMatmulKernel>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self {
            matmul_kernels: Vec::new(),
        }
    }

    pub fn with_default_matmul_kernels() -> Self {
        let mut registry = Self::new();
        registry.register_matmul_kernel(crate::matmul::ReferenceMatmul::new());
        registry.register_matmul_kernel(crate::matmul::ParallelMatmul::new());
        registry
    }

    pub fn register_matmul_kernel<K>(&mut self, kernel: K)
    where
        K: MatmulKernel + 'static,
    {
        self.matmul_kernels.push(Arc::new(kernel));
    }

    pub fn kernel_names(&self) -> Vec<&'static str> {
        self.matmul_kernels.iter().map(|kernel| kernel.name()).collect()
    }

    pub fn find_matmul_kernel(&self, name: &str) -> Option<DynMatmulKernel> {
        self.matmul_kernels
            .iter()
            .find(|kernel| kernel.name() == name)
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_resolves_by_name() {
        let registry = KernelRegistry::with_default_matmul_kernels();
        assert_eq!(registry.kernel_names(), vec!["reference", "parallel"]);
        assert_eq!(
            registry.find_matmul_kernel("parallel").map(|k| k.name()),
            Some("parallel")
        );
        assert!(registry.find_matmul_kernel("blocked").is_none());
    }
}
