//! Dense f32 kernels used by the bytegpt forward pass.

pub mod attention;
pub mod config;
pub mod layernorm;
pub mod matmul;
pub mod registry;
pub mod utils;

pub use attention::*;
pub use config::*;
pub use layernorm::*;
pub use matmul::*;
pub use registry::*;
pub use utils::*;
