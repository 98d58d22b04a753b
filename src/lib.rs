//! Bit-accurate reference simulator for a family of fixed-function
//! deep-learning accelerators (DPUs).
//!
//! Given a compiled program -- a bit-packed instruction stream plus a
//! weight/bias/tensor-metadata bundle -- this crate reproduces,
//! byte-for-byte, what the physical accelerator leaves in its external
//! memory (DDR) after running that program. It is used to validate
//! compilers, to generate golden reference data for RTL co-simulation,
//! and to debug quantization behavior.
//!
//! Speed is not a goal; bit-exactness is.

#![warn(missing_docs)]

pub mod activation;
pub mod bank;
pub mod config;
pub mod consts;
pub mod ddr;
pub mod engine;
pub mod error;
pub mod fmap;
pub mod ops;
pub mod rounding;
pub mod subgraph;
pub mod target;
pub mod worker;

pub use dpu_isa::{Generation, InstType, Instruction, SimReason};
pub use engine::Engine;
pub use error::{EngineError, SimError};
