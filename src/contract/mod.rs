//! Application program compilation and execution
//!
//! A program source is a list of `name = expression` bindings over a fixed
//! primitive table. [`SandboxedCompiler`] evaluates the source, reads the
//! `approval` and `clear` bindings, lowers them to an assembly listing and
//! assembles that into versioned bytecode. [`VM`] evaluates such bytecode
//! against application global state.
//!
//! # Example
//!
//! ```rust
//! use app_deployer::contract::SandboxedCompiler;
//!
//! let artifact = SandboxedCompiler::new()
//!     .compile("approval = Approve()\nclear = Approve()")
//!     .unwrap();
//! assert!(!artifact.approval().is_empty());
//! ```

pub mod assembler;
pub mod lexer;
pub mod lower;
pub mod opcodes;
pub mod primitives;
pub mod sandbox;
pub mod syntax;
pub mod vm;

pub use assembler::{disassemble, Assembler, AssemblerError, MAX_PROGRAM_SIZE};
pub use opcodes::{OpCode, TxnField, PROGRAM_VERSION};
pub use primitives::Capabilities;
pub use sandbox::{CompiledArtifact, ProgramListing, SandboxError, SandboxedCompiler};
pub use vm::{CallContext, ExecutionResult, StackValue, VmError, DEFAULT_COST_BUDGET, VM};
