//! Error types for the interrupt pipeline
//!
//! `PipelineError` covers boot-time configuration and lookups. Invariant
//! violations are never returned to callers; they go through the
//! fatal/recovery path in the stage controller.

use thiserror::Error;

use crate::types::{CpuId, IrqNumber, Stage, TrapNumber};

/// Configuration and lookup errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    #[error("no cpus configured")]
    NoCpus,

    #[error("cpu count {requested} exceeds the supported maximum of {max}")]
    TooManyCpus { requested: usize, max: usize },

    #[error("{0} is not managed by the pipeline")]
    NoSuchCpu(CpuId),

    #[error("{0} is outside the pipeline irq space")]
    IrqOutOfRange(IrqNumber),

    #[error("out-of-band ipi vector {0} collides with an in-band vector")]
    VectorConflict(IrqNumber),

    #[error("{0} is reserved for out-of-band ipis")]
    ReservedIrq(IrqNumber),

    #[error("too many reserved in-band ipi vectors")]
    TooManyReservedVectors,

    #[error("a companion core is already attached")]
    CompanionAttached,

    #[error("no companion core attached")]
    NoCompanion,
}

/// Result alias for pipeline operations
pub type Result<T> = core::result::Result<T, PipelineError>;

/// Broken pipeline invariants
///
/// These are integration bugs. Depending on the configured policy they
/// either panic or force the CPU back to the in-band stage.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("{trap} left the cpu on the {stage} stage where in-band was required")]
    NotInband { trap: TrapNumber, stage: Stage },

    #[error("syscall {nr} declined by the companion core while running out-of-band")]
    SyscallNotInband { nr: usize },

    #[error("trap exit for {found} while {expected} is innermost")]
    UnbalancedTrapExit {
        expected: TrapNumber,
        found: TrapNumber,
    },

    #[error("trap exit for {0} without a matching entry")]
    UnmatchedTrapExit(TrapNumber),

    #[error("trap nesting deeper than {0} levels")]
    TrapNestingOverflow(usize),

    #[error("out-of-band stage entered twice without returning in-band")]
    DoubleOobEntry,
}
