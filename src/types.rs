//! Common types used across the pipeline
//!
//! This module defines shared types to avoid circular dependencies.

use core::fmt;

/// Size of the flat IRQ number space tracked by the pipeline
pub const IRQ_SPACE: usize = 1024;

/// Logical CPU identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CpuId(pub usize);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Interrupt line in the pipeline's flat IRQ space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IrqNumber(pub u32);

impl IrqNumber {
    /// Whether this IRQ fits in the pipeline's IRQ space
    #[inline]
    pub const fn in_range(self) -> bool {
        (self.0 as usize) < IRQ_SPACE
    }

    /// Index into per-IRQ tables
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for IrqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "irq{}", self.0)
    }
}

/// Architecture-defined synchronous trap number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TrapNumber(pub u32);

impl fmt::Display for TrapNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trap {:#x}", self.0)
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Execution stage of the interrupt pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Stage {
    /// The general-purpose kernel
    InBand = 0,
    /// The latency-critical companion context
    OutOfBand = 1,
}

impl Stage {
    /// Both stages, in-band first
    pub const ALL: [Stage; 2] = [Stage::InBand, Stage::OutOfBand];

    /// Stall bit for this stage in a per-CPU status byte
    #[inline]
    pub const fn stall_bit(self) -> u8 {
        1 << (self as u8)
    }

    /// The other stage
    #[inline]
    pub const fn other(self) -> Stage {
        match self {
            Stage::InBand => Stage::OutOfBand,
            Stage::OutOfBand => Stage::InBand,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Stage {
        if raw == Stage::OutOfBand as u8 {
            Stage::OutOfBand
        } else {
            Stage::InBand
        }
    }

    /// Stage name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Stage::InBand => "in-band",
            Stage::OutOfBand => "out-of-band",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Saved Register Context
// ============================================================================

/// Architecture-neutral snapshot of an interrupted register frame
///
/// Low-level entry code fills this in from the real frame before calling
/// into the pipeline. `status` holds the interrupted native flags word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SavedContext {
    /// Interrupted program counter
    pub pc: usize,
    /// Interrupted stack pointer
    pub sp: usize,
    /// Native status/flags register at the time of the event
    pub status: u64,
    /// Hardware error code, if the event pushed one
    pub error_code: u64,
    /// Faulting address for memory faults
    pub fault_address: usize,
    /// Event was taken from user mode
    pub user_mode: bool,
}

impl SavedContext {
    /// Kernel-mode context at `pc`
    pub const fn kernel(pc: usize) -> Self {
        Self {
            pc,
            sp: 0,
            status: 0,
            error_code: 0,
            fault_address: 0,
            user_mode: false,
        }
    }

    /// User-mode context at `pc`
    pub const fn user(pc: usize) -> Self {
        Self {
            pc,
            sp: 0,
            status: 0,
            error_code: 0,
            fault_address: 0,
            user_mode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_bits() {
        assert_eq!(Stage::InBand.stall_bit(), 0b01);
        assert_eq!(Stage::OutOfBand.stall_bit(), 0b10);
        assert_eq!(Stage::InBand.other(), Stage::OutOfBand);
        assert_eq!(Stage::from_u8(Stage::OutOfBand as u8), Stage::OutOfBand);
        assert_eq!(Stage::from_u8(0), Stage::InBand);
    }

    #[test]
    fn test_irq_range() {
        assert!(IrqNumber(0).in_range());
        assert!(IrqNumber(IRQ_SPACE as u32 - 1).in_range());
        assert!(!IrqNumber(IRQ_SPACE as u32).in_range());
    }
}
