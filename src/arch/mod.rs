//! Architecture-specific code for the interrupt pipeline
//!
//! Every supported architecture supplies an [`ArchFlagBridge`]: the pure
//! translation between its native interrupt-mask flags and the pipeline's
//! stalled/unstalled bit, plus the narrow register accessors. Nothing
//! outside these modules touches the hardware mask.
//!
//! All bridges are compiled on every target since the translation is plain
//! bit arithmetic. The one the kernel actually runs with, [`NativeArch`],
//! is picked by `target_arch`. Register access uses the real instructions
//! only on bare-metal targets (`target_os = "none"`); hosted builds go
//! through [`hosted`].

use core::fmt;

use crate::types::{IrqNumber, TrapNumber};

pub mod hosted;

// Architecture modules
pub mod aarch64;
pub mod arm;
pub mod loongarch64;
pub mod powerpc64;
pub mod riscv64;
pub mod x86_64;

// Current architecture
#[cfg(target_arch = "x86_64")]
pub type NativeArch = x86_64::X86_64;

#[cfg(target_arch = "aarch64")]
pub type NativeArch = aarch64::Aarch64;

#[cfg(target_arch = "arm")]
pub type NativeArch = arm::Arm;

#[cfg(target_arch = "riscv64")]
pub type NativeArch = riscv64::Riscv64;

#[cfg(target_arch = "loongarch64")]
pub type NativeArch = loongarch64::LoongArch64;

#[cfg(target_arch = "powerpc64")]
pub type NativeArch = powerpc64::PowerPc64;

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "arm",
    target_arch = "riscv64",
    target_arch = "loongarch64",
    target_arch = "powerpc64"
)))]
compile_error!("irq_pipeline has no flag bridge for this target architecture");

// ============================================================================
// Flag Bridge
// ============================================================================

/// Translation between native interrupt-mask flags and the virtual stall bit
///
/// Implementations hold no state. For both boolean values,
/// `native_to_virtual(virtual_to_native(x)) == x`, and writing a value
/// produced by `virtual_to_native` then reading it back yields the same
/// stall state.
pub trait ArchFlagBridge {
    /// Native flags word
    type Native: Copy + Eq + fmt::Debug;

    /// Whether `native` has interrupts masked
    fn native_to_virtual(native: Self::Native) -> bool;

    /// Native flags with interrupts masked iff `stalled`
    fn virtual_to_native(stalled: bool) -> Self::Native;

    /// Read the hardware interrupt-mask register
    fn read_native() -> Self::Native;

    /// Apply the interrupt-mask bits of `native` to the hardware
    ///
    /// Must also be a compiler barrier: memory accesses are never moved
    /// across it.
    fn write_native(native: Self::Native);
}

/// Common architecture traits that all platforms must implement
pub trait Architecture: ArchFlagBridge + 'static {
    /// Architecture name
    const NAME: &'static str;

    /// First of the three out-of-band IPI vectors
    const OOB_IPI_BASE: IrqNumber;

    /// Classify an architecture trap number
    fn trap_kind(trap: TrapNumber) -> TrapKind;
}

// ============================================================================
// Trap Classification
// ============================================================================

/// Architecture-neutral trap classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapKind {
    /// Memory access fault (page/translation fault)
    PageFault,
    /// Software breakpoint
    Breakpoint,
    /// Hardware single-step or watchpoint
    SingleStep,
    /// Undefined or illegal instruction
    IllegalInstruction,
    /// FPU/vector unit used while disabled
    FpuAccess,
    /// FPU/vector arithmetic exception
    FpuError,
    /// Misaligned access
    Alignment,
    /// Integer arithmetic error (divide by zero, overflow)
    ArithmeticError,
    /// Privilege or protection violation
    ProtectionFault,
    /// System call entry
    Syscall,
    /// Machine check / bus error
    MachineCheck,
    /// Anything else
    Other,
}

impl TrapKind {
    /// Get kind name for debugging
    pub fn name(&self) -> &'static str {
        match self {
            TrapKind::PageFault => "page_fault",
            TrapKind::Breakpoint => "breakpoint",
            TrapKind::SingleStep => "single_step",
            TrapKind::IllegalInstruction => "illegal_instruction",
            TrapKind::FpuAccess => "fpu_access",
            TrapKind::FpuError => "fpu_error",
            TrapKind::Alignment => "alignment",
            TrapKind::ArithmeticError => "arithmetic",
            TrapKind::ProtectionFault => "protection_fault",
            TrapKind::Syscall => "syscall",
            TrapKind::MachineCheck => "machine_check",
            TrapKind::Other => "other",
        }
    }

    /// Debug traps a real-time debugger may own outright
    pub fn is_debug(&self) -> bool {
        matches!(self, TrapKind::Breakpoint | TrapKind::SingleStep)
    }
}

// ============================================================================
// Hard Interrupt Primitives
// ============================================================================

/// Mask hardware interrupts, returning the previous native flags
#[inline]
pub fn hard_local_irq_save<A: ArchFlagBridge>() -> A::Native {
    let flags = A::read_native();
    A::write_native(A::virtual_to_native(true));
    flags
}

/// Restore hardware interrupt state saved by [`hard_local_irq_save`]
#[inline]
pub fn hard_local_irq_restore<A: ArchFlagBridge>(flags: A::Native) {
    A::write_native(flags);
}

/// Mask hardware interrupts
#[inline]
pub fn hard_local_irq_disable<A: ArchFlagBridge>() {
    A::write_native(A::virtual_to_native(true));
}

/// Unmask hardware interrupts
#[inline]
pub fn hard_local_irq_enable<A: ArchFlagBridge>() {
    A::write_native(A::virtual_to_native(false));
}

/// Whether hardware interrupts are currently masked
#[inline]
pub fn hard_irqs_disabled<A: ArchFlagBridge>() -> bool {
    A::native_to_virtual(A::read_native())
}
