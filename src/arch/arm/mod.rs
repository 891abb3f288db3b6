//! 32-bit ARM flag bridge
//!
//! The hardware mask is CPSR.I (bit 7). Mode bits live in the same
//! register, so writes go through `cpsid`/`cpsie` and never rewrite the
//! whole control byte.

use bitflags::bitflags;

use crate::arch::{ArchFlagBridge, Architecture, TrapKind};
use crate::types::{IrqNumber, TrapNumber};

bitflags! {
    /// CPSR mask bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Cpsr: u32 {
        /// FIQ mask
        const F = 1 << 6;
        /// IRQ mask
        const I = 1 << 7;
        /// Asynchronous abort mask
        const A = 1 << 8;
    }
}

/// Trap numbers reported by the ARM fault handlers
pub mod traps {
    use crate::types::TrapNumber;

    pub const ACCESS: TrapNumber = TrapNumber(0);
    pub const SECTION: TrapNumber = TrapNumber(1);
    pub const DABT: TrapNumber = TrapNumber(2);
    pub const PABT: TrapNumber = TrapNumber(3);
    pub const BREAK: TrapNumber = TrapNumber(4);
    pub const FPU: TrapNumber = TrapNumber(5);
    pub const VFP: TrapNumber = TrapNumber(6);
    pub const UNDEFINSTR: TrapNumber = TrapNumber(7);
    pub const ALIGNMENT: TrapNumber = TrapNumber(8);
    pub const SWI: TrapNumber = TrapNumber(9);
}

/// 32-bit ARM implementation of the flag bridge
#[derive(Debug, Clone, Copy, Default)]
pub struct Arm;

impl ArchFlagBridge for Arm {
    type Native = Cpsr;

    #[inline]
    fn native_to_virtual(native: Cpsr) -> bool {
        native.contains(Cpsr::I)
    }

    #[inline]
    fn virtual_to_native(stalled: bool) -> Cpsr {
        if stalled {
            Cpsr::I
        } else {
            Cpsr::empty()
        }
    }

    #[inline]
    fn read_native() -> Cpsr {
        Cpsr::from_bits_retain(regs::read())
    }

    #[inline]
    fn write_native(native: Cpsr) {
        regs::write(native.bits())
    }
}

impl Architecture for Arm {
    const NAME: &'static str = "arm";

    const OOB_IPI_BASE: IrqNumber = IrqNumber(8);

    fn trap_kind(trap: TrapNumber) -> TrapKind {
        use traps::*;
        match trap {
            ACCESS | SECTION | DABT | PABT => TrapKind::PageFault,
            BREAK => TrapKind::Breakpoint,
            FPU => TrapKind::FpuError,
            VFP => TrapKind::FpuAccess,
            UNDEFINSTR => TrapKind::IllegalInstruction,
            ALIGNMENT => TrapKind::Alignment,
            SWI => TrapKind::Syscall,
            _ => TrapKind::Other,
        }
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod regs {
    use super::Cpsr;
    use core::arch::asm;

    #[inline(always)]
    pub fn read() -> u32 {
        let cpsr: u32;
        unsafe {
            asm!("mrs {}, cpsr", out(reg) cpsr, options(nomem, nostack, preserves_flags));
        }
        cpsr
    }

    #[inline(always)]
    pub fn write(bits: u32) {
        unsafe {
            if bits & Cpsr::I.bits() != 0 {
                asm!("cpsid i", options(nostack, preserves_flags));
            } else {
                asm!("cpsie i", options(nostack, preserves_flags));
            }
        }
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod regs {
    use super::Cpsr;
    use crate::arch::hosted;

    pub fn read() -> u32 {
        hosted::read() as u32
    }

    pub fn write(bits: u32) {
        hosted::update(u64::from(bits), u64::from(Cpsr::I.bits()));
    }
}
