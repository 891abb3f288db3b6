//! ARM64 (AArch64) flag bridge
//!
//! The hardware mask is PSTATE.I, visible as DAIF bit 7. Only the I bit
//! carries the stall state; D, A and F are left alone on writes.

use bitflags::bitflags;

use crate::arch::{ArchFlagBridge, Architecture, TrapKind};
use crate::types::{IrqNumber, TrapNumber};

bitflags! {
    /// DAIF exception mask bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Daif: u64 {
        /// FIQ mask
        const F = 1 << 6;
        /// IRQ mask
        const I = 1 << 7;
        /// SError mask
        const A = 1 << 8;
        /// Debug mask
        const D = 1 << 9;
    }
}

/// ESR_ELx exception classes used as trap numbers
pub mod exception_class {
    use crate::types::TrapNumber;

    pub const UNKNOWN: TrapNumber = TrapNumber(0x00);
    pub const FP_ACCESS: TrapNumber = TrapNumber(0x07);
    pub const ILLEGAL_STATE: TrapNumber = TrapNumber(0x0e);
    pub const SVC64: TrapNumber = TrapNumber(0x15);
    pub const INST_ABORT_LOWER: TrapNumber = TrapNumber(0x20);
    pub const INST_ABORT: TrapNumber = TrapNumber(0x21);
    pub const PC_ALIGN: TrapNumber = TrapNumber(0x22);
    pub const DATA_ABORT_LOWER: TrapNumber = TrapNumber(0x24);
    pub const DATA_ABORT: TrapNumber = TrapNumber(0x25);
    pub const SP_ALIGN: TrapNumber = TrapNumber(0x26);
    pub const FP_EXC64: TrapNumber = TrapNumber(0x2c);
    pub const SERROR: TrapNumber = TrapNumber(0x2f);
    pub const BREAKPT_LOWER: TrapNumber = TrapNumber(0x30);
    pub const BREAKPT: TrapNumber = TrapNumber(0x31);
    pub const SOFTSTP_LOWER: TrapNumber = TrapNumber(0x32);
    pub const SOFTSTP: TrapNumber = TrapNumber(0x33);
    pub const WATCHPT_LOWER: TrapNumber = TrapNumber(0x34);
    pub const WATCHPT: TrapNumber = TrapNumber(0x35);
    pub const BRK64: TrapNumber = TrapNumber(0x3c);
}

/// ARM64 implementation of the flag bridge
#[derive(Debug, Clone, Copy, Default)]
pub struct Aarch64;

impl ArchFlagBridge for Aarch64 {
    type Native = Daif;

    #[inline]
    fn native_to_virtual(native: Daif) -> bool {
        native.contains(Daif::I)
    }

    #[inline]
    fn virtual_to_native(stalled: bool) -> Daif {
        if stalled {
            Daif::I
        } else {
            Daif::empty()
        }
    }

    #[inline]
    fn read_native() -> Daif {
        Daif::from_bits_retain(regs::read())
    }

    #[inline]
    fn write_native(native: Daif) {
        regs::write(native.bits())
    }
}

impl Architecture for Aarch64 {
    const NAME: &'static str = "aarch64";

    // SGIs 8-10, above the in-band kernel's IPIs
    const OOB_IPI_BASE: IrqNumber = IrqNumber(8);

    fn trap_kind(trap: TrapNumber) -> TrapKind {
        use exception_class::*;
        match trap {
            INST_ABORT_LOWER | INST_ABORT | DATA_ABORT_LOWER | DATA_ABORT => TrapKind::PageFault,
            BRK64 | BREAKPT_LOWER | BREAKPT => TrapKind::Breakpoint,
            SOFTSTP_LOWER | SOFTSTP | WATCHPT_LOWER | WATCHPT => TrapKind::SingleStep,
            UNKNOWN | ILLEGAL_STATE => TrapKind::IllegalInstruction,
            FP_ACCESS => TrapKind::FpuAccess,
            FP_EXC64 => TrapKind::FpuError,
            PC_ALIGN | SP_ALIGN => TrapKind::Alignment,
            SVC64 => TrapKind::Syscall,
            SERROR => TrapKind::MachineCheck,
            _ => TrapKind::Other,
        }
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod regs {
    use super::Daif;
    use core::arch::asm;

    #[inline(always)]
    pub fn read() -> u64 {
        let daif: u64;
        unsafe {
            asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack, preserves_flags));
        }
        daif
    }

    #[inline(always)]
    pub fn write(bits: u64) {
        unsafe {
            if bits & Daif::I.bits() != 0 {
                asm!("msr daifset, #2", options(nostack, preserves_flags));
            } else {
                asm!("msr daifclr, #2", options(nostack, preserves_flags));
            }
        }
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
mod regs {
    use super::Daif;
    use crate::arch::hosted;

    pub fn read() -> u64 {
        hosted::read()
    }

    pub fn write(bits: u64) {
        hosted::update(bits, Daif::I.bits());
    }
}
