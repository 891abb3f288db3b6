//! LoongArch64 flag bridge
//!
//! The hardware mask is CSR.CRMD.IE (bit 2). Writes use `csrxchg` with a
//! mask so the privilege and paging bits sharing the register stay put.
//! Trap numbers are ESTAT.Ecode values.

use bitflags::bitflags;

use crate::arch::{ArchFlagBridge, Architecture, TrapKind};
use crate::types::{IrqNumber, TrapNumber};

bitflags! {
    /// CRMD bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Crmd: u64 {
        /// Privilege level
        const PLV = 0b11;
        /// Global interrupt enable
        const IE = 1 << 2;
        /// Direct address translation
        const DA = 1 << 3;
        /// Paged address translation
        const PG = 1 << 4;
    }
}

/// ESTAT exception codes
pub mod ecode {
    use crate::types::TrapNumber;

    pub const PIL: TrapNumber = TrapNumber(0x1);
    pub const PIS: TrapNumber = TrapNumber(0x2);
    pub const PIF: TrapNumber = TrapNumber(0x3);
    pub const PME: TrapNumber = TrapNumber(0x4);
    pub const PNR: TrapNumber = TrapNumber(0x5);
    pub const PNX: TrapNumber = TrapNumber(0x6);
    pub const PPI: TrapNumber = TrapNumber(0x7);
    pub const ADE: TrapNumber = TrapNumber(0x8);
    pub const ALE: TrapNumber = TrapNumber(0x9);
    pub const BCE: TrapNumber = TrapNumber(0xa);
    pub const SYS: TrapNumber = TrapNumber(0xb);
    pub const BRK: TrapNumber = TrapNumber(0xc);
    pub const INE: TrapNumber = TrapNumber(0xd);
    pub const IPE: TrapNumber = TrapNumber(0xe);
    pub const FPD: TrapNumber = TrapNumber(0xf);
    pub const SXD: TrapNumber = TrapNumber(0x10);
    pub const ASXD: TrapNumber = TrapNumber(0x11);
    pub const FPE: TrapNumber = TrapNumber(0x12);
    pub const WATCH: TrapNumber = TrapNumber(0x13);
}

/// LoongArch64 implementation of the flag bridge
#[derive(Debug, Clone, Copy, Default)]
pub struct LoongArch64;

impl ArchFlagBridge for LoongArch64 {
    type Native = Crmd;

    #[inline]
    fn native_to_virtual(native: Crmd) -> bool {
        !native.contains(Crmd::IE)
    }

    #[inline]
    fn virtual_to_native(stalled: bool) -> Crmd {
        if stalled {
            Crmd::empty()
        } else {
            Crmd::IE
        }
    }

    #[inline]
    fn read_native() -> Crmd {
        Crmd::from_bits_retain(regs::read())
    }

    #[inline]
    fn write_native(native: Crmd) {
        regs::write(native.bits())
    }
}

impl Architecture for LoongArch64 {
    const NAME: &'static str = "loongarch64";

    const OOB_IPI_BASE: IrqNumber = IrqNumber(0x3f0);

    fn trap_kind(trap: TrapNumber) -> TrapKind {
        use ecode::*;
        match trap {
            PIL | PIS | PIF | PME => TrapKind::PageFault,
            PNR | PNX | PPI | ADE => TrapKind::ProtectionFault,
            ALE => TrapKind::Alignment,
            BCE => TrapKind::ArithmeticError,
            SYS => TrapKind::Syscall,
            BRK => TrapKind::Breakpoint,
            WATCH => TrapKind::SingleStep,
            INE | IPE => TrapKind::IllegalInstruction,
            FPD | SXD | ASXD => TrapKind::FpuAccess,
            FPE => TrapKind::FpuError,
            _ => TrapKind::Other,
        }
    }
}

#[cfg(all(target_arch = "loongarch64", target_os = "none"))]
mod regs {
    use super::Crmd;
    use core::arch::asm;

    #[inline(always)]
    pub fn read() -> u64 {
        let crmd: u64;
        unsafe {
            asm!("csrrd {}, 0x0", out(reg) crmd, options(nomem, nostack, preserves_flags));
        }
        crmd
    }

    #[inline(always)]
    pub fn write(bits: u64) {
        let value = bits & Crmd::IE.bits();
        unsafe {
            asm!(
                "csrxchg {val}, {mask}, 0x0",
                val = inout(reg) value => _,
                mask = in(reg) Crmd::IE.bits(),
                options(nostack, preserves_flags),
            );
        }
    }
}

#[cfg(not(all(target_arch = "loongarch64", target_os = "none")))]
mod regs {
    use super::Crmd;
    use crate::arch::hosted;

    pub fn read() -> u64 {
        hosted::read()
    }

    pub fn write(bits: u64) {
        hosted::update(bits, Crmd::IE.bits());
    }
}
