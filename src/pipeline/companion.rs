//! Collaborator interfaces
//!
//! The pipeline calls out to three parties: the companion core that owns
//! the out-of-band stage, the in-band kernel that handles everything else,
//! and the architecture hooks that bracket each stage switch. All of them
//! are registered as `&'static` trait objects at boot.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::arch::{Architecture, NativeArch};
use crate::config::MAX_CPUS;
use crate::pipeline::ipi::OobIpiKind;
use crate::pipeline::Cpu;
use crate::trap::TrapEvent;
use crate::types::{CpuId, IrqNumber, SavedContext};

// ============================================================================
// Companion Core
// ============================================================================

/// The latency-critical core running on the out-of-band stage
///
/// `handle_oob_irq` and `handle_oob_ipi` run with hard interrupts masked,
/// on the out-of-band stage with that stage stalled. `steal_tick` runs
/// with hard interrupts masked too. The trap and syscall callbacks run
/// with whatever hard interrupt state the trap was taken with.
pub trait CompanionCore<A: Architecture = NativeArch>: Sync {
    /// Handle an IRQ on a line the companion owns
    fn handle_oob_irq(&self, cpu: Cpu<'_, A>, irq: IrqNumber);

    /// Handle an out-of-band IPI
    fn handle_oob_ipi(&self, cpu: Cpu<'_, A>, kind: OobIpiKind);

    /// Whether the periodic tick that interrupted `context` belongs to the
    /// out-of-band stage
    fn steal_tick(&self, _cpu: Cpu<'_, A>, _context: &SavedContext) -> bool {
        false
    }

    /// A synchronous trap was taken; may handle it outright or demote the
    /// current task to the in-band stage
    fn trap_notify(&self, _cpu: Cpu<'_, A>, _event: &mut TrapEvent<'_>) {}

    /// The trap announced by `trap_notify` has fully unwound
    fn trap_unwind(&self, _cpu: Cpu<'_, A>, _event: &mut TrapEvent<'_>) {}

    /// Offer a system call to the companion; `true` if it handled it
    fn handle_syscall(&self, _cpu: Cpu<'_, A>, _nr: usize, _context: &mut SavedContext) -> bool {
        false
    }
}

/// The general-purpose kernel's IRQ entry
pub trait InbandKernel<A: Architecture = NativeArch>: Sync {
    /// Handle an IRQ on the in-band stage
    ///
    /// Called with the in-band stage stalled and hard interrupts enabled
    /// once the pipeline is active.
    fn handle_inband_irq(&self, cpu: Cpu<'_, A>, irq: IrqNumber);
}

// ============================================================================
// Switch Hooks
// ============================================================================

/// Architecture hooks bracketing a stage switch
pub trait SwitchHooks: Sync {
    /// The in-band task on `cpu` is about to exec a new image
    fn exec_prepare(&self, _cpu: CpuId) {}

    /// About to switch stages
    fn switch_prepare(&self, _cpu: CpuId, _leaving_inband: bool) {}

    /// A stage switch just completed
    fn switch_finish(&self, _cpu: CpuId, _entering_inband: bool) {}
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSwitchHooks;

impl SwitchHooks for NoSwitchHooks {}

// ============================================================================
// Lazy FPU Switching
// ============================================================================

/// Save/restore of the in-band FPU context
pub trait FpuUnit: Sync {
    /// Save the live in-band FPU registers of `cpu`
    fn save(&self, cpu: CpuId);
    /// Reload the in-band FPU registers saved by [`FpuUnit::save`]
    fn restore(&self, cpu: CpuId);
}

/// In-band FPU context ownership on one CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FpuState {
    /// Running in-band; nothing to do
    Idle = 0,
    /// Out-of-band with the in-band context still live in the registers
    Deferred = 1,
    /// Out-of-band after saving the in-band context
    Saved = 2,
}

impl FpuState {
    fn from_u8(raw: u8) -> FpuState {
        match raw {
            1 => FpuState::Deferred,
            2 => FpuState::Saved,
            _ => FpuState::Idle,
        }
    }
}

/// Switch hooks that save in-band FPU state only when the out-of-band
/// stage actually uses the FPU
#[derive(Debug)]
pub struct LazyFpuSwitch<F: FpuUnit> {
    unit: F,
    state: [AtomicU8; MAX_CPUS],
}

impl<F: FpuUnit> LazyFpuSwitch<F> {
    /// Wrap `unit`
    pub const fn new(unit: F) -> Self {
        Self {
            unit,
            state: [const { AtomicU8::new(FpuState::Idle as u8) }; MAX_CPUS],
        }
    }

    /// The wrapped FPU unit
    pub fn unit(&self) -> &F {
        &self.unit
    }

    /// Current FPU ownership on `cpu`
    pub fn state(&self, cpu: CpuId) -> FpuState {
        self.state
            .get(cpu.0)
            .map_or(FpuState::Idle, |s| FpuState::from_u8(s.load(Ordering::Acquire)))
    }

    /// Called by out-of-band code before touching the FPU; saves the
    /// in-band context on first use. Returns `true` if a save happened.
    pub fn claim_fpu(&self, cpu: CpuId) -> bool {
        let Some(slot) = self.state.get(cpu.0) else {
            return false;
        };
        if slot
            .compare_exchange(
                FpuState::Deferred as u8,
                FpuState::Saved as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.unit.save(cpu);
            true
        } else {
            false
        }
    }
}

impl<F: FpuUnit> SwitchHooks for LazyFpuSwitch<F> {
    fn exec_prepare(&self, cpu: CpuId) {
        // The old image's FPU context dies with it
        if let Some(slot) = self.state.get(cpu.0) {
            slot.store(FpuState::Idle as u8, Ordering::Release);
        }
    }

    fn switch_prepare(&self, cpu: CpuId, leaving_inband: bool) {
        if !leaving_inband {
            return;
        }
        if let Some(slot) = self.state.get(cpu.0) {
            slot.store(FpuState::Deferred as u8, Ordering::Release);
        }
    }

    fn switch_finish(&self, cpu: CpuId, entering_inband: bool) {
        if !entering_inband {
            return;
        }
        if let Some(slot) = self.state.get(cpu.0) {
            if slot.swap(FpuState::Idle as u8, Ordering::AcqRel) == FpuState::Saved as u8 {
                self.unit.restore(cpu);
            }
        }
    }
}
