//! Shared harness for the integration tests
//!
//! A single recording object stands in for every collaborator: the
//! in-band kernel, the companion core, IPI delivery and the switch hooks.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use irq_pipeline::pipeline::{CompanionCore, InbandKernel, IpiDelivery, SwitchHooks};
use irq_pipeline::{
    Cpu, CpuId, IrqNumber, OobIpiKind, Pipeline, PipelineConfig, Platform, SavedContext, Stage,
    TrapEvent, TrapNumber,
};

/// Something a collaborator observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// In-band IRQ, with the in-band stall bit seen by the handler
    Inband(IrqNumber, bool),
    /// Out-of-band IRQ, with the stage and in-band stall bit seen by the handler
    Oob(IrqNumber, Stage, bool),
    Ipi(CpuId, OobIpiKind),
    TrapNotify(TrapNumber),
    TrapUnwind(TrapNumber),
    Raise(CpuId, IrqNumber),
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    pub steal_tick: AtomicBool,
    pub demote_on_trap: AtomicBool,
    /// Claim breakpoints and single-steps outright
    pub own_debug_traps: AtomicBool,
    /// Stage switches seen by the hooks
    pub to_oob: AtomicUsize,
    pub to_inband: AtomicUsize,
    /// Hook calls that entered a stage already current
    pub double_entries: AtomicUsize,
    in_oob: AtomicBool,
}

impl Recorder {
    pub fn leak() -> &'static Recorder {
        Box::leak(Box::default())
    }

    pub fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl InbandKernel for Recorder {
    fn handle_inband_irq(&self, cpu: Cpu<'_>, irq: IrqNumber) {
        self.push(Event::Inband(irq, cpu.is_stalled(Stage::InBand)));
    }
}

impl CompanionCore for Recorder {
    fn handle_oob_irq(&self, cpu: Cpu<'_>, irq: IrqNumber) {
        self.push(Event::Oob(
            irq,
            cpu.current_stage(),
            cpu.is_stalled(Stage::InBand),
        ));
    }

    fn handle_oob_ipi(&self, cpu: Cpu<'_>, kind: OobIpiKind) {
        self.push(Event::Ipi(cpu.id(), kind));
    }

    fn steal_tick(&self, _cpu: Cpu<'_>, _context: &SavedContext) -> bool {
        self.steal_tick.load(Ordering::Relaxed)
    }

    fn trap_notify(&self, cpu: Cpu<'_>, event: &mut TrapEvent<'_>) {
        self.push(Event::TrapNotify(event.number));
        if self.own_debug_traps.load(Ordering::Relaxed) && event.kind.is_debug() {
            event.handled = true;
        }
        if self.demote_on_trap.load(Ordering::Relaxed) {
            cpu.switch_inband();
        }
    }

    fn trap_unwind(&self, _cpu: Cpu<'_>, event: &mut TrapEvent<'_>) {
        self.push(Event::TrapUnwind(event.number));
    }
}

impl IpiDelivery for Recorder {
    fn raise(&self, target: CpuId, vector: IrqNumber) {
        self.push(Event::Raise(target, vector));
    }
}

impl SwitchHooks for Recorder {
    fn switch_prepare(&self, _cpu: CpuId, leaving_inband: bool) {
        if leaving_inband {
            if self.in_oob.swap(true, Ordering::AcqRel) {
                self.double_entries.fetch_add(1, Ordering::Relaxed);
            }
            self.to_oob.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn switch_finish(&self, _cpu: CpuId, entering_inband: bool) {
        if entering_inband {
            if !self.in_oob.swap(false, Ordering::AcqRel) {
                self.double_entries.fetch_add(1, Ordering::Relaxed);
            }
            self.to_inband.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Active single-purpose pipeline wired to a fresh recorder
pub fn setup(config: PipelineConfig) -> (Pipeline, &'static Recorder) {
    let rec = Recorder::leak();
    let platform = Platform::new(rec, rec).with_hooks(rec);
    let pipeline = Pipeline::new(config, platform).expect("valid config");
    pipeline.attach_companion(rec).expect("first companion");
    pipeline.activate();
    (pipeline, rec)
}

/// Out-of-band line used by the tests
pub const OOB_LINE: IrqNumber = IrqNumber(17);

/// Periodic tick line
pub const TICK: IrqNumber = IrqNumber(0);

pub fn ctx() -> SavedContext {
    SavedContext::kernel(0xffff_8000_0000_1000)
}
