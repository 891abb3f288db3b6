//! End-to-end pipeline scenarios

mod common;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use common::*;
use irq_pipeline::pipeline::{
    CompanionCore, FpuState, FpuUnit, IpiDelivery, LazyFpuSwitch, OobIpiKind,
};
use irq_pipeline::{
    Architecture, Cpu, CpuId, InvariantPolicy, IrqNumber, NativeArch, Pipeline, PipelineConfig,
    Platform, Stage, TrapKind, TrapNumber,
};

// ════════════════════════════════════════════════════════════
// Stolen Tick
// ════════════════════════════════════════════════════════════

#[test]
fn stolen_tick_round_trips_through_oob() {
    let (pipeline, rec) = setup(PipelineConfig::new(1).with_tick_irq(TICK));
    rec.steal_tick.store(true, Ordering::Relaxed);
    let cpu = pipeline.cpu(CpuId(0)).unwrap();

    assert!(!cpu.is_stalled(Stage::InBand));
    assert!(!cpu.is_stalled(Stage::OutOfBand));

    cpu.handle_irq(TICK, &ctx());

    assert_eq!(rec.take(), [Event::Oob(TICK, Stage::OutOfBand, false)]);
    assert!(cpu.running_inband());
    assert!(!cpu.is_stalled(Stage::InBand));
    assert!(!cpu.has_pending(Stage::OutOfBand));
    assert!(!cpu.has_pending(Stage::InBand));

    let snap = cpu.counters().snapshot();
    assert_eq!((snap.to_oob, snap.to_inband), (1, 1));
    assert_eq!(rec.to_oob.load(Ordering::Relaxed), 1);
    assert_eq!(rec.to_inband.load(Ordering::Relaxed), 1);
}

// ════════════════════════════════════════════════════════════
// OOB IRQ Under local_irq_save()
// ════════════════════════════════════════════════════════════

#[test]
fn oob_irq_preempts_inband_critical_section() {
    let (pipeline, rec) = setup(PipelineConfig::new(1));
    pipeline.set_oob_irq(OOB_LINE).unwrap();
    let cpu = pipeline.cpu(CpuId(0)).unwrap();

    let before = cpu.irqs_disabled();
    let flags = cpu.local_irq_save();
    assert!(cpu.irqs_disabled());

    cpu.handle_irq(OOB_LINE, &ctx());
    assert_eq!(rec.take(), [Event::Oob(OOB_LINE, Stage::OutOfBand, true)]);

    // An in-band device IRQ in the same window waits
    cpu.handle_irq(IrqNumber(44), &ctx());
    assert!(rec.take().is_empty());

    cpu.local_irq_restore(flags);
    assert_eq!(cpu.irqs_disabled(), before);
    assert_eq!(rec.take(), [Event::Inband(IrqNumber(44), true)]);
    assert!(cpu.running_inband());
}

// ════════════════════════════════════════════════════════════
// Faults From The OOB Stage
// ════════════════════════════════════════════════════════════

#[test]
fn oob_fault_is_demoted_before_inband_handling() {
    let (pipeline, rec) = setup(PipelineConfig::new(1).with_policy(InvariantPolicy::Panic));
    rec.demote_on_trap.store(true, Ordering::Relaxed);
    let cpu = pipeline.cpu(CpuId(0)).unwrap();
    let fault = TrapNumber(14);

    cpu.switch_oob();
    let mut ctx = ctx();
    ctx.fault_address = 0xdead_0000;
    let ran = cpu.route_trap(fault, &mut ctx, |_, ctx| {
        assert!(cpu.running_inband());
        ctx.fault_address
    });

    assert_eq!(ran, Some(0xdead_0000));
    assert_eq!(
        rec.take(),
        [Event::TrapNotify(fault), Event::TrapUnwind(fault)]
    );
    assert_eq!(cpu.counters().violations.get(), 0);
}

#[test]
fn debugger_owns_breakpoints() {
    let (pipeline, rec) = setup(PipelineConfig::new(1));
    rec.own_debug_traps.store(true, Ordering::Relaxed);
    let cpu = pipeline.cpu(CpuId(0)).unwrap();
    let first = |want: fn(TrapKind) -> bool| {
        (0..0x4000)
            .map(TrapNumber)
            .find(|&n| want(NativeArch::trap_kind(n)))
            .unwrap()
    };
    let breakpoint = first(|kind| kind == TrapKind::Breakpoint);
    let fault = first(|kind| kind == TrapKind::PageFault);

    assert_eq!(cpu.route_trap(breakpoint, &mut ctx(), |_, _| "in-band"), None);
    assert_eq!(
        cpu.route_trap(fault, &mut ctx(), |kind, _| kind),
        Some(TrapKind::PageFault)
    );
    assert_eq!(
        rec.take(),
        [
            Event::TrapNotify(breakpoint),
            Event::TrapUnwind(breakpoint),
            Event::TrapNotify(fault),
            Event::TrapUnwind(fault),
        ]
    );
    assert_eq!(cpu.trap_depth(), 0);
}

// ════════════════════════════════════════════════════════════
// Cross-CPU Signaling
// ════════════════════════════════════════════════════════════

/// Per-CPU mailboxes standing in for the interrupt controller
struct Mailboxes {
    slots: Vec<Mutex<Vec<IrqNumber>>>,
}

impl Mailboxes {
    fn leak(nr_cpus: usize) -> &'static Mailboxes {
        Box::leak(Box::new(Mailboxes {
            slots: (0..nr_cpus).map(|_| Mutex::new(Vec::new())).collect(),
        }))
    }

    fn drain(&self, cpu: CpuId) -> Vec<IrqNumber> {
        std::mem::take(&mut *self.slots[cpu.0].lock().unwrap())
    }
}

impl IpiDelivery for Mailboxes {
    fn raise(&self, target: CpuId, vector: IrqNumber) {
        self.slots[target.0].lock().unwrap().push(vector);
    }
}

#[test]
fn oob_ipi_reaches_stalled_cpu() {
    let rec = Recorder::leak();
    let mailboxes = Mailboxes::leak(2);
    let pipeline: Pipeline =
        Pipeline::new(PipelineConfig::new(2), Platform::new(rec, mailboxes)).unwrap();
    pipeline.attach_companion(rec).unwrap();
    pipeline.activate();
    let payload = AtomicU64::new(0);

    std::thread::scope(|s| {
        s.spawn(|| {
            let cpu = pipeline.cpu(CpuId(0)).unwrap();
            payload.store(0xfeed, Ordering::Relaxed);
            cpu.send_oob_ipi(CpuId(1), OobIpiKind::CallFunction).unwrap();
        });
        s.spawn(|| {
            let cpu = pipeline.cpu(CpuId(1)).unwrap();
            let _guard = cpu.irq_guard();
            let vectors = loop {
                let pending = mailboxes.drain(CpuId(1));
                if !pending.is_empty() {
                    break pending;
                }
                std::thread::yield_now();
            };
            for vector in vectors {
                cpu.handle_irq(vector, &ctx());
            }
            assert_eq!(payload.load(Ordering::Relaxed), 0xfeed);
        });
    });

    assert_eq!(
        rec.take(),
        [Event::Ipi(CpuId(1), OobIpiKind::CallFunction)]
    );
    let cpu0 = pipeline.cpu(CpuId(0)).unwrap().counters().snapshot();
    let cpu1 = pipeline.cpu(CpuId(1)).unwrap().counters().snapshot();
    assert_eq!(cpu0.ipis_sent, 1);
    assert_eq!(cpu1.ipis_received, 1);
    assert_eq!(cpu1.inband_logged, 0);
}

// ════════════════════════════════════════════════════════════
// Lazy FPU Switching
// ════════════════════════════════════════════════════════════

#[derive(Default)]
struct CountingFpu {
    saves: AtomicUsize,
    restores: AtomicUsize,
}

impl FpuUnit for CountingFpu {
    fn save(&self, _cpu: CpuId) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }

    fn restore(&self, _cpu: CpuId) {
        self.restores.fetch_add(1, Ordering::Relaxed);
    }
}

/// Companion that uses the FPU only for one line
struct FpuUser {
    fpu: &'static LazyFpuSwitch<CountingFpu>,
    fpu_line: IrqNumber,
}

impl CompanionCore for FpuUser {
    fn handle_oob_irq(&self, cpu: Cpu<'_>, irq: IrqNumber) {
        if irq == self.fpu_line {
            self.fpu.claim_fpu(cpu.id());
            self.fpu.claim_fpu(cpu.id());
        }
    }

    fn handle_oob_ipi(&self, _cpu: Cpu<'_>, _kind: OobIpiKind) {}
}

#[test]
fn fpu_saved_only_when_oob_uses_it() {
    let fpu: &'static LazyFpuSwitch<CountingFpu> =
        Box::leak(Box::new(LazyFpuSwitch::new(CountingFpu::default())));
    let companion: &'static FpuUser = Box::leak(Box::new(FpuUser {
        fpu,
        fpu_line: IrqNumber(21),
    }));
    let rec = Recorder::leak();
    let pipeline: Pipeline = Pipeline::new(
        PipelineConfig::new(1),
        Platform::new(rec, rec).with_hooks(fpu),
    )
    .unwrap();
    pipeline.attach_companion(companion).unwrap();
    pipeline.set_oob_irq(IrqNumber(21)).unwrap();
    pipeline.set_oob_irq(IrqNumber(22)).unwrap();
    pipeline.activate();
    let cpu = pipeline.cpu(CpuId(0)).unwrap();

    cpu.handle_irq(IrqNumber(22), &ctx());
    assert_eq!(fpu.unit().saves.load(Ordering::Relaxed), 0);

    cpu.handle_irq(IrqNumber(21), &ctx());
    assert_eq!(fpu.unit().saves.load(Ordering::Relaxed), 1);
    assert_eq!(fpu.unit().restores.load(Ordering::Relaxed), 1);
    assert_eq!(fpu.state(CpuId(0)), FpuState::Idle);
}
