//! irq_pipeline - a dual-stage interrupt pipeline
//!
//! This crate lets a latency-critical companion core (the out-of-band
//! stage) take hardware interrupts ahead of, and independently from, the
//! general-purpose kernel (the in-band stage). Each stage has its own
//! virtual interrupt mask, so the in-band kernel can disable its own
//! interrupts without ever delaying the out-of-band stage.
//!
//! ## Layout
//!
//! - [`arch`]: per-architecture flag bridges and hard interrupt primitives
//! - [`pipeline`]: per-CPU state, virtual masks, stage control and IPIs
//! - [`interrupt`]: the in-band irqflags API
//! - [`trap`]: synchronous trap routing

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(
    all(target_arch = "powerpc64", target_os = "none"),
    feature(asm_experimental_arch)
)]
// Kernel-appropriate clippy configuration
// Hardware register code often uses explicit bit shifts for documentation
#![allow(clippy::identity_op)]
// Kernel code often needs explicit casts for register words
#![allow(clippy::unnecessary_cast)]

// Core types
pub mod config;
pub mod error;
pub mod types;

pub mod arch;
pub mod interrupt;
pub mod pipeline;
pub mod trap;

pub use arch::{ArchFlagBridge, Architecture, NativeArch, TrapKind};
pub use config::{InvariantPolicy, PipelineConfig, MAX_CPUS};
pub use error::{InvariantViolation, PipelineError, Result};
pub use interrupt::{irqs_disabled_flags, InbandIrqGuard};
pub use pipeline::{
    CompanionCore, Cpu, InbandKernel, IpiDelivery, OobIpiKind, Pipeline, Platform, SwitchHooks,
};
pub use trap::{SyscallRoute, TrapEvent};
pub use types::{CpuId, IrqNumber, SavedContext, Stage, TrapNumber, IRQ_SPACE};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
