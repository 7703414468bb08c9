//! Driver core for the EDU PCI accelerator.
//!
//! The card computes factorials and reports completion with an interrupt.
//! This crate implements the interrupt-synchronized register protocol around
//! it: the register map, consumer mappings of the BAR, the interrupt handler,
//! the completion gate that hands a completion from interrupt context to a
//! blocked consumer, and the control requests of the device file. The
//! environment (PCI access, interrupt delivery, physical memory) is reached
//! through the [`Platform`] trait so the same driver runs against real
//! hardware or the simulated card in `edu_hw`.

/// Driver configuration applied at attach.
pub mod config;

/// Device handle lifecycle and the device file.
///
/// Attach acquires the BAR, its mapping and the interrupt line; detach
/// releases them in reverse and cancels every blocked waiter.
pub mod device;

/// Control request dispatcher behind `EduFile::ioctl`.
pub mod dispatch;

/// Error type shared by every driver operation.
pub mod error;

/// Single-slot completion handoff between interrupt and process context.
pub mod gate;

/// Completion interrupt handler.
///
/// Performs the disable, read, acknowledge, capture sequence and signals the
/// completion gate exactly once per device-reported completion.
pub mod irq;

/// Register window access.
///
/// Object-safe I/O memory seam, volatile and memory-backed implementations,
/// and bounded, revocable windows over them.
pub mod mmio;

/// Environment services consumed at attach.
pub mod platform;

/// Consumer mappings of physical memory.
pub mod region;

/// Typed register map of the card.
pub mod regs;

pub use config::DriverConfig;
pub use device::{EduDevice, EduFile};
pub use dispatch::ControlReply;
pub use error::{EduError, Result};
pub use gate::{CompletionGate, GateStats};
pub use irq::{InterruptHandler, IrqReturn, IrqStats};
pub use mmio::{IoMemory, IoSlice, Lease, MmioWindow, RamMemory, RawMmio};
pub use platform::{IrqHandlerFn, IrqRegistration, PciIdentity, Platform};
pub use region::{MappedRegion, MemoryAttributes, PAGE_SIZE, PhysicalMemory, RegionMapper};
pub use regs::{Access, Register, RegisterSnapshot, Registers};
