//! Completion interrupt handler.
//!
//! Runs in interrupt context with its line masked. It must not block and
//! cannot report failure to anyone, so register faults are logged and the
//! handler returns.

use crate::device::DeviceShared;
use crate::error::Result;
use crate::regs::Registers;
use log::{debug, error, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Outcome reported back to the interrupt controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The device had raised the interrupt and it has been serviced.
    Handled,
    /// The device had nothing pending; another device on a shared line
    /// raised it.
    NotMine,
}

/// Snapshot of the handler's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqStats {
    pub handled: u64,
    pub spurious: u64,
    pub faults: u64,
    /// Interrupt status captured by the most recent completion.
    pub last_status: u32,
    /// Result register captured by the most recent completion.
    pub last_result: u32,
}

#[derive(Debug, Default)]
pub(crate) struct IrqState {
    handled: AtomicU64,
    spurious: AtomicU64,
    faults: AtomicU64,
    last_status: AtomicU32,
    last_result: AtomicU32,
}

impl IrqState {
    pub(crate) fn stats(&self) -> IrqStats {
        IrqStats {
            handled: self.handled.load(Ordering::Relaxed),
            spurious: self.spurious.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            last_status: self.last_status.load(Ordering::Relaxed),
            last_result: self.last_result.load(Ordering::Relaxed),
        }
    }
}

struct Capture {
    status: u32,
    value: u32,
}

/// Interrupt handler bound to one attached device.
pub struct InterruptHandler {
    shared: Arc<DeviceShared>,
}

impl InterruptHandler {
    pub(crate) fn new(shared: Arc<DeviceShared>) -> Self {
        Self { shared }
    }

    /// Services one interrupt on `line`.
    pub fn handle(&self, line: u32) -> IrqReturn {
        let shared = &self.shared;
        let regs = Registers::new(&shared.window);
        match service(&regs, shared.is_armed()) {
            Ok(Some(capture)) => {
                debug!(
                    "edu: irq {line}: status {:#x}, value {:#x}",
                    capture.status, capture.value
                );
                // The card is left disabled until the next ENABLE_IRQ.
                shared.armed.store(false, Ordering::Release);
                shared.irq.last_status.store(capture.status, Ordering::Relaxed);
                shared.irq.last_result.store(capture.value, Ordering::Relaxed);
                shared.irq.handled.fetch_add(1, Ordering::Relaxed);
                shared.gate.signal_completion();
                IrqReturn::Handled
            }
            Ok(None) => {
                warn!("edu: irq {line}: status clear, not ours");
                shared.irq.spurious.fetch_add(1, Ordering::Relaxed);
                IrqReturn::NotMine
            }
            Err(e) => {
                error!("edu: irq {line}: {e}");
                shared.irq.faults.fetch_add(1, Ordering::Relaxed);
                IrqReturn::Handled
            }
        }
    }
}

/// Disable, read status, acknowledge, capture the result. The order matters:
/// the card can raise the line again as soon as the acknowledge lands, and
/// the result is only stable once the completion bit has been seen.
///
/// With the enable bit clear the card latches nothing when a job finishes,
/// so the busy bit is sampled first. A job that was running on entry and is
/// done once the card has been re-armed finished inside the disabled window
/// and is collected here instead of being lost.
fn service(regs: &Registers<'_>, armed: bool) -> Result<Option<Capture>> {
    let busy_on_entry = regs.is_busy()?;
    regs.set_interrupt_enable(false)?;
    let status = regs.irq_status()?;
    if status != 0 {
        regs.acknowledge(status)?;
        let value = regs.result()?;
        return Ok(Some(Capture { status, value }));
    }

    // Raised by another device on the line.
    if !armed {
        return Ok(None);
    }
    regs.set_interrupt_enable(true)?;
    if !busy_on_entry || regs.is_busy()? {
        return Ok(None);
    }
    regs.set_interrupt_enable(false)?;
    let status = regs.irq_status()?;
    if status != 0 {
        regs.acknowledge(status)?;
    }
    let value = regs.result()?;
    Ok(Some(Capture { status, value }))
}
