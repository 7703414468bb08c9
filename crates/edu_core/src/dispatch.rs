//! Control request dispatcher.
//!
//! Translates the three requests of the device file into completion-gate and
//! register operations. Each request runs to completion before returning.

use crate::device::DeviceShared;
use crate::error::{EduError, Result};
use crate::regs::{Register, Registers};
use edu_common::ioctl::{Command, RegionInfo};
use log::{Level, debug, log_enabled};

/// Result payload of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    /// The region bounds payload.
    Region(RegionInfo),
    /// Success with no payload.
    Empty,
}

impl ControlReply {
    pub fn region(&self) -> Option<RegionInfo> {
        match self {
            ControlReply::Region(info) => Some(*info),
            ControlReply::Empty => None,
        }
    }

    /// Copies the payload into `out` and returns the number of bytes written.
    pub fn write_to(&self, out: &mut [u8]) -> Result<usize> {
        match self {
            ControlReply::Region(info) => {
                let dst = out
                    .get_mut(..RegionInfo::SIZE)
                    .ok_or(EduError::InvalidArgument("output buffer too small"))?;
                dst.copy_from_slice(&info.to_bytes());
                Ok(RegionInfo::SIZE)
            }
            ControlReply::Empty => Ok(0),
        }
    }
}

pub(crate) struct Dispatcher<'a> {
    shared: &'a DeviceShared,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(shared: &'a DeviceShared) -> Self {
        Self { shared }
    }

    pub(crate) fn dispatch(&self, request: u32) -> Result<ControlReply> {
        match Command::from_request(request) {
            Some(Command::WaitIrq) => self.wait_for_completion().map(ControlReply::Region),
            Some(Command::EnableIrq) => self.enable_interrupt().map(|()| ControlReply::Empty),
            Some(Command::GetBarInfo) => self.region_info().map(ControlReply::Region),
            None => Err(EduError::InvalidOperation(request)),
        }
    }

    /// Blocks until the interrupt handler reports a completion.
    pub(crate) fn wait_for_completion(&self) -> Result<RegionInfo> {
        if log_enabled!(Level::Debug) {
            let regs = Registers::new(&self.shared.window);
            if let Ok(live) = regs.read(Register::Liveness) {
                debug!("edu: wait irq, liveness {live:#x}");
            }
        }
        self.shared.gate.await_completion()?;
        Ok(self.shared.region)
    }

    /// Re-arms completion interrupts.
    pub(crate) fn enable_interrupt(&self) -> Result<()> {
        if self.shared.gate.is_closed() {
            return Err(EduError::Detached);
        }
        self.shared.arm(true)?;
        if log_enabled!(Level::Debug) {
            if let Ok(status) = Registers::new(&self.shared.window).status() {
                debug!("edu: enable irq, status {status:#x}");
            }
        }
        Ok(())
    }

    pub(crate) fn region_info(&self) -> Result<RegionInfo> {
        if self.shared.gate.is_closed() {
            return Err(EduError::Detached);
        }
        Ok(self.shared.region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::{IoMemory, MmioWindow, RamMemory};
    use edu_common::mmio;
    use std::sync::Arc;

    fn shared() -> (DeviceShared, MmioWindow) {
        let ram: Arc<dyn IoMemory> = Arc::new(RamMemory::new(0x100));
        let window = MmioWindow::new(ram);
        let region = RegionInfo::new(0xfea0_0000, 0x10_0000);
        (DeviceShared::new(window.clone(), region, 11), window)
    }

    #[test]
    fn unknown_request_is_invalid_operation() {
        let (shared, _) = shared();
        let dispatcher = Dispatcher::new(&shared);
        assert_eq!(dispatcher.dispatch(0x6504), Err(EduError::InvalidOperation(0x6504)));
        assert_eq!(dispatcher.dispatch(0), Err(EduError::InvalidOperation(0)));
    }

    #[test]
    fn bar_info_reports_attach_time_bounds() {
        let (shared, _) = shared();
        let reply = Dispatcher::new(&shared)
            .dispatch(Command::GetBarInfo.request())
            .unwrap();
        assert_eq!(reply.region(), Some(RegionInfo::new(0xfea0_0000, 0x10_0000)));
    }

    #[test]
    fn enable_sets_the_enable_bit() {
        let (shared, window) = shared();
        let reply = Dispatcher::new(&shared)
            .dispatch(Command::EnableIrq.request())
            .unwrap();
        assert_eq!(reply, ControlReply::Empty);
        assert_eq!(window.read32(mmio::STATUS).unwrap(), mmio::status::IRQ_ENABLE);
        assert!(shared.is_armed());
    }

    #[test]
    fn wait_returns_after_a_pending_completion() {
        let (shared, _) = shared();
        shared.gate.signal_completion();
        let reply = Dispatcher::new(&shared)
            .dispatch(Command::WaitIrq.request())
            .unwrap();
        assert_eq!(reply.region(), Some(shared.region));
        assert!(!shared.gate.is_pending());
    }

    #[test]
    fn requests_after_close_fail() {
        let (shared, _) = shared();
        shared.gate.close();
        let dispatcher = Dispatcher::new(&shared);
        assert_eq!(
            dispatcher.dispatch(Command::WaitIrq.request()),
            Err(EduError::Cancelled)
        );
        assert_eq!(
            dispatcher.dispatch(Command::EnableIrq.request()),
            Err(EduError::Detached)
        );
        assert_eq!(
            dispatcher.dispatch(Command::GetBarInfo.request()),
            Err(EduError::Detached)
        );
    }

    #[test]
    fn payload_needs_room_for_the_whole_region() {
        let reply = ControlReply::Region(RegionInfo::new(0x1000, 0x1000));
        let mut small = [0u8; 16];
        assert!(matches!(
            reply.write_to(&mut small),
            Err(EduError::InvalidArgument(_))
        ));
        let mut buf = [0u8; 32];
        assert_eq!(reply.write_to(&mut buf).unwrap(), RegionInfo::SIZE);
        assert_eq!(&buf[16..24], &0x1000u64.to_le_bytes());
        assert_eq!(ControlReply::Empty.write_to(&mut small).unwrap(), 0);
    }
}
