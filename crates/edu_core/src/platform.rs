//! Services the driver needs from its environment.
//!
//! A kernel, a VFIO-style user-space back-end or a simulator implements
//! [`Platform`] for one PCI function; [`EduDevice::attach`] consumes it.
//!
//! [`EduDevice::attach`]: crate::device::EduDevice::attach

use crate::error::Result;
use crate::irq::IrqReturn;
use crate::mmio::IoMemory;
use crate::region::PhysicalMemory;
use edu_common::ioctl::RegionInfo;
use edu_common::mmio::{EDU_DEVICE_ID, EDU_VENDOR_ID};
use std::sync::Arc;

/// Interrupt handler as registered with the platform. Receives the line
/// number it fired on.
pub type IrqHandlerFn = Arc<dyn Fn(u32) -> IrqReturn + Send + Sync>;

/// Receipt for a registered interrupt handler, returned to the platform to
/// unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqRegistration {
    pub line: u32,
    pub token: u64,
}

/// Vendor and device identifiers from PCI configuration space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
}

impl PciIdentity {
    pub const EDU: PciIdentity = PciIdentity {
        vendor_id: EDU_VENDOR_ID,
        device_id: EDU_DEVICE_ID,
    };

    pub fn is_edu(&self) -> bool {
        *self == Self::EDU
    }
}

/// One PCI function and the kernel services around it.
pub trait Platform: Send + Sync {
    fn identity(&self) -> PciIdentity;

    /// Interrupt line routed to the function, if any.
    fn irq_line(&self) -> Option<u32>;

    /// Reserves a BAR for exclusive use and reports its physical bounds.
    ///
    /// Fails with `ResourceUnavailable` if the BAR is already reserved.
    fn request_region(&self, bar: usize) -> Result<RegionInfo>;

    /// Releases a BAR reserved with [`Platform::request_region`].
    fn release_region(&self, bar: usize);

    /// Maps a reserved region for driver use.
    fn ioremap(&self, region: &RegionInfo) -> Result<Arc<dyn IoMemory>>;

    /// Installs `handler` on `line`. Lines may be shared.
    fn request_irq(&self, line: u32, handler: IrqHandlerFn) -> Result<IrqRegistration>;

    /// Removes a handler. Returns only once no invocation of it is running.
    fn free_irq(&self, registration: IrqRegistration);

    /// Physical address space consumer mappings are drawn from.
    fn physical_memory(&self) -> Arc<dyn PhysicalMemory>;
}
