//! Device handle and device file.
//!
//! [`EduDevice`] owns everything acquired at attach: the BAR reservation, the
//! register mapping, the interrupt registration and the completion gate.
//! Dropping it (or calling [`EduDevice::detach`]) gives them back in reverse
//! order. [`EduFile`] is what a consumer holds after opening the device; it
//! stays valid as an object after detach but every operation on it fails.

use crate::config::DriverConfig;
use crate::dispatch::{ControlReply, Dispatcher};
use crate::error::{EduError, Result};
use crate::gate::{CompletionGate, GateStats};
use crate::irq::{InterruptHandler, IrqState, IrqStats};
use crate::mmio::{Lease, MmioWindow};
use crate::platform::{IrqRegistration, Platform};
use crate::region::{MappedRegion, RegionMapper};
use crate::regs::Registers;
use edu_common::ioctl::{Command, RegionInfo};
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// State shared between the handle, its files and the interrupt handler.
pub(crate) struct DeviceShared {
    pub(crate) window: MmioWindow,
    pub(crate) region: RegionInfo,
    pub(crate) irq_line: u32,
    pub(crate) gate: CompletionGate,
    pub(crate) irq: IrqState,
    /// Whether the consumer last asked for completion interrupts. The
    /// handler clears its own disable back to this state.
    pub(crate) armed: AtomicBool,
}

impl DeviceShared {
    pub(crate) fn new(window: MmioWindow, region: RegionInfo, irq_line: u32) -> Self {
        Self {
            window,
            region,
            irq_line,
            gate: CompletionGate::new(),
            irq: IrqState::default(),
            armed: AtomicBool::new(false),
        }
    }

    /// Arms or disarms the card and records the choice.
    pub(crate) fn arm(&self, enabled: bool) -> Result<()> {
        self.armed.store(enabled, Ordering::Release);
        Registers::new(&self.window).set_interrupt_enable(enabled)
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

/// One attached EDU card.
pub struct EduDevice {
    shared: Arc<DeviceShared>,
    platform: Arc<dyn Platform>,
    lease: Lease,
    irq: Option<IrqRegistration>,
    mapper: RegionMapper,
    config: DriverConfig,
    attached: bool,
}

impl EduDevice {
    /// Binds the driver to the card behind `platform`.
    ///
    /// Acquires, in order: the BAR reservation, the register mapping and the
    /// interrupt line, then arms the card if the configuration asks for it.
    /// A failure at any step releases what was already acquired.
    ///
    /// # Errors
    ///
    /// * [`EduError::InvalidArgument`] if the function is not an EDU card.
    /// * [`EduError::ResourceUnavailable`] if no interrupt line is routed,
    ///   the BAR is taken or cannot be mapped, or the line cannot be
    ///   requested.
    /// * [`EduError::HardwareFault`] if the identity register cannot be read.
    pub fn attach(platform: Arc<dyn Platform>, config: DriverConfig) -> Result<Self> {
        let identity = platform.identity();
        if !identity.is_edu() {
            return Err(EduError::InvalidArgument("not an EDU device"));
        }
        let line = platform.irq_line().ok_or_else(|| {
            EduError::ResourceUnavailable("no interrupt line routed to the device".into())
        })?;

        let region = platform.request_region(config.bar)?;
        let mem = match platform.ioremap(&region) {
            Ok(mem) => mem,
            Err(e) => {
                platform.release_region(config.bar);
                return Err(e);
            }
        };

        let lease = Lease::new();
        let window = MmioWindow::new(mem).with_lease(lease.clone());
        let shared = Arc::new(DeviceShared::new(window, region, line));

        let handler = InterruptHandler::new(shared.clone());
        let registration = match platform.request_irq(line, Arc::new(move |l| handler.handle(l)))
        {
            Ok(registration) => registration,
            Err(e) => {
                lease.revoke();
                platform.release_region(config.bar);
                return Err(e);
            }
        };

        let mut mapper = RegionMapper::new(platform.physical_memory());
        if config.confine_mappings {
            mapper = mapper.confined_to(region);
        }

        // From here on Drop unwinds.
        let device = Self {
            shared: shared.clone(),
            platform,
            lease,
            irq: Some(registration),
            mapper,
            config,
            attached: true,
        };

        let regs = Registers::new(&shared.window);
        let id = regs.card_id()?;
        info!(
            "edu: card {:04x}:{:04x} rev {}.{}, bar{} {:#x}..={:#x} ({:#x} bytes), irq {}",
            identity.vendor_id,
            identity.device_id,
            id >> 24,
            (id >> 16) & 0xff,
            device.config.bar,
            region.start,
            region.end,
            region.len,
            line
        );
        if device.config.enable_irq_on_attach {
            device.shared.arm(true)?;
        }
        Ok(device)
    }

    /// Detaches the card. Blocked waiters return `Cancelled`; files and
    /// mappings fail with `Detached` from now on.
    pub fn detach(mut self) {
        self.teardown();
    }

    /// Opens a device file.
    pub fn open(&self) -> EduFile {
        EduFile {
            shared: self.shared.clone(),
            mapper: self.mapper.clone(),
            lease: self.lease.clone(),
        }
    }

    pub fn region(&self) -> RegionInfo {
        self.shared.region
    }

    pub fn irq_line(&self) -> u32 {
        self.shared.irq_line
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn irq_stats(&self) -> IrqStats {
        self.shared.irq.stats()
    }

    pub fn gate_stats(&self) -> GateStats {
        self.shared.gate.stats()
    }

    /// True while a completion has been signalled but not yet consumed.
    pub fn gate_pending(&self) -> bool {
        self.shared.gate.is_pending()
    }

    /// True while the driver expects the card to raise completion interrupts.
    pub fn is_armed(&self) -> bool {
        self.shared.is_armed()
    }

    fn teardown(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;

        self.shared.gate.close();
        if let Err(e) = self.shared.arm(false) {
            warn!("edu: cannot disarm card on detach: {e}");
        }
        if let Some(registration) = self.irq.take() {
            self.platform.free_irq(registration);
        }
        self.lease.revoke();
        self.platform.release_region(self.config.bar);
        info!(
            "edu: detached bar{} at {:#x}, irq {}",
            self.config.bar, self.shared.region.start, self.shared.irq_line
        );
    }
}

impl Drop for EduDevice {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for EduDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EduDevice")
            .field("region", &self.shared.region)
            .field("irq_line", &self.shared.irq_line)
            .field("attached", &self.attached)
            .finish()
    }
}

/// An open device file.
///
/// Cloning yields another handle onto the same open file.
#[derive(Clone)]
pub struct EduFile {
    shared: Arc<DeviceShared>,
    mapper: RegionMapper,
    lease: Lease,
}

impl EduFile {
    /// Executes a control request.
    pub fn ioctl(&self, request: u32) -> Result<ControlReply> {
        Dispatcher::new(&self.shared).dispatch(request)
    }

    /// Executes a control request and copies its payload into `out`.
    ///
    /// Returns the number of bytes written. A buffer too small for the
    /// payload is refused before the request runs, so a `WAIT_IRQ` with a
    /// bad buffer never consumes a completion.
    pub fn ioctl_into(&self, request: u32, out: &mut [u8]) -> Result<usize> {
        let carries_region = matches!(
            Command::from_request(request),
            Some(Command::WaitIrq | Command::GetBarInfo)
        );
        if carries_region && out.len() < RegionInfo::SIZE {
            return Err(EduError::InvalidArgument("output buffer too small"));
        }
        self.ioctl(request)?.write_to(out)
    }

    /// Blocks until the next completion interrupt has been handled.
    pub fn wait_for_completion(&self) -> Result<RegionInfo> {
        Dispatcher::new(&self.shared).wait_for_completion()
    }

    /// Re-arms completion interrupts. Call once after every wait, before the
    /// next submit.
    pub fn enable_interrupt(&self) -> Result<()> {
        Dispatcher::new(&self.shared).enable_interrupt()
    }

    pub fn region_info(&self) -> Result<RegionInfo> {
        Dispatcher::new(&self.shared).region_info()
    }

    /// Maps `[offset, offset + length)` of physical memory.
    ///
    /// The mapping shares the device's lease and stops working when the
    /// device detaches.
    pub fn mmap(&self, offset: u64, length: u64) -> Result<MappedRegion> {
        if !self.lease.is_live() {
            return Err(EduError::Detached);
        }
        let region = self.mapper.map(offset, length)?;
        Ok(region.with_lease(self.lease.clone()))
    }
}

impl fmt::Debug for EduFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EduFile")
            .field("region", &self.shared.region)
            .field("live", &self.lease.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::IrqReturn;
    use crate::mmio::{IoMemory, IoSlice, RamMemory};
    use crate::platform::{IrqHandlerFn, PciIdentity};
    use crate::region::{MemoryAttributes, PhysicalMemory};
    use edu_common::mmio;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Duration;

    const BAR_BASE: u64 = 0xfea0_0000;
    const BAR_LEN: u64 = 0x1000;
    const LINE: u32 = 11;

    /// Platform whose register file is plain memory and which records the
    /// order of every acquire and release.
    struct FakePlatform {
        regs: Arc<RamMemory>,
        identity: PciIdentity,
        fail_ioremap: bool,
        fail_irq: bool,
        calls: Mutex<Vec<&'static str>>,
        handler: Mutex<Option<IrqHandlerFn>>,
    }

    impl FakePlatform {
        fn new() -> Self {
            let regs = Arc::new(RamMemory::new(BAR_LEN as usize));
            regs.write_u32(mmio::CARD_ID, mmio::CARD_ID_VALUE);
            Self {
                regs,
                identity: PciIdentity::EDU,
                fail_ioremap: false,
                fail_irq: false,
                calls: Mutex::new(Vec::new()),
                handler: Mutex::new(None),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }

        fn fire(&self) -> Option<IrqReturn> {
            let handler = self.handler.lock().clone();
            handler.map(|h| h(LINE))
        }
    }

    impl PhysicalMemory for FakePlatform {
        fn is_ram(&self, _phys: u64) -> bool {
            false
        }

        fn map_pages(
            &self,
            phys: u64,
            len: u64,
            _attrs: MemoryAttributes,
        ) -> Result<Arc<dyn IoMemory>> {
            if phys < BAR_BASE || phys + len > BAR_BASE + BAR_LEN {
                return Err(EduError::ResourceUnavailable("no backing".into()));
            }
            let regs: Arc<dyn IoMemory> = self.regs.clone();
            Ok(Arc::new(IoSlice::new(regs, (phys - BAR_BASE) as usize, len as usize)?))
        }
    }

    struct Shared(Arc<FakePlatform>);

    impl Platform for Shared {
        fn identity(&self) -> PciIdentity {
            self.0.identity
        }

        fn irq_line(&self) -> Option<u32> {
            Some(LINE)
        }

        fn request_region(&self, _bar: usize) -> Result<RegionInfo> {
            self.0.calls.lock().push("request_region");
            Ok(RegionInfo::new(BAR_BASE, BAR_LEN))
        }

        fn release_region(&self, _bar: usize) {
            self.0.calls.lock().push("release_region");
        }

        fn ioremap(&self, _region: &RegionInfo) -> Result<Arc<dyn IoMemory>> {
            self.0.calls.lock().push("ioremap");
            if self.0.fail_ioremap {
                return Err(EduError::ResourceUnavailable("ioremap failed".into()));
            }
            Ok(self.0.regs.clone())
        }

        fn request_irq(&self, line: u32, handler: IrqHandlerFn) -> Result<IrqRegistration> {
            self.0.calls.lock().push("request_irq");
            if self.0.fail_irq {
                return Err(EduError::ResourceUnavailable("line busy".into()));
            }
            *self.0.handler.lock() = Some(handler);
            Ok(IrqRegistration { line, token: 1 })
        }

        fn free_irq(&self, _registration: IrqRegistration) {
            self.0.calls.lock().push("free_irq");
            self.0.handler.lock().take();
        }

        fn physical_memory(&self) -> Arc<dyn PhysicalMemory> {
            self.0.clone()
        }
    }

    fn attach(fake: &Arc<FakePlatform>) -> Result<EduDevice> {
        EduDevice::attach(Arc::new(Shared(fake.clone())), DriverConfig::default())
    }

    /// Latches a completion in the register file the way the card would.
    fn complete(fake: &FakePlatform, value: u32) {
        fake.regs.write_u32(mmio::VALUE, value);
        fake.regs.write_u32(mmio::IRQ_STATUS, mmio::irq::FACTORIAL);
    }

    #[test]
    fn attach_acquires_in_order_and_arms_the_card() {
        let fake = Arc::new(FakePlatform::new());
        let device = attach(&fake).unwrap();
        assert_eq!(fake.calls(), ["request_region", "ioremap", "request_irq"]);
        assert_eq!(fake.regs.read_u32(mmio::STATUS), mmio::status::IRQ_ENABLE);
        assert_eq!(device.region(), RegionInfo::new(BAR_BASE, BAR_LEN));
        assert_eq!(device.irq_line(), LINE);
    }

    #[test]
    fn detach_frees_the_line_before_releasing_the_region() {
        let fake = Arc::new(FakePlatform::new());
        let device = attach(&fake).unwrap();
        let file = device.open();
        let mapping = file.mmap(BAR_BASE, BAR_LEN).unwrap();

        device.detach();
        assert_eq!(
            fake.calls(),
            ["request_region", "ioremap", "request_irq", "free_irq", "release_region"]
        );
        assert_eq!(fake.regs.read_u32(mmio::STATUS), 0);
        assert_eq!(file.region_info(), Err(EduError::Detached));
        assert_eq!(file.wait_for_completion(), Err(EduError::Cancelled));
        assert_eq!(file.mmap(BAR_BASE, 4).unwrap_err(), EduError::Detached);
        assert_eq!(mapping.read32(mmio::CARD_ID), Err(EduError::Detached));
        assert!(!mapping.is_live());
    }

    #[test]
    fn foreign_device_is_refused_before_acquiring_anything() {
        let mut fake = FakePlatform::new();
        fake.identity = PciIdentity {
            vendor_id: 0x8086,
            device_id: 0x100e,
        };
        let fake = Arc::new(fake);
        assert!(matches!(attach(&fake), Err(EduError::InvalidArgument(_))));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn failed_ioremap_releases_the_region() {
        let mut fake = FakePlatform::new();
        fake.fail_ioremap = true;
        let fake = Arc::new(fake);
        assert!(matches!(attach(&fake), Err(EduError::ResourceUnavailable(_))));
        assert_eq!(fake.calls(), ["request_region", "ioremap", "release_region"]);
    }

    #[test]
    fn failed_irq_request_releases_the_region() {
        let mut fake = FakePlatform::new();
        fake.fail_irq = true;
        let fake = Arc::new(fake);
        assert!(matches!(attach(&fake), Err(EduError::ResourceUnavailable(_))));
        assert_eq!(
            fake.calls(),
            ["request_region", "ioremap", "request_irq", "release_region"]
        );
    }

    #[test]
    fn interrupt_wakes_a_blocked_waiter() {
        let fake = Arc::new(FakePlatform::new());
        let device = attach(&fake).unwrap();
        let file = device.open();
        let waiter = thread::spawn(move || file.wait_for_completion());

        thread::sleep(Duration::from_millis(20));
        complete(&fake, 120);
        assert_eq!(fake.fire(), Some(IrqReturn::Handled));

        assert_eq!(waiter.join().unwrap(), Ok(device.region()));
        let stats = device.irq_stats();
        assert_eq!(stats.handled, 1);
        assert_eq!(stats.last_result, 120);
        assert_eq!(device.gate_stats().consumed, 1);
        assert!(!device.gate_pending());
        // The card stays disarmed until the consumer re-enables it.
        assert!(!device.is_armed());
        assert_eq!(fake.regs.read_u32(mmio::STATUS), 0);
    }

    #[test]
    fn foreign_interrupt_leaves_a_disarmed_card_disarmed() {
        let fake = Arc::new(FakePlatform::new());
        let config = DriverConfig {
            enable_irq_on_attach: false,
            ..DriverConfig::default()
        };
        let device = EduDevice::attach(Arc::new(Shared(fake.clone())), config).unwrap();
        assert!(!device.is_armed());

        assert_eq!(fake.fire(), Some(IrqReturn::NotMine));
        assert_eq!(fake.regs.read_u32(mmio::STATUS), 0);
        assert!(!device.is_armed());
        assert!(!device.gate_pending());

        device.open().enable_interrupt().unwrap();
        assert!(device.is_armed());
        assert_eq!(fake.regs.read_u32(mmio::STATUS), mmio::status::IRQ_ENABLE);
    }

    #[test]
    fn short_ioctl_buffer_does_not_consume_a_completion() {
        let fake = Arc::new(FakePlatform::new());
        let device = attach(&fake).unwrap();
        let file = device.open();
        complete(&fake, 6);
        fake.fire();

        let mut short = [0u8; 8];
        assert!(matches!(
            file.ioctl_into(Command::WaitIrq.request(), &mut short),
            Err(EduError::InvalidArgument(_))
        ));
        let mut buf = [0u8; RegionInfo::SIZE];
        assert_eq!(
            file.ioctl_into(Command::WaitIrq.request(), &mut buf),
            Ok(RegionInfo::SIZE)
        );
        assert_eq!(RegionInfo::from_bytes(&buf), device.region());
        assert_eq!(file.ioctl_into(Command::EnableIrq.request(), &mut short), Ok(0));
    }

    #[test]
    fn mappings_are_confined_to_the_bar() {
        let fake = Arc::new(FakePlatform::new());
        let device = attach(&fake).unwrap();
        let file = device.open();
        assert!(matches!(
            file.mmap(BAR_BASE + BAR_LEN - 4, 8),
            Err(EduError::InvalidArgument(_))
        ));
        let regs = file.mmap(BAR_BASE, BAR_LEN).unwrap();
        assert_eq!(regs.registers().card_id(), Ok(mmio::CARD_ID_VALUE));
        assert_eq!(regs.attributes(), MemoryAttributes::Uncached);
    }
}
