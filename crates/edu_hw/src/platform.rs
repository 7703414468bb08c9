//! A complete simulated machine with one EDU card.

use crate::bus::PhysicalBus;
use crate::intc::{DEFAULT_LINES, InterruptController};
use crate::model::{EduModel, ModelConfig};
use edu_common::ioctl::RegionInfo;
use edu_common::mmio::EDU_BAR;
use edu_core::{
    EduError, IoMemory, IrqHandlerFn, IrqRegistration, PciIdentity, PhysicalMemory, Platform,
    Result,
};
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Layout and timing of a simulated machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Interrupt line the card is wired to.
    pub irq_line: u32,

    /// Physical address of BAR0.
    pub bar_base: u64,

    /// Time the card takes per factorial.
    pub latency: Duration,

    /// Physical address of system RAM.
    pub ram_base: u64,

    /// Size of system RAM in bytes.
    pub ram_size: u64,

    /// Identity the function reports in configuration space.
    pub identity: PciIdentity,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            irq_line: 11,
            bar_base: 0xfea0_0000,
            latency: Duration::from_micros(100),
            ram_base: 0,
            ram_size: 0x10_0000,
            identity: PciIdentity::EDU,
        }
    }
}

/// A machine with one simulated EDU card, its interrupt line and RAM.
pub struct SimPlatform {
    config: SimConfig,
    intc: Arc<InterruptController>,
    model: Arc<EduModel>,
    bus: Arc<PhysicalBus>,
    bar_reserved: AtomicBool,
}

impl SimPlatform {
    /// Builds the machine: controller, card and address map.
    ///
    /// # Errors
    ///
    /// Fails if the configured RAM and BAR overlap or do not fit.
    pub fn new(config: SimConfig) -> Result<Self> {
        let intc = Arc::new(InterruptController::new(DEFAULT_LINES));
        let model = Arc::new(EduModel::new(
            ModelConfig {
                latency: config.latency,
                ..ModelConfig::default()
            },
            intc.clone(),
            config.irq_line,
        ));
        let bus = PhysicalBus::new()
            .with_ram(config.ram_base, config.ram_size)?
            .with_device("edu", config.bar_base, model.clone())?;
        debug!(
            "sim: edu at {:#x}, irq {}, ram {:#x}+{:#x}",
            config.bar_base, config.irq_line, config.ram_base, config.ram_size
        );
        Ok(Self {
            config,
            intc,
            model,
            bus: Arc::new(bus),
            bar_reserved: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The card behind BAR0.
    pub fn model(&self) -> &Arc<EduModel> {
        &self.model
    }

    pub fn interrupts(&self) -> &Arc<InterruptController> {
        &self.intc
    }

    pub fn bus(&self) -> &Arc<PhysicalBus> {
        &self.bus
    }

    fn bar_region(&self) -> RegionInfo {
        RegionInfo::new(self.config.bar_base, self.model.size() as u64)
    }
}

impl Platform for SimPlatform {
    fn identity(&self) -> PciIdentity {
        self.config.identity
    }

    fn irq_line(&self) -> Option<u32> {
        Some(self.config.irq_line)
    }

    fn request_region(&self, bar: usize) -> Result<RegionInfo> {
        if bar != EDU_BAR {
            return Err(EduError::ResourceUnavailable(format!("bar{bar} not implemented")));
        }
        if self.bar_reserved.swap(true, Ordering::AcqRel) {
            return Err(EduError::ResourceUnavailable(format!("bar{bar} already reserved")));
        }
        Ok(self.bar_region())
    }

    fn release_region(&self, bar: usize) {
        if bar == EDU_BAR {
            self.bar_reserved.store(false, Ordering::Release);
        }
    }

    fn ioremap(&self, region: &RegionInfo) -> Result<Arc<dyn IoMemory>> {
        if *region != self.bar_region() {
            return Err(EduError::ResourceUnavailable(format!(
                "no device memory at {:#x}+{:#x}",
                region.start, region.len
            )));
        }
        Ok(self.model.clone())
    }

    fn request_irq(&self, line: u32, handler: IrqHandlerFn) -> Result<IrqRegistration> {
        self.intc.register(line, handler)
    }

    fn free_irq(&self, registration: IrqRegistration) {
        self.intc.unregister(registration);
    }

    fn physical_memory(&self) -> Arc<dyn PhysicalMemory> {
        self.bus.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_is_reserved_exclusively() {
        let sim = SimPlatform::new(SimConfig::default()).unwrap();
        let region = sim.request_region(EDU_BAR).unwrap();
        assert_eq!(region.start, 0xfea0_0000);
        assert_eq!(region.len, edu_common::mmio::EDU_BAR_SIZE);
        assert!(matches!(
            sim.request_region(EDU_BAR),
            Err(EduError::ResourceUnavailable(_))
        ));
        sim.release_region(EDU_BAR);
        assert!(sim.request_region(EDU_BAR).is_ok());
    }

    #[test]
    fn ioremap_only_maps_the_bar() {
        let sim = SimPlatform::new(SimConfig::default()).unwrap();
        let region = sim.request_region(EDU_BAR).unwrap();
        let regs = sim.ioremap(&region).unwrap();
        assert_eq!(regs.read_u32(0), edu_common::mmio::CARD_ID_VALUE);
        assert!(sim.ioremap(&RegionInfo::new(0x1000, 0x1000)).is_err());
    }

    #[test]
    fn bar_and_ram_are_on_the_bus() {
        let sim = SimPlatform::new(SimConfig::default()).unwrap();
        assert!(sim.bus().is_ram(0x1000));
        assert!(!sim.bus().is_ram(0xfea0_0000));
    }

    #[test]
    fn overlapping_layout_is_refused() {
        let config = SimConfig {
            ram_base: 0xfe00_0000,
            ram_size: 0x100_0000,
            ..SimConfig::default()
        };
        assert!(SimPlatform::new(config).is_err());
    }
}
