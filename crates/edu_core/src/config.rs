//! Driver configuration.

use edu_common::mmio::EDU_BAR;

/// Knobs applied when a device is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// BAR holding the register window.
    pub bar: usize,

    /// Arm completion interrupts as the last step of attach. When false the
    /// first `ENABLE_IRQ` request arms the device.
    pub enable_irq_on_attach: bool,

    /// Refuse consumer mappings that fall outside the device's BAR.
    pub confine_mappings: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            bar: EDU_BAR,
            enable_irq_on_attach: true,
            confine_mappings: true,
        }
    }
}
