//! Consumer-side view of one simulated card.
//!
//! Does what a user program does with the device file: query the BAR,
//! map it, then drive the card through its registers and the control
//! requests.

use anyhow::{Context, Result, bail};
use edu_common::ioctl::{Command, RegionInfo};
use edu_core::{DriverConfig, EduDevice, EduFile, MappedRegion, Register, RegisterSnapshot};
use edu_hw::{SimConfig, SimPlatform};
use log::debug;
use std::sync::Arc;

pub struct Session {
    bar: MappedRegion,
    file: EduFile,
    device: EduDevice,
    sim: Arc<SimPlatform>,
}

impl Session {
    /// Builds a simulated machine, attaches the driver and maps BAR0.
    pub fn open(sim_config: SimConfig, driver_config: DriverConfig) -> Result<Self> {
        let sim = Arc::new(SimPlatform::new(sim_config).context("Failed to build simulated machine")?);
        let device = EduDevice::attach(sim.clone(), driver_config).context("Failed to attach EDU card")?;
        let file = device.open();

        let mut payload = [0u8; RegionInfo::SIZE];
        file.ioctl_into(Command::GetBarInfo.request(), &mut payload)
            .context("GET_BAR_INFO failed")?;
        let info = RegionInfo::from_bytes(&payload);
        let bar = file
            .mmap(info.start, info.len)
            .with_context(|| format!("Failed to map BAR0 at {:#x}", info.start))?;
        debug!("session: bar0 mapped, {:#x} bytes", bar.len());

        Ok(Self {
            bar,
            file,
            device,
            sim,
        })
    }

    pub fn device(&self) -> &EduDevice {
        &self.device
    }

    pub fn sim(&self) -> &Arc<SimPlatform> {
        &self.sim
    }

    pub fn region(&self) -> Result<RegionInfo> {
        let reply = self
            .file
            .ioctl(Command::GetBarInfo.request())
            .context("GET_BAR_INFO failed")?;
        reply.region().context("GET_BAR_INFO returned no payload")
    }

    pub fn submit(&self, value: u32) -> Result<()> {
        let regs = self.bar.registers();
        if regs.is_busy()? {
            bail!("card is busy, submit of {value} would be ignored");
        }
        regs.submit(value)?;
        Ok(())
    }

    pub fn wait(&self) -> Result<()> {
        self.file
            .ioctl(Command::WaitIrq.request())
            .context("WAIT_IRQ failed")?;
        Ok(())
    }

    pub fn enable(&self) -> Result<()> {
        self.file
            .ioctl(Command::EnableIrq.request())
            .context("ENABLE_IRQ failed")?;
        Ok(())
    }

    pub fn value(&self) -> Result<u32> {
        Ok(self.bar.registers().result()?)
    }

    /// One full cycle: submit, wait for the interrupt, read, re-arm.
    pub fn factorial(&self, n: u32) -> Result<u32> {
        self.submit(n)?;
        self.wait()?;
        let value = self.value()?;
        self.enable()?;
        Ok(value)
    }

    pub fn probe_liveness(&self, pattern: u32) -> Result<bool> {
        Ok(self.bar.registers().probe_liveness(pattern)?)
    }

    pub fn raise(&self, bits: u32) -> Result<()> {
        Ok(self.bar.registers().raise(bits)?)
    }

    pub fn snapshot(&self) -> Result<RegisterSnapshot> {
        Ok(self.bar.registers().snapshot()?)
    }

    pub fn print_registers(&self) -> Result<()> {
        let snap = self.snapshot()?;
        let rows = [
            (Register::CardId, snap.card_id),
            (Register::Liveness, snap.liveness),
            (Register::Value, snap.value),
            (Register::Status, snap.status),
            (Register::IrqStatus, snap.irq_status),
        ];
        for (reg, value) in rows {
            println!("{:<12} ({:#04x}) = {:#x}", reg.name(), reg.offset(), value);
        }
        Ok(())
    }

    pub fn print_region(&self) -> Result<()> {
        let info = self.region()?;
        println!("Bar0 address start: {:#x}", info.start);
        println!("Bar0 address   end: {:#x}", info.end);
        println!("Bar0 address  size: {:#x}", info.len);
        Ok(())
    }
}
