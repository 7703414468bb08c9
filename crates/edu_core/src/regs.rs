//! Typed access to the EDU register map.
//!
//! [`Register`] names each register of BAR0 together with its access mode;
//! [`Registers`] performs the accesses through an [`MmioWindow`] and refuses
//! the ones the access mode forbids. Nothing here caches a register value:
//! every read is a fresh load from the device.

use crate::error::{EduError, Result};
use crate::mmio::MmioWindow;
use edu_common::mmio;
use log::trace;

/// Access mode declared by the register map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub const fn readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub const fn writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// Registers of the EDU card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    CardId,
    Liveness,
    Value,
    Status,
    IrqStatus,
    IrqRaise,
    IrqAck,
}

impl Register {
    /// Every register, in offset order.
    pub const ALL: [Register; 7] = [
        Register::CardId,
        Register::Liveness,
        Register::Value,
        Register::Status,
        Register::IrqStatus,
        Register::IrqRaise,
        Register::IrqAck,
    ];

    /// Byte offset of the register inside BAR0.
    pub const fn offset(self) -> usize {
        match self {
            Register::CardId => mmio::CARD_ID,
            Register::Liveness => mmio::CARD_LIVENESS,
            Register::Value => mmio::VALUE,
            Register::Status => mmio::STATUS,
            Register::IrqStatus => mmio::IRQ_STATUS,
            Register::IrqRaise => mmio::IRQ_RAISE,
            Register::IrqAck => mmio::IRQ_ACK,
        }
    }

    pub const fn access(self) -> Access {
        match self {
            Register::CardId | Register::IrqStatus => Access::ReadOnly,
            Register::IrqRaise | Register::IrqAck => Access::WriteOnly,
            Register::Liveness | Register::Value | Register::Status => Access::ReadWrite,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Register::CardId => "CARD_ID",
            Register::Liveness => "CARD_LIVENESS",
            Register::Value => "VALUE",
            Register::Status => "STATUS",
            Register::IrqStatus => "IRQ_STATUS",
            Register::IrqRaise => "IRQ_RAISE",
            Register::IrqAck => "IRQ_ACK",
        }
    }
}

/// Values of every readable register, captured one after the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub card_id: u32,
    pub liveness: u32,
    pub value: u32,
    pub status: u32,
    pub irq_status: u32,
}

/// Register accessor bound to a mapped BAR0 window.
#[derive(Debug, Clone, Copy)]
pub struct Registers<'a> {
    window: &'a MmioWindow,
}

impl<'a> Registers<'a> {
    /// Wraps a window whose offset 0 is the start of BAR0.
    pub fn new(window: &'a MmioWindow) -> Self {
        Self { window }
    }

    /// Reads a register, refusing write-only ones.
    pub fn read(&self, reg: Register) -> Result<u32> {
        if !reg.access().readable() {
            return Err(EduError::InvalidArgument("register is write-only"));
        }
        let value = self.window.read32(reg.offset())?;
        trace!("edu: read {} ({:#04x}) = {:#x}", reg.name(), reg.offset(), value);
        Ok(value)
    }

    /// Writes a register, refusing read-only ones.
    pub fn write(&self, reg: Register, value: u32) -> Result<()> {
        if !reg.access().writable() {
            return Err(EduError::InvalidArgument("register is read-only"));
        }
        trace!("edu: write {} ({:#04x}) <- {:#x}", reg.name(), reg.offset(), value);
        self.window.write32(reg.offset(), value)
    }

    pub fn card_id(&self) -> Result<u32> {
        self.read(Register::CardId)
    }

    /// Writes `pattern` to the liveness register and checks that the card
    /// answers with its complement.
    pub fn probe_liveness(&self, pattern: u32) -> Result<bool> {
        self.write(Register::Liveness, pattern)?;
        Ok(self.read(Register::Liveness)? == !pattern)
    }

    /// Submits a factorial operand. The card ignores it while busy.
    pub fn submit(&self, value: u32) -> Result<()> {
        self.write(Register::Value, value)
    }

    /// Reads the most recent factorial result.
    pub fn result(&self) -> Result<u32> {
        self.read(Register::Value)
    }

    pub fn status(&self) -> Result<u32> {
        self.read(Register::Status)
    }

    pub fn is_busy(&self) -> Result<bool> {
        Ok(self.status()? & mmio::status::BUSY != 0)
    }

    /// Arms or disarms completion interrupts.
    ///
    /// The busy bit is read-only, so writing the whole register only changes
    /// the enable bit.
    pub fn set_interrupt_enable(&self, enabled: bool) -> Result<()> {
        let value = if enabled { mmio::status::IRQ_ENABLE } else { 0 };
        self.write(Register::Status, value)
    }

    pub fn irq_status(&self) -> Result<u32> {
        self.read(Register::IrqStatus)
    }

    /// Raises an interrupt by hand with the given status bits.
    pub fn raise(&self, mask: u32) -> Result<()> {
        self.write(Register::IrqRaise, mask)
    }

    /// Clears the given bits from the interrupt status register.
    pub fn acknowledge(&self, mask: u32) -> Result<()> {
        self.write(Register::IrqAck, mask)
    }

    /// Reads every readable register.
    pub fn snapshot(&self) -> Result<RegisterSnapshot> {
        Ok(RegisterSnapshot {
            card_id: self.read(Register::CardId)?,
            liveness: self.read(Register::Liveness)?,
            value: self.read(Register::Value)?,
            status: self.read(Register::Status)?,
            irq_status: self.read(Register::IrqStatus)?,
        })
    }
}
