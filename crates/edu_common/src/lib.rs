//! Common definitions shared by the EDU driver, the simulated card and the
//! host tools.
//!
//! This crate holds the register contract of the EDU accelerator and the
//! encoding of the control requests a consumer sends to the driver. It has no
//! dependencies and no state so it can be used from any execution context.

#![no_std]

// Register layout and PCI identity of the EDU card.
//
// Offsets are relative to the start of BAR0. Every register is 32 bits wide
// and must be accessed with a single aligned load or store.
pub mod mmio {
    /// PCI vendor identifier of the EDU card.
    pub const EDU_VENDOR_ID: u16 = 0x1234;

    /// PCI device identifier of the EDU card.
    pub const EDU_DEVICE_ID: u16 = 0x11e8;

    /// Index of the BAR holding the register window.
    pub const EDU_BAR: usize = 0;

    /// Size of BAR0 in bytes.
    pub const EDU_BAR_SIZE: u64 = 1 << 20;

    /// Value reported by the card identification register.
    ///
    /// Encoded as `0xRRrr00ed`, where `RR` is the major and `rr` the minor
    /// revision of the card.
    pub const CARD_ID_VALUE: u32 = 0x0100_00ed;

    /// Card identification (RO).
    pub const CARD_ID: usize = 0x00;

    /// Liveness check (RW). Reads return the bitwise complement of the last
    /// value written.
    pub const CARD_LIVENESS: usize = 0x04;

    /// Factorial operand on write, factorial result on read (RW).
    pub const VALUE: usize = 0x08;

    /// Status register (RW). See [`status`] for the bit layout.
    pub const STATUS: usize = 0x20;

    /// Interrupt status bitmask (RO). See [`irq`] for the bit layout.
    pub const IRQ_STATUS: usize = 0x24;

    /// Interrupt raise (WO). The written value is ORed into the interrupt
    /// status register and the interrupt line is asserted.
    pub const IRQ_RAISE: usize = 0x60;

    /// Interrupt acknowledge (WO). Clears the written bits from the interrupt
    /// status register; the line drops once no bit remains set.
    pub const IRQ_ACK: usize = 0x64;

    /// Bits of the status register.
    pub mod status {
        /// A factorial computation is in progress. Read-only.
        pub const BUSY: u32 = 0x01;

        /// Raise an interrupt when a factorial computation finishes.
        pub const IRQ_ENABLE: u32 = 0x80;
    }

    /// Bits of the interrupt status register.
    pub mod irq {
        /// A factorial computation has completed.
        pub const FACTORIAL: u32 = 0x001;

        /// A DMA transfer has completed.
        pub const DMA: u32 = 0x100;
    }
}

/// Control requests understood by the EDU device file.
///
/// Requests are encoded the way Linux encodes `_IO(type, nr)` numbers: no
/// direction bits, no payload size, the magic byte in bits 8..16 and the
/// command number in bits 0..8.
pub mod ioctl {
    /// Magic byte shared by every EDU control request.
    pub const MAGIC: u8 = b'e';

    /// Control operations exposed to consumers.
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Command {
        /// Block until the device reports a completed computation.
        WaitIrq = 1,

        /// Re-arm the device so that the next completion raises an interrupt.
        EnableIrq = 2,

        /// Report the physical bounds of BAR0.
        GetBarInfo = 3,
    }

    impl Command {
        /// Every command, in request-number order.
        pub const ALL: [Command; 3] = [Command::WaitIrq, Command::EnableIrq, Command::GetBarInfo];

        /// Returns the encoded request number for this command.
        pub const fn request(self) -> u32 {
            ((MAGIC as u32) << 8) | self as u32
        }

        /// Decodes a raw request number.
        ///
        /// Returns `None` for request numbers with a foreign magic byte, any
        /// direction or size bits set, or an unknown command number.
        pub fn from_request(request: u32) -> Option<Self> {
            if request >> 8 != MAGIC as u32 {
                return None;
            }
            match request & 0xff {
                1 => Some(Command::WaitIrq),
                2 => Some(Command::EnableIrq),
                3 => Some(Command::GetBarInfo),
                _ => None,
            }
        }
    }

    /// Physical bounds of the device region, as returned to consumers.
    ///
    /// The layout matches the 24-byte structure copied out by the control
    /// interface: three little-endian `u64` fields. `end` is inclusive.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct RegionInfo {
        /// First physical address of the region.
        pub start: u64,

        /// Last physical address of the region (inclusive).
        pub end: u64,

        /// Length of the region in bytes.
        pub len: u64,
    }

    impl RegionInfo {
        /// Size of the serialised payload in bytes.
        pub const SIZE: usize = 24;

        /// Builds the bounds of a region starting at `start` spanning `len`
        /// bytes. An empty region reports `end == start`.
        pub const fn new(start: u64, len: u64) -> Self {
            let end = if len == 0 {
                start
            } else {
                start.wrapping_add(len - 1)
            };
            Self { start, end, len }
        }

        /// Returns true if `addr` lies inside the region.
        pub const fn contains(&self, addr: u64) -> bool {
            self.len != 0 && addr >= self.start && addr <= self.end
        }

        /// Serialises the payload in its wire layout.
        pub fn to_bytes(&self) -> [u8; Self::SIZE] {
            let mut out = [0u8; Self::SIZE];
            out[0..8].copy_from_slice(&self.start.to_le_bytes());
            out[8..16].copy_from_slice(&self.end.to_le_bytes());
            out[16..24].copy_from_slice(&self.len.to_le_bytes());
            out
        }

        /// Parses a payload previously produced by [`RegionInfo::to_bytes`].
        pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
            let field = |i: usize| {
                let mut word = [0u8; 8];
                word.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
                u64::from_le_bytes(word)
            };
            Self {
                start: field(0),
                end: field(1),
                len: field(2),
            }
        }
    }
}
