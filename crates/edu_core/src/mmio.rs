//! Memory-mapped I/O windows.
//!
//! [`IoMemory`] is the seam between the driver and whatever actually backs a
//! register window: volatile accesses through a mapped pointer on real
//! hardware, or a behavioural model in simulation. [`MmioWindow`] is the only
//! way the rest of the driver touches an `IoMemory`; it bounds-checks and
//! alignment-checks every access and honours a revocable [`Lease`] so no
//! access can reach memory after the owning device has been detached.

use crate::error::{EduError, Result};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Byte- and word-addressable memory behind a register window.
///
/// Implementations may assume that callers only pass offsets inside
/// `0..size()` and that 32-bit accesses are 4-byte aligned; [`MmioWindow`]
/// guarantees both. Every call must reach the backing memory, values are
/// never cached.
pub trait IoMemory: Send + Sync {
    /// Size of the memory in bytes.
    fn size(&self) -> usize;

    /// Reads one byte.
    fn read_u8(&self, offset: usize) -> u8;

    /// Writes one byte.
    fn write_u8(&self, offset: usize, value: u8);

    /// Reads one aligned 32-bit word.
    fn read_u32(&self, offset: usize) -> u32;

    /// Writes one aligned 32-bit word.
    fn write_u32(&self, offset: usize, value: u32);

    /// Host pointer to the first byte, if the memory is directly addressable.
    fn as_ptr(&self) -> Option<NonNull<u8>> {
        None
    }
}

/// Register window reached through a mapped pointer.
///
/// Each access is a single volatile load or store of the requested width.
pub struct RawMmio {
    base: NonNull<u8>,
    size: usize,
}

// SAFETY: the pointer designates device memory (or memory standing in for it)
// whose accesses are single volatile operations; no Rust references to it
// are ever created, so sharing it between threads is no different from
// sharing the hardware itself.
unsafe impl Send for RawMmio {}
unsafe impl Sync for RawMmio {}

impl RawMmio {
    /// Wraps `size` bytes of mapped memory starting at `base`.
    ///
    /// # Safety
    ///
    /// * `base` must be valid for volatile reads and writes of `size` bytes
    ///   for the whole lifetime of the returned value.
    /// * `base` must be at least 4-byte aligned.
    /// * No Rust reference may alias the region while it is in use.
    pub unsafe fn new(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }
}

impl IoMemory for RawMmio {
    fn size(&self) -> usize {
        self.size
    }

    fn read_u8(&self, offset: usize) -> u8 {
        debug_assert!(offset < self.size);
        // SAFETY: offset < size, checked by the window.
        unsafe { self.base.as_ptr().add(offset).read_volatile() }
    }

    fn write_u8(&self, offset: usize, value: u8) {
        debug_assert!(offset < self.size);
        // SAFETY: offset < size, checked by the window.
        unsafe { self.base.as_ptr().add(offset).write_volatile(value) }
    }

    fn read_u32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.size && offset % 4 == 0);
        // SAFETY: offset + 4 <= size and the address is 4-byte aligned.
        unsafe { self.base.as_ptr().add(offset).cast::<u32>().read_volatile() }
    }

    fn write_u32(&self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.size && offset % 4 == 0);
        // SAFETY: offset + 4 <= size and the address is 4-byte aligned.
        unsafe {
            self.base
                .as_ptr()
                .add(offset)
                .cast::<u32>()
                .write_volatile(value)
        }
    }

    fn as_ptr(&self) -> Option<NonNull<u8>> {
        Some(self.base)
    }
}

/// Ordinary memory with no side effects on access.
pub struct RamMemory {
    bytes: Mutex<Vec<u8>>,
}

impl RamMemory {
    /// Allocates `size` zeroed bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0; size]),
        }
    }
}

impl IoMemory for RamMemory {
    fn size(&self) -> usize {
        self.bytes.lock().len()
    }

    fn read_u8(&self, offset: usize) -> u8 {
        self.bytes.lock()[offset]
    }

    fn write_u8(&self, offset: usize, value: u8) {
        self.bytes.lock()[offset] = value;
    }

    fn read_u32(&self, offset: usize) -> u32 {
        let bytes = self.bytes.lock();
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[offset..offset + 4]);
        u32::from_le_bytes(word)
    }

    fn write_u32(&self, offset: usize, value: u32) {
        self.bytes.lock()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Sub-range of another [`IoMemory`], addressed from zero.
///
/// Used to hand out the pages of a larger backing (a BAR, a RAM bank) as a
/// memory of their own.
pub struct IoSlice {
    mem: Arc<dyn IoMemory>,
    base: usize,
    size: usize,
}

impl IoSlice {
    pub fn new(mem: Arc<dyn IoMemory>, base: usize, size: usize) -> Result<Self> {
        let end = base
            .checked_add(size)
            .ok_or(EduError::InvalidArgument("slice wraps the address space"))?;
        if end > mem.size() {
            return Err(EduError::InvalidArgument("slice exceeds backing memory"));
        }
        if base % 4 != 0 {
            return Err(EduError::InvalidArgument("slice base not word aligned"));
        }
        Ok(Self { mem, base, size })
    }
}

impl IoMemory for IoSlice {
    fn size(&self) -> usize {
        self.size
    }

    fn read_u8(&self, offset: usize) -> u8 {
        self.mem.read_u8(self.base + offset)
    }

    fn write_u8(&self, offset: usize, value: u8) {
        self.mem.write_u8(self.base + offset, value)
    }

    fn read_u32(&self, offset: usize) -> u32 {
        self.mem.read_u32(self.base + offset)
    }

    fn write_u32(&self, offset: usize, value: u32) {
        self.mem.write_u32(self.base + offset, value)
    }

    fn as_ptr(&self) -> Option<NonNull<u8>> {
        let ptr = self.mem.as_ptr()?;
        // SAFETY: base + size <= mem.size(), checked at construction.
        NonNull::new(unsafe { ptr.as_ptr().add(self.base) })
    }
}

/// Revocable permission to access a device's memory.
///
/// Windows carrying a lease check it on every access. Revoking waits for
/// accesses already in flight and makes every later access fail with
/// [`EduError::Detached`].
#[derive(Debug, Clone)]
pub struct Lease(Arc<RwLock<bool>>);

impl Lease {
    /// Creates a live lease.
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(true)))
    }

    /// Revokes the lease for every window sharing it.
    pub fn revoke(&self) {
        *self.0.write() = false;
    }

    /// Returns true until [`Lease::revoke`] has been called.
    pub fn is_live(&self) -> bool {
        *self.0.read()
    }
}

impl Default for Lease {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded, checked view of an [`IoMemory`].
///
/// Offsets passed to the accessors are relative to the start of the window.
#[derive(Clone)]
pub struct MmioWindow {
    mem: Arc<dyn IoMemory>,
    base: usize,
    len: usize,
    lease: Option<Lease>,
}

impl MmioWindow {
    /// Creates a window covering all of `mem`.
    pub fn new(mem: Arc<dyn IoMemory>) -> Self {
        let len = mem.size();
        Self {
            mem,
            base: 0,
            len,
            lease: None,
        }
    }

    /// Creates a window over `len` bytes of `mem` starting at `base`.
    pub fn sub(mem: Arc<dyn IoMemory>, base: usize, len: usize) -> Result<Self> {
        let end = base
            .checked_add(len)
            .ok_or(EduError::InvalidArgument("window wraps the address space"))?;
        if end > mem.size() {
            return Err(EduError::InvalidArgument("window exceeds backing memory"));
        }
        Ok(Self {
            mem,
            base,
            len,
            lease: None,
        })
    }

    /// Ties the window to `lease`.
    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Length of the window in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns false once the window's lease has been revoked.
    pub fn is_live(&self) -> bool {
        self.lease.as_ref().is_none_or(Lease::is_live)
    }

    pub fn read8(&self, offset: usize) -> Result<u8> {
        let at = self.check(offset, 1)?;
        self.access(|mem| mem.read_u8(at))
    }

    pub fn write8(&self, offset: usize, value: u8) -> Result<()> {
        let at = self.check(offset, 1)?;
        self.access(|mem| mem.write_u8(at, value))
    }

    pub fn read32(&self, offset: usize) -> Result<u32> {
        let at = self.check(offset, 4)?;
        self.access(|mem| mem.read_u32(at))
    }

    pub fn write32(&self, offset: usize, value: u32) -> Result<()> {
        let at = self.check(offset, 4)?;
        self.access(|mem| mem.write_u32(at, value))
    }

    /// Host pointer to the first byte of the window, if the backing memory is
    /// directly addressable.
    pub(crate) fn host_ptr(&self) -> Option<NonNull<u8>> {
        let ptr = self.mem.as_ptr()?;
        // SAFETY: base <= mem.size(), checked at construction.
        NonNull::new(unsafe { ptr.as_ptr().add(self.base) })
    }

    /// Validates an access of `width` bytes and returns its offset in the
    /// backing memory.
    fn check(&self, offset: usize, width: usize) -> Result<usize> {
        let in_bounds = offset
            .checked_add(width)
            .is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(EduError::HardwareFault {
                offset,
                reason: "access outside mapped window",
            });
        }
        let at = self.base + offset;
        if at % width != 0 {
            return Err(EduError::HardwareFault {
                offset,
                reason: "misaligned register access",
            });
        }
        Ok(at)
    }

    fn access<T>(&self, op: impl FnOnce(&dyn IoMemory) -> T) -> Result<T> {
        match &self.lease {
            None => Ok(op(self.mem.as_ref())),
            Some(lease) => {
                let live = lease.0.read();
                if !*live {
                    return Err(EduError::Detached);
                }
                Ok(op(self.mem.as_ref()))
            }
        }
    }
}

impl fmt::Debug for MmioWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmioWindow")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &format_args!("{:#x}", self.len))
            .field("live", &self.is_live())
            .finish()
    }
}
