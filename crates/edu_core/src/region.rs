//! Mapping physical device memory into a consumer's address space.
//!
//! The mapper validates a `{offset, length}` request, aligns it down to a page
//! boundary, picks the memory attributes the target calls for and asks the
//! [`PhysicalMemory`] back-end for the pages. The consumer gets back a
//! [`MappedRegion`] whose byte `i` is physical byte `offset + i`. From then on
//! its register traffic goes straight to the hardware; the driver is no
//! longer in the path.

use crate::error::{EduError, Result};
use crate::mmio::{IoMemory, Lease, MmioWindow};
use crate::regs::Registers;
use edu_common::ioctl::RegionInfo;
use log::debug;
use std::ptr::NonNull;
use std::sync::Arc;

/// Granularity of every mapping.
pub const PAGE_SIZE: u64 = 4096;

/// Caching policy of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAttributes {
    /// Ordinary write-back RAM.
    Cached,
    /// Device memory: no caching, no write combining, no speculative reads.
    Uncached,
}

/// Physical address space the mapper draws pages from.
pub trait PhysicalMemory: Send + Sync {
    /// Returns true if the page containing `phys` is ordinary RAM.
    fn is_ram(&self, phys: u64) -> bool;

    /// Maps `len` bytes starting at the page-aligned address `phys`.
    ///
    /// The returned memory is addressed from zero: its offset 0 is `phys`.
    fn map_pages(&self, phys: u64, len: u64, attrs: MemoryAttributes)
    -> Result<Arc<dyn IoMemory>>;
}

/// Establishes consumer mappings of physical memory.
#[derive(Clone)]
pub struct RegionMapper {
    phys: Arc<dyn PhysicalMemory>,
    bounds: Option<RegionInfo>,
}

impl RegionMapper {
    pub fn new(phys: Arc<dyn PhysicalMemory>) -> Self {
        Self { phys, bounds: None }
    }

    /// Restricts every later request to lie inside `region`.
    pub fn confined_to(mut self, region: RegionInfo) -> Self {
        self.bounds = Some(region);
        self
    }

    /// Maps the physical range `[offset, offset + length)`.
    ///
    /// `offset` need not be page aligned: the mapping starts at the page
    /// containing it and the returned region begins at the in-page offset.
    ///
    /// # Errors
    ///
    /// * [`EduError::InvalidArgument`] if the request is empty, wraps the
    ///   address space or leaves the permitted bounds. Nothing is mapped.
    /// * [`EduError::ResourceUnavailable`] if the back-end cannot map the
    ///   pages.
    pub fn map(&self, offset: u64, length: u64) -> Result<MappedRegion> {
        if length == 0 {
            return Err(EduError::InvalidArgument("zero-length mapping"));
        }
        let last = offset
            .checked_add(length - 1)
            .ok_or(EduError::InvalidArgument("region wraps the address space"))?;
        if let Some(bounds) = &self.bounds {
            if !bounds.contains(offset) || !bounds.contains(last) {
                return Err(EduError::InvalidArgument("request outside the device region"));
            }
        }

        let page_base = offset & !(PAGE_SIZE - 1);
        let in_page = offset - page_base;
        let span = in_page
            .checked_add(length)
            .and_then(|n| n.checked_next_multiple_of(PAGE_SIZE))
            .ok_or(EduError::InvalidArgument("region wraps the address space"))?;
        let (Ok(span_bytes), Ok(len_bytes)) = (usize::try_from(span), usize::try_from(length))
        else {
            return Err(EduError::InvalidArgument("region larger than the address space"));
        };

        let attrs = if self.phys.is_ram(page_base) {
            MemoryAttributes::Cached
        } else {
            MemoryAttributes::Uncached
        };

        let pages = self
            .phys
            .map_pages(page_base, span, attrs)
            .map_err(|e| match e {
                EduError::ResourceUnavailable(msg) => EduError::ResourceUnavailable(msg),
                other => EduError::ResourceUnavailable(format!(
                    "cannot map {page_base:#x}+{span:#x}: {other}"
                )),
            })?;
        if pages.size() < span_bytes {
            return Err(EduError::ResourceUnavailable(format!(
                "short mapping at {page_base:#x}: {:#x} of {span:#x} bytes",
                pages.size()
            )));
        }

        let window = MmioWindow::sub(pages, in_page as usize, len_bytes)?;
        debug!("edu: mapped phys {offset:#x}+{length:#x} as {attrs:?}");
        Ok(MappedRegion {
            window,
            phys: offset,
            attrs,
        })
    }
}

/// A consumer's window onto physical memory.
#[derive(Debug, Clone)]
pub struct MappedRegion {
    window: MmioWindow,
    phys: u64,
    attrs: MemoryAttributes,
}

impl MappedRegion {
    /// Physical address of byte 0.
    pub fn phys_start(&self) -> u64 {
        self.phys
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn attributes(&self) -> MemoryAttributes {
        self.attrs
    }

    /// Returns false once the device the mapping was made for has detached.
    pub fn is_live(&self) -> bool {
        self.window.is_live()
    }

    pub fn read8(&self, offset: usize) -> Result<u8> {
        self.window.read8(offset)
    }

    pub fn write8(&self, offset: usize, value: u8) -> Result<()> {
        self.window.write8(offset, value)
    }

    pub fn read32(&self, offset: usize) -> Result<u32> {
        self.window.read32(offset)
    }

    pub fn write32(&self, offset: usize, value: u32) -> Result<()> {
        self.window.write32(offset, value)
    }

    /// Register view of the mapping. Meaningful when byte 0 is the start of
    /// BAR0.
    pub fn registers(&self) -> Registers<'_> {
        Registers::new(&self.window)
    }

    /// Raw pointer to byte 0, when the backing memory is host addressable.
    ///
    /// This is the one place where mapped device memory escapes every check
    /// the driver performs.
    ///
    /// # Safety
    ///
    /// Accesses through the pointer must stay inside `0..self.len()`, must be
    /// volatile, naturally aligned and single-width, and must stop before the
    /// device detaches. The lease that guards the checked accessors does not
    /// cover them.
    pub unsafe fn raw_ptr(&self) -> Option<NonNull<u8>> {
        self.window.host_ptr()
    }

    pub(crate) fn with_lease(mut self, lease: Lease) -> Self {
        self.window = self.window.with_lease(lease);
        self
    }
}
