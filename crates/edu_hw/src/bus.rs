//! Physical address map of the simulated machine.

use edu_core::{EduError, IoMemory, IoSlice, MemoryAttributes, PhysicalMemory, RamMemory, Result};
use log::trace;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionKind {
    Ram,
    Device,
}

struct BusRegion {
    name: &'static str,
    base: u64,
    size: u64,
    kind: RegionKind,
    mem: Arc<dyn IoMemory>,
}

impl BusRegion {
    fn contains(&self, phys: u64) -> bool {
        phys >= self.base && phys - self.base < self.size
    }
}

/// RAM and device regions at fixed physical addresses.
///
/// Regions never overlap. A mapping must fall entirely inside one region.
#[derive(Default)]
pub struct PhysicalBus {
    regions: Vec<BusRegion>,
}

impl PhysicalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `size` bytes of zeroed RAM at `base`.
    pub fn with_ram(self, base: u64, size: u64) -> Result<Self> {
        let bytes = usize::try_from(size)
            .map_err(|_| EduError::InvalidArgument("RAM larger than the address space"))?;
        self.with_region("ram", base, RegionKind::Ram, Arc::new(RamMemory::new(bytes)))
    }

    /// Places a device's memory at `base`.
    pub fn with_device(self, name: &'static str, base: u64, mem: Arc<dyn IoMemory>) -> Result<Self> {
        self.with_region(name, base, RegionKind::Device, mem)
    }

    fn with_region(
        mut self,
        name: &'static str,
        base: u64,
        kind: RegionKind,
        mem: Arc<dyn IoMemory>,
    ) -> Result<Self> {
        let size = mem.size() as u64;
        if size == 0 {
            return Err(EduError::InvalidArgument("empty bus region"));
        }
        let last = base
            .checked_add(size - 1)
            .ok_or(EduError::InvalidArgument("bus region wraps the address space"))?;
        if let Some(other) = self
            .regions
            .iter()
            .find(|r| r.contains(base) || r.contains(last) || (base < r.base && last >= r.base))
        {
            return Err(EduError::ResourceUnavailable(format!(
                "{name} at {base:#x} overlaps {}",
                other.name
            )));
        }
        self.regions.push(BusRegion {
            name,
            base,
            size,
            kind,
            mem,
        });
        Ok(self)
    }

    fn region_at(&self, phys: u64) -> Option<&BusRegion> {
        self.regions.iter().find(|r| r.contains(phys))
    }
}

impl PhysicalMemory for PhysicalBus {
    fn is_ram(&self, phys: u64) -> bool {
        self.region_at(phys)
            .is_some_and(|r| r.kind == RegionKind::Ram)
    }

    fn map_pages(&self, phys: u64, len: u64, attrs: MemoryAttributes) -> Result<Arc<dyn IoMemory>> {
        let region = self
            .region_at(phys)
            .ok_or_else(|| EduError::ResourceUnavailable(format!("nothing at {phys:#x}")))?;
        let offset = phys - region.base;
        if len == 0 || len > region.size - offset {
            return Err(EduError::ResourceUnavailable(format!(
                "{phys:#x}+{len:#x} runs past the end of {}",
                region.name
            )));
        }
        trace!(
            "bus: map {}+{offset:#x} ({len:#x} bytes, {attrs:?})",
            region.name
        );
        Ok(Arc::new(IoSlice::new(
            region.mem.clone(),
            offset as usize,
            len as usize,
        )?))
    }
}
