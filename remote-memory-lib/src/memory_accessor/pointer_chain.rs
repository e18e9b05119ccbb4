use tracing::trace;

use super::{require_addr, MemoryAccessor};
use crate::{
    config::PointerWidth,
    error::{MemoryError, Result},
    process_apis::ProcessApi,
    scalar::Scalar,
};

impl<P: ProcessApi> MemoryAccessor<'_, P> {
    /// Reads a pointer of the configured width stored at `addr`.
    pub fn read_pointer(&self, addr: usize) -> Result<usize> {
        Ok(match self.handles.config().pointer_width() {
            PointerWidth::Bits32 => self.read::<u32>(addr)? as usize,
            PointerWidth::Bits64 => self.read::<u64>(addr)? as usize,
        })
    }

    /// Follows `[[[static_addr] + offsets[0]] + offsets[1]] ... + offsets[n - 1]`.
    ///
    /// Every offset but the last is added to a pointer that is then dereferenced; the last one
    /// is only added, so the result addresses the final field. Additions wrap at the configured
    /// pointer width.
    ///
    /// A null pointer that would be dereferenced fails with `NullPointer`. The final pointer is
    /// never dereferenced, so a null one just yields the last offset.
    pub fn resolve_pointer_chain(&self, static_addr: usize, offsets: &[usize]) -> Result<usize> {
        require_addr(static_addr)?;
        let Some((&last, intermediates)) = offsets.split_last() else {
            return Err(MemoryError::InvalidArgument("offset chain is empty"));
        };
        self.handles.require_handle()?;
        let width = self.handles.config().pointer_width();

        let mut ptr = self.read_pointer(static_addr)?;
        trace!("[{:#x}] -> {:#x}", static_addr, ptr);
        for (depth, &offset) in intermediates.iter().enumerate() {
            if ptr == 0 {
                return Err(MemoryError::NullPointer { depth });
            }
            let base = ptr;
            ptr = self.read_pointer(width.wrapping_add(base, offset))?;
            trace!("[{:#x} + {:#x}] -> {:#x}", base, offset, ptr);
        }
        Ok(width.wrapping_add(ptr, last))
    }

    /// Dereferences the pointer at `addr` once and reads a `T` where it points.
    pub fn read_level1_pointer<T: Scalar>(&self, addr: usize) -> Result<T> {
        let ptr = self.read_pointer(addr)?;
        if ptr == 0 {
            return Err(MemoryError::NullPointer { depth: 0 });
        }
        self.read(ptr)
    }

    pub fn read_at_chain<T: Scalar>(&self, static_addr: usize, offsets: &[usize]) -> Result<T> {
        self.read(self.resolve_pointer_chain(static_addr, offsets)?)
    }

    pub fn write_at_chain<T: Scalar>(
        &self,
        static_addr: usize,
        offsets: &[usize],
        value: T,
    ) -> Result<()> {
        self.write(self.resolve_pointer_chain(static_addr, offsets)?, value)
    }
}
