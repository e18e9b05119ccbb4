use flagset::FlagSet;
use tracing::{debug, warn};

use super::{require_addr, MemoryAccessor};
use crate::{
    error::{MemoryError, Result},
    process_apis::ProcessApi,
    rights::PageRights,
};

fn require_range(addr: usize, size: usize) -> Result<()> {
    require_addr(addr)?;
    if size == 0 {
        return Err(MemoryError::InvalidArgument("size is zero"));
    }
    Ok(())
}

impl<'a, P: ProcessApi> MemoryAccessor<'a, P> {
    /// Changes the protection of `addr..addr + size` and returns the previous protection.
    pub fn protect(
        &self,
        addr: usize,
        size: usize,
        protect: impl Into<FlagSet<PageRights>>,
    ) -> Result<FlagSet<PageRights>> {
        require_range(addr, size)?;
        let handle = self.handles.require_handle()?;
        let protect = protect.into();
        let old = self
            .handles
            .api()
            .virtual_protect(handle, addr, size, protect)
            .map_err(MemoryError::os("virtual_protect"))?;
        debug!(
            "protect {:#x}+{:#x}: {:?} -> {:?}",
            addr, size, old, protect
        );
        Ok(old)
    }

    /// `protect` with the configured default protection.
    pub fn make_writable(&self, addr: usize, size: usize) -> Result<FlagSet<PageRights>> {
        self.protect(addr, size, self.handles.config().default_protection())
    }

    pub fn restore_protect(
        &self,
        addr: usize,
        size: usize,
        previous: FlagSet<PageRights>,
    ) -> Result<()> {
        self.protect(addr, size, previous).map(|_| ())
    }

    /// Changes the protection until the returned guard is dropped or restored.
    pub fn protect_scoped(
        &self,
        addr: usize,
        size: usize,
        protect: impl Into<FlagSet<PageRights>>,
    ) -> Result<ProtectionGuard<'a, P>> {
        let previous = self.protect(addr, size, protect)?;
        Ok(ProtectionGuard {
            memory: *self,
            addr,
            size,
            previous,
            restored: false,
        })
    }

    /// Writes `buffer` into a possibly write-protected region, restoring its protection after.
    pub fn patch_bytes(&self, addr: usize, buffer: &[u8]) -> Result<()> {
        if buffer.is_empty() {
            return Err(MemoryError::InvalidArgument("buffer is empty"));
        }
        let guard = self.protect_scoped(
            addr,
            buffer.len(),
            self.handles.config().default_protection(),
        )?;
        self.write_bytes(addr, buffer)?;
        guard.restore()
    }
}

pub struct ProtectionGuard<'a, P: ProcessApi> {
    memory: MemoryAccessor<'a, P>,
    addr: usize,
    size: usize,
    previous: FlagSet<PageRights>,
    restored: bool,
}

impl<P: ProcessApi> ProtectionGuard<'_, P> {
    pub fn previous(&self) -> FlagSet<PageRights> {
        self.previous
    }

    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        self.memory
            .restore_protect(self.addr, self.size, self.previous)
    }
}

impl<P: ProcessApi> Drop for ProtectionGuard<'_, P> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(err) = self
            .memory
            .restore_protect(self.addr, self.size, self.previous)
        {
            warn!(
                "failed to restore protection of {:#x}+{:#x}: {}",
                self.addr, self.size, err
            );
        }
    }
}
