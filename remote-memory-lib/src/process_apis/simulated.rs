use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use anyhow::{anyhow, bail, Result};
use flagset::FlagSet;

use super::{strip_exe_suffix, ModuleInfo, ProcessApi};
use crate::rights::{is_readable, is_writable, PageRights, ProcessAccessRights};

const PAGE_SIZE: usize = 0x1000;
const FIRST_ALLOCATION: usize = 0x0040_0000;

struct Region {
    data: Vec<u8>,
    protection: FlagSet<PageRights>,
}

struct Process {
    exe_file: String,
    modules: Vec<ModuleInfo>,
    regions: BTreeMap<usize, Region>,
    exited: bool,
    access_denied: bool,
    close_refused: bool,
}

impl Process {
    fn region_at(&self, addr: usize) -> Option<(usize, &Region)> {
        self.regions
            .range(..=addr)
            .next_back()
            .filter(|(base, region)| addr - **base < region.data.len())
            .map(|(base, region)| (*base, region))
    }

    fn region_at_mut(&mut self, addr: usize) -> Option<(usize, &mut Region)> {
        self.regions
            .range_mut(..=addr)
            .next_back()
            .filter(|(base, region)| addr - **base < region.data.len())
            .map(|(base, region)| (*base, region))
    }
}

struct State {
    processes: BTreeMap<u32, Process>,
    handles: HashMap<u64, u32>,
    next_process_id: u32,
    next_handle: u64,
    next_addr: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            processes: BTreeMap::new(),
            handles: HashMap::new(),
            next_process_id: 1000,
            next_handle: 4,
            next_addr: FIRST_ALLOCATION,
        }
    }
}

impl State {
    fn process_mut(&mut self, process_id: u32) -> Result<&mut Process> {
        self.processes
            .get_mut(&process_id)
            .ok_or_else(|| anyhow!("Process {} not found", process_id))
    }

    fn attached_process(&self, handle: SimulatedHandle) -> Result<&Process> {
        let process_id = self
            .handles
            .get(&handle.0)
            .ok_or_else(|| anyhow!("Invalid handle {:?}", handle))?;
        let process = &self.processes[process_id];
        if process.exited {
            bail!("Process {} has exited", process_id);
        }
        Ok(process)
    }

    fn attached_process_mut(&mut self, handle: SimulatedHandle) -> Result<&mut Process> {
        self.attached_process(handle)?;
        let process_id = self.handles[&handle.0];
        self.process_mut(process_id)
    }

    /// Reserves address space, leaving an unmapped page after it so that overruns are short
    /// transfers.
    fn reserve(&mut self, size: usize) -> usize {
        let addr = self.next_addr;
        self.next_addr += (size.div_ceil(PAGE_SIZE) + 1) * PAGE_SIZE;
        addr
    }

    fn allocate(
        &mut self,
        process_id: u32,
        size: usize,
        protection: FlagSet<PageRights>,
    ) -> Result<usize> {
        if size == 0 {
            bail!("Cannot allocate 0 bytes");
        }
        self.process_mut(process_id)?;
        let addr = self.reserve(size);
        self.process_mut(process_id)?.regions.insert(
            addr,
            Region {
                data: vec![0; size],
                protection,
            },
        );
        Ok(addr)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SimulatedHandle(u64);

/// In-memory stand-in for the host OS, with processes, regions and page protection.
///
/// Clones share the same simulated system.
#[derive(Clone, Default)]
pub struct SimulatedProcessApi {
    state: Rc<RefCell<State>>,
}

impl SimulatedProcessApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a process whose primary module is `exe_file`.
    pub fn spawn(&self, exe_file: &str) -> u32 {
        let mut state = self.state.borrow_mut();
        let process_id = state.next_process_id;
        state.next_process_id += 4;
        let base = state.reserve(PAGE_SIZE);
        state.processes.insert(
            process_id,
            Process {
                exe_file: exe_file.to_owned(),
                modules: vec![ModuleInfo::new(base, exe_file.to_owned())],
                regions: BTreeMap::from([(
                    base,
                    Region {
                        data: vec![0; PAGE_SIZE],
                        protection: PageRights::ReadOnly.into(),
                    },
                )]),
                exited: false,
                access_denied: false,
                close_refused: false,
            },
        );
        process_id
    }

    pub fn allocate(
        &self,
        process_id: u32,
        size: usize,
        protection: impl Into<FlagSet<PageRights>>,
    ) -> Result<usize> {
        self.state
            .borrow_mut()
            .allocate(process_id, size, protection.into())
    }

    /// Maps a read-only image of `size` bytes and registers it as a module.
    pub fn load_module(&self, process_id: u32, name: &str, size: usize) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        let base = state.allocate(process_id, size, PageRights::ReadOnly.into())?;
        state
            .process_mut(process_id)?
            .modules
            .push(ModuleInfo::new(base, name.to_owned()));
        Ok(base)
    }

    pub fn terminate(&self, process_id: u32) -> Result<()> {
        self.state.borrow_mut().process_mut(process_id)?.exited = true;
        Ok(())
    }

    /// Makes every later `open_process` on `process_id` fail.
    pub fn deny_access(&self, process_id: u32) -> Result<()> {
        self.state.borrow_mut().process_mut(process_id)?.access_denied = true;
        Ok(())
    }

    /// Makes every later `close_handle` on a handle of `process_id` fail and leave the handle open.
    pub fn refuse_close(&self, process_id: u32) -> Result<()> {
        self.state.borrow_mut().process_mut(process_id)?.close_refused = true;
        Ok(())
    }

    pub fn open_handle_count(&self) -> usize {
        self.state.borrow().handles.len()
    }

    pub fn protection_at(&self, process_id: u32, addr: usize) -> Option<FlagSet<PageRights>> {
        let state = self.state.borrow();
        let process = state.processes.get(&process_id)?;
        process.region_at(addr).map(|(_, region)| region.protection)
    }
}

impl ProcessApi for SimulatedProcessApi {
    type Handle = SimulatedHandle;

    fn find_process_ids(&self, name: &str) -> Result<Vec<u32>> {
        let name = strip_exe_suffix(name);
        Ok(self
            .state
            .borrow()
            .processes
            .iter()
            .filter(|(_, process)| !process.exited)
            .filter(|(_, process)| strip_exe_suffix(&process.exe_file).eq_ignore_ascii_case(name))
            .map(|(&process_id, _)| process_id)
            .collect())
    }

    fn open_process(
        &self,
        access: FlagSet<ProcessAccessRights>,
        _inherit_handle: bool,
        process_id: u32,
    ) -> Result<Self::Handle> {
        let mut state = self.state.borrow_mut();
        let process = state.process_mut(process_id)?;
        if process.exited {
            bail!("Process {} has exited", process_id);
        }
        if process.access_denied || !access.contains(ProcessAccessRights::Read) {
            bail!("Access denied");
        }
        let handle = state.next_handle;
        state.next_handle += 4;
        state.handles.insert(handle, process_id);
        Ok(SimulatedHandle(handle))
    }

    fn close_handle(&self, handle: Self::Handle) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let process_id = *state
            .handles
            .get(&handle.0)
            .ok_or_else(|| anyhow!("Invalid handle {:?}", handle))?;
        if state.processes[&process_id].close_refused {
            bail!("Cannot close handle {:?}", handle);
        }
        state.handles.remove(&handle.0);
        Ok(())
    }

    fn read_memory(&self, handle: Self::Handle, addr: usize, buffer: &mut [u8]) -> Result<usize> {
        let state = self.state.borrow();
        let process = state.attached_process(handle)?;
        let Some((base, region)) = process.region_at(addr) else {
            bail!("Access violation reading {:#x}", addr);
        };
        if !is_readable(region.protection) {
            bail!("Access violation reading {:#x}", addr);
        }
        let data = &region.data[addr - base..];
        let len = buffer.len().min(data.len());
        buffer[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn write_memory(&self, handle: Self::Handle, addr: usize, buffer: &[u8]) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        let process = state.attached_process_mut(handle)?;
        let Some((base, region)) = process.region_at_mut(addr) else {
            bail!("Access violation writing {:#x}", addr);
        };
        if !is_writable(region.protection) {
            bail!("Access violation writing {:#x}", addr);
        }
        let data = &mut region.data[addr - base..];
        let len = buffer.len().min(data.len());
        data[..len].copy_from_slice(&buffer[..len]);
        Ok(len)
    }

    /// Re-protects the whole region containing `addr`; regions are never split, so a sub-range
    /// request affects the rest of its region too.
    fn virtual_protect(
        &self,
        handle: Self::Handle,
        addr: usize,
        size: usize,
        protect: FlagSet<PageRights>,
    ) -> Result<FlagSet<PageRights>> {
        if protect.is_empty() {
            bail!("Invalid page protection");
        }
        let mut state = self.state.borrow_mut();
        let process = state.attached_process_mut(handle)?;
        let Some((base, region)) = process.region_at_mut(addr) else {
            bail!("No region at {:#x}", addr);
        };
        if size > region.data.len() - (addr - base) {
            bail!("Range {:#x}+{:#x} crosses the end of its region", addr, size);
        }
        Ok(std::mem::replace(&mut region.protection, protect))
    }

    fn primary_module_base(&self, handle: Self::Handle) -> Result<usize> {
        let state = self.state.borrow();
        state
            .attached_process(handle)?
            .modules
            .first()
            .map(|module| module.base())
            .ok_or_else(|| anyhow!("Module not found"))
    }

    fn modules(&self, handle: Self::Handle) -> Result<Vec<ModuleInfo>> {
        Ok(self.state.borrow().attached_process(handle)?.modules.clone())
    }
}
