use std::{ffi::c_void, mem::size_of};

use anyhow::{anyhow, Result};
use flagset::FlagSet;
use windows::Win32::{
    Foundation::{CloseHandle, BOOL, HANDLE, HMODULE, MAX_PATH},
    System::{
        Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory},
        Memory::{VirtualProtectEx, PAGE_PROTECTION_FLAGS},
        ProcessStatus::{EnumProcessModules, GetModuleBaseNameW},
        Threading::{OpenProcess, PROCESS_ACCESS_RIGHTS},
    },
};

use super::{ModuleInfo, ProcessApi};
use crate::{
    find_process_id::find_process_ids,
    rights::{PageRights, ProcessAccessRights},
};

fn module_handles(process: HANDLE) -> Result<Vec<HMODULE>> {
    let mut modules = vec![HMODULE::default(); 1024];
    let mut cb_needed = 0;
    unsafe {
        EnumProcessModules(
            process,
            modules.as_mut_ptr(),
            (modules.len() * size_of::<HMODULE>()) as u32,
            &mut cb_needed,
        )
    }?;
    let num_modules = cb_needed as usize / size_of::<HMODULE>();
    modules.truncate(num_modules);
    Ok(modules)
}

fn module_base_name(process: HANDLE, module: HMODULE) -> String {
    let mut base_name = [0u16; MAX_PATH as usize];
    let len = unsafe { GetModuleBaseNameW(process, module, &mut base_name) };
    String::from_utf16_lossy(&base_name[0..len as usize])
}

/// `ProcessApi` backed by the Win32 process and virtual memory functions.
#[derive(Clone, Copy, Debug, Default)]
pub struct Win32ProcessApi;

impl ProcessApi for Win32ProcessApi {
    type Handle = HANDLE;

    fn find_process_ids(&self, name: &str) -> Result<Vec<u32>> {
        find_process_ids(name)
    }

    fn open_process(
        &self,
        access: FlagSet<ProcessAccessRights>,
        inherit_handle: bool,
        process_id: u32,
    ) -> Result<Self::Handle> {
        Ok(unsafe {
            OpenProcess(
                PROCESS_ACCESS_RIGHTS(access.bits()),
                BOOL::from(inherit_handle),
                process_id,
            )
        }?)
    }

    fn close_handle(&self, handle: Self::Handle) -> Result<()> {
        Ok(unsafe { CloseHandle(handle) }?)
    }

    fn read_memory(&self, handle: Self::Handle, addr: usize, buffer: &mut [u8]) -> Result<usize> {
        let mut number_of_bytes_read: usize = 0;
        unsafe {
            ReadProcessMemory(
                handle,
                addr as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len(),
                Some(&mut number_of_bytes_read),
            )
        }?;
        Ok(number_of_bytes_read)
    }

    fn write_memory(&self, handle: Self::Handle, addr: usize, buffer: &[u8]) -> Result<usize> {
        let mut number_of_bytes_written: usize = 0;
        unsafe {
            WriteProcessMemory(
                handle,
                addr as *const c_void,
                buffer.as_ptr() as *const c_void,
                buffer.len(),
                Some(&mut number_of_bytes_written),
            )
        }?;
        Ok(number_of_bytes_written)
    }

    fn virtual_protect(
        &self,
        handle: Self::Handle,
        addr: usize,
        size: usize,
        protect: FlagSet<PageRights>,
    ) -> Result<FlagSet<PageRights>> {
        let mut old: PAGE_PROTECTION_FLAGS = Default::default();
        unsafe {
            VirtualProtectEx(
                handle,
                addr as *const c_void,
                size,
                PAGE_PROTECTION_FLAGS(protect.bits()),
                &mut old,
            )
        }?;
        Ok(FlagSet::new_truncated(old.0))
    }

    fn primary_module_base(&self, handle: Self::Handle) -> Result<usize> {
        module_handles(handle)?
            .first()
            .map(|module| module.0 as usize)
            .ok_or_else(|| anyhow!("module not found"))
    }

    fn modules(&self, handle: Self::Handle) -> Result<Vec<ModuleInfo>> {
        Ok(module_handles(handle)?
            .into_iter()
            .map(|module| ModuleInfo::new(module.0 as usize, module_base_name(handle, module)))
            .collect())
    }
}
