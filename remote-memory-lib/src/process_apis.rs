mod simulated;
#[cfg(windows)]
mod win32;

use anyhow::Result;
use derive_new::new;
use flagset::FlagSet;
use getset::{CopyGetters, Getters};

use crate::rights::{PageRights, ProcessAccessRights};

pub use simulated::{SimulatedHandle, SimulatedProcessApi};
#[cfg(windows)]
pub use win32::Win32ProcessApi;

/// Strips a trailing `.exe` (ASCII case-insensitive) from a process name.
pub fn strip_exe_suffix(name: &str) -> &str {
    const SUFFIX: &str = ".exe";
    let split = name.len().wrapping_sub(SUFFIX.len());
    match (name.get(..split), name.get(split..)) {
        (Some(stem), Some(suffix)) if suffix.eq_ignore_ascii_case(SUFFIX) => stem,
        _ => name,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, CopyGetters, Getters, new)]
pub struct ModuleInfo {
    #[getset(get_copy = "pub")]
    base: usize,
    #[getset(get = "pub")]
    name: String,
}

/// Operating system primitives used to reach into another process.
///
/// `read_memory` and `write_memory` return the number of bytes actually transferred;
/// callers decide what a short transfer means.
pub trait ProcessApi {
    type Handle: Copy;

    /// Process ids whose executable name, without its `.exe` suffix, equals `name`.
    fn find_process_ids(&self, name: &str) -> Result<Vec<u32>>;
    fn open_process(
        &self,
        access: FlagSet<ProcessAccessRights>,
        inherit_handle: bool,
        process_id: u32,
    ) -> Result<Self::Handle>;
    fn close_handle(&self, handle: Self::Handle) -> Result<()>;

    fn read_memory(&self, handle: Self::Handle, addr: usize, buffer: &mut [u8]) -> Result<usize>;
    fn write_memory(&self, handle: Self::Handle, addr: usize, buffer: &[u8]) -> Result<usize>;
    /// Returns the protection that was in effect before the call.
    fn virtual_protect(
        &self,
        handle: Self::Handle,
        addr: usize,
        size: usize,
        protect: FlagSet<PageRights>,
    ) -> Result<FlagSet<PageRights>>;

    fn primary_module_base(&self, handle: Self::Handle) -> Result<usize>;
    fn modules(&self, handle: Self::Handle) -> Result<Vec<ModuleInfo>>;
}
