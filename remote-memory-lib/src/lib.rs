mod config;
mod error;
#[cfg(windows)]
mod find_process_id;
mod handle_manager;
mod memory_accessor;
mod process_apis;
mod rights;
mod scalar;
#[cfg(windows)]
mod win_api_wrappers;

pub use config::{Config, PointerWidth};
pub use error::{MemoryError, Result};
pub use flagset::FlagSet;
pub use handle_manager::HandleManager;
pub use memory_accessor::{MemoryAccessor, ProtectionGuard};
#[cfg(windows)]
pub use process_apis::Win32ProcessApi;
pub use process_apis::{
    strip_exe_suffix, ModuleInfo, ProcessApi, SimulatedHandle, SimulatedProcessApi,
};
pub use rights::{is_readable, is_writable, PageRights, ProcessAccessRights};
pub use scalar::Scalar;
