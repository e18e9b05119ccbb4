use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{MemoryError, Result},
    memory_accessor::MemoryAccessor,
    process_apis::{strip_exe_suffix, ProcessApi},
    rights::ProcessAccessRights,
};

struct Attachment<H> {
    process_id: u32,
    handle: H,
}

/// Owns the handle of the attached process and releases it on detach or drop.
pub struct HandleManager<P: ProcessApi> {
    api: P,
    config: Config,
    attachment: Option<Attachment<P::Handle>>,
}

impl<P: ProcessApi> HandleManager<P> {
    pub fn new(api: P) -> Self {
        Self::with_config(api, Config::default())
    }

    pub fn with_config(api: P, config: Config) -> Self {
        Self {
            api,
            config,
            attachment: None,
        }
    }

    pub fn api(&self) -> &P {
        &self.api
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn attached(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.attachment.as_ref().map(|attachment| attachment.process_id)
    }

    /// Attaches to the first process named `process_name` (with or without `.exe`).
    ///
    /// Returns `Ok(false)` when no such process runs or it refuses to be opened. Already being
    /// attached is a success and keeps the current process.
    pub fn attach(&mut self, process_name: &str) -> Result<bool> {
        if self.attached() {
            return Ok(true);
        }
        let name = strip_exe_suffix(process_name);
        let process_ids = self
            .api
            .find_process_ids(name)
            .map_err(MemoryError::os("find_process_ids"))?;
        let Some(&process_id) = process_ids.first() else {
            debug!("process {} not found", name);
            return Ok(false);
        };
        self.attach_pid(process_id)
    }

    pub fn attach_pid(&mut self, process_id: u32) -> Result<bool> {
        if self.attached() {
            return Ok(true);
        }
        let access = ProcessAccessRights::vm_all() | ProcessAccessRights::QueryInformation;
        match self
            .api
            .open_process(access, self.config.inherit_handle(), process_id)
        {
            Ok(handle) => {
                info!("attached to process {}", process_id);
                self.attachment = Some(Attachment { process_id, handle });
                Ok(true)
            }
            Err(err) => {
                warn!("failed to open process {}: {}", process_id, err);
                Ok(false)
            }
        }
    }

    /// Releases the handle. Does nothing when not attached.
    pub fn detach(&mut self) {
        let Some(attachment) = self.attachment.take() else {
            return;
        };
        if let Err(err) = self.api.close_handle(attachment.handle) {
            warn!(
                "failed to close handle of process {}: {}",
                attachment.process_id, err
            );
            return;
        }
        info!("detached from process {}", attachment.process_id);
    }

    pub fn require_handle(&self) -> Result<P::Handle> {
        self.attachment
            .as_ref()
            .map(|attachment| attachment.handle)
            .ok_or(MemoryError::InvalidState)
    }

    /// Load address of the primary executable module.
    pub fn base_address(&self) -> Result<usize> {
        let handle = self.require_handle()?;
        self.api
            .primary_module_base(handle)
            .map_err(MemoryError::os("primary_module_base"))
    }

    /// Loaded modules by base address. Empty when not attached.
    pub fn module_map(&self) -> Result<BTreeMap<usize, String>> {
        let Ok(handle) = self.require_handle() else {
            return Ok(BTreeMap::new());
        };
        let modules = self
            .api
            .modules(handle)
            .map_err(MemoryError::os("modules"))?;
        Ok(modules
            .into_iter()
            .map(|module| (module.base(), module.name().clone()))
            .collect())
    }

    pub fn memory(&self) -> MemoryAccessor<'_, P> {
        MemoryAccessor::new(self)
    }
}

impl<P: ProcessApi> Drop for HandleManager<P> {
    fn drop(&mut self) {
        self.detach();
    }
}
