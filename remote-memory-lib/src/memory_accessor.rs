mod pointer_chain;
mod protection;

use anyhow::anyhow;

use crate::{
    error::{MemoryError, Result},
    handle_manager::HandleManager,
    process_apis::ProcessApi,
    scalar::Scalar,
};

pub use protection::ProtectionGuard;

macro_rules! scalar_accessors {
    ($($type:ty => $read:ident, $write:ident;)*) => {
        $(
            pub fn $read(&self, addr: usize) -> Result<$type> {
                self.read(addr)
            }

            pub fn $write(&self, addr: usize, value: $type) -> Result<()> {
                self.write(addr, value)
            }
        )*
    };
}

fn require_addr(addr: usize) -> Result<()> {
    if addr == 0 {
        return Err(MemoryError::InvalidArgument("address is zero"));
    }
    Ok(())
}

/// Typed access to the memory of the process attached to a [`HandleManager`].
pub struct MemoryAccessor<'a, P: ProcessApi> {
    handles: &'a HandleManager<P>,
}

impl<P: ProcessApi> Clone for MemoryAccessor<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: ProcessApi> Copy for MemoryAccessor<'_, P> {}

impl<'a, P: ProcessApi> MemoryAccessor<'a, P> {
    pub(crate) fn new(handles: &'a HandleManager<P>) -> Self {
        Self { handles }
    }

    /// Fills `buffer` from `addr`. A short read is an error.
    pub fn read_into(&self, addr: usize, buffer: &mut [u8]) -> Result<()> {
        require_addr(addr)?;
        if buffer.is_empty() {
            return Err(MemoryError::InvalidArgument("buffer is empty"));
        }
        let handle = self.handles.require_handle()?;
        let number_of_bytes_read = self
            .handles
            .api()
            .read_memory(handle, addr, buffer)
            .map_err(MemoryError::os("read_memory"))?;
        if number_of_bytes_read != buffer.len() {
            return Err(MemoryError::OsOperationFailed(
                "read_memory",
                anyhow!(
                    "read {} of {} bytes at {:#x}",
                    number_of_bytes_read,
                    buffer.len(),
                    addr
                ),
            ));
        }
        Ok(())
    }

    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Err(MemoryError::InvalidArgument("length is zero"));
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| MemoryError::InvalidArgument("length is too large"))?;
        buffer.resize(len, 0);
        self.read_into(addr, &mut buffer)?;
        Ok(buffer)
    }

    /// Writes all of `buffer` at `addr`. A short write is an error.
    pub fn write_bytes(&self, addr: usize, buffer: &[u8]) -> Result<()> {
        require_addr(addr)?;
        if buffer.is_empty() {
            return Err(MemoryError::InvalidArgument("buffer is empty"));
        }
        let handle = self.handles.require_handle()?;
        let number_of_bytes_written = self
            .handles
            .api()
            .write_memory(handle, addr, buffer)
            .map_err(MemoryError::os("write_memory"))?;
        if number_of_bytes_written != buffer.len() {
            return Err(MemoryError::OsOperationFailed(
                "write_memory",
                anyhow!(
                    "wrote {} of {} bytes at {:#x}",
                    number_of_bytes_written,
                    buffer.len(),
                    addr
                ),
            ));
        }
        Ok(())
    }

    pub fn read<T: Scalar>(&self, addr: usize) -> Result<T> {
        let mut buffer = vec![0; T::SIZE];
        self.read_into(addr, &mut buffer)?;
        Ok(T::from_le_slice(&buffer))
    }

    pub fn write<T: Scalar>(&self, addr: usize, value: T) -> Result<()> {
        self.write_bytes(addr, &value.to_le_vec())
    }

    scalar_accessors! {
        u8 => read_u8, write_u8;
        i16 => read_i16, write_i16;
        i32 => read_i32, write_i32;
        i64 => read_i64, write_i64;
        f32 => read_f32, write_f32;
        f64 => read_f64, write_f64;
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use super::*;
    use crate::{process_apis::SimulatedProcessApi, rights::PageRights};

    fn attached() -> (SimulatedProcessApi, HandleManager<SimulatedProcessApi>, usize) {
        let api = SimulatedProcessApi::new();
        let process_id = api.spawn("game.exe");
        let addr = api.allocate(process_id, 64, PageRights::ReadWrite).unwrap();
        let mut manager = HandleManager::new(api.clone());
        assert!(manager.attach("game").unwrap());
        (api, manager, addr)
    }

    fn assert_round_trip<T: Scalar + PartialEq + Debug>(
        memory: &MemoryAccessor<SimulatedProcessApi>,
        addr: usize,
        values: &[T],
    ) {
        for &value in values {
            memory.write(addr, value).unwrap();
            assert_eq!(memory.read::<T>(addr).unwrap(), value);
        }
    }

    #[test]
    fn unattached_operations_fail_with_invalid_state() {
        let manager = HandleManager::new(SimulatedProcessApi::new());
        let memory = manager.memory();
        let addr = 0x1000;
        assert!(matches!(memory.read_u8(addr), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.read_i16(addr), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.read_i32(addr), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.read_i64(addr), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.read_f32(addr), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.read_f64(addr), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.write_u8(addr, 1), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.write_i16(addr, 1), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.write_i32(addr, 1), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.write_i64(addr, 1), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.write_f32(addr, 1.0), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.write_f64(addr, 1.0), Err(MemoryError::InvalidState)));
        assert!(matches!(memory.read_bytes(addr, 4), Err(MemoryError::InvalidState)));
        assert!(matches!(
            memory.write_bytes(addr, &[1, 2]),
            Err(MemoryError::InvalidState)
        ));
    }

    #[test]
    fn zero_address_is_invalid_argument_whether_attached_or_not() {
        let unattached = HandleManager::new(SimulatedProcessApi::new());
        let (_api, manager, _) = attached();
        for memory in [unattached.memory(), manager.memory()] {
            assert!(matches!(memory.read_u8(0), Err(MemoryError::InvalidArgument(_))));
            assert!(matches!(memory.read_f64(0), Err(MemoryError::InvalidArgument(_))));
            assert!(matches!(memory.write_i32(0, 7), Err(MemoryError::InvalidArgument(_))));
            assert!(matches!(memory.read_bytes(0, 4), Err(MemoryError::InvalidArgument(_))));
            assert!(matches!(
                memory.write_bytes(0, &[1]),
                Err(MemoryError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn empty_buffers_are_invalid_arguments() {
        let (_api, manager, addr) = attached();
        let memory = manager.memory();
        assert!(matches!(
            memory.write_bytes(addr, &[]),
            Err(MemoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            memory.read_bytes(addr, 0),
            Err(MemoryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn oversized_read_is_invalid_argument() {
        let (_api, manager, addr) = attached();
        let memory = manager.memory();
        assert!(matches!(
            memory.read_bytes(addr, usize::MAX),
            Err(MemoryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn scalars_round_trip() {
        let (_api, manager, addr) = attached();
        let memory = manager.memory();
        assert_round_trip(&memory, addr, &[0u8, u8::MAX, 0x7f]);
        assert_round_trip(&memory, addr, &[0i16, i16::MAX, i16::MIN, -1]);
        assert_round_trip(&memory, addr, &[0i32, i32::MAX, i32::MIN, -1]);
        assert_round_trip(&memory, addr, &[0i64, i64::MAX, i64::MIN, -1]);
        assert_round_trip(&memory, addr, &[0f32, f32::MAX, f32::MIN, -1.0]);
        assert_round_trip(&memory, addr, &[0f64, f64::MAX, f64::MIN, -1.0]);
    }

    #[test]
    fn named_accessors_use_exact_width_little_endian() {
        let (_api, manager, addr) = attached();
        let memory = manager.memory();
        memory.write_i32(addr, 0xdeadbeefu32 as i32).unwrap();
        assert_eq!(memory.read_i32(addr).unwrap(), 0xdeadbeefu32 as i32);
        assert_eq!(memory.read_bytes(addr, 4).unwrap(), [0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(memory.read_i16(addr).unwrap(), 0xbeefu16 as i16);
        assert_eq!(memory.read_u8(addr + 3).unwrap(), 0xde);

        memory.write_u8(addr + 1, 0).unwrap();
        assert_eq!(memory.read_i32(addr).unwrap(), 0xdead00efu32 as i32);
    }

    #[test]
    fn byte_blocks_round_trip() {
        let (_api, manager, addr) = attached();
        let memory = manager.memory();
        let patch = [0x90, 0x90, 0xeb, 0x05];
        memory.write_bytes(addr + 8, &patch).unwrap();
        assert_eq!(memory.read_bytes(addr + 8, 4).unwrap(), patch);
        let mut buffer = [0u8; 6];
        memory.read_into(addr + 7, &mut buffer).unwrap();
        assert_eq!(buffer, [0, 0x90, 0x90, 0xeb, 0x05, 0]);
    }

    #[test]
    fn short_transfers_are_os_failures() {
        let (_api, manager, addr) = attached();
        let memory = manager.memory();
        assert!(matches!(
            memory.read_i64(addr + 60),
            Err(MemoryError::OsOperationFailed("read_memory", _))
        ));
        assert!(matches!(
            memory.write_i64(addr + 60, 1),
            Err(MemoryError::OsOperationFailed("write_memory", _))
        ));
    }

    #[test]
    fn os_refusals_are_reported_for_reads_and_writes() {
        let (api, manager, _) = attached();
        let process_id = manager.process_id().unwrap();
        let read_only = api.allocate(process_id, 8, PageRights::ReadOnly).unwrap();
        let no_access = api.allocate(process_id, 8, PageRights::NoAccess).unwrap();
        let memory = manager.memory();

        assert_eq!(memory.read_i32(read_only).unwrap(), 0);
        assert!(matches!(
            memory.write_i32(read_only, 1),
            Err(MemoryError::OsOperationFailed("write_memory", _))
        ));
        assert!(matches!(
            memory.read_i32(no_access),
            Err(MemoryError::OsOperationFailed("read_memory", _))
        ));
        api.terminate(process_id).unwrap();
        assert!(matches!(
            memory.read_i32(read_only),
            Err(MemoryError::OsOperationFailed("read_memory", _))
        ));
    }
}
