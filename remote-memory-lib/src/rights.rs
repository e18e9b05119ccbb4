use flagset::{flags, FlagSet};

flags! {
    /// Page protection constants, bit-exact with `PAGE_*` of the Win32 memory API.
    pub enum PageRights: u32 {
        NoAccess = 0x01,
        ReadOnly = 0x02,
        ReadWrite = 0x04,
        WriteCopy = 0x08,
        Execute = 0x10,
        ExecuteRead = 0x20,
        ExecuteReadWrite = 0x40,
        ExecuteWriteCopy = 0x80,
        Guard = 0x100,
        NoCache = 0x200,
        WriteCombine = 0x400,
    }

    /// Process access rights, bit-exact with `PROCESS_*` of the Win32 threading API.
    pub enum ProcessAccessRights: u32 {
        Operation = 0x08,
        Read = 0x10,
        Write = 0x20,
        QueryInformation = 0x400,
    }
}

impl ProcessAccessRights {
    pub fn vm_all() -> FlagSet<ProcessAccessRights> {
        ProcessAccessRights::Operation | ProcessAccessRights::Read | ProcessAccessRights::Write
    }
}

pub fn is_readable(rights: FlagSet<PageRights>) -> bool {
    if rights.contains(PageRights::Guard) {
        return false;
    }
    !(rights
        & (PageRights::ReadOnly
            | PageRights::ReadWrite
            | PageRights::WriteCopy
            | PageRights::ExecuteRead
            | PageRights::ExecuteReadWrite
            | PageRights::ExecuteWriteCopy))
        .is_empty()
}

pub fn is_writable(rights: FlagSet<PageRights>) -> bool {
    if rights.contains(PageRights::Guard) {
        return false;
    }
    !(rights
        & (PageRights::ReadWrite
            | PageRights::WriteCopy
            | PageRights::ExecuteReadWrite
            | PageRights::ExecuteWriteCopy))
        .is_empty()
}
