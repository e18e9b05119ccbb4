use std::mem::size_of;

use anyhow::Result;
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};

use crate::{process_apis::strip_exe_suffix, win_api_wrappers::SafeHandle};

fn exe_file_of(pe: &PROCESSENTRY32W) -> String {
    let len = pe
        .szExeFile
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(pe.szExeFile.len());
    String::from_utf16_lossy(&pe.szExeFile[..len])
}

fn find_process_ids_in_snapshot(snapshot: &SafeHandle, name: &str) -> Vec<u32> {
    let mut pe = PROCESSENTRY32W {
        dwSize: size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };
    let mut process_ids = Vec::new();
    if unsafe { Process32FirstW(snapshot.0, &mut pe) }.is_err() {
        return process_ids;
    }
    loop {
        if strip_exe_suffix(&exe_file_of(&pe)).eq_ignore_ascii_case(name) {
            process_ids.push(pe.th32ProcessID);
        }

        if unsafe { Process32NextW(snapshot.0, &mut pe) }.is_err() {
            return process_ids;
        }
    }
}

/// Ids of every running process whose executable is `name`, in snapshot order.
pub fn find_process_ids(name: &str) -> Result<Vec<u32>> {
    let snapshot = SafeHandle(unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }?);

    Ok(find_process_ids_in_snapshot(
        &snapshot,
        strip_exe_suffix(name),
    ))
}
