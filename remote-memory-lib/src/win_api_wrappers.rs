use tracing::warn;
use windows::Win32::Foundation::{CloseHandle, HANDLE};

/// Closes the wrapped handle when dropped.
pub struct SafeHandle(pub HANDLE);

impl Drop for SafeHandle {
    fn drop(&mut self) {
        if let Err(err) = unsafe { CloseHandle(self.0) } {
            warn!("CloseHandle failed: {}", err);
        }
    }
}
