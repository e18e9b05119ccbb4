#![cfg(windows)]

use std::env::current_exe;

use remote_memory_lib::{HandleManager, Win32ProcessApi};

fn own_exe_file() -> String {
    current_exe()
        .unwrap()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned()
}

#[test]
fn read_and_write_own_process() {
    let mut manager = HandleManager::new(Win32ProcessApi);
    assert!(manager.attach(&own_exe_file()).unwrap());

    let target = Box::new(0i32);
    let addr = &*target as *const i32 as usize;
    let memory = manager.memory();
    memory.write_i32(addr, 0xdeadbeefu32 as i32).unwrap();
    assert_eq!(memory.read_i32(addr).unwrap() as u32, 0xdeadbeef);
    assert_eq!(unsafe { std::ptr::read_volatile(&*target) } as u32, 0xdeadbeef);

    let base = manager.base_address().unwrap();
    assert_ne!(base, 0);
    let modules = manager.module_map().unwrap();
    assert!(modules
        .get(&base)
        .is_some_and(|name| name.eq_ignore_ascii_case(&own_exe_file())));

    manager.detach();
    manager.detach();
    assert!(!manager.attached());
}

#[test]
#[ignore = "needs a running notepad"]
fn attach_to_notepad() {
    let mut manager = HandleManager::new(Win32ProcessApi);
    assert!(manager.attach("notepad.exe").unwrap());
    let base = manager.base_address().unwrap();
    assert_ne!(base, 0);
    let modules = manager.module_map().unwrap();
    assert!(!modules.is_empty());
    assert!(modules.contains_key(&base));
}
