
// Load a program segment into pagetable at virtual address va.
// va must be page-aligned
// and the pages from va to va+sz must already be mapped.
// Returns Ok(()) on success, Err(()) on failure.

use crate::{
    fs::{IData, Path},
    param::MAXARG,
    sleeplock::SleepLockGuard,
    vm::{Addr, UVAddr, VirtAddr},
};
use alloc::string::String;

// ELF loading proper is an external collaborator (spec names exec's
// loader as out of scope): opening the binary, parsing program
// headers, and building the argv/argc stack on top of loadseg()
// below. Until that loader lands, exec() fails every call rather than
// leaving the symbol undefined for sysfile.rs's sys_exec() to link
// against.
pub fn exec(_path: &Path, _argv: [Option<String>; MAXARG]) -> Result<usize, ()> {
    Err(())
}

impl crate::vm::Uvm {
    pub fn loadseg(
        &mut self,
        va: UVAddr,
        ip_guard: &mut SleepLockGuard<IData>,
        off: usize,
        sz: usize,
    ) -> Result<(), ()> {
        if !va.is_aligned() {
            panic!("loadseg(): va must be aligned.");
        }

        ip_guard
            .read(VirtAddr::from(va), off as u32, sz)
            .map(|n| if n == sz { () } else { panic!("loadseg(): short read") })
            .map_err(|_| ())
    }
}