// Dispatch table for system calls entered via trap.rs's usertrap().
//
// The actual per-syscall bodies live in sysproc.rs (process-related)
// and sysfile.rs (file-related), as methods on SysCalls. This module
// only owns argument fetching and the dispatch switch itself.
use crate::proc::{Proc, ProcData, CPUS};
use crate::sysctbl::SysCallNum;
use crate::vm::{Addr, UVAddr};
use crate::{print, println};
use alloc::sync::Arc;
use core::mem::size_of_val;

// Borrowed view of the calling process used by every sys_* method.
// Lives only for the duration of syscall() - proc and data both
// point at the current process's own state, already private to it.
pub struct SysCalls<'a> {
    pub proc: &'a Arc<Proc>,
    pub data: &'a mut ProcData,
}

impl<'a> SysCalls<'a> {
    pub fn arg(&self, n: usize) -> usize {
        let tf = unsafe { self.data.trapframe.unwrap().as_ref() };
        match n {
            0 => tf.a0,
            1 => tf.a1,
            2 => tf.a2,
            3 => tf.a3,
            4 => tf.a4,
            5 => tf.a5,
            _ => panic!("arg"),
        }
    }

    // Retrieve an argument as a UVAddr.
    // Doesn't check legality, since copyin/copyout will do that.
    pub fn arg_addr(&self, n: usize) -> UVAddr {
        UVAddr::from(self.arg(n))
    }

    // Fetch the data at addr from the current process.
    // Safety: T's memory layout must be fixed.
    pub unsafe fn fetch_data<T: ?Sized>(&mut self, addr: UVAddr, buf: &mut T) -> Result<usize, ()> {
        if addr.into_usize() >= self.data.sz || addr.into_usize() + size_of_val(buf) > self.data.sz
        {
            // both tests needed, in case of overflow
            return Err(());
        }
        self.data.uvm.as_mut().unwrap().copyin(buf, addr).and(Ok(0))
    }

    pub unsafe fn fetch_slice<T>(&mut self, addr: UVAddr, buf: &mut [T]) -> Result<usize, ()> {
        let mut data: UVAddr = UVAddr::from(0);
        let mut len: usize = 0;
        self.fetch_data(addr, &mut data)?;
        self.fetch_data(addr + core::mem::size_of::<usize>(), &mut len)?;
        if len > buf.len() || len == 0 || data.into_usize() == 0 {
            return Err(());
        }
        self.data
            .uvm
            .as_mut()
            .unwrap()
            .copyin(&mut buf[..len], data)
            .and(Ok(0))
    }

    // Fetch the str at addr from the current process.
    pub fn fetch_str<'b>(&mut self, addr: UVAddr, buf: &'b mut [u8]) -> Result<&'b str, ()> {
        unsafe {
            self.fetch_slice(addr, buf)?;
        }
        Ok(core::str::from_utf8_mut(buf)
            .or(Err(()))?
            .trim_end_matches(char::from(0)))
    }

    // Fetch the nth word-sized system call argument as a str.
    pub fn arg_str<'b>(&mut self, n: usize, buf: &'b mut [u8]) -> Result<&'b str, ()> {
        let addr = self.arg_addr(n);
        self.fetch_str(addr, buf)
    }
}

#[cfg(target_os = "none")]
pub fn syscall() {
    let p = CPUS.my_proc().unwrap().clone();
    let data = unsafe { &mut *p.data.get() };
    let a7 = unsafe { data.trapframe.unwrap().as_ref().a7 };

    let mut sc = SysCalls {
        proc: &p,
        data,
    };

    let ret = match SysCallNum::from_usize(a7) {
        None => {
            println!("{} {}: unknown sys call {}", p.pid(), sc.data.name, a7);
            Err(())
        }
        Some(SysCallNum::SysFork) => sc.sys_fork(),
        Some(SysCallNum::SysExit) => sc.sys_exit(),
        Some(SysCallNum::SysWait) => sc.sys_wait(),
        Some(SysCallNum::SysPipe) => sc.sys_pipe(),
        Some(SysCallNum::SysRead) => sc.sys_read(),
        Some(SysCallNum::SysKill) => sc.sys_kill(),
        Some(SysCallNum::SysExec) => sc.sys_exec(),
        Some(SysCallNum::SysFstat) => sc.sys_fstat(),
        Some(SysCallNum::SysChdir) => sc.sys_chdir(),
        Some(SysCallNum::SysDup) => sc.sys_dup(),
        Some(SysCallNum::SysGetpid) => sc.sys_getpid(),
        Some(SysCallNum::SysSbrk) => sc.sys_sbrk(),
        Some(SysCallNum::SysSleep) => sc.sys_sleep(),
        Some(SysCallNum::SysUptime) => sc.sys_uptime(),
        Some(SysCallNum::SysOpen) => sc.sys_open(),
        Some(SysCallNum::SysWrite) => sc.sys_write(),
        Some(SysCallNum::SysMknod) => sc.sys_mknod(),
        Some(SysCallNum::SysUnlink) => sc.sys_unlink(),
        Some(SysCallNum::SysLink) => sc.sys_link(),
        Some(SysCallNum::SysMkdir) => sc.sys_mkdir(),
        Some(SysCallNum::SysClose) => sc.sys_close(),
    };

    let tf = unsafe { sc.data.trapframe.unwrap().as_mut() };
    tf.a0 = ret.unwrap_or(-1_isize as usize);
}
