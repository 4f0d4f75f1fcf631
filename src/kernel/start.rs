// entry.rs jumps here in machine mode, on stack0, before paging or
// supervisor mode are set up. start() does the one-time machine-mode
// setup and then drops to supervisor mode at main().

use crate::memlayout::{clint_mtimecmp, CLINT_MTIME};
use crate::param::NCPU;
use core::arch::asm;
use riscv::register::{mcounteren, medeleg, mepc, mhartid, mideleg, mie, mscratch, mstatus, mtvec, satp};

extern "C" {
    fn main() -> !;
    // in kernelvec.rs: machine-mode timer interrupt vector.
    fn timervec();
}

// entry.rs needs one 4096-byte stack per CPU.
#[repr(C, align(16))]
pub struct Stack([[u8; 4096]; NCPU]);

impl Stack {
    const fn new() -> Self {
        Self([[0; 4096]; NCPU])
    }
}

#[no_mangle]
pub static mut STACK0: Stack = Stack::new();

// scratch area per CPU for machine-mode timer interrupts.
static mut TIMER_SCRATCH: [[usize; 5]; NCPU] = [[0; 5]; NCPU];

pub unsafe fn start() -> ! {
    // set M Previous Privilege mode to Supervisor, for mret.
    mstatus::set_mpp(mstatus::MPP::Supervisor);

    // set M Exception Program Counter to main, for mret.
    // requires -mcmodel=medany
    mepc::write(main as usize);

    // disable paging for now.
    satp::write(0);

    // delegate all interrupts and exceptions to supervisor mode.
    medeleg::write(0xffff);
    mideleg::write(0xffff);
    mie::set_sext();
    mie::set_stimer();
    mie::set_ssoft();

    // ask for clock interrupts.
    timerinit();

    // keep each CPU's hartid in its tp register, for Cpus::cpu_id().
    let id = mhartid::read();
    asm!("mv tp, {0}", in(reg) id);

    // switch to supervisor mode and jump to main().
    asm!("mret", options(noreturn));
}

// arrange to receive timer interrupts in machine mode, which arrive
// at timervec in kernelvec.rs and are turned into software interrupts
// for devintr() in trap.rs.
unsafe fn timerinit() {
    let id = mhartid::read();

    // ask the CLINT for a timer interrupt.
    let interval: usize = 1_000_000; // cycles; about 1/10th second in qemu.
    let mtimecmp = clint_mtimecmp(id) as *mut usize;
    let mtime = CLINT_MTIME as *const usize;
    mtimecmp.write_volatile(mtime.read_volatile() + interval);

    // prepare information in scratch[] for timervec.
    // scratch[0..2]: space for timervec to save registers.
    // scratch[3]: address of CLINT mtimecmp register.
    // scratch[4]: desired interval between interrupts.
    let scratch = &mut TIMER_SCRATCH[id];
    scratch[3] = mtimecmp as usize;
    scratch[4] = interval;
    mscratch::write(scratch.as_ptr() as usize);

    // set the machine-mode trap handler.
    mtvec::write(timervec as usize, mtvec::TrapMode::Direct);

    // enable machine-mode interrupts.
    mstatus::set_mie();

    // enable machine-mode timer interrupts.
    mie::set_mtimer();

    // allow supervisor mode to read the cycle and time registers.
    mcounteren::set_cy();
    mcounteren::set_tm();
}
