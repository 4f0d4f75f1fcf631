use riscv::register::*;
use core::arch::asm;

// Hand-rolled wrappers around registers the `riscv` crate doesn't expose
// the way we need them (a raw whole-register write, rather than bitfield
// accessors).
pub mod registers {
    pub mod satp {
        use core::arch::asm;

        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[repr(usize)]
        pub enum Mode {
            Bare = 0,
            Sv39 = 8,
        }

        // Pack a paging mode, address-space id and page-table physical
        // address into the bit layout satp expects.
        pub fn make(mode: Mode, asid: usize, pagetable: usize) -> usize {
            (mode as usize) << 60 | (asid & 0xFFFF) << 44 | (pagetable >> 12)
        }

        pub unsafe fn write(satp: usize) {
            asm!("csrw satp, {}", in(reg) satp);
        }

        pub fn read() -> usize {
            let satp: usize;
            unsafe { asm!("csrr {}, satp", out(reg) satp) }
            satp
        }
    }
}

// Bit positions within a Sv39 page table entry.
pub mod pteflags {
    pub const PTE_V: usize = 1 << 0; // valid
    pub const PTE_R: usize = 1 << 1; // readable
    pub const PTE_W: usize = 1 << 2; // writable
    pub const PTE_X: usize = 1 << 3; // executable
    pub const PTE_U: usize = 1 << 4; // user-accessible
    pub const PTE_G: usize = 1 << 5; // global mapping
    pub const PTE_A: usize = 1 << 6; // accessed
    pub const PTE_D: usize = 1 << 7; // dirty
}

pub fn sfence_vma() {
    unsafe {
        asm!("sfence.vma zero, zero");
    }
}

pub fn w_sstatus(sstatus: usize) {
    unsafe {
        asm!("csrw sstatus, {}", in(reg) sstatus);
    }
}

pub fn r_sstatus() -> usize {
    let sstatus: usize;
    unsafe { asm!("csrr {}, sstatus", out(reg) sstatus) }
    sstatus
}

pub fn w_sip(sip: usize) {
    unsafe {
        asm!("csrw sip, {}", in(reg) sip);
    }
}

// use riscv's sv39 page table scheme.
pub const STAP_SV39: usize = 8 << 60;

// enable device interrupts
pub fn intr_on() {
    unsafe {
        sstatus::set_sie();
    }
}

// disable device interrupts
pub fn intr_off() {
    unsafe {
        sstatus::clear_sie();
    }
}

// are device interrupts enabled?
pub fn intr_get() -> bool {
    sstatus::read().sie()
}

//pub unsafe fn sfence_vma() {
//    // the zero, zero means flush all TBD entries.
//    asm!("sfence.vma zero, zero");
//}

pub const PGSIZE: usize = 4096; // bytes per page
pub const PGSHIFT: usize = 12; // bits of offset within a page

pub const fn pgroundup(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

pub const fn pgrounddown(sz: usize) -> usize {
    sz & !(PGSIZE - 1)
}
