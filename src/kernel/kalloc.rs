// Physical memory allocator, for user processes, kernel stacks,
// page-table pages, pipe buffers, and the buddy allocator above it.
// Allocates whole 4096-byte pages.
//
// Each CPU owns a freelist, protected by its own lock, so that pages
// freed by one hart and reused by another don't serialize allocation
// across every hart in the box. alloc() only crosses into another
// CPU's list when its own is empty.

use crate::{
    memlayout::PHYSTOP,
    proc::Cpus,
    riscv::{pgrounddown, pgroundup, PGSIZE},
    spinlock::Mutex,
};
use array_macro::array;
use core::fmt;
use core::ptr;

extern "C" {
    // first address after the kernel's code, data and bss.
    // defined by kernel.ld.
    static mut end: u8;
}

// maximum number of pages a CPU will lift from a single other CPU's
// list in one alloc() before giving up and trying the next victim.
const STEAL_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kalloc: out of memory")
    }
}

struct Run {
    next: *mut Run,
}

struct Freelist {
    head: *mut Run,
}

unsafe impl Send for Freelist {}

impl Freelist {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    fn push(&mut self, pa: usize) {
        let run = pa as *mut Run;
        unsafe { (*run).next = self.head };
        self.head = run;
    }

    fn pop(&mut self) -> Option<usize> {
        if self.head.is_null() {
            return None;
        }
        let run = self.head;
        self.head = unsafe { (*run).next };
        Some(run as usize)
    }
}

struct Kmem {
    lists: [Mutex<Freelist>; crate::param::NCPU],
}

impl Kmem {
    // a fresh page is filled with junk, not zeroed, to help surface
    // code that reads memory before initializing it.
    const SENTINEL: u8 = 0x5a;

    const fn new() -> Self {
        Self {
            lists: array![_ => Mutex::new(Freelist::new(), "kmem"); crate::param::NCPU],
        }
    }
}

static KMEM: Kmem = Kmem::new();

// hand every page between the end of the kernel image and PHYSTOP to
// CPU 0's freelist; later frees spread pages back out as each CPU
// runs its own workload.
pub fn init() {
    let pa_start = pgroundup(unsafe { &end as *const u8 as usize });
    let pa_end = pgrounddown(PHYSTOP);
    let mut list = KMEM.lists[0].lock();
    let mut pa = pa_start;
    while pa < pa_end {
        list.push(pa);
        pa += PGSIZE;
    }
}

// free the page of physical memory pointed at by pa, which normally
// should have been returned by a call to alloc(). panics if pa isn't
// page-aligned or doesn't lie in the allocatable range, since that
// usually means the caller is freeing something it doesn't own.
pub fn free(pa: usize) {
    assert!(pa % PGSIZE == 0, "kalloc::free: unaligned");
    let kernel_end = unsafe { &end as *const u8 as usize };
    assert!(
        (kernel_end..PHYSTOP).contains(&pa),
        "kalloc::free: not a page"
    );

    // fill with junk to catch dangling references.
    unsafe {
        ptr::write_bytes(pa as *mut u8, Kmem::SENTINEL, PGSIZE);
    }

    let id = unsafe { Cpus::cpu_id() };
    KMEM.lists[id].lock().push(pa);
}

// allocate one 4096-byte page of physical memory. returns a pointer
// that the caller can cast to whatever kind of page it needs.
// returns OutOfMemory if every CPU's freelist is empty.
pub fn alloc() -> Result<usize, OutOfMemory> {
    let id = unsafe { Cpus::cpu_id() };

    if let Some(pa) = KMEM.lists[id].lock().pop() {
        return Ok(fill(pa));
    }

    // our own list is empty: steal a batch of pages from another
    // CPU's list, holding at most one foreign lock at a time so two
    // CPUs stealing from each other can never deadlock.
    for other in (0..crate::param::NCPU).filter(|&c| c != id) {
        let mut stolen = {
            let mut victim = KMEM.lists[other].lock();
            let mut batch = Freelist::new();
            for _ in 0..STEAL_BATCH {
                match victim.pop() {
                    Some(pa) => batch.push(pa),
                    None => break,
                }
            }
            batch
            // victim's lock is released here, before we touch our own list.
        };

        if let Some(pa) = stolen.pop() {
            let mut mine = KMEM.lists[id].lock();
            while let Some(rest) = stolen.pop() {
                mine.push(rest);
            }
            drop(mine);
            return Ok(fill(pa));
        }
    }

    Err(OutOfMemory)
}

fn fill(pa: usize) -> usize {
    unsafe {
        ptr::write_bytes(pa as *mut u8, Kmem::SENTINEL, PGSIZE);
    }
    pa
}
