// The kernel's heap: every Box, Vec, Arc and String allocation in the
// kernel (process table entries, inode cache, pipe buffers, buffer
// cache bookkeeping, ...) ultimately goes through this allocator
// rather than through kalloc's page-at-a-time interface directly.
//
// init() draws its backing memory from kalloc, which is why it must
// run after kalloc::init() and before anything else touches the
// heap - vm::kinit() is the first caller, building the kernel page
// table out of Box<RawPageTable>.

use crate::{kalloc, riscv::PGSIZE};
use linked_list_allocator::LockedHeap;

// pages granted to the heap at boot. kalloc::init() seeds CPU 0's
// freelist as one contiguous descending run, so draining this many
// pages before any other allocation happens yields one contiguous
// region we can hand to the allocator in a single init() call.
const HEAP_PAGES: usize = 512; // 2 MiB

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

pub fn init() {
    let mut low = usize::MAX;
    let mut high = 0;

    for _ in 0..HEAP_PAGES {
        let pa = kalloc::alloc().expect("buddy::init: out of memory");
        low = low.min(pa);
        high = high.max(pa + PGSIZE);
    }

    assert_eq!(high - low, HEAP_PAGES * PGSIZE, "buddy::init: not contiguous");

    unsafe {
        ALLOCATOR.lock().init(low as *mut u8, high - low);
    }
}

#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!(
        "buddy: kernel heap exhausted allocating {} bytes (align {})",
        layout.size(),
        layout.align()
    );
}
