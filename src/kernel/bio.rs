// Buffer cache.
//
// The cache is a fixed pool of NBUF buffers indexed by a hash table of
// NBUFMAP_BUCKET buckets, keyed by (dev, blockno). Each bucket has its
// own lock so lookups that land in different buckets never serialize
// on each other; a single eviction lock is taken only when a lookup
// misses, to pick a victim buffer and move it between buckets.
//
// Interface:
// * To get a buffer for a particular disk block, call bread.
// * After changing buffer data, call bwrite to write it to disk.
// * When done with the buffer, drop it (brelse).
// * Do not use the buffer after dropping it.
// * Only one process at a time can use a buffer,
//     so do not keep them longer than necessary.

use crate::{
    array,
    fs::BSIZE,
    param::NBUF,
    rwlock::RwLock,
    sleeplock::{SleepLock, SleepLockGuard},
    spinlock::Mutex,
    trap::TICKS,
    virtio_disk::DISK,
};
use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

// prime, so (dev << 27 | blockno) spreads reasonably over the buckets.
pub const NBUFMAP_BUCKET: usize = 13;

fn key(dev: u32, blockno: u32) -> usize {
    (((dev as usize) << 27) | blockno as usize) % NBUFMAP_BUCKET
}

pub static BCACHE: BCache = BCache::new();

// Metadata about a buffer's cached block, guarded independently of the
// block's contents so a bucket scan never has to wait on disk I/O.
pub struct Ctrl {
    dev: u32,
    pub blockno: u32,
    valid: bool,    // has data been read from disk?
    pub disk: bool, // virtio_disk owns the buffer while a request is in flight
    refcnt: usize,
    last_use: usize, // tick at last release; LRU key
}

impl Ctrl {
    const fn new() -> Self {
        Self {
            dev: 0,
            blockno: 0,
            valid: false,
            disk: false,
            refcnt: 0,
            last_use: 0,
        }
    }
}

pub struct Buf {
    pub ctrl: RwLock<Ctrl>,
    data: SleepLock<[u8; BSIZE]>,
}

impl Buf {
    const fn new() -> Self {
        Self {
            ctrl: RwLock::new(Ctrl::new()),
            data: SleepLock::new([0; BSIZE], "buffer"),
        }
    }
}

struct Bucket {
    // indices into BCache::pool currently hashed into this bucket.
    entries: Vec<usize>,
}

impl Bucket {
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

pub struct BCache {
    pool: [Buf; NBUF],
    bucket: [Mutex<Bucket>; NBUFMAP_BUCKET],
    // serializes the victim scan on a miss; never held together with more
    // than two bucket locks (the victim's old bucket and its new one).
    evict: Mutex<()>,
}

pub struct BufGuard {
    index: usize,
    dev: u32,
    blockno: u32,
    data_guard: Option<SleepLockGuard<'static, [u8; BSIZE]>>,
}

impl BufGuard {
    pub fn buf(&self) -> &'static Buf {
        &BCACHE.pool[self.index]
    }

    // Write buf's content to disk. Must be locked.
    pub fn write(&mut self) {
        let ptr = &mut **self.data_guard.as_mut().expect("bwrite: not holding") as *mut [u8; BSIZE];
        DISK.rw(self.buf(), ptr, true);
    }

    // Pin/unpin only touch the refcount, so the log can keep a dirty
    // buffer resident in the cache across begin_op/end_op without
    // holding its sleeplock the whole time.
    //
    // Safety: caller must own a BufGuard (i.e. already hold a reference)
    // for the lifetime of the pin.
    pub unsafe fn pin(&self) {
        self.buf().ctrl.write().refcnt += 1;
    }

    pub unsafe fn unpin(&self) {
        let mut ctrl = self.buf().ctrl.write();
        assert!(ctrl.refcnt > 0, "bunpin");
        ctrl.refcnt -= 1;
    }

    pub fn align_to<U>(&self) -> &[U] {
        let (head, body, _) = unsafe { self.data_guard.as_ref().unwrap().align_to::<U>() };
        assert!(head.is_empty(), "Data was not aligned");
        body
    }
    pub fn align_to_mut<U>(&mut self) -> &mut [U] {
        let (head, body, _) = unsafe { self.data_guard.as_mut().unwrap().align_to_mut::<U>() };
        assert!(head.is_empty(), "Data was not aligned");
        body
    }
}

impl Deref for BufGuard {
    type Target = [u8; BSIZE];
    fn deref(&self) -> &Self::Target {
        self.data_guard.as_ref().unwrap()
    }
}

impl DerefMut for BufGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_guard.as_mut().unwrap()
    }
}

impl Drop for BufGuard {
    // brelse: release the sleeplock, then update refcnt/last_use under
    // the bucket lock. Panics if the buffer wasn't actually held.
    fn drop(&mut self) {
        assert!(self.data_guard.is_some(), "brelse");
        self.data_guard.take();
        let mut ctrl = self.buf().ctrl.write();
        assert!(ctrl.refcnt > 0, "brelse: refcnt");
        ctrl.refcnt -= 1;
        if ctrl.refcnt == 0 {
            ctrl.last_use = *TICKS.lock();
        }
    }
}

impl BCache {
    const fn new() -> Self {
        Self {
            pool: array![Buf::new(); NBUF],
            bucket: array![Mutex::new(Bucket::new(), "bcache.bucket"); NBUFMAP_BUCKET],
            evict: Mutex::new((), "bcache.evict"),
        }
    }

    fn try_hit(&'static self, k: usize, dev: u32, blockno: u32) -> Option<usize> {
        let bucket = self.bucket[k].lock();
        for &index in bucket.entries.iter() {
            let mut ctrl = self.pool[index].ctrl.write();
            if ctrl.dev == dev && ctrl.blockno == blockno {
                ctrl.refcnt += 1;
                return Some(index);
            }
        }
        None
    }

    // Scan every bucket for an unreferenced buffer with the oldest
    // last_use, then move it into bucket `k` under (dev, blockno).
    // Called with the eviction lock held.
    fn evict(&'static self, k: usize, dev: u32, blockno: u32) -> usize {
        loop {
            let mut winner: Option<usize> = None;
            let mut winner_bucket = 0;
            let mut winner_last_use = usize::MAX;
            let mut held = None;

            for b in 0..NBUFMAP_BUCKET {
                let guard = self.bucket[b].lock();
                let mut local_best: Option<(usize, usize)> = None; // (index, last_use)
                for &index in guard.entries.iter() {
                    let ctrl = self.pool[index].ctrl.read();
                    if ctrl.refcnt == 0 && ctrl.last_use < winner_last_use {
                        local_best = Some((index, ctrl.last_use));
                    }
                }
                if let Some((index, last_use)) = local_best {
                    winner_last_use = last_use;
                    winner = Some(index);
                    winner_bucket = b;
                    held = Some(guard); // drops the previous winner's lock, if any
                }
                // else: guard is released at the end of this iteration
            }

            let index = winner.expect("bget: no buffers");

            if winner_bucket == k {
                // already filed under the right bucket; repurpose in place.
                let mut ctrl = self.pool[index].ctrl.write();
                if ctrl.refcnt != 0 {
                    continue; // lost the race since the scan; retry
                }
                ctrl.dev = dev;
                ctrl.blockno = blockno;
                ctrl.valid = false;
                ctrl.refcnt = 1;
                return index;
            }
            drop(held);

            // Reacquire both buckets in ascending order to move the victim.
            let (lo, hi) = if winner_bucket < k {
                (winner_bucket, k)
            } else {
                (k, winner_bucket)
            };
            let mut lo_guard = self.bucket[lo].lock();
            let mut hi_guard = self.bucket[hi].lock();
            let (src, dst) = if winner_bucket < k {
                (&mut lo_guard, &mut hi_guard)
            } else {
                (&mut hi_guard, &mut lo_guard)
            };

            let mut ctrl = self.pool[index].ctrl.write();
            if ctrl.refcnt != 0 {
                continue; // raced with a hit on the victim; retry
            }
            let pos = match src.entries.iter().position(|&i| i == index) {
                Some(p) => p,
                None => continue,
            };
            src.entries.remove(pos);
            dst.entries.push(index);
            ctrl.dev = dev;
            ctrl.blockno = blockno;
            ctrl.valid = false;
            ctrl.refcnt = 1;
            return index;
        }
    }

    fn finish(&'static self, index: usize, dev: u32, blockno: u32) -> BufGuard {
        let mut guard = self.pool[index].data.lock();
        let needs_read = !self.pool[index].ctrl.read().valid;
        if needs_read {
            let ptr = &mut *guard as *mut [u8; BSIZE];
            DISK.rw(&self.pool[index], ptr, false);
            self.pool[index].ctrl.write().valid = true;
        }
        BufGuard {
            index,
            dev,
            blockno,
            data_guard: Some(guard),
        }
    }

    // Return a locked buf with the contents of the indicated block.
    pub fn read(&'static self, dev: u32, blockno: u32) -> BufGuard {
        let k = key(dev, blockno);

        if let Some(index) = self.try_hit(k, dev, blockno) {
            return self.finish(index, dev, blockno);
        }

        let _evict = self.evict.lock();
        // re-scan under the eviction lock: another thread may have
        // brought this block in while we waited for the lock.
        if let Some(index) = self.try_hit(k, dev, blockno) {
            return self.finish(index, dev, blockno);
        }

        let index = self.evict(k, dev, blockno);
        self.finish(index, dev, blockno)
    }
}

// All buffers start out unassigned in bucket 0; the first NBUF misses
// populate the other buckets through the ordinary eviction path.
pub fn init() {
    let mut bucket0 = BCACHE.bucket[0].lock();
    bucket0.entries.extend(0..NBUF);
}
