// Mutual exclusion spin locks.

use crate::proc::{Cpus, IntrLock, CPUS};
use core::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

pub struct Mutex<T: ?Sized> {
    name: &'static str,
    locked: AtomicBool,
    // The cpu holding the lock, for holding() and debugging. -1 if free.
    cpuid: UnsafeCell<isize>,
    data: UnsafeCell<T>,
}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

pub struct MutexGuard<'a, T: ?Sized + 'a> {
    mutex: &'a Mutex<T>,
    _intr_lock: IntrLock<'a>,
}
impl<T: ?Sized> !Send for MutexGuard<'_, T> {}
unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            cpuid: UnsafeCell::new(-1),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        // Disable interrupts on this cpu before taking the lock, so that
        // a timer interrupt can't deadlock us against ourselves.
        let _intr_lock = CPUS.intr_lock();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        unsafe {
            *self.cpuid.get() = Cpus::cpu_id() as isize;
        }
        MutexGuard {
            mutex: self,
            _intr_lock,
        }
    }

    // Release the lock without dropping a guard. Used to hand the lock back
    // to its owner as a plain reference, e.g. when a sleeping process needs
    // to drop a lock before going to sleep and reacquire it on waking.
    pub fn unlock(guard: MutexGuard<'_, T>) -> &'_ Mutex<T> {
        let mutex = guard.mutex;
        drop(guard);
        mutex
    }

    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && unsafe { *self.cpuid.get() == Cpus::cpu_id() as isize }
    }

    // Release a lock this cpu holds despite not holding a MutexGuard for it,
    // e.g. a lock inherited across a context switch. Caller must be certain
    // this cpu actually holds the lock.
    pub unsafe fn force_unlock(&self) {
        assert!(self.holding(), "force_unlock: {}", self.name);
        *self.cpuid.get() = -1;
        self.locked.store(false, Ordering::Release);
        CPUS.intr_unlock();
    }

    // Bypass the lock entirely. Only safe when the caller can prove no
    // other cpu can be touching the data, e.g. during panic unwinding or
    // single-threaded boot/init code.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self) -> &mut T {
        &mut *self.data.get()
    }
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    pub fn holding(&self) -> bool {
        self.mutex.holding()
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        assert!(self.mutex.holding(), "unlock: {}", self.mutex.name);
        unsafe {
            *self.mutex.cpuid.get() = -1;
        }
        self.mutex.locked.store(false, Ordering::Release);
        // _intr_lock drops after this, restoring the interrupt state.
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.name)
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .finish()
    }
}
