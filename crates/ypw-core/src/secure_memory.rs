use tracing::warn;

#[cfg(test)]
use std::cell::Cell;

#[cfg(test)]
thread_local! {
    static REFUSE_PAGE_LOCK: Cell<bool> = const { Cell::new(false) };
}

#[cfg(test)]
pub(crate) struct RefusePageLockGuard;

#[cfg(test)]
impl RefusePageLockGuard {
    pub(crate) fn engage() -> Self {
        REFUSE_PAGE_LOCK.with(|flag| flag.set(true));
        Self
    }
}

#[cfg(test)]
impl Drop for RefusePageLockGuard {
    fn drop(&mut self) {
        REFUSE_PAGE_LOCK.with(|flag| flag.set(false));
    }
}

/// Keeps the pages of a heap region out of swap for as long as it lives.
///
/// The region is identified by address only, so the owner must keep the
/// allocation alive and unmoved until this guard is dropped. Failure to lock
/// is logged and tolerated; zeroing on release still applies.
#[derive(Debug)]
pub(crate) struct PageLock {
    addr: usize,
    len: usize,
    engaged: bool,
}

impl PageLock {
    pub(crate) fn engage(label: &'static str, region: &[u8]) -> Self {
        let mut guard = Self {
            addr: region.as_ptr() as usize,
            len: region.len(),
            engaged: false,
        };
        if guard.len == 0 {
            return guard;
        }

        #[cfg(test)]
        if REFUSE_PAGE_LOCK.with(Cell::get) {
            warn!(region = label, "page lock refused by test hook; relying on zeroing");
            return guard;
        }

        match sys::lock(guard.addr, guard.len) {
            Ok(()) => guard.engaged = true,
            Err(error) => {
                warn!(region = label, %error, "page lock failed; relying on zeroing");
            }
        }
        guard
    }

    #[cfg(test)]
    pub(crate) fn is_engaged(&self) -> bool {
        self.engaged
    }
}

impl Drop for PageLock {
    fn drop(&mut self) {
        if self.engaged {
            let _ = sys::unlock(self.addr, self.len);
            self.engaged = false;
        }
    }
}

#[cfg(unix)]
mod sys {
    use std::ffi::c_void;
    use std::io;

    unsafe extern "C" {
        fn mlock(addr: *const c_void, len: usize) -> i32;
        fn munlock(addr: *const c_void, len: usize) -> i32;
    }

    fn check(status: i32) -> io::Result<()> {
        if status == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub(super) fn lock(addr: usize, len: usize) -> io::Result<()> {
        check(unsafe { mlock(addr as *const c_void, len) })
    }

    pub(super) fn unlock(addr: usize, len: usize) -> io::Result<()> {
        check(unsafe { munlock(addr as *const c_void, len) })
    }
}

#[cfg(windows)]
mod sys {
    use std::ffi::c_void;
    use std::io;

    #[link(name = "kernel32")]
    unsafe extern "system" {
        fn VirtualLock(lp_address: *const c_void, dw_size: usize) -> i32;
        fn VirtualUnlock(lp_address: *const c_void, dw_size: usize) -> i32;
    }

    fn check(status: i32) -> io::Result<()> {
        if status != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub(super) fn lock(addr: usize, len: usize) -> io::Result<()> {
        check(unsafe { VirtualLock(addr as *const c_void, len) })
    }

    pub(super) fn unlock(addr: usize, len: usize) -> io::Result<()> {
        check(unsafe { VirtualUnlock(addr as *const c_void, len) })
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::io;

    pub(super) fn lock(_addr: usize, _len: usize) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub(super) fn unlock(_addr: usize, _len: usize) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{PageLock, RefusePageLockGuard};

    #[test]
    fn empty_region_is_never_locked() {
        let lock = PageLock::engage("empty", &[]);
        assert!(!lock.is_engaged());
    }

    #[test]
    fn refused_lock_is_tolerated() {
        let _guard = RefusePageLockGuard::engage();
        let region = vec![7_u8; 64];
        let lock = PageLock::engage("test-region", &region);
        assert!(!lock.is_engaged());
    }
}
