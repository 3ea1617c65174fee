use std::io;
use std::ptr::null_mut;

/// Page protection applied to committed heap pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protection {
    ReadWrite,
    ReadWriteExecute,
}

impl Protection {
    fn bits(self) -> libc::c_int {
        match self {
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Protection::ReadWriteExecute => libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        }
    }
}

/// One contiguous anonymous mapping. The heap carves its pages out of it.
pub struct Mmap {
    start: *mut u8,
    end: *mut u8,
    size: usize,
}

impl Mmap {
    pub fn new(size: usize) -> io::Result<Self> {
        #[cfg(target_os = "linux")]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE;
        #[cfg(not(target_os = "linux"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON;
        unsafe {
            let map = libc::mmap(
                null_mut(),
                size as _,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            );
            if map == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                start: map as *mut u8,
                end: (map as usize + size) as *mut u8,
                size,
            })
        }
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    pub fn start(&self) -> *mut u8 {
        self.start
    }

    pub fn end(&self) -> *mut u8 {
        self.end
    }

    /// Hands the backing memory of `[page, page + size)` back to the kernel.
    pub fn dontneed(&self, page: *mut u8, size: usize) {
        unsafe {
            libc::madvise(page as *mut _, size as _, libc::MADV_DONTNEED);
        }
    }

    /// Prepares `[page, page + size)` for use. The range reads as zero afterwards.
    pub fn commit(&self, page: *mut u8, size: usize) {
        unsafe {
            libc::madvise(page as *mut _, size as _, libc::MADV_WILLNEED);
            core::ptr::write_bytes(page, 0, size);
        }
    }

    pub fn protect(&self, page: *mut u8, size: usize, protection: Protection) -> io::Result<()> {
        unsafe {
            if libc::mprotect(page as *mut _, size as _, protection.bits()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.start() as *mut _, self.size as _);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_pages_read_as_zero() {
        let map = Mmap::new(4 * 4096).unwrap();
        assert_eq!(map.size(), 4 * 4096);
        assert_eq!(map.end() as usize - map.start() as usize, map.size());
        let page = unsafe { map.start().add(4096) };
        unsafe {
            page.write(7);
            page.add(100).write(9);
        }
        map.commit(page, 4096);
        unsafe {
            assert_eq!(page.read(), 0);
            assert_eq!(page.add(100).read(), 0);
        }
        map.protect(page, 4096, Protection::ReadWrite).unwrap();
        map.dontneed(page, 4096);
    }
}
