//! Thin wrappers around the host's memory-mapping primitives.  Page
//! sources build on these to acquire and release page-granular
//! ranges, either anonymously or backed by a file.
use std::ffi::c_void;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;

fn host_page_size_or_die() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    if ret <= 0 {
        panic!("Unable to find page size: errno={}", errno());
    }

    ret as usize
}

lazy_static::lazy_static! {
    static ref HOST_PAGE_SIZE: usize = host_page_size_or_die();
}

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Returns the host's native page size.
#[inline]
pub fn page_size() -> usize {
    *HOST_PAGE_SIZE
}

/// Attempts to map a fresh anonymous region of `size` bytes, readable
/// and writable.
///
/// The `size` argument must be a positive multiple of the page size.
pub fn acquire_region(size: usize) -> Result<NonNull<c_void>, i32> {
    assert!(
        size > 0 && (size % page_size()) == 0,
        "Bad region size={} page_size={}",
        size,
        page_size()
    );

    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if base == libc::MAP_FAILED {
        Err(errno())
    } else {
        NonNull::new(base).ok_or(0)
    }
}

/// Attempts to map `size` bytes of `file` as a shared read-write
/// region, growing the file to `size` bytes first.  The file handle
/// may be dropped once this returns; the mapping keeps the backing
/// storage alive.
///
/// The `size` argument must be a positive multiple of the page size.
pub fn acquire_file_region(file: File, size: usize) -> Result<NonNull<c_void>, i32> {
    assert!(
        size > 0 && (size % page_size()) == 0,
        "Bad region size={} page_size={}",
        size,
        page_size()
    );

    let fd = file.as_raw_fd();
    if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
        return Err(errno());
    }

    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };

    if base == libc::MAP_FAILED {
        Err(errno())
    } else {
        NonNull::new(base).ok_or(0)
    }
}

/// Releases a region of `size` bytes starting at `base`.
///
/// The size argument must be a multiple of the page size.
pub fn release_region(base: NonNull<c_void>, size: usize) -> Result<(), i32> {
    if size == 0 {
        return Ok(());
    }

    assert!(
        (size % page_size()) == 0,
        "Bad region size={} page_size={}",
        size,
        page_size()
    );

    let ret = unsafe { libc::munmap(base.as_ptr(), size) };

    if ret == 0 {
        Ok(())
    } else {
        Err(errno())
    }
}

#[test]
fn test_page_size() {
    assert_ne!(page_size(), 0);

    // We only develop on platforms with 4K pages.
    assert_eq!(page_size(), 4096);
}

#[test]
fn anonymous_round_trip() {
    let size = 4 * page_size();
    let base = acquire_region(size).expect("acquire should succeed");

    // The mapping must be writable end to end.
    unsafe {
        std::ptr::write_bytes(base.as_ptr() as *mut u8, 42, size);
        assert_eq!(std::ptr::read(base.as_ptr() as *const u8), 42);
        assert_eq!(
            std::ptr::read((base.as_ptr() as usize + size - 1) as *const u8),
            42
        );
    }

    release_region(base, size).expect("release should succeed");
}

#[test]
fn file_backed_round_trip() {
    let size = 2 * page_size();
    let file = tempfile::tempfile().expect("tempfile should succeed");
    let base = acquire_file_region(file, size).expect("acquire should succeed");

    unsafe {
        std::ptr::write_bytes(base.as_ptr() as *mut u8, 42, size);
        assert_eq!(
            std::ptr::read((base.as_ptr() as usize + size - 1) as *const u8),
            42
        );
    }

    release_region(base, size).expect("release should succeed");
}
