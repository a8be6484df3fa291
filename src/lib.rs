mod arena;
mod block;
mod file_backed_source;
mod map;
mod metadata;
mod page_source;
mod region;
mod stats;

#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
mod debug_allocation_map;
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
mod debug_page_map;

use std::ffi::c_void;
use std::os::raw::c_char;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::MutexGuard;

pub use arena::Arena;
pub use block::CLASS_COUNT;
pub use file_backed_source::set_file_backed_heap_directory;
pub use file_backed_source::FileBackedPageSource;
pub use page_source::get_page_source;
pub use page_source::register_page_source;
pub use page_source::PageSource;
pub use stats::BlockStats;
pub use stats::HeapReport;

lazy_static::lazy_static! {
    static ref GLOBAL_ARENA: Mutex<Arena> = Mutex::new(Arena::with_default_source());
}

// A poisoned global arena means some heap operation panicked midway;
// the metadata may be arbitrarily broken, so every later call fails
// instead of touching it.
fn lock_global() -> Option<MutexGuard<'static, Arena>> {
    GLOBAL_ARENA.lock().ok()
}

/// Attempts to return a 16-byte aligned allocation of at least `size`
/// writable bytes from the process-global heap.
pub fn allocate(size: usize) -> Option<NonNull<c_void>> {
    lock_global()?.allocate(size)
}

/// Releases an allocation back to the process-global heap.  Null and
/// already-free pointers are no-ops.
///
/// # Safety
///
/// This function assumes `ptr` is null or was returned by this
/// crate's allocation entry points.
pub unsafe fn release(ptr: *mut c_void) {
    if let Some(mut heap) = lock_global() {
        heap.release(ptr);
    }
}

/// Attempts to resize an allocation of the process-global heap; see
/// `Arena::resize` for the exact contract.
///
/// # Safety
///
/// This function assumes `ptr` is null or a live allocation returned
/// by this crate's allocation entry points.
pub unsafe fn resize(ptr: *mut c_void, size: usize) -> Option<NonNull<c_void>> {
    lock_global()?.resize(ptr, size)
}

/// Attempts to return a zero-filled allocation for `count` elements
/// of `elem_size` bytes from the process-global heap.
pub fn zero_allocate(count: usize, elem_size: usize) -> Option<NonNull<c_void>> {
    lock_global()?.zero_allocate(count, elem_size)
}

/// Takes a diagnostic snapshot of the process-global heap.
pub fn report() -> Option<HeapReport> {
    Some(lock_global()?.report())
}

/// C entry point for `allocate`.
#[no_mangle]
pub extern "C" fn quarry_allocate(size: usize) -> *mut c_void {
    allocate(size).map_or(std::ptr::null_mut(), |ptr| ptr.as_ptr())
}

/// C entry point for `release`.
///
/// # Safety
///
/// This function assumes `ptr` is NULL or was returned by a quarry
/// entry point.
#[no_mangle]
pub unsafe extern "C" fn quarry_release(ptr: *mut c_void) {
    release(ptr);
}

/// C entry point for `resize`.
///
/// # Safety
///
/// This function assumes `ptr` is NULL or a live allocation returned
/// by a quarry entry point.
#[no_mangle]
pub unsafe extern "C" fn quarry_resize(ptr: *mut c_void, size: usize) -> *mut c_void {
    resize(ptr, size).map_or(std::ptr::null_mut(), |fresh| fresh.as_ptr())
}

/// C entry point for `zero_allocate`.
#[no_mangle]
pub extern "C" fn quarry_zero_allocate(count: usize, elem_size: usize) -> *mut c_void {
    zero_allocate(count, elem_size).map_or(std::ptr::null_mut(), |ptr| ptr.as_ptr())
}

/// Prints the process-global heap's diagnostics to stderr.
#[no_mangle]
pub extern "C" fn quarry_report() {
    if let Some(snapshot) = report() {
        eprint!("{}", snapshot);
    }
}

/// Updates the directory for the file-backed page source's temporary
/// files.
///
/// NULL reverts to the default temporary directory.
///
/// # Safety
///
/// This function assumes `path` is NULL or valid.
#[no_mangle]
pub unsafe extern "C" fn quarry_set_file_backed_heap_directory(path: *const c_char) {
    use std::ffi::CStr;

    if path.is_null() {
        set_file_backed_heap_directory(None);
        return;
    }

    let path_str = CStr::from_ptr(path)
        .to_str()
        .expect("path must be valid")
        .to_owned();
    set_file_backed_heap_directory(Some(path_str.into()));
}
