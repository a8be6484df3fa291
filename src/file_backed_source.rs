//! The file-backed page source places heap blocks in shared mappings
//! of private temporary files.  This lets the operating system
//! eagerly swap out cold heap data when under memory pressure.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
)))]
use disabled_contracts::*;

use std::ffi::c_void;
use std::fs::File;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::metadata::PAGE_SIZE;
use crate::PageSource;

#[derive(Debug)]
pub struct FileBackedPageSource {}

lazy_static::lazy_static! {
    static ref FILE_BACKED_PATH: Mutex<Option<PathBuf>> = Default::default();
}

/// Updates the parent directory for the file-backed source's
/// temporary files to `path`.
pub fn set_file_backed_heap_directory(path: Option<PathBuf>) {
    let mut global_path = FILE_BACKED_PATH.lock().unwrap();

    *global_path = path;
}

/// Returns a temporary File in `FILE_BACKED_PATH`, or in the the
/// global `TMPDIR`.
fn get_temp_file() -> Result<File, i32> {
    let path = FILE_BACKED_PATH.lock().unwrap();

    match &*path {
        Some(dir) => tempfile::tempfile_in(dir),
        None => tempfile::tempfile(),
    }
    .map_err(|e| e.raw_os_error().unwrap_or(0))
}

#[contract_trait]
impl PageSource for FileBackedPageSource {
    fn page_size(&self) -> usize {
        assert_eq!(crate::map::page_size(), PAGE_SIZE);
        PAGE_SIZE
    }

    fn acquire(&self, pages: usize) -> Result<NonNull<c_void>, i32> {
        let file = get_temp_file()?;

        crate::map::acquire_file_region(file, pages * self.page_size())
    }

    fn release(&self, base: NonNull<c_void>, pages: usize) -> Result<(), i32> {
        crate::map::release_region(base, pages * self.page_size())
    }
}
