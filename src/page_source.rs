//! A `PageSource` is responsible for acquiring page-granular backing
//! memory from the platform and taking it back.  Each `Arena` is
//! parameterised on such a `PageSource`.
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

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Mutex;

#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use crate::debug_page_map;

use crate::metadata::PAGE_SIZE;

#[allow(clippy::inline_fn_without_body)]
#[contract_trait]
pub trait PageSource: std::fmt::Debug + Sync {
    /// Returns the page granularity for this source.
    ///
    /// The page size must be constant for the lifetime of a process.
    #[ensures(ret > 0 && ret & (ret - 1) == 0, "page size must be a power of 2")]
    fn page_size(&self) -> usize;

    /// Attempts to acquire `pages` contiguous pages of readable,
    /// writable memory.  On success, the returned address is
    /// page-aligned.  The contents are unspecified.
    #[requires(pages > 0)]
    #[ensures(ret.is_ok() ->
              ret.unwrap().as_ptr() as usize % self.page_size() == 0,
              "Acquired ranges are page-aligned")]
    #[ensures(ret.is_ok() ->
              debug_page_map::acquire_range(ret.unwrap().as_ptr() as usize,
                                            pages * self.page_size()).is_ok(),
              "Acquired ranges never overlap a live range")]
    fn acquire(&self, pages: usize) -> Result<NonNull<c_void>, i32>;

    /// Releases a page range previously obtained from a single
    /// `acquire` call on this source.
    #[requires(base.as_ptr() as usize % self.page_size() == 0)]
    #[requires(debug_page_map::releasable_range(base.as_ptr() as usize,
                                                pages * self.page_size()).is_ok(),
               "Released ranges match a live acquisition")]
    #[ensures(ret.is_ok() ->
              debug_page_map::release_range(base.as_ptr() as usize,
                                            pages * self.page_size()).is_ok())]
    fn release(&self, base: NonNull<c_void>, pages: usize) -> Result<(), i32>;
}

#[derive(Debug)]
struct DefaultPageSource {}

lazy_static::lazy_static! {
    static ref NAMED_SOURCES: Mutex<HashMap<String, &'static dyn PageSource>> = {
        let mut map: HashMap<String, &'static dyn PageSource> = HashMap::new();

        map.insert("file".to_string(),
                   Box::leak(Box::new(crate::file_backed_source::FileBackedPageSource{})));
        Mutex::new(map)
    };
}

/// Upserts the page source associated with `name`.
pub fn register_page_source(name: String, source: &'static dyn PageSource) {
    let mut sources = NAMED_SOURCES.lock().unwrap();

    sources.insert(name, source);
}

/// Returns the page source for the given `name`, if one exists, or
/// the default anonymous-memory source if `name` is `None`.
///
/// # Errors
///
/// Returns `Err` if no such source is defined.
pub fn get_page_source(name: Option<&str>) -> Result<&'static dyn PageSource, &'static str> {
    match name {
        Some(key) => {
            let sources = NAMED_SOURCES.lock().unwrap();

            Ok(*sources.get(key).ok_or("Page source not found")?)
        }
        None => Ok(default_page_source()),
    }
}

/// Returns a reference to the shared default page source.
pub fn default_page_source() -> &'static dyn PageSource {
    lazy_static::lazy_static! {
        static ref DEFAULT_SOURCE: DefaultPageSource = DefaultPageSource{};
    }

    &*DEFAULT_SOURCE
}

#[contract_trait]
impl PageSource for DefaultPageSource {
    fn page_size(&self) -> usize {
        // The region arithmetic bakes in 4K pages; refuse to run on
        // hosts where the native granularity differs.
        assert_eq!(crate::map::page_size(), PAGE_SIZE);
        PAGE_SIZE
    }

    fn acquire(&self, pages: usize) -> Result<NonNull<c_void>, i32> {
        crate::map::acquire_region(pages * self.page_size())
    }

    fn release(&self, base: NonNull<c_void>, pages: usize) -> Result<(), i32> {
        crate::map::release_region(base, pages * self.page_size())
    }
}
