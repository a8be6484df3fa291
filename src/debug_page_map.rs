//! This module tracks page ranges handed out by page sources in debug
//! builds, so contracts can confirm that acquisitions never overlap
//! and that releases match a prior acquisition exactly.
use std::collections::BTreeMap;
use std::sync::Mutex;

lazy_static::lazy_static! {
    // Maps the start address of each live acquisition to its size in
    // bytes.
    static ref PAGE_RANGE_MAP: Mutex<BTreeMap<usize, usize>> = Default::default();
}

/// Registers a freshly acquired page range.  It must not overlap any
/// live range.
pub fn acquire_range(begin: usize, size: usize) -> Result<(), &'static str> {
    if size == 0 {
        return Err("Acquired range is empty");
    }

    if usize::MAX - begin < size {
        return Err("Acquired range wraps around");
    }

    let mut map = PAGE_RANGE_MAP.lock().unwrap();

    // The closest range at or below `begin` must end before `begin`,
    // and the closest range above must start at or after the end.
    if let Some((&other_begin, &other_size)) = map.range(..=begin).last() {
        if other_begin + other_size > begin {
            return Err("Acquired range overlaps a live range from below");
        }
    }

    if let Some((&other_begin, _)) = map.range(begin..).next() {
        if other_begin < begin + size {
            return Err("Acquired range overlaps a live range from above");
        }
    }

    map.insert(begin, size);
    Ok(())
}

/// Confirms that `[begin, begin + size)` is exactly one live
/// acquisition.
pub fn releasable_range(begin: usize, size: usize) -> Result<(), &'static str> {
    let map = PAGE_RANGE_MAP.lock().unwrap();

    match map.get(&begin) {
        Some(&live_size) if live_size == size => Ok(()),
        Some(_) => Err("Released range has the wrong size"),
        None => Err("Released range was never acquired"),
    }
}

/// Unregisters a previously acquired page range.
pub fn release_range(begin: usize, size: usize) -> Result<(), &'static str> {
    releasable_range(begin, size)?;

    let mut map = PAGE_RANGE_MAP.lock().unwrap();
    map.remove(&begin);
    Ok(())
}

#[test]
fn acquire_release_pairs() {
    // Addresses here are synthetic; the map never dereferences them.
    let base = 1usize << 40;

    assert!(acquire_range(base, 8192).is_ok());
    assert!(acquire_range(base + 8192, 4096).is_ok());

    // Overlaps in either direction are rejected.
    assert!(acquire_range(base + 4096, 4096).is_err());
    assert!(acquire_range(base - 4096, 8192).is_err());

    // Releases must match an acquisition exactly.
    assert!(release_range(base, 4096).is_err());
    assert!(release_range(base + 4096, 4096).is_err());
    assert!(release_range(base, 8192).is_ok());
    assert!(release_range(base + 8192, 4096).is_ok());
    assert!(release_range(base, 8192).is_err());
}
