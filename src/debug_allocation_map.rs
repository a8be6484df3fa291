//! This module tracks the payload ranges handed out to the mutator in
//! debug builds, so contracts can confirm that live allocations never
//! overlap and that frees match a live allocation.
use std::collections::BTreeMap;
use std::sync::Mutex;

struct AllocationInfo {
    payload: usize,
    live: bool, // True if owned by the mutator
}

lazy_static::lazy_static! {
    static ref ALLOCATION_STATE_MAP: Mutex<BTreeMap<usize, AllocationInfo>> = Default::default();
}

/// Confirms that it makes sense to return `[address, address +
/// payload)` to the mutator: the address is either fresh or was
/// released, and the range overlaps no live allocation.
pub fn can_be_allocated(address: usize, payload: usize) -> Result<(), &'static str> {
    let map = ALLOCATION_STATE_MAP.lock().unwrap();

    if let Some(info) = map.get(&address) {
        if info.live {
            return Err("double allocation");
        }
    }

    // The nearest live neighbor below must end at or before `address`.
    for (&other, info) in map.range(..address).rev() {
        if !info.live {
            continue;
        }

        if other + info.payload > address {
            return Err("allocation overlaps a live allocation from below");
        }

        break;
    }

    // And the nearest live neighbor above must start at or after the
    // end of the new range.
    for (&other, info) in map.range(address + 1..) {
        if !info.live {
            continue;
        }

        if other < address + payload.max(1) {
            return Err("allocation overlaps a live allocation from above");
        }

        break;
    }

    Ok(())
}

/// Marks `[address, address + payload)` as returned to the mutator.
pub fn mark_allocated(address: usize, payload: usize) -> Result<(), &'static str> {
    can_be_allocated(address, payload)?;

    let mut map = ALLOCATION_STATE_MAP.lock().unwrap();
    map.insert(
        address,
        AllocationInfo {
            payload,
            live: true,
        },
    );
    Ok(())
}

/// Marks the allocation at `address` as released by the mutator.
pub fn mark_released(address: usize) -> Result<(), &'static str> {
    let mut map = ALLOCATION_STATE_MAP.lock().unwrap();
    let info = map
        .get_mut(&address)
        .ok_or("Released unknown address")?;

    if !info.live {
        return Err("double free");
    }

    info.live = false;
    Ok(())
}

/// Drops every entry in `[begin, end)`.  Called when a block's pages
/// go back to the page source: the host may recycle the addresses for
/// unrelated mappings, so stale entries would poison later checks.
pub fn forget_range(begin: usize, end: usize) {
    let mut map = ALLOCATION_STATE_MAP.lock().unwrap();

    let stale: Vec<usize> = map.range(begin..end).map(|(&address, _)| address).collect();
    for address in stale {
        map.remove(&address);
    }
}

#[test]
fn allocation_life_cycle() {
    // Synthetic addresses; the map never dereferences them.
    let base = 1usize << 41;

    assert!(mark_allocated(base, 64).is_ok());
    assert!(mark_allocated(base, 64).is_err());
    assert!(mark_allocated(base + 32, 16).is_err());
    assert!(mark_allocated(base - 16, 32).is_err());
    assert!(mark_allocated(base + 64, 16).is_ok());

    assert!(mark_released(base).is_ok());
    assert!(mark_released(base).is_err());
    assert!(mark_allocated(base, 48).is_ok());

    assert!(mark_released(base).is_ok());
    assert!(mark_released(base + 64).is_ok());
}
