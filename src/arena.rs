//! An `Arena` is one independent heap: an address-ordered list of
//! heap blocks bound to a page source, plus the baseline used-size
//! below which a block holds no user allocations.  The public
//! allocate/release/resize/zero-allocate operations all live here;
//! the process-global heap in `lib.rs` is a thin facade over one
//! shared `Arena`.
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
use std::mem;
use std::ptr::NonNull;

#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use crate::debug_allocation_map;

use crate::block::Block;
use crate::block::BLOCK_HEADER_SIZE;
use crate::block::CLASS_COUNT;
use crate::metadata::Metadata;
use crate::metadata::ALIGNMENT;
use crate::metadata::HEADER_SLOT;
use crate::metadata::MAX_REGION_SIZE;
use crate::metadata::MIN_FREE_REGION;
use crate::metadata::PAGE_SIZE;
use crate::metadata::TAG_ALLOCATED;
use crate::page_source::default_page_source;
use crate::page_source::PageSource;
use crate::region;
use crate::stats::BlockStats;
use crate::stats::HeapReport;

/// Payload bytes of the synthetic allocation charged to every fresh
/// block.  It consumes the block's leading slack and pins the
/// used-size baseline that marks a block as reclaimable.
const RESERVATION_PAYLOAD: usize = 2 * mem::size_of::<usize>();

/// Total bytes a fresh block loses to the synthetic allocation.  The
/// block header fixes the first region's alignment residue, so the
/// footprint is the same for every block.
fn reservation_footprint() -> usize {
    region::aligned_split_size(BLOCK_HEADER_SIZE, RESERVATION_PAYLOAD + 2 * HEADER_SLOT)
}

/// One independent heap.
#[derive(Debug)]
pub struct Arena {
    // Start address of the lowest block, 0 when the arena holds none.
    head: usize,
    // `used_size` of a block with no user allocations; written once,
    // at first block creation.
    baseline: usize,
    source: &'static dyn PageSource,
}

impl Arena {
    /// Returns an empty arena bound to `source`.
    pub fn new(source: &'static dyn PageSource) -> Arena {
        Arena {
            head: 0,
            baseline: 0,
            source,
        }
    }

    /// Returns an empty arena bound to the default anonymous-memory
    /// page source.
    pub fn with_default_source() -> Arena {
        Arena::new(default_page_source())
    }

    /// True when the arena holds no block.
    pub fn is_empty(&self) -> bool {
        self.head == 0
    }

    /// Attempts to return a 16-byte aligned allocation of at least
    /// `size` writable bytes.
    #[ensures(ret.is_some() ->
              ret.unwrap().as_ptr() as usize % ALIGNMENT == 0,
              "Successful allocations are 16-byte aligned.")]
    #[ensures(ret.is_some() ->
              debug_allocation_map::mark_allocated(ret.unwrap().as_ptr() as usize, size).is_ok(),
              "Successful allocations are disjoint from every live allocation.")]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<c_void>> {
        let request = size.checked_add(2 * HEADER_SLOT)?;

        // The split may pad the request by up to one alignment unit;
        // the result must still fit the 28-bit size field.
        if request > MAX_REGION_SIZE - ALIGNMENT {
            return None;
        }

        unsafe {
            let (block, fit) = match self.find_host(request) {
                Some(found) => found,
                None => {
                    let block = self.grow(request)?;
                    let fit = block
                        .find_fit(request)
                        .expect("a fresh block is sized for the request");
                    (block, fit)
                }
            };

            block.remove_free(fit);
            if let Some(remainder) = region::split(fit, request) {
                block.insert_free(remainder);
            }
            block.mark_used(fit);

            NonNull::new(region::payload_address(fit) as *mut c_void)
        }
    }

    /// Releases an allocation previously returned by this arena.
    /// Null pointers, pointers no live block owns, and already-free
    /// regions are silent no-ops.
    ///
    /// # Safety
    ///
    /// `ptr` must be null, or a pointer previously returned by this
    /// arena (live or already released while its block survived).
    pub unsafe fn release(&mut self, ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }

        let address = ptr as usize;
        let block = match self.find_owner(address) {
            Some(block) => block,
            None => return, // Foreign pointer.
        };

        let header = region::header_address(address);
        if Metadata::read(header).tag() != TAG_ALLOCATED {
            return; // Double free of a still-free region.
        }

        #[cfg(any(
            all(test, feature = "check_contracts_in_tests"),
            feature = "check_contracts"
        ))]
        debug_allocation_map::mark_released(address)
            .expect("released pointers are live allocations");

        block.mark_free(header);
        block.insert_free(header);
        block.coalesce(header);

        if block.used_size() <= self.baseline {
            self.reclaim(block);
        }
    }

    /// Attempts to resize an allocation.  Equivalent to `allocate` on
    /// null input.  Never resizes in place: on success the payload
    /// moved and the first `min(old, new)` bytes were preserved; on
    /// failure the original allocation is untouched and remains
    /// valid.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live allocation of this arena.
    pub unsafe fn resize(&mut self, ptr: *mut c_void, size: usize) -> Option<NonNull<c_void>> {
        if ptr.is_null() {
            return self.allocate(size);
        }

        let header = region::header_address(ptr as usize);
        let old_payload = region::payload_size(Metadata::read(header).size());

        if size == old_payload {
            return NonNull::new(ptr);
        }

        let fresh = self.allocate(size)?;

        std::ptr::copy_nonoverlapping(
            ptr as *const u8,
            fresh.as_ptr() as *mut u8,
            old_payload.min(size),
        );
        self.release(ptr);

        Some(fresh)
    }

    /// Attempts to allocate room for `count` elements of `elem_size`
    /// bytes each, with the payload zero-filled.  Fails on a zero
    /// element size and on element-count overflow.
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Option<NonNull<c_void>> {
        if elem_size == 0 {
            return None;
        }

        let total = count.checked_mul(elem_size)?;
        let allocation = self.allocate(total)?;

        unsafe {
            let header = region::header_address(allocation.as_ptr() as usize);
            let payload = region::payload_size(Metadata::read(header).size());

            std::ptr::write_bytes(allocation.as_ptr() as *mut u8, 0, payload);
        }

        Some(allocation)
    }

    /// Takes a diagnostic snapshot of every live block.
    pub fn report(&self) -> HeapReport {
        let mut blocks = Vec::new();

        unsafe {
            let mut cursor = self.head;
            while cursor != 0 {
                let block = Block::from_start(cursor);

                blocks.push(gather_stats(block));
                cursor = block.next();
            }
        }

        HeapReport { blocks }
    }

    /// Asserts the arena-wide invariant web: the block list is
    /// address-ordered, cycle-free, and disjoint, and every block
    /// passes its own `check_rep`.
    pub fn check_rep(&self) {
        unsafe {
            let mut cursor = self.head;
            let mut previous = 0;
            let mut previous_end = 0;

            while cursor != 0 {
                let block = Block::from_start(cursor);

                assert!(cursor > previous, "block list must be address-ordered");
                assert!(previous_end <= cursor, "block ranges must be disjoint");
                assert_eq!(block.previous(), previous, "broken block back link");
                assert!(
                    block.used_size() >= self.baseline,
                    "live blocks carry the alignment reservation"
                );
                block.check_rep();

                previous = cursor;
                previous_end = block.end();
                cursor = block.next();
            }
        }
    }

    /// Scans live blocks for the first free region that can host
    /// `request` total bytes.  Blocks with no slack at all are
    /// skipped without touching their lists.
    unsafe fn find_host(&self, request: usize) -> Option<(Block, usize)> {
        let mut cursor = self.head;

        while cursor != 0 {
            let block = Block::from_start(cursor);

            if block.used_size() < block.size() {
                if let Some(fit) = block.find_fit(request) {
                    return Some((block, fit));
                }
            }

            cursor = block.next();
        }

        None
    }

    /// Acquires and initializes a block large enough to host a region
    /// of `request` bytes, links it into the block list, and charges
    /// it the alignment reservation.
    unsafe fn grow(&mut self, request: usize) -> Option<Block> {
        let required = request + BLOCK_HEADER_SIZE + reservation_footprint() + MIN_FREE_REGION;
        let pages = (required + PAGE_SIZE - 1) / PAGE_SIZE;

        // The fresh block starts out as one free region spanning
        // everything after the block header; that region's size must
        // fit the 28-bit size field too, and page rounding can push
        // it past a request the region cap alone admits.
        if pages * PAGE_SIZE - BLOCK_HEADER_SIZE > MAX_REGION_SIZE {
            return None;
        }

        let base = self.source.acquire(pages).ok()?;
        let block = Block::init(base.as_ptr() as usize, pages);

        self.link_block(block);
        self.reserve_alignment_slack(block);

        Some(block)
    }

    /// Performs the synthetic allocation on a fresh block.  Nothing
    /// observable escapes: the region is never returned and never
    /// freed, and the pages go back wholesale when the block is
    /// reclaimed.
    unsafe fn reserve_alignment_slack(&mut self, block: Block) {
        let request = RESERVATION_PAYLOAD + 2 * HEADER_SLOT;
        let fit = block
            .find_fit(request)
            .expect("a fresh block always fits the alignment reservation");

        block.remove_free(fit);
        if let Some(remainder) = region::split(fit, request) {
            block.insert_free(remainder);
        }
        block.mark_used(fit);

        if self.baseline == 0 {
            self.baseline = block.used_size();
        }
        debug_assert_eq!(block.used_size(), self.baseline);
    }

    /// Splices `block` into the list, keeping it ordered by ascending
    /// start address.
    unsafe fn link_block(&mut self, block: Block) {
        let address = block.start();

        if self.head == 0 || address < self.head {
            block.set_next(self.head);
            block.set_previous(0);
            if self.head != 0 {
                Block::from_start(self.head).set_previous(address);
            }
            self.head = address;
            return;
        }

        let mut cursor = Block::from_start(self.head);
        while cursor.next() != 0 && cursor.next() < address {
            cursor = Block::from_start(cursor.next());
        }

        let following = cursor.next();
        block.set_previous(cursor.start());
        block.set_next(following);
        cursor.set_next(address);
        if following != 0 {
            Block::from_start(following).set_previous(address);
        }
    }

    unsafe fn unlink_block(&mut self, block: Block) {
        let previous = block.previous();
        let next = block.next();

        if previous == 0 {
            self.head = next;
        } else {
            Block::from_start(previous).set_next(next);
        }

        if next != 0 {
            Block::from_start(next).set_previous(previous);
        }
    }

    /// Returns the block whose range contains `address`, if any.
    unsafe fn find_owner(&self, address: usize) -> Option<Block> {
        let mut cursor = self.head;

        while cursor != 0 {
            let block = Block::from_start(cursor);

            if block.contains(address) {
                return Some(block);
            }

            cursor = block.next();
        }

        None
    }

    /// Unlinks an empty block and returns its pages to the source.
    unsafe fn reclaim(&mut self, block: Block) {
        self.unlink_block(block);

        #[cfg(any(
            all(test, feature = "check_contracts_in_tests"),
            feature = "check_contracts"
        ))]
        debug_allocation_map::forget_range(block.start(), block.end());

        let pages = block.pages();
        let base = NonNull::new(block.start() as *mut c_void).expect("block starts are never null");
        let _ = self.source.release(base, pages);
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            while self.head != 0 {
                self.reclaim(Block::from_start(self.head));
            }
        }
    }
}

unsafe fn gather_stats(block: Block) -> BlockStats {
    let mut stats = BlockStats {
        start: block.start(),
        pages: block.pages(),
        size: block.size(),
        used_size: block.used_size(),
        ..Default::default()
    };

    for class in 0..CLASS_COUNT {
        let members = block.class_regions(class);

        for &(_, size) in &members {
            stats.free_regions += 1;
            stats.total_free += size;
            stats.max_free = stats.max_free.max(size);
            stats.min_free = if stats.min_free == 0 {
                size
            } else {
                stats.min_free.min(size)
            };
        }

        stats.classes[class] = members;
    }

    stats
}

#[cfg(test)]
mod tests {
    use proptest::collection::vec;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    use super::*;

    fn test_arena() -> Arena {
        Arena::with_default_source()
    }

    unsafe fn write_pattern(ptr: NonNull<c_void>, len: usize, byte: u8) {
        std::ptr::write_bytes(ptr.as_ptr() as *mut u8, byte, len);
    }

    unsafe fn check_pattern(ptr: NonNull<c_void>, len: usize, byte: u8) -> bool {
        let base = ptr.as_ptr() as *const u8;

        (0..len).all(|i| std::ptr::read(base.add(i)) == byte)
    }

    // Derives the payload capacity the way `resize` does.
    unsafe fn payload_capacity(ptr: NonNull<c_void>) -> usize {
        let header = region::header_address(ptr.as_ptr() as usize);

        region::payload_size(Metadata::read(header).size())
    }

    #[test]
    fn single_small_allocation() {
        let mut arena = test_arena();

        let p = arena.allocate(4).expect("allocation should succeed");
        assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);
        arena.check_rep();

        unsafe {
            std::ptr::write(p.as_ptr() as *mut u32, 42);
            assert_eq!(std::ptr::read(p.as_ptr() as *const u32), 42);

            arena.release(p.as_ptr());
        }

        // The only user allocation is gone, so the block is too.
        assert!(arena.is_empty());
        assert!(arena.report().is_empty());
        arena.check_rep();
    }

    #[test]
    fn five_element_burst() {
        let mut arena = test_arena();
        let mut slots = Vec::new();

        for i in 0..5u32 {
            let p = arena.allocate(mem::size_of::<u32>()).expect("allocation should succeed");

            assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);
            assert!(slots.iter().all(|&(q, _)| q != p));

            unsafe { std::ptr::write(p.as_ptr() as *mut u32, 1000 + i) };
            slots.push((p, 1000 + i));
        }
        arena.check_rep();

        for &(p, value) in &slots {
            assert_eq!(unsafe { std::ptr::read(p.as_ptr() as *const u32) }, value);
        }

        for (p, _) in slots {
            unsafe { arena.release(p.as_ptr()) };
        }
        assert!(arena.is_empty());
    }

    // Carves `count` allocations of `size` bytes in one large block
    // and hands back the block's anchor: a small pinned allocation
    // that keeps the block alive plus the payloads.  Used by the
    // multi-page coalescing scenarios.
    fn carve_adjacent(
        arena: &mut Arena,
        size: usize,
        count: usize,
        room: usize,
    ) -> (NonNull<c_void>, Vec<NonNull<c_void>>) {
        let filler = arena.allocate(room).expect("filler should fit");
        let pin = arena.allocate(64).expect("pin should fit");
        unsafe { arena.release(filler.as_ptr()) };

        let slots: Vec<NonNull<c_void>> = (0..count)
            .map(|_| arena.allocate(size).expect("carve should fit"))
            .collect();

        arena.check_rep();
        (pin, slots)
    }

    #[test]
    fn coalesce_left() {
        let mut arena = test_arena();

        let a = arena.allocate(64).expect("a should fit");
        let b = arena.allocate(64).expect("b should fit");
        let c = arena.allocate(64).expect("c should fit");

        unsafe {
            arena.release(b.as_ptr());
            arena.release(a.as_ptr());
        }
        arena.check_rep();

        let x = arena.allocate(128).expect("x should fit");
        assert_eq!(x, a, "x should reuse a's merged range");

        unsafe {
            arena.release(x.as_ptr());
            arena.release(c.as_ptr());
        }
        assert!(arena.is_empty());
    }

    #[test]
    fn coalesce_right() {
        let mut arena = test_arena();

        let a = arena.allocate(64).expect("a should fit");
        let b = arena.allocate(64).expect("b should fit");
        let c = arena.allocate(64).expect("c should fit");
        let d = arena.allocate(64).expect("d should fit");

        unsafe {
            arena.release(c.as_ptr());
            arena.release(d.as_ptr());
        }
        arena.check_rep();

        let y = arena.allocate(128).expect("y should fit");
        assert_eq!(y, c, "y should reuse c's merged range");

        unsafe {
            arena.release(a.as_ptr());
            arena.release(b.as_ptr());
            arena.release(y.as_ptr());
        }
        assert!(arena.is_empty());
    }

    #[test]
    fn coalesce_both() {
        let mut arena = test_arena();

        let a = arena.allocate(64).expect("a should fit");
        let b = arena.allocate(64).expect("b should fit");
        let c = arena.allocate(64).expect("c should fit");
        let d = arena.allocate(64).expect("d should fit");

        unsafe {
            arena.release(c.as_ptr());
            arena.release(b.as_ptr());
            arena.release(d.as_ptr());
        }
        arena.check_rep();

        let z = arena.allocate(192).expect("z should fit");
        assert_eq!(z, b, "z should reuse b's merged range");

        unsafe {
            arena.release(a.as_ptr());
            arena.release(z.as_ptr());
        }
        assert!(arena.is_empty());
    }

    #[test]
    fn coalesce_left_multi_page() {
        let mut arena = test_arena();
        let (pin, slots) = carve_adjacent(&mut arena, 4096, 3, 29000);

        unsafe {
            arena.release(slots[1].as_ptr());
            arena.release(slots[0].as_ptr());
        }
        arena.check_rep();

        let x = arena.allocate(2 * 4096).expect("x should fit");
        assert_eq!(x, slots[0], "x should reuse the merged range");

        unsafe {
            arena.release(x.as_ptr());
            arena.release(slots[2].as_ptr());
            arena.release(pin.as_ptr());
        }
        assert!(arena.is_empty());
    }

    #[test]
    fn coalesce_right_multi_page() {
        let mut arena = test_arena();
        let (pin, slots) = carve_adjacent(&mut arena, 4096, 4, 29000);

        unsafe {
            arena.release(slots[2].as_ptr());
            arena.release(slots[3].as_ptr());
        }
        arena.check_rep();

        let y = arena.allocate(2 * 4096).expect("y should fit");
        assert_eq!(y, slots[2], "y should reuse the merged range");

        unsafe {
            arena.release(slots[0].as_ptr());
            arena.release(slots[1].as_ptr());
            arena.release(y.as_ptr());
            arena.release(pin.as_ptr());
        }
        assert!(arena.is_empty());
    }

    #[test]
    fn coalesce_both_multi_page() {
        let mut arena = test_arena();
        let (pin, slots) = carve_adjacent(&mut arena, 4096, 4, 29000);

        unsafe {
            arena.release(slots[2].as_ptr());
            arena.release(slots[1].as_ptr());
            arena.release(slots[3].as_ptr());
        }
        arena.check_rep();

        let z = arena.allocate(3 * 4096).expect("z should fit");
        assert_eq!(z, slots[1], "z should reuse the merged range");

        unsafe {
            arena.release(slots[0].as_ptr());
            arena.release(z.as_ptr());
            arena.release(pin.as_ptr());
        }
        assert!(arena.is_empty());
    }

    #[test]
    fn large_then_small() {
        let mut arena = test_arena();

        let large = arena.allocate(4096).expect("large should fit");
        unsafe { write_pattern(large, 4096, 0x5A) };

        let smalls: Vec<NonNull<c_void>> = (0..5)
            .map(|i| {
                let p = arena.allocate(64).expect("small should fit");

                unsafe { write_pattern(p, 64, i as u8) };
                p
            })
            .collect();
        arena.check_rep();

        assert!(unsafe { check_pattern(large, 4096, 0x5A) });

        for p in smalls {
            unsafe { arena.release(p.as_ptr()) };
        }
        assert!(unsafe { check_pattern(large, 4096, 0x5A) });

        unsafe { arena.release(large.as_ptr()) };
        assert!(arena.is_empty());
    }

    #[test]
    fn free_then_allocate_reuses_the_address() {
        let mut arena = test_arena();

        let p = arena.allocate(200).expect("allocation should succeed");
        unsafe { arena.release(p.as_ptr()) };

        let q = arena.allocate(200).expect("allocation should succeed");
        assert_eq!(p, q);

        unsafe { arena.release(q.as_ptr()) };
    }

    #[test]
    fn release_edge_cases_are_no_ops() {
        let mut arena = test_arena();

        // Null, with and without live blocks.
        unsafe { arena.release(std::ptr::null_mut()) };

        let p = arena.allocate(32).expect("allocation should succeed");
        unsafe {
            arena.release(std::ptr::null_mut());

            // A pointer no block owns.
            let foreign = 0x1000 as *mut c_void;
            arena.release(foreign);
        }
        arena.check_rep();

        // Double free: the second release sees a free region and
        // leaves it alone.  Keep another allocation live so the block
        // (and the region metadata) survives the first release.
        let keep = arena.allocate(32).expect("allocation should succeed");
        unsafe {
            arena.release(p.as_ptr());
            arena.release(p.as_ptr());
            arena.release(keep.as_ptr());
        }
        assert!(arena.is_empty());
    }

    #[test]
    fn resize_identity() {
        let mut arena = test_arena();

        let p = arena.allocate(100).expect("allocation should succeed");
        let capacity = unsafe { payload_capacity(p) };

        let q = unsafe { arena.resize(p.as_ptr(), capacity) }.expect("resize should succeed");
        assert_eq!(p, q);

        unsafe { arena.release(q.as_ptr()) };
        assert!(arena.is_empty());
    }

    #[test]
    fn resize_preserves_the_prefix() {
        let mut arena = test_arena();

        let p = arena.allocate(64).expect("allocation should succeed");
        unsafe { write_pattern(p, 64, 0x7E) };

        // Pin the block so the released original cannot disappear and
        // the grown copy must move elsewhere.
        let pin = arena.allocate(16).expect("pin should fit");

        let grown = unsafe { arena.resize(p.as_ptr(), 1024) }.expect("resize should succeed");
        assert_ne!(grown, p);
        assert!(unsafe { check_pattern(grown, 64, 0x7E) });
        arena.check_rep();

        let shrunk = unsafe { arena.resize(grown.as_ptr(), 16) }.expect("resize should succeed");
        assert!(unsafe { check_pattern(shrunk, 16, 0x7E) });

        unsafe {
            arena.release(shrunk.as_ptr());
            arena.release(pin.as_ptr());
        }
        assert!(arena.is_empty());
    }

    #[test]
    fn resize_null_allocates() {
        let mut arena = test_arena();

        let p = unsafe { arena.resize(std::ptr::null_mut(), 48) }.expect("resize should allocate");
        assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);

        unsafe { arena.release(p.as_ptr()) };
    }

    #[test]
    fn resize_failure_keeps_the_original() {
        let mut arena = test_arena();

        let p = arena.allocate(64).expect("allocation should succeed");
        unsafe { write_pattern(p, 64, 0x3C) };

        assert_eq!(unsafe { arena.resize(p.as_ptr(), MAX_REGION_SIZE) }, None);
        assert!(unsafe { check_pattern(p, 64, 0x3C) });

        unsafe { arena.release(p.as_ptr()) };
    }

    #[test]
    fn zero_allocate_zeroes_the_payload() {
        let mut arena = test_arena();

        // Dirty a region, free it, then demand zeroed memory over the
        // same range.
        let dirty = arena.allocate(80).expect("allocation should succeed");
        unsafe {
            write_pattern(dirty, 80, 0xFF);
            arena.release(dirty.as_ptr());
        }

        let p = arena.zero_allocate(10, 8).expect("zero-allocate should succeed");
        assert_eq!(p, dirty);
        assert!(unsafe { check_pattern(p, 80, 0) });

        unsafe { arena.release(p.as_ptr()) };
    }

    #[test]
    fn zero_allocate_rejects_bad_shapes() {
        let mut arena = test_arena();

        assert_eq!(arena.zero_allocate(10, 0), None);
        assert_eq!(arena.zero_allocate(usize::MAX, 2), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn oversized_requests_fail_cleanly() {
        let mut arena = test_arena();

        assert_eq!(arena.allocate(usize::MAX), None);
        assert_eq!(arena.allocate(MAX_REGION_SIZE), None);

        // Below the region cap, but page rounding would hand the
        // fresh block an initial free region above it.
        assert_eq!(arena.allocate(MAX_REGION_SIZE - 3 * ALIGNMENT), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn zero_byte_allocation_is_valid() {
        let mut arena = test_arena();

        let p = arena.allocate(0).expect("allocation should succeed");
        assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);

        unsafe { arena.release(p.as_ptr()) };
        assert!(arena.is_empty());
    }

    #[test]
    fn report_tracks_usage() {
        let mut arena = test_arena();

        let a = arena.allocate(64).expect("a should fit");
        let b = arena.allocate(64).expect("b should fit");

        let report = arena.report();
        assert_eq!(report.blocks.len(), 1);

        let block = &report.blocks[0];
        assert_eq!(block.pages, 1);
        assert_eq!(block.size, PAGE_SIZE);
        assert_eq!(block.free_regions, 1);
        assert_eq!(block.min_free, block.max_free);
        assert_eq!(block.total_free, block.size - block.used_size);

        // Freeing a opens a second, smaller free region.
        unsafe { arena.release(a.as_ptr()) };
        let report = arena.report();
        let block = &report.blocks[0];
        assert_eq!(block.free_regions, 2);
        assert!(block.min_free < block.max_free);

        unsafe { arena.release(b.as_ptr()) };
        assert!(arena.report().is_empty());
    }

    proptest! {
        // Bulk allocate, then deallocate and re-allocate in
        // random-ish order, checking alignment, isolation, and the
        // full invariant web at every quiescent point.
        #[test]
        fn random_order(actions in vec((0..16usize, 1..512usize), 1..64)) {
            let mut arena = test_arena();

            // If a slot is None, we will allocate in there the next
            // time we hit it; otherwise we consume and free it.
            let mut slots: Vec<Option<(NonNull<c_void>, usize)>> = vec![None; 16];

            for (index, size) in actions.iter().cloned() {
                if let Some((ptr, len)) = slots[index].take() {
                    let pattern_ok = unsafe { check_pattern(ptr, len, index as u8) };
                    prop_assert!(pattern_ok);
                    unsafe { arena.release(ptr.as_ptr()) };
                } else {
                    let ptr = arena.allocate(size);
                    prop_assert!(ptr.is_some());

                    let ptr = ptr.unwrap();
                    prop_assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);

                    // The new payload must not touch any live one.
                    let fresh = slots.iter().flatten().all(|&(other, len)| {
                        let begin = other.as_ptr() as usize;
                        let end = begin + len;
                        let new_begin = ptr.as_ptr() as usize;

                        new_begin + size <= begin || end <= new_begin
                    });
                    prop_assert!(fresh);

                    unsafe { write_pattern(ptr, size, index as u8) };
                    slots[index] = Some((ptr, size));
                }

                arena.check_rep();

                // Writing to one allocation never alters another.
                for (other_index, slot) in slots.iter().enumerate() {
                    if let Some((ptr, len)) = slot {
                        let pattern_ok = unsafe { check_pattern(*ptr, *len, other_index as u8) };
                        prop_assert!(pattern_ok);
                    }
                }
            }

            for slot in slots.iter_mut() {
                if let Some((ptr, _)) = slot.take() {
                    unsafe { arena.release(ptr.as_ptr()) };
                }
            }

            prop_assert!(arena.is_empty());
        }

        // Check that we can correctly allocate and deallocate in
        // stack order.
        #[test]
        fn lifo(push_pop in vec(proptest::bool::ANY, 2..50)) {
            let mut arena = test_arena();
            let mut stack: Vec<NonNull<c_void>> = Vec::new();

            for alloc in push_pop.iter().cloned() {
                if alloc {
                    let ptr = arena.allocate(24);

                    prop_assert!(ptr.is_some());
                    let ptr = ptr.unwrap();

                    prop_assert!(stack.iter().all(|&other| other != ptr));
                    stack.push(ptr);
                } else if let Some(freed) = stack.pop() {
                    unsafe { arena.release(freed.as_ptr()) };
                }

                arena.check_rep();
            }

            while let Some(freed) = stack.pop() {
                unsafe { arena.release(freed.as_ptr()) };
            }

            prop_assert!(arena.is_empty());
        }

        // Check that we can correctly allocate and deallocate in
        // queue order.
        #[test]
        fn fifo(push_pop in vec(proptest::bool::ANY, 2..50)) {
            let mut arena = test_arena();
            let mut queue: VecDeque<NonNull<c_void>> = VecDeque::new();

            for alloc in push_pop.iter().cloned() {
                if alloc {
                    let ptr = arena.allocate(24);

                    prop_assert!(ptr.is_some());
                    let ptr = ptr.unwrap();

                    prop_assert!(queue.iter().all(|&other| other != ptr));
                    queue.push_back(ptr);
                } else if let Some(freed) = queue.pop_front() {
                    unsafe { arena.release(freed.as_ptr()) };
                }

                arena.check_rep();
            }

            while let Some(freed) = queue.pop_back() {
                unsafe { arena.release(freed.as_ptr()) };
            }

            prop_assert!(arena.is_empty());
        }
    }
}
