//! Page-range partitioning.

use crate::models::PageRange;

/// Split `page_count` pages into consecutive ranges of at most
/// `batch_size` pages.
///
/// Ranges are 0-based, inclusive on both ends, pairwise disjoint, ordered
/// by start, and together cover `[0, page_count - 1]` exactly. The last
/// range is clamped to the final page. `page_count = 0` yields no ranges.
pub fn partition(page_count: u32, batch_size: u32) -> Vec<PageRange> {
    assert!(batch_size >= 1, "batch_size must be at least 1");

    let mut ranges = Vec::with_capacity(page_count.div_ceil(batch_size) as usize);
    let mut start = 0u32;
    let mut index = 0usize;
    while start < page_count {
        let end = (start + batch_size - 1).min(page_count - 1);
        ranges.push(PageRange::new(start, end, index));
        start = end + 1;
        index += 1;
    }
    ranges
}
