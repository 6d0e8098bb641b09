use crate::backend::HitResult;
use crate::block_atlas::BlockList;

/// A hit mapped back to the batch that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickResolution<'a> {
    pub list: &'a BlockList,
    /// Index of the picked item within the whole batch: the summed
    /// `item_count` of every block preceding the hit one, plus the
    /// within-block offset from the hit test.
    pub item_index: usize,
}

/// Walks the ordered batch history for the block written at
/// `(page, draw_slot)`.
///
/// `None` means the result was stale — the GPU can surface indices one
/// frame out of date, so unmatched hits are tolerated silently rather
/// than treated as errors. The scan is linear over all live blocks,
/// which is fine at interactive picking rates.
pub fn resolve(
    lists: &[BlockList],
    page: usize,
    draw_slot: usize,
    item_offset: usize,
) -> Option<PickResolution<'_>> {
    for list in lists {
        let mut cumulative = 0;
        for block in &list.blocks {
            if block.page == page && block.draw_slot == draw_slot {
                if item_offset >= block.item_count {
                    log::trace!(
                        "pick offset {item_offset} out of range for block at page {page} slot {draw_slot}"
                    );
                    return None;
                }
                return Some(PickResolution {
                    list,
                    item_index: cumulative + item_offset,
                });
            }
            cumulative += block.item_count;
        }
    }

    log::trace!("stale pick result: page {page} draw_slot {draw_slot}");
    None
}

/// Convenience wrapper taking a raw backend hit.
pub fn resolve_hit<'a>(lists: &'a [BlockList], hit: &HitResult) -> Option<PickResolution<'a>> {
    resolve(lists, hit.page, hit.draw_slot, hit.item)
}
