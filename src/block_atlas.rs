use uuid::Uuid;

use crate::backend::{AtlasId, BufferId, BufferKind, DrawBinding, HitResult, RenderBackend};
use crate::config::PageSettings;
use crate::error::PoolError;
use crate::label::Bitmap;
use crate::pick::{self, PickResolution};
use crate::utils::{DrawCommand, InstanceRecord, Position};

/// One atlas texture layer with a countdown of remaining label tiles.
#[derive(Debug, Clone, Copy)]
struct AtlasLayer {
    remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Accepting appends and holding live blocks.
    Active,
    /// Every block ever written here has been removed; buffers and
    /// atlas layers are released and the draw binding is detached.
    /// The page entry stays so page indices remain stable.
    Emptied,
}

/// One unit of growth: a position buffer, a label-matrix buffer, an
/// indirect command buffer, and a bounded set of atlas layers.
pub struct Page {
    positions: BufferId,
    labels: BufferId,
    commands: BufferId,
    atlas: AtlasId,
    layers: Vec<AtlasLayer>,
    layer_cursor: usize,
    item_cursor: usize,
    draw_cursor: usize,
    live_blocks: usize,
    total_blocks: usize,
    state: PageState,
}

impl Page {
    fn free_items(&self, settings: &PageSettings) -> usize {
        settings.items_per_page - self.item_cursor
    }

    fn free_commands(&self, settings: &PageSettings) -> usize {
        settings.commands_per_page - self.draw_cursor
    }

    fn free_labels(&self) -> u32 {
        self.layers[self.layer_cursor..]
            .iter()
            .map(|layer| layer.remaining)
            .sum()
    }

    /// Claims the next label tile, advancing to the next layer once the
    /// current one fills. None when every layer is full.
    fn take_label_slot(&mut self, labels_per_layer: u32) -> Option<(u32, u32)> {
        while self.layer_cursor < self.layers.len() {
            let layer = &mut self.layers[self.layer_cursor];
            if layer.remaining > 0 {
                let tile = labels_per_layer - layer.remaining;
                layer.remaining -= 1;
                return Some((self.layer_cursor as u32, tile));
            }
            self.layer_cursor += 1;
        }
        None
    }

    fn binding(&self, page: usize) -> DrawBinding {
        DrawBinding::Page {
            page,
            positions: self.positions,
            labels: self.labels,
            commands: self.commands,
            atlas: self.atlas,
        }
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn live_blocks(&self) -> usize {
        self.live_blocks
    }
}

/// A contiguous run of items written by one `add_batch` call, the unit
/// of removal. Only the first block of a batch carries the caller's
/// tag; blocks that spill onto further pages are untagged continuations
/// of the same logical unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub page: usize,
    pub draw_slot: usize,
    pub item_count: usize,
    pub tag: Option<Uuid>,
}

/// The ordered blocks one batch produced, keyed by the batch tag.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockList {
    pub tag: Uuid,
    pub blocks: Vec<Block>,
}

impl BlockList {
    pub fn item_count(&self) -> usize {
        self.blocks.iter().map(|block| block.item_count).sum()
    }
}

/// Manages paged GPU buffers and atlas layers for batches of labeled
/// items.
///
/// Appends go to the tail page, spilling onto freshly opened pages as
/// item, command, or label capacity runs out. Removal tombstones draw
/// commands in place — indices are baked into the command stream, so
/// nothing is ever compacted — and a page whose every block has been
/// removed is emptied and released.
pub struct AtlasBlockManager {
    pages: Vec<Page>,
    lists: Vec<BlockList>,
    settings: PageSettings,
    live_items: usize,
    disposed: bool,
}

impl AtlasBlockManager {
    pub fn new(settings: PageSettings) -> Self {
        AtlasBlockManager {
            pages: Vec::new(),
            lists: Vec::new(),
            settings,
            live_items: 0,
            disposed: false,
        }
    }

    /// Appends a batch of items under `tag`.
    ///
    /// `labels` must match `positions` in length; `bitmaps` must either
    /// match it too or be empty for an unlabeled batch. The returned
    /// list mirrors the entry kept in the insertion-order history.
    pub fn add_batch<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        tag: Uuid,
        positions: &[InstanceRecord],
        labels: &[InstanceRecord],
        bitmaps: &[Bitmap],
    ) -> Result<BlockList, PoolError> {
        debug_assert!(!self.disposed, "add_batch on a disposed manager");

        if labels.len() != positions.len()
            || (!bitmaps.is_empty() && bitmaps.len() != positions.len())
        {
            return Err(PoolError::MismatchedBatch {
                positions: positions.len(),
                labels: labels.len(),
                bitmaps: bitmaps.len(),
            });
        }

        let labeled = !bitmaps.is_empty();
        let total = positions.len();
        let mut blocks = Vec::new();
        let mut offset = 0;

        while offset < total {
            let page_index = self.append_page(backend, labeled)?;
            let settings = self.settings;
            let page = &mut self.pages[page_index];

            let mut chunk = (total - offset).min(page.free_items(&settings));
            if labeled {
                chunk = chunk.min(page.free_labels() as usize);
            }
            debug_assert!(chunk > 0, "append page has no room");
            debug_assert!(page.free_commands(&settings) > 0);

            let first_item = page.item_cursor;
            for i in 0..chunk {
                let index = first_item + i;
                let mut position = positions[offset + i];
                position.slot_self = index as u32;
                backend.write_record(page.positions, index, &position);
                backend.write_record(page.labels, index, &labels[offset + i]);

                if labeled {
                    let (layer, tile) = page
                        .take_label_slot(settings.labels_per_layer)
                        .expect("label slot accounted for in chunk size");
                    backend.upload_label(page.atlas, layer, tile, &bitmaps[offset + i]);
                }
            }

            let draw_slot = page.draw_cursor;
            backend.write_command(
                page.commands,
                draw_slot,
                &DrawCommand::quad(chunk as u32, first_item as u32),
            );

            page.item_cursor += chunk;
            page.draw_cursor += 1;
            page.live_blocks += 1;
            page.total_blocks += 1;

            blocks.push(Block {
                page: page_index,
                draw_slot,
                item_count: chunk,
                tag: if blocks.is_empty() { Some(tag) } else { None },
            });

            offset += chunk;
        }

        self.live_items += total;
        let list = BlockList { tag, blocks };
        if !list.blocks.is_empty() {
            self.lists.push(list.clone());
        }
        log::debug!(
            "batch {tag}: {total} items in {} block(s) across pages {:?}",
            list.blocks.len(),
            list.blocks.iter().map(|b| b.page).collect::<Vec<_>>()
        );
        Ok(list)
    }

    /// The tail page if it still has room, otherwise a freshly opened one.
    fn append_page<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        labeled: bool,
    ) -> Result<usize, PoolError> {
        if let Some(index) = self.pages.len().checked_sub(1) {
            let page = &self.pages[index];
            if page.state == PageState::Active
                && page.free_items(&self.settings) > 0
                && page.free_commands(&self.settings) > 0
                && (!labeled || page.free_labels() > 0)
            {
                return Ok(index);
            }
        }
        self.open_page(backend)
    }

    fn open_page<B: RenderBackend>(&mut self, backend: &mut B) -> Result<usize, PoolError> {
        if let Some(max_pages) = self.settings.max_pages {
            if self.pages.len() >= max_pages {
                return Err(PoolError::PagesExhausted { max_pages });
            }
        }

        let settings = &self.settings;
        let page = Page {
            positions: backend.allocate_buffer(BufferKind::PagePosition, settings.items_per_page),
            labels: backend.allocate_buffer(BufferKind::PageLabel, settings.items_per_page),
            commands: backend.allocate_buffer(BufferKind::Command, settings.commands_per_page),
            atlas: backend.allocate_atlas(
                settings.layers_per_page,
                settings.atlas_extent,
                settings.label_tile,
            ),
            layers: vec![
                AtlasLayer {
                    remaining: settings.labels_per_layer,
                };
                settings.layers_per_page as usize
            ],
            layer_cursor: 0,
            item_cursor: 0,
            draw_cursor: 0,
            live_blocks: 0,
            total_blocks: 0,
            state: PageState::Active,
        };

        let index = self.pages.len();
        backend.bind_draw(page.binding(index));
        log::debug!(
            "opened page {index} ({} items, {} commands, {} layers)",
            settings.items_per_page,
            settings.commands_per_page,
            settings.layers_per_page
        );
        self.pages.push(page);
        Ok(index)
    }

    /// Removes the oldest batch stored under `tag`, tombstoning its draw
    /// commands and retiring any page this empties. False for unknown tags.
    pub fn remove<B: RenderBackend>(&mut self, backend: &mut B, tag: &Uuid) -> bool {
        debug_assert!(!self.disposed, "remove on a disposed manager");

        match self.lists.iter().position(|list| list.tag == *tag) {
            Some(position) => {
                let list = self.lists.remove(position);
                self.tombstone_list(backend, &list);
                true
            }
            None => false,
        }
    }

    /// Removes the `n` oldest batches in insertion order. Returns how
    /// many were removed.
    pub fn remove_oldest<B: RenderBackend>(&mut self, backend: &mut B, n: usize) -> usize {
        let count = n.min(self.lists.len());
        for _ in 0..count {
            let list = self.lists.remove(0);
            self.tombstone_list(backend, &list);
        }
        count
    }

    /// Removes oldest batches until at most `count` items remain live.
    /// Returns how many batches were removed.
    pub fn remove_until<B: RenderBackend>(&mut self, backend: &mut B, count: usize) -> usize {
        let mut removed = 0;
        while self.live_items > count && !self.lists.is_empty() {
            let list = self.lists.remove(0);
            self.tombstone_list(backend, &list);
            removed += 1;
        }
        removed
    }

    fn tombstone_list<B: RenderBackend>(&mut self, backend: &mut B, list: &BlockList) {
        for block in &list.blocks {
            self.live_items -= block.item_count;
            let page = &mut self.pages[block.page];
            backend.write_command(page.commands, block.draw_slot, &DrawCommand::TOMBSTONE);
            page.live_blocks -= 1;

            if page.live_blocks == 0 && page.total_blocks > 0 && page.state == PageState::Active {
                Self::retire_page(backend, page, block.page);
            }
        }
        log::debug!("removed batch {} ({} blocks)", list.tag, list.blocks.len());
    }

    /// Transitions a fully-removed page to `Emptied`: the draw binding
    /// is detached and its buffers and atlas released, exactly once.
    fn retire_page<B: RenderBackend>(backend: &mut B, page: &mut Page, index: usize) {
        page.state = PageState::Emptied;
        backend.detach_draw(page.binding(index));
        backend.release_buffer(page.positions);
        backend.release_buffer(page.labels);
        backend.release_buffer(page.commands);
        backend.release_atlas(page.atlas);
        log::debug!("page {index} emptied, released");
    }

    /// Delegates the screen-space hit test to the rendering collaborator
    /// and returns its depth-sorted results unmodified. Page indices in
    /// the results match this manager's stable page order.
    pub fn find<B: RenderBackend>(
        &self,
        backend: &B,
        point: Position,
        margin: f32,
    ) -> Vec<HitResult> {
        debug_assert!(!self.disposed, "find on a disposed manager");
        backend.hit_test(point, margin)
    }

    /// Maps a raw `(page, draw_slot)` hit back to the batch that wrote
    /// it, with the cumulative item index inside that batch.
    pub fn resolve(
        &self,
        page: usize,
        draw_slot: usize,
        item_offset: usize,
    ) -> Option<PickResolution<'_>> {
        pick::resolve(&self.lists, page, draw_slot, item_offset)
    }

    /// Releases every page and forgets every batch.
    pub fn clear<B: RenderBackend>(&mut self, backend: &mut B) {
        for index in 0..self.pages.len() {
            let page = &mut self.pages[index];
            if page.state == PageState::Active {
                Self::retire_page(backend, page, index);
            }
        }
        self.pages.clear();
        self.lists.clear();
        self.live_items = 0;
    }

    /// Clears and marks the manager disposed. Safe to call twice.
    pub fn dispose<B: RenderBackend>(&mut self, backend: &mut B) {
        if self.disposed {
            return;
        }
        self.clear(backend);
        self.disposed = true;
    }

    pub fn live_items(&self) -> usize {
        self.live_items
    }

    /// Pages still holding live blocks or accepting appends.
    pub fn active_page_count(&self) -> usize {
        self.pages
            .iter()
            .filter(|page| page.state == PageState::Active)
            .count()
    }

    /// Pages ever opened, including emptied ones.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    /// The batch history in insertion order.
    pub fn lists(&self) -> &[BlockList] {
        &self.lists
    }

    pub fn settings(&self) -> &PageSettings {
        &self.settings
    }
}
