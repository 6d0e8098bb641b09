use serde::{Deserialize, Serialize};

/// Sizing for a [`PoolSet`](crate::pool_set::PoolSet) and its groups.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Slot capacity shared by every group.
    pub group_capacity: usize,
    /// Cap on the number of groups; `None` grows without bound.
    #[serde(default)]
    pub max_groups: Option<usize>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            group_capacity: 1024,
            max_groups: None,
        }
    }
}

impl PoolSettings {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap()
    }

    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }
}

/// Sizing for an [`AtlasBlockManager`](crate::block_atlas::AtlasBlockManager)
/// and its pages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageSettings {
    /// Instance records (positions + label matrices) per page.
    pub items_per_page: usize,
    /// Indirect draw command slots per page; one block consumes one slot.
    pub commands_per_page: usize,
    /// Atlas texture array layers owned by each page.
    pub layers_per_page: u32,
    /// Label tiles that fit into one layer.
    pub labels_per_layer: u32,
    /// Edge length of the square atlas texture, in texels.
    pub atlas_extent: u32,
    /// Edge length of one label tile, in texels.
    pub label_tile: u32,
    /// Cap on the number of pages; `None` grows without bound.
    #[serde(default)]
    pub max_pages: Option<usize>,
}

impl Default for PageSettings {
    fn default() -> Self {
        PageSettings {
            items_per_page: 4096,
            commands_per_page: 512,
            layers_per_page: 4,
            labels_per_layer: 256,
            atlas_extent: 2048,
            label_tile: 128,
            max_pages: None,
        }
    }
}

impl PageSettings {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap()
    }

    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }

    /// Total label capacity of one page across all of its layers.
    pub fn labels_per_page(&self) -> u32 {
        self.layers_per_page * self.labels_per_layer
    }
}
