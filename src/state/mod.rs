use crate::block::{Block, BlockContent, Category, patch};
use crate::clipboard::{Clipboard, ClipboardError};
use crate::preferences::PreferenceStore;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Storage key of the persisted filter map.
pub const FILTERS_KEY: &str = "codexLogViewer.filters";

// ===================================================================
// Filters
// ===================================================================

/// Visibility per category. Every category always has an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterState {
    visible: BTreeMap<Category, bool>,
}

impl FilterState {
    pub fn defaults(show_usage: bool) -> Self {
        let visible = Category::ALL
            .into_iter()
            .map(|c| {
                let v = if c == Category::Usage {
                    show_usage
                } else {
                    c.default_visible()
                };
                (c, v)
            })
            .collect();
        Self { visible }
    }

    /// Overlay a persisted JSON object. Unknown keys and non-boolean values
    /// are ignored; an unparseable document leaves the state unchanged.
    pub fn merge_stored(&mut self, stored: &str) {
        let map: Map<String, Value> = match serde_json::from_str(stored) {
            Ok(map) => map,
            Err(err) => {
                warn!("ignoring unreadable stored filters: {err}");
                return;
            }
        };
        for (key, value) in map {
            match (Category::from_key(&key), value.as_bool()) {
                (Some(category), Some(v)) => {
                    self.visible.insert(category, v);
                }
                _ => debug!(%key, "ignoring stored filter entry"),
            }
        }
    }

    pub fn to_json(&self) -> String {
        let map: Map<String, Value> = self
            .visible
            .iter()
            .map(|(c, v)| (c.key().to_string(), Value::Bool(*v)))
            .collect();
        Value::Object(map).to_string()
    }

    pub fn is_visible(&self, category: Category) -> bool {
        self.visible
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_visible())
    }

    pub fn set(&mut self, category: Category, visible: bool) {
        self.visible.insert(category, visible);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, bool)> + '_ {
        self.visible.iter().map(|(c, v)| (*c, *v))
    }
}

// ===================================================================
// Collapse
// ===================================================================

/// Collapsed flag per collapsible block, keyed by block index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollapseState {
    collapsed: BTreeMap<usize, bool>,
}

impl CollapseState {
    pub fn from_blocks(blocks: &[Block]) -> Self {
        let collapsed = blocks
            .iter()
            .filter(|b| b.collapsible)
            .map(|b| (b.index, b.initially_collapsed))
            .collect();
        Self { collapsed }
    }

    /// Flip one block. `None` if the block is not collapsible.
    pub fn toggle(&mut self, index: usize) -> Option<bool> {
        let flag = self.collapsed.get_mut(&index)?;
        *flag = !*flag;
        Some(*flag)
    }

    pub fn set_all(&mut self, collapsed: bool) {
        for flag in self.collapsed.values_mut() {
            *flag = collapsed;
        }
    }

    pub fn is_collapsed(&self, index: usize) -> bool {
        self.collapsed.get(&index).copied().unwrap_or(false)
    }
}

// ===================================================================
// Patch copy
// ===================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The patch is on the system clipboard.
    Copied,
    /// No clipboard; the caller should present this text for manual copy.
    Manual(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CopyError {
    #[error("no block with index {0}")]
    NoSuchBlock(usize),
    #[error("block {0} is not an apply-patch block")]
    NotAPatch(usize),
    #[error("block {0} carries an undecodable patch payload")]
    CorruptPayload(usize),
}

// ===================================================================
// View state
// ===================================================================

/// Owns every piece of state that outlives a render pass.
pub struct ViewState {
    filters: FilterState,
    collapse: CollapseState,
    store: Box<dyn PreferenceStore>,
}

impl ViewState {
    /// Restore filters from `store` and seed collapse flags from `blocks`.
    /// The usage filter always follows `show_usage`, whatever was stored.
    pub fn load(store: Box<dyn PreferenceStore>, show_usage: bool, blocks: &[Block]) -> Self {
        let mut filters = FilterState::defaults(show_usage);
        if let Some(stored) = store.load(FILTERS_KEY) {
            filters.merge_stored(&stored);
        }
        filters.set(Category::Usage, show_usage);
        Self {
            filters,
            collapse: CollapseState::from_blocks(blocks),
            store,
        }
    }

    /// Persist filters. Failures are logged and otherwise ignored.
    pub fn save(&mut self) {
        if let Err(err) = self.store.save(FILTERS_KEY, &self.filters.to_json()) {
            warn!("filter preferences not saved: {err:#}");
        }
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    /// Flip and persist one category; returns the new visibility.
    pub fn toggle_filter(&mut self, category: Category) -> bool {
        let visible = !self.filters.is_visible(category);
        self.set_filter(category, visible);
        visible
    }

    pub fn set_filter(&mut self, category: Category, visible: bool) {
        self.filters.set(category, visible);
        info!(%category, visible, "filter changed");
        self.save();
    }

    pub fn is_visible(&self, category: Category) -> bool {
        self.filters.is_visible(category)
    }

    pub fn visible_blocks<'a>(&'a self, blocks: &'a [Block]) -> impl Iterator<Item = &'a Block> {
        blocks.iter().filter(|b| self.is_visible(b.category))
    }

    pub fn toggle_collapse(&mut self, index: usize) -> Option<bool> {
        self.collapse.toggle(index)
    }

    /// Applies to every collapsible block, filtered or not.
    pub fn collapse_all(&mut self) {
        self.collapse.set_all(true);
    }

    pub fn expand_all(&mut self) {
        self.collapse.set_all(false);
    }

    pub fn is_collapsed(&self, index: usize) -> bool {
        self.collapse.is_collapsed(index)
    }

    /// Decode the stored patch of block `index` and hand it to `clipboard`.
    /// Falls back to [`CopyOutcome::Manual`] when the clipboard fails.
    pub fn copy_patch(
        &self,
        blocks: &[Block],
        index: usize,
        clipboard: &dyn Clipboard,
    ) -> Result<CopyOutcome, CopyError> {
        let block = blocks.get(index).ok_or(CopyError::NoSuchBlock(index))?;
        let BlockContent::ApplyPatch { encoded, .. } = &block.content else {
            return Err(CopyError::NotAPatch(index));
        };
        let text = patch::decode(encoded).ok_or(CopyError::CorruptPayload(index))?;
        match clipboard.copy(&text) {
            Ok(()) => Ok(CopyOutcome::Copied),
            Err(err @ ClipboardError::NotAvailable) => {
                debug!("{err}; using manual copy");
                Ok(CopyOutcome::Manual(text))
            }
            Err(err) => {
                warn!("{err}; using manual copy");
                Ok(CopyOutcome::Manual(text))
            }
        }
    }

    #[cfg(test)]
    pub fn into_store(self) -> Box<dyn PreferenceStore> {
        self.store
    }
}
