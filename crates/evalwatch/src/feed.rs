//! Newest-first list of generated QCM items.

use std::collections::HashSet;

use crate::model::QcmItem;

/// What a renderer should show for the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedView<'a> {
    /// Nothing generated yet.
    Empty,
    /// Items, newest first.
    Items(&'a [QcmItem]),
}

#[derive(Debug, Clone, Default)]
pub struct LiveFeed {
    items: Vec<QcmItem>,
    ids: HashSet<String>,
}

impl LiveFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the feed with `items` given oldest first. A repeated id
    /// keeps only its newest occurrence.
    pub fn seed(&mut self, items: Vec<QcmItem>) {
        self.items.clear();
        self.ids.clear();
        for item in items.into_iter().rev() {
            if self.ids.insert(item.id.clone()) {
                self.items.push(item);
            }
        }
    }

    /// Puts `item` at the front. Returns false if its id is already shown.
    pub fn append(&mut self, item: QcmItem) -> bool {
        if !self.ids.insert(item.id.clone()) {
            return false;
        }
        self.items.insert(0, item);
        true
    }

    pub fn view(&self) -> FeedView<'_> {
        if self.items.is_empty() {
            FeedView::Empty
        } else {
            FeedView::Items(&self.items)
        }
    }

    pub fn items(&self) -> &[QcmItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.ids.clear();
    }
}
