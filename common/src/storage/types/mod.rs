pub mod extraction_record;
pub mod index_entry;

use index_entry::IndexEntry;

/// An index entry paired with the cache verdict taken before dispatch.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub entry: IndexEntry,
    pub cached: bool,
}

impl WorkItem {
    pub fn new(entry: IndexEntry, cached: bool) -> Self {
        Self { entry, cached }
    }
}
