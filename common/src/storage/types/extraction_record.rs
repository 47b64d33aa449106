use serde::{Deserialize, Serialize};

/// Unit persisted by the extraction cache.
///
/// Empty `content` is a terminal outcome: the record was fetched and processed
/// but held no usable text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub identity_key: String,
    #[serde(default)]
    pub content: String,
}

impl ExtractionRecord {
    pub fn new(identity_key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            identity_key: identity_key.into(),
            content: content.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Column of a cached record, used to project scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordColumn {
    IdentityKey,
    Content,
}

impl RecordColumn {
    pub const fn name(self) -> &'static str {
        match self {
            Self::IdentityKey => "identity_key",
            Self::Content => "content",
        }
    }
}
