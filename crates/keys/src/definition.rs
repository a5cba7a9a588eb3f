//! Definition keys
//!
//! The versioned backend stores content payloads in standalone definition
//! documents shared by reference; a [`DefinitionKey`] names one immutable
//! version of such a document. The string form is `category@guid`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::block_type::BlockType;
use crate::course::VersionGuid;
use crate::error::{KeyError, KeyResult};

/// Opaque identity of one definition-document version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefinitionKey {
    block_type: BlockType,
    guid: VersionGuid,
}

impl DefinitionKey {
    /// Create a definition key.
    pub fn new(block_type: BlockType, guid: VersionGuid) -> Self {
        Self { block_type, guid }
    }

    /// Mint a key for a brand-new definition of the given category.
    pub fn fresh(block_type: BlockType) -> Self {
        Self::new(block_type, VersionGuid::new())
    }

    /// The category the definition belongs to.
    pub fn block_type(&self) -> &BlockType {
        &self.block_type
    }

    /// The definition-document version guid.
    pub fn guid(&self) -> VersionGuid {
        self.guid
    }

    /// Parse the `category@guid` form.
    ///
    /// # Errors
    /// `KeyError::WrongFormat` when the separator is missing, plus category
    /// and guid validation errors.
    pub fn parse(s: &str) -> KeyResult<Self> {
        let (category, guid) = s.split_once('@').ok_or(KeyError::WrongFormat {
            expected: "category@guid",
            got: s.to_string(),
        })?;
        Ok(Self::new(
            BlockType::new(category)?,
            VersionGuid::from_string(guid)?,
        ))
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.block_type, self.guid)
    }
}

impl FromStr for DefinitionKey {
    type Err = KeyError;

    fn from_str(s: &str) -> KeyResult<Self> {
        Self::parse(s)
    }
}
