//! Catalog types shared across Grimoire

use serde::{Deserialize, Serialize};

use crate::error::GrimoireError;

/// Which import routine a sync type feeds its records into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// One record per oracle identity (rules text, name, colors)
    OracleCard,
    /// One record per physical printing of a card
    CardPrinting,
    /// One rules ruling attached to an oracle identity
    Ruling,
}

/// Logical bulk export published by the card catalog
///
/// The string form is both the database value and the catalog's bulk-data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    OracleCards,
    UniqueArtwork,
    DefaultCards,
    AllCards,
    Rulings,
}

impl SyncType {
    /// Every sync type, in the order they are usually scheduled
    pub const ALL: [SyncType; 5] = [
        SyncType::OracleCards,
        SyncType::UniqueArtwork,
        SyncType::DefaultCards,
        SyncType::AllCards,
        SyncType::Rulings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::OracleCards => "oracle_cards",
            SyncType::UniqueArtwork => "unique_artwork",
            SyncType::DefaultCards => "default_cards",
            SyncType::AllCards => "all_cards",
            SyncType::Rulings => "rulings",
        }
    }

    /// Import routine records of this type are mapped through
    pub fn record_kind(&self) -> RecordKind {
        match self {
            SyncType::OracleCards => RecordKind::OracleCard,
            SyncType::UniqueArtwork | SyncType::DefaultCards | SyncType::AllCards => {
                RecordKind::CardPrinting
            },
            SyncType::Rulings => RecordKind::Ruling,
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncType {
    type Err = GrimoireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        SyncType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| GrimoireError::UnknownSyncType(s.to_string()))
    }
}
