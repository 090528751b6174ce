//! Block file naming.
//!
//! Block files carry their block number in the file name as a fixed-width,
//! zero-padded decimal string, so comparing two names as strings gives the
//! same answer as comparing the numbers. Remote object keys use the same
//! encoding. Producers write through a temporary file and rename it into
//! place; temporary names are recognised by a marker substring and never
//! treated as blocks.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShipperError};

/// Digits used for block names: 32-byte block numbers rendered in decimal.
pub const DEFAULT_BLOCK_NAME_WIDTH: usize = 64;

/// `u64::MAX` has 20 decimal digits, so narrower names could not hold every
/// block number.
pub const MIN_BLOCK_NAME_WIDTH: usize = 20;

/// Upper bound on the configurable width.
pub const MAX_BLOCK_NAME_WIDTH: usize = 256;

/// Name the producer uses for the block it is still writing.
pub const DEFAULT_TEMP_MARKER: &str = "tmp-tx-log.bin";

/// Number of a block, as encoded in its file name.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// The first block of a chain.
    pub const ZERO: BlockNumber = BlockNumber(0);

    pub fn get(self) -> u64 {
        self.0
    }

    /// The block after this one, or `None` at the end of the `u64` range.
    pub fn next(self) -> Option<BlockNumber> {
        self.0.checked_add(1).map(BlockNumber)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlockNumber {
    fn from(value: u64) -> Self {
        BlockNumber(value)
    }
}

/// What a directory entry turned out to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathClass {
    /// A block file with the given number.
    Block(BlockNumber),
    /// A producer's in-progress file.
    Temporary,
    /// Anything else living in the directory.
    Foreign,
}

/// Encoding rules for block file names and object keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockNaming {
    width: usize,
    temp_markers: Vec<String>,
}

impl Default for BlockNaming {
    fn default() -> Self {
        Self {
            width: DEFAULT_BLOCK_NAME_WIDTH,
            temp_markers: vec![DEFAULT_TEMP_MARKER.to_string()],
        }
    }
}

impl BlockNaming {
    /// Build naming rules, rejecting widths that cannot represent every
    /// block number. Empty markers are dropped.
    pub fn new(width: usize, temp_markers: Vec<String>) -> Result<Self> {
        if !(MIN_BLOCK_NAME_WIDTH..=MAX_BLOCK_NAME_WIDTH).contains(&width) {
            return Err(ShipperError::InvalidConfig(format!(
                "block name width {width} outside {MIN_BLOCK_NAME_WIDTH}..={MAX_BLOCK_NAME_WIDTH}"
            )));
        }

        let temp_markers = temp_markers
            .into_iter()
            .map(|marker| marker.trim().to_string())
            .filter(|marker| !marker.is_empty())
            .collect();

        Ok(Self {
            width,
            temp_markers,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn temp_markers(&self) -> &[String] {
        &self.temp_markers
    }

    /// Render a block number as a file name / object key.
    pub fn encode(&self, number: BlockNumber) -> String {
        format!("{:0width$}", number.0, width = self.width)
    }

    /// Parse a file name or object key. Only names of exactly `width`
    /// ASCII digits whose value fits in `u64` are block names.
    pub fn parse(&self, name: &str) -> Option<BlockNumber> {
        if name.len() != self.width || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let significant = name.trim_start_matches('0');
        if significant.is_empty() {
            return Some(BlockNumber::ZERO);
        }

        significant.parse::<u64>().ok().map(BlockNumber)
    }

    /// True when the file name contains one of the temporary markers.
    pub fn is_temporary(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy();
        self.temp_markers
            .iter()
            .any(|marker| name.contains(marker.as_str()))
    }

    pub fn classify(&self, path: &Path) -> PathClass {
        if self.is_temporary(path) {
            return PathClass::Temporary;
        }

        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| self.parse(name))
            .map_or(PathClass::Foreign, PathClass::Block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn encodes_fixed_width_names() {
        let naming = BlockNaming::default();
        let name = naming.encode(BlockNumber(42));
        assert_eq!(name.len(), DEFAULT_BLOCK_NAME_WIDTH);
        assert!(name.ends_with("42"));
        assert!(name.trim_end_matches("42").bytes().all(|b| b == b'0'));
        assert_eq!(naming.parse(&name), Some(BlockNumber(42)));
    }

    #[test]
    fn string_order_matches_numeric_order() {
        let naming = BlockNaming::default();
        let numbers = [0u64, 1, 9, 10, 99, 100, 12_345, u64::MAX];
        for pair in numbers.windows(2) {
            let lower = naming.encode(BlockNumber(pair[0]));
            let upper = naming.encode(BlockNumber(pair[1]));
            assert!(lower < upper, "{lower} !< {upper}");
        }
    }

    #[test]
    fn rejects_malformed_names() {
        let naming = BlockNaming::new(20, Vec::new()).unwrap();
        assert_eq!(naming.parse("1"), None);
        assert_eq!(naming.parse("0000000000000000000x"), None);
        assert_eq!(naming.parse("-0000000000000000001"), None);
        // One past u64::MAX.
        assert_eq!(naming.parse("18446744073709551616"), None);
        assert_eq!(
            naming.parse("18446744073709551615"),
            Some(BlockNumber(u64::MAX))
        );
        assert_eq!(naming.parse("00000000000000000000"), Some(BlockNumber::ZERO));
    }

    #[test]
    fn wide_names_with_leading_zeros_parse() {
        let naming = BlockNaming::default();
        let name = format!("{}7", "0".repeat(DEFAULT_BLOCK_NAME_WIDTH - 1));
        assert_eq!(naming.parse(&name), Some(BlockNumber(7)));

        let overflow = format!("1{}", "0".repeat(DEFAULT_BLOCK_NAME_WIDTH - 1));
        assert_eq!(naming.parse(&overflow), None);
    }

    #[test]
    fn rejects_widths_that_cannot_hold_u64() {
        assert!(BlockNaming::new(19, Vec::new()).is_err());
        assert!(BlockNaming::new(MAX_BLOCK_NAME_WIDTH + 1, Vec::new()).is_err());
        assert!(BlockNaming::new(MIN_BLOCK_NAME_WIDTH, Vec::new()).is_ok());
    }

    #[test]
    fn classifies_paths() {
        let naming = BlockNaming::default();
        let dir = PathBuf::from("/var/lib/txlogs");

        assert_eq!(
            naming.classify(&dir.join(naming.encode(BlockNumber(3)))),
            PathClass::Block(BlockNumber(3))
        );
        assert_eq!(
            naming.classify(&dir.join(DEFAULT_TEMP_MARKER)),
            PathClass::Temporary
        );
        assert_eq!(
            naming.classify(&dir.join(format!("{DEFAULT_TEMP_MARKER}.swp"))),
            PathClass::Temporary
        );
        assert_eq!(naming.classify(&dir.join("README")), PathClass::Foreign);
    }

    #[test]
    fn blank_markers_are_ignored() {
        let naming = BlockNaming::new(20, vec!["".into(), "  ".into()]).unwrap();
        assert!(naming.temp_markers().is_empty());
        assert!(!naming.is_temporary(Path::new("/tmp/00000000000000000001")));
    }
}
