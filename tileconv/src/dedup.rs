//! Tile deduplication
//!
//! Every block of the image is reduced to a canonical tile plus the transform
//! and palette offset that reproduce it. Canonical tiles are stored in
//! first-seen order, which is also the index space written to the tilemap.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, Result};
use crate::palette::ROW_SIZE;
use crate::tile::{TileBlock, TilePixels, Transform};

/// Which equivalences the deduplicator may use to merge blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupOptions {
    /// Merge identical blocks at all
    pub enabled: bool,
    /// Also merge horizontal/vertical mirrors
    pub flips: bool,
    /// Also merge blocks that only differ by a constant palette index offset.
    /// Only blocks whose index span fits in one palette row are shifted.
    pub palettes: bool,
}

/// A unique tile in the tile set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalTile {
    pub index: usize,
    #[serde(serialize_with = "pixels_serde::serialize")]
    pub pixels: TilePixels,
}

/// How one block refers back to the tile set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupCell {
    pub row: usize,
    pub col: usize,
    /// Index of the canonical tile
    pub tile: usize,
    /// Transform applied to the canonical tile to get the block
    pub transform: Transform,
    /// Value added to every canonical pixel to get the block's palette indices
    pub offset: u8,
}

/// Ordered set of canonical tiles with hashed lookup.
///
/// Hash buckets only narrow the search; a match always requires the full
/// pixel content to be equal.
#[derive(Debug, Clone, Default)]
pub struct TileSet {
    tiles: Vec<CanonicalTile>,
    buckets: HashMap<u64, Vec<usize>>,
}

impl TileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CanonicalTile> {
        self.tiles.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CanonicalTile> {
        self.tiles.iter()
    }

    /// Index of the tile with exactly these pixels
    pub fn find(&self, pixels: &TilePixels) -> Option<usize> {
        self.find_hashed(content_hash(pixels), pixels)
    }

    /// Append without looking for an existing copy
    pub fn push(&mut self, pixels: TilePixels) -> usize {
        self.push_hashed(content_hash(&pixels), pixels)
    }

    fn find_hashed(&self, hash: u64, pixels: &TilePixels) -> Option<usize> {
        self.buckets
            .get(&hash)?
            .iter()
            .copied()
            .find(|&i| self.tiles[i].pixels == *pixels)
    }

    fn push_hashed(&mut self, hash: u64, pixels: TilePixels) -> usize {
        let index = self.tiles.len();
        self.tiles.push(CanonicalTile { index, pixels });
        self.buckets.entry(hash).or_default().push(index);
        index
    }
}

impl Serialize for TileSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.tiles.iter())
    }
}

impl<'a> IntoIterator for &'a TileSet {
    type Item = &'a CanonicalTile;
    type IntoIter = std::slice::Iter<'a, CanonicalTile>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiles.iter()
    }
}

fn content_hash(pixels: &TilePixels) -> u64 {
    let mut hasher = DefaultHasher::new();
    pixels.hash(&mut hasher);
    hasher.finish()
}

/// Builds a tile set from a stream of blocks
#[derive(Debug)]
pub struct TileDeduplicator {
    options: DedupOptions,
    palette_len: usize,
    tiles: TileSet,
    cells: Vec<DedupCell>,
}

impl TileDeduplicator {
    /// `palette_len` is the number of colors pixel indices may refer to
    pub fn new(options: DedupOptions, palette_len: usize) -> Self {
        TileDeduplicator {
            options,
            palette_len,
            tiles: TileSet::new(),
            cells: Vec::new(),
        }
    }

    /// Continue from an existing tile set
    pub fn with_tiles(options: DedupOptions, palette_len: usize, tiles: TileSet) -> Self {
        TileDeduplicator {
            tiles,
            ..TileDeduplicator::new(options, palette_len)
        }
    }

    pub fn tiles(&self) -> &TileSet {
        &self.tiles
    }

    pub fn cells(&self) -> &[DedupCell] {
        &self.cells
    }

    pub fn insert(&mut self, block: &TileBlock<'_>) -> Result<DedupCell> {
        self.insert_pixels(block.row(), block.col(), &block.pixels())
    }

    /// Record the block at grid (row, col)
    pub fn insert_pixels(&mut self, row: usize, col: usize, pixels: &TilePixels) -> Result<DedupCell> {
        if let Some(&index) = pixels
            .iter()
            .find(|&&p| usize::from(p) >= self.palette_len)
        {
            return Err(ConversionError::PaletteOverflow {
                row,
                col,
                index,
                capacity: self.palette_len,
            });
        }

        let cell = if self.options.enabled {
            self.match_or_insert(row, col, pixels)
        } else {
            DedupCell {
                row,
                col,
                tile: self.tiles.push(*pixels),
                transform: Transform::Identity,
                offset: 0,
            }
        };
        self.cells.push(cell);
        Ok(cell)
    }

    fn match_or_insert(&mut self, row: usize, col: usize, pixels: &TilePixels) -> DedupCell {
        let normalized = if self.options.palettes {
            normalize(pixels)
        } else {
            None
        };
        let (content, offset) = normalized.unwrap_or((*pixels, 0));

        let candidates = if self.options.flips {
            &Transform::PRIORITY[..]
        } else {
            &Transform::PRIORITY[..1]
        };
        for &transform in candidates {
            if let Some(tile) = self.tiles.find(&transform.apply(&content)) {
                return DedupCell {
                    row,
                    col,
                    tile,
                    transform,
                    offset,
                };
            }
        }

        DedupCell {
            row,
            col,
            tile: self.tiles.push(content),
            transform: Transform::Identity,
            offset,
        }
    }

    pub fn finish(self) -> (TileSet, Vec<DedupCell>) {
        (self.tiles, self.cells)
    }
}

/// Subtract the smallest index from every pixel, or `None` when the block
/// spans more indices than a palette row holds
fn normalize(pixels: &TilePixels) -> Option<(TilePixels, u8)> {
    let min = pixels.iter().copied().min()?;
    let max = pixels.iter().copied().max()?;
    if usize::from(max - min) >= ROW_SIZE {
        return None;
    }
    Some((pixels.map(|p| p - min), min))
}

mod pixels_serde {
    use serde::Serializer;

    use crate::tile::TilePixels;

    pub fn serialize<S: Serializer>(pixels: &TilePixels, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(pixels.iter())
    }
}
