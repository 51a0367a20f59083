//! Palette row assignment
//!
//! Hardware tiles store 2-bit pixels, so each tile can only show the four
//! colors of one palette row. This module groups source palette entries into
//! rows and rewrites tile pixels as positions within their row.

use itertools::Itertools;
use serde::Serialize;
use tracing::debug;

use crate::color::Rgb;
use crate::dedup::{CanonicalTile, DedupCell, TileSet};
use crate::error::{Result, RowOverflow};
use crate::source::SourcePalette;
use crate::tile::TilePixels;

/// Colors per hardware palette row
pub const ROW_SIZE: usize = 4;
/// Background palette rows on the Game Boy Color
pub const CGB_ROWS: usize = 8;
/// Background palette rows on the original Game Boy
pub const DMG_ROWS: usize = 1;

/// A hardware palette row, as indices into the source palette
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaletteRow {
    entries: Vec<u8>,
}

impl PaletteRow {
    pub fn new(entries: Vec<u8>) -> Self {
        PaletteRow { entries }
    }

    /// Source palette indices, in row order
    pub fn entries(&self) -> &[u8] {
        &self.entries
    }

    /// Position of a source index within the row
    pub fn position(&self, index: u8) -> Option<u8> {
        self.entries
            .iter()
            .position(|&e| e == index)
            .map(|p| p as u8)
    }

    pub fn contains_all(&self, colors: &[u8]) -> bool {
        colors.iter().all(|&c| self.entries.contains(&c))
    }

    /// True when every shape value `v` lands on source index `offset + v`
    fn places(&self, values: &[u8], offset: u8) -> bool {
        values.iter().all(|&v| {
            self.entries.get(usize::from(v)).map(|&e| usize::from(e))
                == Some(usize::from(offset) + usize::from(v))
        })
    }

    /// Resolve the row against the palette, padding to `len` with black
    pub fn colors(&self, palette: &SourcePalette, len: usize) -> Vec<Rgb> {
        (0..len)
            .map(|i| {
                self.entries
                    .get(i)
                    .and_then(|&e| palette.get(e))
                    .unwrap_or(Rgb::BLACK)
            })
            .collect()
    }
}

/// How rows were chosen for a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowPolicy {
    /// The whole palette fits in one row
    SingleRow,
    /// Each canonical tile gets a row covering its colors
    PerTile,
    /// Tile pixels are normalized shapes; each cell picks the row its offset needs
    SharedShapes,
}

/// Result of palette assignment
#[derive(Debug, Clone, Serialize)]
pub struct PaletteAssignment {
    pub policy: RowPolicy,
    pub rows: Vec<PaletteRow>,
    /// Row used by each cell, in scan order
    pub cell_rows: Vec<usize>,
    /// Canonical tiles rewritten as positions within their row
    #[serde(skip)]
    pub tile_pixels: Vec<TilePixels>,
}

/// Row choice for one tile under [`RowPolicy::SharedShapes`]
enum TileRow {
    /// Normalized values, placed per cell
    Shape(Vec<u8>),
    /// Same row for every cell
    Fixed(usize),
}

/// Allocates palette rows for a tile set
#[derive(Debug)]
pub struct PaletteAssigner {
    palette_len: usize,
    row_size: usize,
    budget: usize,
    rows: Vec<PaletteRow>,
}

impl PaletteAssigner {
    /// `budget` is the number of rows the target still has free
    pub fn new(palette_len: usize, budget: usize) -> Self {
        PaletteAssigner {
            palette_len,
            row_size: ROW_SIZE,
            budget,
            rows: Vec::new(),
        }
    }

    pub fn policy(&self, shared_shapes: bool) -> RowPolicy {
        if shared_shapes {
            RowPolicy::SharedShapes
        } else if self.palette_len <= self.row_size {
            RowPolicy::SingleRow
        } else {
            RowPolicy::PerTile
        }
    }

    /// Assign rows to every tile and cell.
    ///
    /// `shared_shapes` must be set when the tiles were deduplicated with
    /// palette offsets, since their pixels are then relative to each cell's
    /// offset.
    pub fn assign(
        mut self,
        tiles: &TileSet,
        cells: &[DedupCell],
        shared_shapes: bool,
    ) -> Result<PaletteAssignment> {
        let policy = self.policy(shared_shapes);
        let (tile_pixels, cell_rows) = match policy {
            RowPolicy::SingleRow => self.single_row(tiles, cells)?,
            RowPolicy::PerTile => self.per_tile(tiles, cells)?,
            RowPolicy::SharedShapes => self.shared_shapes(tiles, cells)?,
        };
        debug!(?policy, rows = self.rows.len(), "assigned palette rows");

        Ok(PaletteAssignment {
            policy,
            rows: self.rows,
            cell_rows,
            tile_pixels,
        })
    }

    fn single_row(
        &mut self,
        tiles: &TileSet,
        cells: &[DedupCell],
    ) -> Result<(Vec<TilePixels>, Vec<usize>)> {
        self.register(PaletteRow::new((0..self.palette_len as u8).collect()))?;
        let tile_pixels = tiles.iter().map(|t| t.pixels).collect();
        Ok((tile_pixels, vec![0; cells.len()]))
    }

    fn per_tile(
        &mut self,
        tiles: &TileSet,
        cells: &[DedupCell],
    ) -> Result<(Vec<TilePixels>, Vec<usize>)> {
        let mut tile_rows = Vec::with_capacity(tiles.len());
        let mut tile_pixels = Vec::with_capacity(tiles.len());
        for tile in tiles {
            let (row, pixels) = self.covering_row(tile)?;
            tile_rows.push(row);
            tile_pixels.push(pixels);
        }

        let cell_rows = cells.iter().map(|c| tile_rows[c.tile]).collect();
        Ok((tile_pixels, cell_rows))
    }

    /// Tiles with every value below the row size are shapes placed at each
    /// cell's offset. Wider tiles were never shifted and get a covering row
    /// like in [`RowPolicy::PerTile`].
    fn shared_shapes(
        &mut self,
        tiles: &TileSet,
        cells: &[DedupCell],
    ) -> Result<(Vec<TilePixels>, Vec<usize>)> {
        let mut tile_rows = Vec::with_capacity(tiles.len());
        let mut tile_pixels = Vec::with_capacity(tiles.len());
        for tile in tiles {
            let values = distinct(&tile.pixels);
            if values.last().is_some_and(|&v| usize::from(v) < self.row_size) {
                tile_rows.push(TileRow::Shape(values));
                tile_pixels.push(tile.pixels);
            } else {
                let (row, pixels) = self.covering_row(tile)?;
                tile_rows.push(TileRow::Fixed(row));
                tile_pixels.push(pixels);
            }
        }

        let mut cell_rows = Vec::with_capacity(cells.len());
        for cell in cells {
            let row = match &tile_rows[cell.tile] {
                TileRow::Fixed(row) => *row,
                TileRow::Shape(values) => match self
                    .rows
                    .iter()
                    .position(|r| r.places(values, cell.offset))
                {
                    Some(row) => row,
                    None => {
                        let new_row = self.window(usize::from(cell.offset));
                        self.register(new_row)?
                    }
                },
            };
            cell_rows.push(row);
        }

        Ok((tile_pixels, cell_rows))
    }

    /// First registered row holding all of the tile's colors, or a new one.
    /// Returns the row and the tile rewritten as positions within it.
    fn covering_row(&mut self, tile: &CanonicalTile) -> Result<(usize, TilePixels)> {
        let colors = distinct(&tile.pixels);
        if colors.len() > self.row_size {
            return Err(RowOverflow::TooManyColors {
                tile: tile.index,
                colors: colors.len(),
                capacity: self.row_size,
            }
            .into());
        }

        let row = match self.rows.iter().position(|r| r.contains_all(&colors)) {
            Some(row) => row,
            None => {
                let new_row = self.row_for_colors(&colors);
                self.register(new_row)?
            }
        };
        let entries = &self.rows[row];
        let pixels = tile
            .pixels
            .map(|p| entries.position(p).unwrap_or_default());
        Ok((row, pixels))
    }

    /// Smallest row for a new set of colors: a palette window when they are
    /// close enough together, otherwise exactly those colors
    fn row_for_colors(&self, colors: &[u8]) -> PaletteRow {
        match (colors.first(), colors.last()) {
            (Some(&lo), Some(&hi)) if usize::from(hi - lo) < self.row_size => {
                let start = usize::from(lo).min(self.palette_len.saturating_sub(self.row_size));
                self.window(start)
            }
            _ => PaletteRow::new(colors.to_vec()),
        }
    }

    /// Up to `row_size` consecutive palette entries starting at `start`
    fn window(&self, start: usize) -> PaletteRow {
        let end = (start + self.row_size).min(self.palette_len);
        PaletteRow::new((start..end).map(|i| i as u8).collect())
    }

    fn register(&mut self, row: PaletteRow) -> Result<usize> {
        if self.rows.len() >= self.budget {
            return Err(RowOverflow::TooManyRows {
                required: self.rows.len() + 1,
                budget: self.budget,
            }
            .into());
        }
        self.rows.push(row);
        Ok(self.rows.len() - 1)
    }
}

/// Sorted distinct values of a tile
fn distinct(pixels: &TilePixels) -> Vec<u8> {
    pixels.iter().copied().sorted_unstable().dedup().collect()
}
