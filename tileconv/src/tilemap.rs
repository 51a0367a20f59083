//! Tilemap assembly
//!
//! Map cells follow the scan order of the tile extractor. Each one carries the
//! tile index and a CGB background attribute byte:
//!
//! ```text
//! bit 7    6       5       4    3     2..0
//!     prio flip-V  flip-H  -    bank  palette
//! ```
//!
//! Priority is never set by the converter.

use serde::{Deserialize, Serialize};

use crate::dedup::DedupCell;
use crate::error::{ConversionError, Result, RowOverflow};
use crate::palette::CGB_ROWS;
use crate::tile::Transform;

/// Bits 0-2: palette row
const PALETTE_MASK: u8 = 0b0000_0111;
/// Bit 3: VRAM bank
const BANK_BIT: u8 = 1 << 3;
/// Bit 5: horizontal flip
const FLIP_H_BIT: u8 = 1 << 5;
/// Bit 6: vertical flip
const FLIP_V_BIT: u8 = 1 << 6;
/// Highest tile index a map entry can hold
pub const MAX_TILE_INDEX: usize = u8::MAX as usize;

/// Per-cell attribute bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub flip_h: bool,
    pub flip_v: bool,
    pub palette: u8,
    pub bank: u8,
}

impl Attributes {
    pub fn transform(self) -> Transform {
        Transform::from_flags(self.flip_h, self.flip_v)
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = self.palette & PALETTE_MASK;
        if self.bank != 0 {
            byte |= BANK_BIT;
        }
        if self.flip_h {
            byte |= FLIP_H_BIT;
        }
        if self.flip_v {
            byte |= FLIP_V_BIT;
        }
        byte
    }

    pub fn from_byte(byte: u8) -> Self {
        Attributes {
            flip_h: byte & FLIP_H_BIT != 0,
            flip_v: byte & FLIP_V_BIT != 0,
            palette: byte & PALETTE_MASK,
            bank: u8::from(byte & BANK_BIT != 0),
        }
    }
}

/// One position of the tilemap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MapCell {
    pub row: usize,
    pub col: usize,
    /// Index into the tile set, before the base tile index is added
    pub tile: usize,
    /// Palette offset the cell was deduplicated with
    pub offset: u8,
    pub attributes: Attributes,
}

impl MapCell {
    pub fn transform(&self) -> Transform {
        self.attributes.transform()
    }
}

/// Row-major grid of map cells
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TileMap {
    width: usize,
    height: usize,
    base_tile_index: u8,
    cells: Vec<MapCell>,
}

impl TileMap {
    /// Width in tiles
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in tiles
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn base_tile_index(&self) -> u8 {
        self.base_tile_index
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[MapCell] {
        &self.cells
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&MapCell> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.cells.get(row * self.width + col)
    }

    /// The two bytes written for a cell: tile index, attributes.
    ///
    /// Fails when the tile index plus the base index does not fit in a byte.
    pub fn entry(&self, cell: &MapCell) -> Result<[u8; 2]> {
        let index = cell.tile + usize::from(self.base_tile_index);
        let index = u8::try_from(index).map_err(|_| ConversionError::TileIndexOverflow {
            index,
            limit: MAX_TILE_INDEX,
        })?;
        Ok([index, cell.attributes.to_byte()])
    }
}

/// Turns deduplicated cells into a tilemap
#[derive(Debug, Clone, Copy)]
pub struct MapBuilder {
    width: usize,
    height: usize,
    base_tile_index: u8,
    palette_number: u8,
    bank: u8,
}

impl MapBuilder {
    /// Grid size in tiles; the other values come from configuration
    pub fn new(width: usize, height: usize, base_tile_index: u8, palette_number: u8, bank: u8) -> Self {
        MapBuilder {
            width,
            height,
            base_tile_index,
            palette_number,
            bank,
        }
    }

    /// `cell_rows` holds the palette row of each cell, parallel to `cells`
    pub fn build(&self, cells: &[DedupCell], cell_rows: &[usize]) -> Result<TileMap> {
        let expected = self.width * self.height;
        if cells.len() != expected || cell_rows.len() != expected {
            return Err(ConversionError::MapSize {
                expected,
                actual: cells.len().min(cell_rows.len()),
            });
        }

        let map_cells = cells
            .iter()
            .zip(cell_rows)
            .map(|(cell, &row)| self.cell(cell, row))
            .collect::<Result<Vec<_>>>()?;

        Ok(TileMap {
            width: self.width,
            height: self.height,
            base_tile_index: self.base_tile_index,
            cells: map_cells,
        })
    }

    fn cell(&self, cell: &DedupCell, row: usize) -> Result<MapCell> {
        let palette = usize::from(self.palette_number) + row;
        if palette >= CGB_ROWS {
            return Err(RowOverflow::TooManyRows {
                required: palette + 1,
                budget: CGB_ROWS,
            }
            .into());
        }

        Ok(MapCell {
            row: cell.row,
            col: cell.col,
            tile: cell.tile,
            offset: cell.offset,
            attributes: Attributes {
                flip_h: cell.transform.flip_h(),
                flip_v: cell.transform.flip_v(),
                palette: palette as u8,
                bank: self.bank,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(col: usize, tile: usize, transform: Transform) -> DedupCell {
        DedupCell {
            row: 0,
            col,
            tile,
            transform,
            offset: 0,
        }
    }

    #[test]
    fn attribute_byte_layout() {
        let attributes = Attributes {
            flip_h: true,
            flip_v: false,
            palette: 5,
            bank: 1,
        };
        assert_eq!(attributes.to_byte(), 0b0010_1101);
        assert_eq!(Attributes::from_byte(0b0010_1101), attributes);
        assert_eq!(
            Attributes {
                flip_v: true,
                ..Default::default()
            }
            .to_byte(),
            0b0100_0000
        );
    }

    #[test]
    fn builds_cells_in_scan_order() {
        let cells = [cell(0, 0, Transform::Identity), cell(1, 0, Transform::FlipV)];
        let map = MapBuilder::new(2, 1, 0, 2, 1).build(&cells, &[0, 1]).unwrap();

        assert_eq!(map.len(), 2);
        let second = map.get(0, 1).unwrap();
        assert_eq!(second.tile, 0);
        assert!(second.attributes.flip_v);
        assert!(!second.attributes.flip_h);
        assert_eq!(second.attributes.palette, 3);
        assert_eq!(second.attributes.bank, 1);
        assert_eq!(map.entry(second).unwrap(), [0, 0b0100_1011]);
        assert!(map.get(1, 0).is_none());
    }

    #[test]
    fn base_index_is_added_to_entries() {
        let cells = [cell(0, 3, Transform::Identity)];
        let map = MapBuilder::new(1, 1, 16, 0, 0).build(&cells, &[0]).unwrap();
        assert_eq!(map.entry(&map.cells()[0]).unwrap()[0], 19);
    }

    #[test]
    fn tile_index_overflow_fails_on_entry() {
        let cells = [cell(0, 10, Transform::Identity)];
        // Large indices are fine until a map entry is written
        let map = MapBuilder::new(1, 1, 250, 0, 0).build(&cells, &[0]).unwrap();
        let err = map.entry(&map.cells()[0]).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::TileIndexOverflow { index: 260, .. }
        ));
    }

    #[test]
    fn palette_number_past_last_row() {
        let cells = [cell(0, 0, Transform::Identity)];
        assert!(MapBuilder::new(1, 1, 0, 7, 0).build(&cells, &[1]).is_err());
    }

    #[test]
    fn cell_count_must_match_grid() {
        let cells = [cell(0, 0, Transform::Identity)];
        assert!(matches!(
            MapBuilder::new(2, 1, 0, 0, 0).build(&cells, &[0]),
            Err(ConversionError::MapSize {
                expected: 2,
                actual: 1
            })
        ));
    }
}
