//! Tile blocks and the transforms used to match them
//!
//! A tile is an 8x8 block of palette indices stored row-major. Blocks are
//! borrowed windows into the source image; only the deduplicator copies them.

use itertools::iproduct;
use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, Result};
use crate::source::SourceImage;

/// Width and height of a tile in pixels
pub const TILE_SIZE: usize = 8;
/// Number of pixels in a tile
pub const TILE_PIXELS: usize = TILE_SIZE * TILE_SIZE;

/// Row-major pixels of one tile
pub type TilePixels = [u8; TILE_PIXELS];

/// Mirror operations a map cell can apply to a stored tile
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transform {
    #[default]
    Identity,
    FlipH,
    FlipV,
    FlipHV,
}

impl Transform {
    /// Match order when several transforms reproduce a block
    pub const PRIORITY: [Transform; 4] = [
        Transform::Identity,
        Transform::FlipH,
        Transform::FlipV,
        Transform::FlipHV,
    ];

    pub fn from_flags(flip_h: bool, flip_v: bool) -> Self {
        match (flip_h, flip_v) {
            (false, false) => Transform::Identity,
            (true, false) => Transform::FlipH,
            (false, true) => Transform::FlipV,
            (true, true) => Transform::FlipHV,
        }
    }

    pub fn flip_h(self) -> bool {
        matches!(self, Transform::FlipH | Transform::FlipHV)
    }

    pub fn flip_v(self) -> bool {
        matches!(self, Transform::FlipV | Transform::FlipHV)
    }

    /// Mirror `pixels`. Every transform is its own inverse.
    pub fn apply(self, pixels: &TilePixels) -> TilePixels {
        if self == Transform::Identity {
            return *pixels;
        }
        let mut out = [0u8; TILE_PIXELS];
        for (y, x) in iproduct!(0..TILE_SIZE, 0..TILE_SIZE) {
            let sx = if self.flip_h() { TILE_SIZE - 1 - x } else { x };
            let sy = if self.flip_v() { TILE_SIZE - 1 - y } else { y };
            out[y * TILE_SIZE + x] = pixels[sy * TILE_SIZE + sx];
        }
        out
    }
}

/// An 8x8 window into a source image
#[derive(Copy, Clone, Debug)]
pub struct TileBlock<'a> {
    image: &'a SourceImage,
    row: usize,
    col: usize,
}

impl<'a> TileBlock<'a> {
    /// Grid row of this block
    pub fn row(&self) -> usize {
        self.row
    }

    /// Grid column of this block
    pub fn col(&self) -> usize {
        self.col
    }

    /// Palette index at (x, y) inside the block
    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.image
            .pixel(self.col * TILE_SIZE + x, self.row * TILE_SIZE + y)
    }

    /// One pixel row of the block
    pub fn line(&self, y: usize) -> &'a [u8] {
        let width = self.image.width();
        let start = (self.row * TILE_SIZE + y) * width + self.col * TILE_SIZE;
        &self.image.pixels()[start..start + TILE_SIZE]
    }

    /// Copy the block out of the image
    pub fn pixels(&self) -> TilePixels {
        let mut out = [0u8; TILE_PIXELS];
        for (y, dst) in out.chunks_exact_mut(TILE_SIZE).enumerate() {
            dst.copy_from_slice(self.line(y));
        }
        out
    }
}

/// Splits a source image into tile blocks in row-major grid order
#[derive(Copy, Clone, Debug)]
pub struct TileExtractor<'a> {
    image: &'a SourceImage,
    cols: usize,
    rows: usize,
}

impl<'a> TileExtractor<'a> {
    /// Fails unless both image dimensions are non-zero multiples of the tile size
    pub fn new(image: &'a SourceImage) -> Result<Self> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 || width % TILE_SIZE != 0 || height % TILE_SIZE != 0 {
            return Err(ConversionError::Dimension {
                width,
                height,
                tile: TILE_SIZE,
            });
        }
        Ok(TileExtractor {
            image,
            cols: width / TILE_SIZE,
            rows: height / TILE_SIZE,
        })
    }

    /// Width of the block grid
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Height of the block grid
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every block, row by row. Each call starts a fresh pass.
    pub fn blocks(&self) -> impl Iterator<Item = TileBlock<'a>> + 'a {
        let image = self.image;
        iproduct!(0..self.rows, 0..self.cols).map(move |(row, col)| TileBlock { image, row, col })
    }
}
