//! Errors that can occur during a conversion

use std::io;

use thiserror::Error;

/// Errors that can occur during image conversion
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Unsupported image: {0}")]
    ImageFormat(String),

    #[error("Image dimensions {width}x{height} are not multiples of tile size {tile}x{tile}")]
    Dimension { width: usize, height: usize, tile: usize },

    #[error(
        "Tile at row {row}, column {col} uses color index {index} but the palette has {capacity} entries"
    )]
    PaletteOverflow {
        row: usize,
        col: usize,
        index: u8,
        capacity: usize,
    },

    #[error("Palette row overflow: {0}")]
    PaletteRowOverflow(#[from] RowOverflow),

    #[error("Tile index {index} does not fit in a map entry (limit {limit})")]
    TileIndexOverflow { index: usize, limit: usize },

    #[error("Tilemap has {actual} cells, expected {expected}")]
    MapSize { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Output format {0} is not supported by the binary writer")]
    UnsupportedFormat(&'static str),

    #[error("{what} {value} exceeds the container limit of {limit}")]
    SizeLimit {
        what: &'static str,
        value: usize,
        limit: usize,
    },

    #[error("Malformed container at byte {offset}: {reason}")]
    Container { offset: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to decode PNG: {0}")]
    Png(#[from] png::DecodingError),

    #[error("Failed to write image: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Ways a set of tiles can fail to fit into hardware palette rows
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowOverflow {
    #[error("tile {tile} needs {colors} colors but a palette row holds {capacity}")]
    TooManyColors {
        tile: usize,
        colors: usize,
        capacity: usize,
    },

    #[error("{required} palette rows required but only {budget} are available")]
    TooManyRows { required: usize, budget: usize },
}

pub type Result<T> = std::result::Result<T, ConversionError>;
