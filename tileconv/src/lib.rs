//! Indexed PNG to Game Boy tile data converter
//!
//! Pipeline: [`source`] loads an indexed image, [`tile`] slices it into 8x8
//! blocks, [`dedup`] merges equivalent blocks, [`palette`] groups colors into
//! hardware palette rows, [`tilemap`] builds the map and [`container`] writes
//! the binary result. [`convert::ImageConverter`] runs the whole thing.

pub mod color;
pub mod container;
pub mod convert;
pub mod dedup;
pub mod error;
pub mod palette;
pub mod source;
pub mod tile;
pub mod tilemap;

pub use container::{Container, ContainerFormat, FormatWriter};
pub use convert::{Config, Conversion, ImageConverter, OutputFormat};
pub use error::{ConversionError, Result, RowOverflow};
pub use source::{load_png, SourceImage, SourcePalette};
