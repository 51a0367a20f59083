//! Binary container formats
//!
//! Both containers share a 16-byte header and a palette section:
//!
//! ```text
//! 0   magic "PNGB"
//! 4   version
//! 5   format (0 raw, 1 tile set + map)
//! 6   flags (bit 0 grayscale, bit 1 CGB 15-bit colors)
//! 7   colors per palette row
//! 8   width in tiles       (u16)
//! 10  height in tiles      (u16)
//! 12  source color count   (u16)
//! 14  palette row count
//! 15  reserved
//! ```
//!
//! Palette entries are little-endian BGR555 words in CGB mode and RGB
//! triples otherwise. The tile section is a u16 tile count followed by 16
//! bytes of 2bpp planar data per tile. Raw containers hold one tile per grid
//! cell and stop there; tile set containers hold unique tiles and then a map
//! section: base tile index, palette number and two bytes per cell.
//!
//! All multi-byte values are little-endian.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::color::Rgb;
use crate::convert::Conversion;
use crate::error::{ConversionError, Result};
use crate::palette::ROW_SIZE;
use crate::tile::{TilePixels, Transform, TILE_PIXELS, TILE_SIZE};
use crate::tilemap::Attributes;

pub const MAGIC: [u8; 4] = *b"PNGB";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 16;
/// Bytes per tile in 2bpp planar format
pub const TILE_BYTES: usize = 16;

const FLAG_GRAYSCALE: u8 = 1 << 0;
const FLAG_CGB: u8 = 1 << 1;

/// Container layout selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerFormat {
    /// Header, palette and one tile per grid cell
    Raw = 0,
    /// Header, palette, unique tiles and the tilemap
    TilesetMap = 1,
}

impl ContainerFormat {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ContainerFormat::Raw),
            1 => Some(ContainerFormat::TilesetMap),
            _ => None,
        }
    }
}

/// Decoded common header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub format: ContainerFormat,
    pub grayscale: bool,
    pub cgb: bool,
    pub row_size: u8,
    pub width_tiles: u16,
    pub height_tiles: u16,
    pub color_count: u16,
    pub row_count: u8,
}

impl Header {
    fn color_bytes(&self) -> usize {
        if self.cgb {
            2
        } else {
            3
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut flags = 0;
        if self.grayscale {
            flags |= FLAG_GRAYSCALE;
        }
        if self.cgb {
            flags |= FLAG_CGB;
        }
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.push(self.format as u8);
        out.push(flags);
        out.push(self.row_size);
        out.extend_from_slice(&self.width_tiles.to_le_bytes());
        out.extend_from_slice(&self.height_tiles.to_le_bytes());
        out.extend_from_slice(&self.color_count.to_le_bytes());
        out.push(self.row_count);
        out.push(0);
    }
}

/// Encode one tile of 2-bit pixels as Game Boy 2bpp planar data
pub fn encode_tile(pixels: &TilePixels) -> [u8; TILE_BYTES] {
    let mut out = [0u8; TILE_BYTES];
    for (y, line) in pixels.chunks_exact(TILE_SIZE).enumerate() {
        for (x, &p) in line.iter().enumerate() {
            let bit = 7 - x;
            out[2 * y] |= (p & 1) << bit;
            out[2 * y + 1] |= ((p >> 1) & 1) << bit;
        }
    }
    out
}

/// Inverse of [`encode_tile`]
pub fn decode_tile(bytes: &[u8]) -> TilePixels {
    let mut pixels = [0u8; TILE_PIXELS];
    for (y, planes) in bytes.chunks_exact(2).take(TILE_SIZE).enumerate() {
        for x in 0..TILE_SIZE {
            let bit = 7 - x;
            let lo = (planes[0] >> bit) & 1;
            let hi = (planes[1] >> bit) & 1;
            pixels[y * TILE_SIZE + x] = lo | (hi << 1);
        }
    }
    pixels
}

fn to_u16(value: usize, what: &'static str) -> Result<u16> {
    u16::try_from(value).map_err(|_| ConversionError::SizeLimit {
        what,
        value,
        limit: usize::from(u16::MAX),
    })
}

/// Serializes a finished conversion
pub struct FormatWriter<'a> {
    conversion: &'a Conversion,
}

impl<'a> FormatWriter<'a> {
    pub fn new(conversion: &'a Conversion) -> Self {
        FormatWriter { conversion }
    }

    /// Build the complete container in memory
    pub fn encode(&self, format: ContainerFormat) -> Result<Vec<u8>> {
        let conversion = self.conversion;
        let map = &conversion.map;
        let rows = &conversion.assignment.rows;

        let header = Header {
            format,
            grayscale: conversion.grayscale,
            cgb: conversion.cgb_mode,
            row_size: ROW_SIZE as u8,
            width_tiles: to_u16(map.width(), "width in tiles")?,
            height_tiles: to_u16(map.height(), "height in tiles")?,
            color_count: to_u16(conversion.palette.len(), "color count")?,
            row_count: u8::try_from(rows.len()).map_err(|_| ConversionError::SizeLimit {
                what: "palette row count",
                value: rows.len(),
                limit: usize::from(u8::MAX),
            })?,
        };

        let mut out = Vec::new();
        header.write(&mut out);

        for row in rows {
            for color in row.colors(&conversion.palette, ROW_SIZE) {
                let color = if conversion.grayscale {
                    color.to_gray()
                } else {
                    color
                };
                if conversion.cgb_mode {
                    out.extend_from_slice(&color.to_bgr555().to_le_bytes());
                } else {
                    out.extend_from_slice(&[color.r, color.g, color.b]);
                }
            }
        }

        let tile_pixels = &conversion.assignment.tile_pixels;
        match format {
            ContainerFormat::Raw => {
                out.extend_from_slice(&to_u16(map.len(), "tile count")?.to_le_bytes());
                for cell in map.cells() {
                    let pixels = cell.transform().apply(&tile_pixels[cell.tile]);
                    out.extend_from_slice(&encode_tile(&pixels));
                }
            }
            ContainerFormat::TilesetMap => {
                out.extend_from_slice(&to_u16(tile_pixels.len(), "tile count")?.to_le_bytes());
                for pixels in tile_pixels {
                    out.extend_from_slice(&encode_tile(pixels));
                }
                out.push(map.base_tile_index());
                out.push(conversion.palette_number);
                for cell in map.cells() {
                    out.extend_from_slice(&map.entry(cell)?);
                }
            }
        }

        debug!(?format, bytes = out.len(), "encoded container");
        Ok(out)
    }

    /// Write the container to `path`.
    ///
    /// Data goes to a temporary file next to `path` that only replaces it
    /// once fully written; on error the temporary file is deleted.
    pub fn write(&self, path: impl AsRef<Path>, format: ContainerFormat) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.encode(format)?;

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;

        info!(path = %path.display(), bytes = bytes.len(), "wrote container");
        Ok(())
    }
}

/// Map section of a tile set container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSection {
    pub base_tile_index: u8,
    pub palette_number: u8,
    /// Tile index byte and attribute byte per cell
    pub entries: Vec<[u8; 2]>,
}

/// A parsed container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub header: Header,
    pub palette_rows: Vec<Vec<Rgb>>,
    pub tiles: Vec<TilePixels>,
    pub map: Option<MapSection>,
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.pos + len;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| ConversionError::Container {
                offset: self.pos,
                reason: format!("truncated {what}"),
            })?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn error(&self, offset: usize, reason: impl Into<String>) -> ConversionError {
        ConversionError::Container {
            offset,
            reason: reason.into(),
        }
    }
}

impl Container {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        Container::parse(&fs::read(path)?)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader { data, pos: 0 };

        if reader.take(4, "magic")? != MAGIC {
            return Err(reader.error(0, "bad magic"));
        }
        let version = reader.u8("version")?;
        if version != VERSION {
            return Err(reader.error(4, format!("unsupported version {version}")));
        }
        let format_byte = reader.u8("format")?;
        let format = ContainerFormat::from_byte(format_byte)
            .ok_or_else(|| reader.error(5, format!("unknown format {format_byte}")))?;
        let flags = reader.u8("flags")?;
        let header = Header {
            format,
            grayscale: flags & FLAG_GRAYSCALE != 0,
            cgb: flags & FLAG_CGB != 0,
            row_size: reader.u8("row size")?,
            width_tiles: reader.u16("width")?,
            height_tiles: reader.u16("height")?,
            color_count: reader.u16("color count")?,
            row_count: reader.u8("row count")?,
        };
        reader.u8("reserved byte")?;

        let mut palette_rows = Vec::with_capacity(usize::from(header.row_count));
        for _ in 0..header.row_count {
            let mut row = Vec::with_capacity(usize::from(header.row_size));
            for _ in 0..header.row_size {
                let bytes = reader.take(header.color_bytes(), "palette")?;
                row.push(if header.cgb {
                    Rgb::from_bgr555(u16::from_le_bytes([bytes[0], bytes[1]]))
                } else {
                    Rgb::new(bytes[0], bytes[1], bytes[2])
                });
            }
            palette_rows.push(row);
        }

        let tile_count = usize::from(reader.u16("tile count")?);
        let tiles = (0..tile_count)
            .map(|_| reader.take(TILE_BYTES, "tile data").map(decode_tile))
            .collect::<Result<Vec<_>>>()?;

        let cells = usize::from(header.width_tiles) * usize::from(header.height_tiles);
        let map = match format {
            ContainerFormat::Raw => {
                if tile_count != cells {
                    return Err(reader.error(
                        HEADER_LEN,
                        format!("raw container has {tile_count} tiles for {cells} cells"),
                    ));
                }
                None
            }
            ContainerFormat::TilesetMap => {
                let base_tile_index = reader.u8("base tile index")?;
                let palette_number = reader.u8("palette number")?;
                let entries = reader
                    .take(cells * 2, "tilemap")?
                    .chunks_exact(2)
                    .map(|e| [e[0], e[1]])
                    .collect();
                Some(MapSection {
                    base_tile_index,
                    palette_number,
                    entries,
                })
            }
        };

        if reader.pos != data.len() {
            return Err(reader.error(reader.pos, "trailing data"));
        }

        Ok(Container {
            header,
            palette_rows,
            tiles,
            map,
        })
    }

    /// Width of the image in pixels
    pub fn pixel_width(&self) -> usize {
        usize::from(self.header.width_tiles) * TILE_SIZE
    }

    /// Height of the image in pixels
    pub fn pixel_height(&self) -> usize {
        usize::from(self.header.height_tiles) * TILE_SIZE
    }

    /// Rebuild the image as row-major colors.
    ///
    /// Raw containers have no per-cell palette row, so they can only be
    /// rendered when they carry a single row.
    pub fn render(&self) -> Result<Vec<Rgb>> {
        let width = self.pixel_width();
        let cols = usize::from(self.header.width_tiles);
        let mut out = vec![Rgb::BLACK; width * self.pixel_height()];

        let placed: Vec<(TilePixels, usize)> = match &self.map {
            None => {
                if self.palette_rows.len() != 1 {
                    return Err(ConversionError::Container {
                        offset: 14,
                        reason: "raw container with several palette rows cannot be rendered"
                            .into(),
                    });
                }
                self.tiles.iter().map(|t| (*t, 0)).collect()
            }
            Some(section) => section
                .entries
                .iter()
                .map(|&[index, attributes]| self.resolve(section, index, attributes))
                .collect::<Result<_>>()?,
        };

        for (cell, (pixels, row)) in placed.iter().enumerate() {
            let colors = &self.palette_rows[*row];
            let (ty, tx) = (cell / cols, cell % cols);
            for (i, &p) in pixels.iter().enumerate() {
                let (y, x) = (ty * TILE_SIZE + i / TILE_SIZE, tx * TILE_SIZE + i % TILE_SIZE);
                out[y * width + x] = colors.get(usize::from(p)).copied().unwrap_or(Rgb::BLACK);
            }
        }
        Ok(out)
    }

    fn resolve(&self, section: &MapSection, index: u8, attributes: u8) -> Result<(TilePixels, usize)> {
        let attributes = Attributes::from_byte(attributes);
        let tile = index
            .checked_sub(section.base_tile_index)
            .and_then(|t| self.tiles.get(usize::from(t)))
            .ok_or_else(|| ConversionError::Container {
                offset: 0,
                reason: format!("map refers to missing tile {index}"),
            })?;
        let row = attributes
            .palette
            .checked_sub(section.palette_number)
            .map(usize::from)
            .filter(|&r| r < self.palette_rows.len())
            .ok_or_else(|| ConversionError::Container {
                offset: 0,
                reason: format!("map refers to missing palette {}", attributes.palette),
            })?;
        let transform: Transform = attributes.transform();
        Ok((transform.apply(tile), row))
    }
}
