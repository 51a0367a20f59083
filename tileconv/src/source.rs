//! Decoded source image and palette
//!
//! The converter works on palette indices only. Images are loaded from indexed
//! PNG files with the `png` crate so the original index order is preserved.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::color::Rgb;
use crate::error::{ConversionError, Result};

/// Largest palette an indexed image can carry
pub const MAX_SOURCE_COLORS: usize = 256;

/// An indexed image, one byte per pixel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl SourceImage {
    /// Wrap a row-major buffer of palette indices
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != width * height {
            return Err(ConversionError::ImageFormat(format!(
                "pixel buffer holds {} bytes, expected {}x{}",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(SourceImage {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Always 1, sub-byte depths are unpacked on load
    pub fn bytes_per_pixel(&self) -> usize {
        1
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Palette index at pixel (x, y)
    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }

    /// Apply an index remapping (`remap[old] == new`) to every pixel
    pub fn remapped(&self, remap: &[u8]) -> SourceImage {
        let pixels = self
            .pixels
            .iter()
            .map(|&p| remap.get(usize::from(p)).copied().unwrap_or(p))
            .collect();
        SourceImage {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

/// The colors referenced by a `SourceImage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourcePalette {
    colors: Vec<Rgb>,
}

impl SourcePalette {
    pub fn new(colors: Vec<Rgb>) -> Result<Self> {
        if colors.len() > MAX_SOURCE_COLORS {
            return Err(ConversionError::ImageFormat(format!(
                "palette has {} colors, at most {} are supported",
                colors.len(),
                MAX_SOURCE_COLORS
            )));
        }
        Ok(SourcePalette { colors })
    }

    /// Build from packed RGB triples as found in a PNG PLTE chunk
    pub fn from_rgb_triples(data: &[u8]) -> Result<Self> {
        SourcePalette::new(
            data.chunks_exact(3)
                .map(|c| Rgb::new(c[0], c[1], c[2]))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }

    pub fn get(&self, index: u8) -> Option<Rgb> {
        self.colors.get(usize::from(index)).copied()
    }

    /// Sort from light to dark.
    ///
    /// Returns the sorted palette and the index remapping to apply to the
    /// image (`remap[old] == new`). Equal lightness keeps the original order.
    pub fn sorted_by_lightness(&self) -> (SourcePalette, Vec<u8>) {
        let mut order: Vec<usize> = (0..self.colors.len()).collect();
        order.sort_by(|&a, &b| {
            self.colors[b]
                .lightness()
                .total_cmp(&self.colors[a].lightness())
        });

        let mut remap = vec![0u8; self.colors.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = new as u8;
        }
        let colors = order.iter().map(|&old| self.colors[old]).collect();
        (SourcePalette { colors }, remap)
    }
}

/// Load an indexed PNG, keeping its palette indices
pub fn load_png(path: impl AsRef<Path>) -> Result<(SourceImage, SourcePalette)> {
    let path = path.as_ref();
    let mut decoder = png::Decoder::new(BufReader::new(File::open(path)?));
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info()?;

    let (color_type, bit_depth) = reader.output_color_type();
    if color_type != png::ColorType::Indexed {
        return Err(ConversionError::ImageFormat(format!(
            "{} is {:?}, an indexed (palette) PNG is required",
            path.display(),
            color_type
        )));
    }
    let depth = bit_depth as u8;
    if depth > 8 {
        return Err(ConversionError::ImageFormat(format!(
            "{} uses {} bits per pixel, at most 8 are supported",
            path.display(),
            depth
        )));
    }
    let palette = match reader.info().palette.as_ref() {
        Some(plte) => SourcePalette::from_rgb_triples(plte)?,
        None => {
            return Err(ConversionError::ImageFormat(format!(
                "{} has no palette",
                path.display()
            )))
        }
    };

    let mut buf = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf)?;
    let width = frame.width as usize;
    let height = frame.height as usize;
    let pixels = unpack_indexed(&buf, width, height, frame.line_size, depth);

    debug!(
        path = %path.display(),
        width,
        height,
        depth,
        colors = palette.len(),
        "loaded indexed image"
    );
    Ok((SourceImage::new(width, height, pixels)?, palette))
}

/// Expand packed 1/2/4/8-bit rows into one index per byte
fn unpack_indexed(data: &[u8], width: usize, height: usize, line_size: usize, depth: u8) -> Vec<u8> {
    if depth == 8 {
        return data
            .chunks(line_size)
            .take(height)
            .flat_map(|row| row[..width].iter().copied())
            .collect();
    }

    let per_byte = usize::from(8 / depth);
    let mask = (1u8 << depth) - 1;
    let mut pixels = Vec::with_capacity(width * height);
    for row in data.chunks(line_size).take(height) {
        for x in 0..width {
            let byte = row[x / per_byte];
            let shift = 8 - depth * (1 + (x % per_byte) as u8);
            pixels.push((byte >> shift) & mask);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufWriter;

    fn write_png(
        path: &Path,
        width: u32,
        height: u32,
        color: png::ColorType,
        depth: png::BitDepth,
        palette: Option<Vec<u8>>,
        data: &[u8],
    ) {
        let file = File::create(path).unwrap();
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(color);
        encoder.set_depth(depth);
        if let Some(palette) = palette {
            encoder.set_palette(palette);
        }
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(data).unwrap();
    }

    #[test]
    fn unpack_four_bit_rows() {
        // 3 pixels per row, rows padded to 2 bytes
        let data = [0x12, 0x30, 0x45, 0x60];
        assert_eq!(unpack_indexed(&data, 3, 2, 2, 4), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn unpack_one_bit_rows() {
        let data = [0b1010_0000];
        assert_eq!(unpack_indexed(&data, 4, 1, 1, 1), vec![1, 0, 1, 0]);
    }

    #[test]
    fn loads_four_bit_indexed_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("four.png");
        let palette = vec![0, 0, 0, 255, 255, 255, 255, 0, 0];
        // 4x1 pixels: 0 1 2 1
        write_png(
            &path,
            4,
            1,
            png::ColorType::Indexed,
            png::BitDepth::Four,
            Some(palette),
            &[0x01, 0x21],
        );

        let (image, palette) = load_png(&path).unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 1);
        assert_eq!(image.pixels(), &[0, 1, 2, 1]);
        assert_eq!(palette.len(), 3);
        assert_eq!(palette.get(2), Some(Rgb::new(255, 0, 0)));
    }

    #[test]
    fn rejects_truecolor_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.png");
        write_png(
            &path,
            1,
            1,
            png::ColorType::Rgb,
            png::BitDepth::Eight,
            None,
            &[10, 20, 30],
        );

        let err = load_png(&path).unwrap_err();
        assert!(matches!(err, ConversionError::ImageFormat(_)));
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(SourceImage::new(8, 8, vec![0; 10]).is_err());
    }

    #[test]
    fn sort_puts_light_colors_first() {
        let palette = SourcePalette::new(vec![
            Rgb::new(0, 0, 0),
            Rgb::new(255, 255, 255),
            Rgb::new(128, 128, 128),
        ])
        .unwrap();

        let (sorted, remap) = palette.sorted_by_lightness();
        assert_eq!(
            sorted.colors(),
            &[
                Rgb::new(255, 255, 255),
                Rgb::new(128, 128, 128),
                Rgb::new(0, 0, 0)
            ]
        );
        assert_eq!(remap, vec![2, 0, 1]);

        let image = SourceImage::new(3, 1, vec![0, 1, 2]).unwrap();
        assert_eq!(image.remapped(&remap).pixels(), &[2, 0, 1]);
    }
}
