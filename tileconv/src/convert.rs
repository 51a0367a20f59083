//! Image conversion pipeline
//!
//! Drives one conversion from a decoded indexed image to a tile set, palette
//! rows and a tilemap, and hands the result to the container writer. Every
//! stage receives its settings from the immutable [`Config`].

use std::borrow::Cow;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::color::Rgb;
use crate::container::{ContainerFormat, FormatWriter};
use crate::dedup::{DedupCell, DedupOptions, TileDeduplicator, TileSet};
use crate::error::{ConversionError, Result, RowOverflow};
use crate::palette::{PaletteAssigner, PaletteAssignment, CGB_ROWS, DMG_ROWS, ROW_SIZE};
use crate::source::{load_png, SourceImage, SourcePalette};
use crate::tile::{TileExtractor, TILE_SIZE};
use crate::tilemap::{MapBuilder, TileMap};

/// Output selected by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Palette and one tile per grid cell, no map
    Raw,
    /// Palette, deduplicated tiles and tilemap
    #[default]
    TilesetMap,
    /// C source text (not produced by this tool)
    SourceText,
}

/// Configuration for the image conversion process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Merge identical tiles
    pub dedupe_enabled: bool,
    /// Merge mirrored tiles using the flip attributes
    pub dedupe_flips: bool,
    /// Merge tiles that differ only by a palette offset
    pub dedupe_palettes: bool,
    /// Sort the palette from light to dark before converting
    pub sort_palette: bool,
    /// Write palette colors as grays
    pub grayscale: bool,
    /// Target the Game Boy Color (8 palette rows, 15-bit colors)
    pub cgb_mode: bool,
    /// Added to every tile index written to the map
    pub base_tile_index: u8,
    /// First hardware palette row used
    pub palette_number: u8,
    /// VRAM bank bit written to every map attribute
    pub bank: u8,
    pub output_format: OutputFormat,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dedupe_enabled: true,
            dedupe_flips: false,
            dedupe_palettes: false,
            sort_palette: false,
            grayscale: false,
            cgb_mode: true,
            base_tile_index: 0,
            palette_number: 0,
            bank: 0,
            output_format: OutputFormat::TilesetMap,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Check option ranges against the target hardware
    pub fn validate(&self) -> Result<()> {
        if usize::from(self.palette_number) >= self.hardware_rows() {
            return Err(ConversionError::InvalidConfig(format!(
                "palette number {} is past the last palette row ({})",
                self.palette_number,
                self.hardware_rows() - 1
            )));
        }
        if self.bank > 1 {
            return Err(ConversionError::InvalidConfig(format!(
                "bank must be 0 or 1, got {}",
                self.bank
            )));
        }
        Ok(())
    }

    /// Background palette rows of the target
    pub fn hardware_rows(&self) -> usize {
        if self.cgb_mode {
            CGB_ROWS
        } else {
            DMG_ROWS
        }
    }

    /// Rows left once the palette number is reserved
    pub fn row_budget(&self) -> usize {
        self.hardware_rows()
            .saturating_sub(usize::from(self.palette_number))
    }

    /// Container layout for the configured output
    pub fn container_format(&self) -> Result<ContainerFormat> {
        match self.output_format {
            OutputFormat::Raw => Ok(ContainerFormat::Raw),
            OutputFormat::TilesetMap => Ok(ContainerFormat::TilesetMap),
            OutputFormat::SourceText => Err(ConversionError::UnsupportedFormat("source-text")),
        }
    }

    /// Deduplication settings for a palette of `palette_len` colors.
    ///
    /// Palette offsets are pointless when the palette fits in one row.
    pub fn dedup_options(&self, palette_len: usize) -> DedupOptions {
        DedupOptions {
            enabled: self.dedupe_enabled,
            flips: self.dedupe_enabled && self.dedupe_flips,
            palettes: self.dedupe_enabled && self.dedupe_palettes && palette_len > ROW_SIZE,
        }
    }
}

/// Everything produced by one conversion
#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    /// Palette the tiles index into, sorted when requested
    pub palette: SourcePalette,
    pub tiles: TileSet,
    pub assignment: PaletteAssignment,
    pub map: TileMap,
    pub grayscale: bool,
    pub cgb_mode: bool,
    pub palette_number: u8,
}

impl Conversion {
    /// Width of the image in pixels
    pub fn pixel_width(&self) -> usize {
        self.map.width() * TILE_SIZE
    }

    /// Height of the image in pixels
    pub fn pixel_height(&self) -> usize {
        self.map.height() * TILE_SIZE
    }

    /// Rebuild the source palette indices from tiles, flips and offsets
    pub fn reconstruct_indices(&self) -> Vec<u8> {
        let width = self.pixel_width();
        let mut pixels = vec![0u8; width * self.pixel_height()];
        for cell in self.map.cells() {
            let Some(tile) = self.tiles.get(cell.tile) else {
                continue;
            };
            let block = cell.transform().apply(&tile.pixels);
            for (i, &p) in block.iter().enumerate() {
                let y = cell.row * TILE_SIZE + i / TILE_SIZE;
                let x = cell.col * TILE_SIZE + i % TILE_SIZE;
                pixels[y * width + x] = p + cell.offset;
            }
        }
        pixels
    }

    /// Render the image the way the hardware would show it: encoded tile
    /// pixels looked up in each cell's palette row
    pub fn render(&self) -> RgbImage {
        let rows: Vec<Vec<Rgb>> = self
            .assignment
            .rows
            .iter()
            .map(|row| {
                row.colors(&self.palette, ROW_SIZE)
                    .into_iter()
                    .map(|c| if self.grayscale { c.to_gray() } else { c })
                    .collect()
            })
            .collect();

        let mut out = RgbImage::new(self.pixel_width() as u32, self.pixel_height() as u32);
        for (cell, &row) in self.map.cells().iter().zip(&self.assignment.cell_rows) {
            let block = cell
                .transform()
                .apply(&self.assignment.tile_pixels[cell.tile]);
            for (i, &p) in block.iter().enumerate() {
                let color = rows[row][usize::from(p)];
                out.put_pixel(
                    (cell.col * TILE_SIZE + i % TILE_SIZE) as u32,
                    (cell.row * TILE_SIZE + i / TILE_SIZE) as u32,
                    color.into(),
                );
            }
        }
        out
    }

    /// Save [`Conversion::render`] as a PNG
    pub fn write_preview(&self, path: impl AsRef<Path>) -> Result<()> {
        self.render().save(path)?;
        Ok(())
    }
}

/// JSON document written by [`ImageConverter::write_json_file`]
#[derive(Serialize)]
struct TilemapData<'a> {
    config: &'a Config,
    conversion: &'a Conversion,
}

/// Main struct for the image conversion process
#[derive(Debug, Clone)]
pub struct ImageConverter {
    config: Config,
}

impl ImageConverter {
    /// Create a new image converter with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(ImageConverter { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load `input`, convert it and write the container to `output`.
    ///
    /// Nothing is written unless every stage succeeds.
    pub fn convert_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<Conversion> {
        let format = self.config.container_format()?;
        let (image, palette) = load_png(input)?;
        let conversion = self.convert(&image, &palette)?;
        FormatWriter::new(&conversion).write(output, format)?;
        Ok(conversion)
    }

    /// Run the conversion pipeline on a decoded image
    pub fn convert(&self, image: &SourceImage, palette: &SourcePalette) -> Result<Conversion> {
        // Sort the palette and remap pixels to match
        let (image, palette) = if self.config.sort_palette {
            let (sorted, remap) = palette.sorted_by_lightness();
            debug!(?remap, "sorted palette by lightness");
            (Cow::Owned(image.remapped(&remap)), sorted)
        } else {
            (Cow::Borrowed(image), palette.clone())
        };

        // Split the image into blocks
        let extractor = TileExtractor::new(&image)?;

        // Deduplicate blocks and assign palette rows. Palette offsets can
        // need more rows than covering each tile's colors does; in that case
        // convert again without them.
        let options = self.config.dedup_options(palette.len());
        let (tiles, cells, assignment) = match self.deduplicate(&extractor, options, palette.len()) {
            Err(ConversionError::PaletteRowOverflow(RowOverflow::TooManyRows { required, budget }))
                if options.palettes =>
            {
                debug!(required, budget, "palette offsets exceed the row budget, merging without them");
                let options = DedupOptions {
                    palettes: false,
                    ..options
                };
                self.deduplicate(&extractor, options, palette.len())?
            }
            result => result?,
        };

        // Build the tilemap
        let map = MapBuilder::new(
            extractor.cols(),
            extractor.rows(),
            self.config.base_tile_index,
            self.config.palette_number,
            self.config.bank,
        )
        .build(&cells, &assignment.cell_rows)?;

        info!(
            width = extractor.cols(),
            height = extractor.rows(),
            tiles = tiles.len(),
            rows = assignment.rows.len(),
            colors = palette.len(),
            "converted image"
        );

        Ok(Conversion {
            palette,
            tiles,
            assignment,
            map,
            grayscale: self.config.grayscale,
            cgb_mode: self.config.cgb_mode,
            palette_number: self.config.palette_number,
        })
    }

    /// Merge the extracted blocks into a tile set and assign palette rows
    fn deduplicate(
        &self,
        extractor: &TileExtractor<'_>,
        options: DedupOptions,
        palette_len: usize,
    ) -> Result<(TileSet, Vec<DedupCell>, PaletteAssignment)> {
        let mut dedup = TileDeduplicator::new(options, palette_len);
        for block in extractor.blocks() {
            dedup.insert(&block)?;
        }
        let (tiles, cells) = dedup.finish();
        debug!(blocks = cells.len(), tiles = tiles.len(), ?options, "deduplicated tiles");

        let assignment = PaletteAssigner::new(palette_len, self.config.row_budget()).assign(
            &tiles,
            &cells,
            options.palettes,
        )?;
        Ok((tiles, cells, assignment))
    }

    /// Write JSON output file
    pub fn write_json_file(&self, path: impl AsRef<Path>, conversion: &Conversion) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        let data = TilemapData {
            config: &self.config,
            conversion,
        };
        serde_json::to_writer_pretty(file, &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;
    use crate::tile::{Transform, TILE_PIXELS};

    fn palette(len: usize) -> SourcePalette {
        SourcePalette::new(
            (0..len)
                .map(|i| Rgb::new((i * 16) as u8, 255 - (i * 16) as u8, (i * 7) as u8))
                .collect(),
        )
        .unwrap()
    }

    /// Lay out 8x8 tiles side by side in one tile row
    fn strip(tiles: &[[u8; TILE_PIXELS]]) -> SourceImage {
        let width = tiles.len() * TILE_SIZE;
        let mut pixels = vec![0u8; width * TILE_SIZE];
        for (t, tile) in tiles.iter().enumerate() {
            for i in 0..TILE_PIXELS {
                pixels[(i / TILE_SIZE) * width + t * TILE_SIZE + i % TILE_SIZE] = tile[i];
            }
        }
        SourceImage::new(width, TILE_SIZE, pixels).unwrap()
    }

    fn pattern() -> [u8; TILE_PIXELS] {
        let mut tile = [0u8; TILE_PIXELS];
        for (i, p) in tile.iter_mut().enumerate() {
            *p = ((i / 3 + i / 8) % 4) as u8;
        }
        tile[0] = 3;
        tile[7] = 1;
        tile
    }

    #[test]
    fn two_identical_tiles_share_index_zero() {
        let image = strip(&[pattern(), pattern()]);
        let conversion = ImageConverter::new(Config::default())
            .unwrap()
            .convert(&image, &palette(4))
            .unwrap();

        assert_eq!(conversion.tiles.len(), 1);
        assert_eq!(conversion.map.len(), 2);
        for cell in conversion.map.cells() {
            assert_eq!(cell.tile, 0);
            assert_eq!(cell.transform(), Transform::Identity);
        }
    }

    #[test]
    fn vertical_mirror_uses_flip_v() {
        let image = strip(&[pattern(), Transform::FlipV.apply(&pattern())]);
        let config = Config {
            dedupe_flips: true,
            ..Config::default()
        };
        let conversion = ImageConverter::new(config)
            .unwrap()
            .convert(&image, &palette(4))
            .unwrap();

        assert_eq!(conversion.tiles.len(), 1);
        let cells = conversion.map.cells();
        assert_eq!(cells[0].transform(), Transform::Identity);
        assert!(cells[1].attributes.flip_v);
        assert!(!cells[1].attributes.flip_h);
        assert_eq!(conversion.reconstruct_indices(), image.pixels());
    }

    #[test]
    fn disabled_dedup_keeps_both_tiles() {
        let image = strip(&[pattern(), pattern()]);
        let config = Config {
            dedupe_enabled: false,
            ..Config::default()
        };
        let conversion = ImageConverter::new(config)
            .unwrap()
            .convert(&image, &palette(4))
            .unwrap();

        assert_eq!(conversion.tiles.len(), 2);
        let indices: Vec<_> = conversion.map.cells().iter().map(|c| c.tile).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn map_covers_whole_grid() {
        let pixels: Vec<u8> = (0..24 * 16).map(|i| ((i / 8) % 4) as u8).collect();
        let image = SourceImage::new(24, 16, pixels).unwrap();
        let conversion = ImageConverter::new(Config::default())
            .unwrap()
            .convert(&image, &palette(4))
            .unwrap();
        assert_eq!(conversion.map.len(), (24 / 8) * (16 / 8));
    }

    #[test]
    fn palette_offsets_reconstruct_exactly() {
        let shifted = pattern().map(|p| p + 4);
        let image = strip(&[pattern(), shifted]);
        let config = Config {
            dedupe_palettes: true,
            ..Config::default()
        };
        let conversion = ImageConverter::new(config)
            .unwrap()
            .convert(&image, &palette(8))
            .unwrap();

        assert_eq!(conversion.tiles.len(), 1);
        assert_eq!(conversion.map.cells()[1].offset, 4);
        assert_eq!(conversion.map.cells()[1].attributes.palette, 1);
        assert_eq!(conversion.reconstruct_indices(), image.pixels());
    }

    #[test]
    fn too_many_colors_in_block() {
        let mut tile = [0u8; TILE_PIXELS];
        for (i, p) in tile.iter_mut().enumerate() {
            *p = (i % 5) as u8;
        }
        let image = strip(&[tile]);
        let err = ImageConverter::new(Config::default())
            .unwrap()
            .convert(&image, &palette(5))
            .unwrap_err();
        assert!(matches!(
            err,
            ConversionError::PaletteRowOverflow(RowOverflow::TooManyColors { colors: 5, .. })
        ));
    }

    #[test]
    fn sorting_remaps_pixels() {
        let colors = SourcePalette::new(vec![Rgb::new(0, 0, 0), Rgb::new(255, 255, 255)]).unwrap();
        let image = strip(&[[0u8; TILE_PIXELS]]);
        let config = Config {
            sort_palette: true,
            ..Config::default()
        };
        let conversion = ImageConverter::new(config)
            .unwrap()
            .convert(&image, &colors)
            .unwrap();
        assert_eq!(conversion.palette.get(0), Some(Rgb::new(255, 255, 255)));
        assert!(conversion.reconstruct_indices().iter().all(|&p| p == 1));
        assert_eq!(*conversion.render().get_pixel(3, 3), image::Rgb([0, 0, 0]));
    }

    #[test]
    fn render_matches_source_colors() {
        let colors = palette(8);
        let image = strip(&[pattern(), pattern().map(|p| p + 4)]);
        let conversion = ImageConverter::new(Config::default())
            .unwrap()
            .convert(&image, &colors)
            .unwrap();
        let rendered = conversion.render();
        for y in 0..8 {
            for x in 0..16 {
                let expected = colors.get(image.pixel(x, y)).unwrap();
                assert_eq!(*rendered.get_pixel(x as u32, y as u32), image::Rgb::from(expected));
            }
        }
    }

    #[test]
    fn config_validation() {
        let bad_bank = Config {
            bank: 2,
            ..Config::default()
        };
        assert!(ImageConverter::new(bad_bank).is_err());

        let dmg_palette = Config {
            cgb_mode: false,
            palette_number: 1,
            ..Config::default()
        };
        assert!(matches!(
            ImageConverter::new(dmg_palette),
            Err(ConversionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn source_text_is_rejected() {
        let config = Config {
            output_format: OutputFormat::SourceText,
            ..Config::default()
        };
        assert!(matches!(
            config.container_format(),
            Err(ConversionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn config_json_uses_defaults_for_missing_fields() {
        let config: Config =
            serde_json::from_str(r#"{ "dedupe_flips": true, "output_format": "raw" }"#).unwrap();
        assert!(config.dedupe_flips);
        assert!(config.dedupe_enabled);
        assert_eq!(config.output_format, OutputFormat::Raw);
    }
}
