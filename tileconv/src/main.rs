//! Command line front end for the tile converter

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tileconv::{Config, ImageConverter, OutputFormat};

/// Default extension for written containers; the header records the layout
const CONTAINER_EXTENSION: &str = "pngb";

#[derive(Parser, Debug)]
#[command(name = "tileconv")]
#[command(about = "Convert indexed PNG images to Game Boy tiles, palettes and maps", long_about = None)]
struct Cli {
    /// Indexed PNG to convert
    input: PathBuf,

    /// Output PNGB container (defaults to the input with a .pngb extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Start from a JSON configuration file; other flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Keep every tile even when it repeats
    #[arg(long)]
    no_dedupe: bool,

    /// Merge tiles that are mirror images of each other
    #[arg(long)]
    flips: bool,

    /// Merge tiles that only differ by a palette offset
    #[arg(long)]
    palettes: bool,

    /// Sort the palette from light to dark
    #[arg(long)]
    sort_palette: bool,

    /// Write palette colors as grays
    #[arg(long)]
    grayscale: bool,

    /// Target the original Game Boy (one palette, 24-bit colors)
    #[arg(long)]
    dmg: bool,

    /// Added to every tile index in the map
    #[arg(long)]
    base: Option<u8>,

    /// First palette row to use
    #[arg(long)]
    pal: Option<u8>,

    /// VRAM bank (taken from a `.bN` name suffix when omitted)
    #[arg(long)]
    bank: Option<u8>,

    /// Also write the conversion result as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Also write a PNG rendered from the converted data
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> tileconv::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(format) = self.format {
            config.output_format = format;
        }
        if self.no_dedupe {
            config.dedupe_enabled = false;
        }
        config.dedupe_flips |= self.flips;
        config.dedupe_palettes |= self.palettes;
        config.sort_palette |= self.sort_palette;
        config.grayscale |= self.grayscale;
        if self.dmg {
            config.cgb_mode = false;
        }
        if let Some(base) = self.base {
            config.base_tile_index = base;
        }
        if let Some(pal) = self.pal {
            config.palette_number = pal;
        }
        if let Some(bank) = self.bank.or_else(|| bank_from_name(&self.input)) {
            config.bank = bank;
        }
        Ok(config)
    }

    fn output(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => self.input.with_extension(CONTAINER_EXTENSION),
        }
    }
}

/// Bank number from a name like `title.b1.png`
fn bank_from_name(path: &Path) -> Option<u8> {
    let stem = path.file_stem()?.to_str()?;
    let (_, suffix) = stem.rsplit_once('.')?;
    suffix.strip_prefix('b')?.parse().ok()
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> tileconv::Result<()> {
    let config = cli.config()?;
    let output = cli.output();
    let converter = ImageConverter::new(config)?;

    let conversion = converter.convert_file(&cli.input, &output)?;

    if let Some(path) = &cli.json {
        converter.write_json_file(path, &conversion)?;
        info!(path = %path.display(), "wrote JSON");
    }
    if let Some(path) = &cli.preview {
        conversion.write_preview(path)?;
        info!(path = %path.display(), "wrote preview");
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        error!("{}: {e}", cli.input.display());
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_suffix() {
        assert_eq!(bank_from_name(Path::new("art/title.b1.png")), Some(1));
        assert_eq!(bank_from_name(Path::new("title.png")), None);
        assert_eq!(bank_from_name(Path::new("title.big.png")), None);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from(["tileconv", "logo.b1.png", "--flips", "--format", "raw", "--pal", "2"]);
        let config = cli.config().unwrap();
        assert!(config.dedupe_flips);
        assert_eq!(config.bank, 1);
        assert_eq!(config.palette_number, 2);
        assert_eq!(config.output_format, OutputFormat::Raw);
        assert_eq!(cli.output(), PathBuf::from("logo.b1.pngb"));
    }
}
