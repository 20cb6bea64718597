// ABOUTME: Command line entry point for bitgrid.
// ABOUTME: Builds an atlas from a font sheet, lays text into a grid, and writes PNGs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bitgrid_core::{Backend, Config, FontConfig, GridConfig};
use bitgrid_renderer::{
    target_size, CellGrid, CellPos, FontSheet, GlyphAtlas, GpuContext, GpuTarget, RenderTarget,
    TexCoord,
};
use clap::{Parser, Subcommand};
use image::RgbaImage;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Render text through a bitmap font atlas")]
struct Cli {
    /// Config file (defaults to ~/.config/bitgrid/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lay text into the grid and write the rebuilt render target as PNG
    Render(RenderArgs),
    /// Print the atlas glyph mapping as JSON
    Atlas,
    /// Write the default configuration as TOML
    InitConfig {
        /// Destination (defaults to the standard config location)
        path: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Text file, one grid row per line (reads stdin when omitted)
    #[arg(long)]
    text: Option<PathBuf>,

    /// Output PNG path
    #[arg(short, long, default_value = "bitgrid.png")]
    output: PathBuf,

    /// Render on the GPU regardless of the configured backend
    #[arg(long)]
    gpu: bool,
}

#[derive(Serialize)]
struct AtlasDump {
    cell_size: (u32, u32),
    texture_size: (u32, u32),
    glyphs: BTreeMap<char, [TexCoord; 4]>,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading config {}", path.display()))
        }
        None => Ok(Config::load_or_default()),
    }
}

/// The config file font paths are relative to: the one given, else the default location
fn config_base(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(Config::default_path)
}

/// Font paths in a config file are relative to that file
fn resolve(base: Option<&Path>, path: &Path) -> PathBuf {
    match base.and_then(Path::parent) {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn load_atlas(font: &FontConfig, base: Option<&Path>) -> Result<GlyphAtlas> {
    let (sheet, cell_size) = if let Some(image_path) = &font.image {
        let path = resolve(base, image_path);
        let sheet = image::open(&path)
            .with_context(|| format!("opening font image {}", path.display()))?
            .to_rgba8();
        (sheet, (font.cell_width, font.cell_height))
    } else if let Some(bdf_path) = &font.bdf {
        let path = resolve(base, bdf_path);
        let data = std::fs::read(&path)
            .with_context(|| format!("reading BDF font {}", path.display()))?;
        let sheet = FontSheet::from_bdf(&data, &font.mapping)
            .with_context(|| format!("parsing BDF font {}", path.display()))?;
        (sheet.image, sheet.cell_size)
    } else {
        bail!("No font configured: set font.image or font.bdf");
    };

    let atlas = GlyphAtlas::with_recolor(sheet, &font.mapping, cell_size, font.recolor)?;
    tracing::info!(
        "Loaded font atlas: {} glyphs, {}x{} cells",
        atlas.len(),
        cell_size.0,
        cell_size.1
    );
    Ok(atlas)
}

fn fill_and_rebuild<T: RenderTarget>(
    mut grid: CellGrid<T>,
    text: &str,
    config: &GridConfig,
) -> Result<RgbaImage> {
    grid.set_unmapped_glyph(config.unmapped_glyph);

    let (_, rows) = grid.dimensions();
    for (row, line) in text.lines().take(rows as usize).enumerate() {
        if line.is_empty() {
            continue;
        }
        grid.write_str(CellPos::new(0, row as u32), line, config.foreground, config.background)?;
    }
    tracing::info!("Rebuilding {} occupied cells", grid.len());

    grid.rebuild(config.clear_color)?;
    Ok(grid.pixels()?)
}

fn render(config: &Config, base: Option<&Path>, args: &RenderArgs) -> Result<()> {
    let atlas = Arc::new(load_atlas(&config.font, base)?);

    let text = match &args.text {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => std::io::read_to_string(std::io::stdin()).context("reading stdin")?,
    };

    let dimensions = (config.grid.columns, config.grid.rows);
    let pixels = if args.gpu || config.grid.backend == Backend::Gpu {
        let (width, height) = target_size(&atlas, dimensions)?;
        let ctx = GpuContext::new_blocking()?;
        let target = GpuTarget::new(Arc::new(ctx), width, height)?;
        fill_and_rebuild(CellGrid::with_target(atlas, dimensions, target)?, &text, &config.grid)?
    } else {
        fill_and_rebuild(CellGrid::new(atlas, dimensions)?, &text, &config.grid)?
    };

    pixels
        .save(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    tracing::info!(
        "Wrote {}x{} render to {}",
        pixels.width(),
        pixels.height(),
        args.output.display()
    );
    Ok(())
}

fn atlas_json(atlas: &GlyphAtlas) -> Result<String> {
    let dump = AtlasDump {
        cell_size: atlas.cell_size(),
        texture_size: atlas.texture_size(),
        glyphs: atlas
            .chars()
            .filter_map(|c| atlas.glyph(c).map(|quad| (c, quad)))
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&dump)?)
}

fn dump_atlas(config: &Config, base: Option<&Path>) -> Result<()> {
    let atlas = load_atlas(&config.font, base)?;
    println!("{}", atlas_json(&atlas)?);
    Ok(())
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let path = match path.or_else(Config::default_path) {
        Some(path) => path,
        None => bail!("Could not determine config directory"),
    };
    Config::default()
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("Wrote default config to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let explicit = cli.config.as_deref();
    let base = config_base(explicit);

    match &cli.command {
        Commands::Render(args) => render(&load_config(explicit)?, base.as_deref(), args),
        Commands::Atlas => dump_atlas(&load_config(explicit)?, base.as_deref()),
        Commands::InitConfig { path } => init_config(path.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitgrid_core::Color;
    use image::Rgba;

    #[test]
    fn relative_font_paths_follow_config_file() {
        let base = Path::new("/etc/bitgrid/config.toml");
        assert_eq!(
            resolve(Some(base), Path::new("fonts/vga.png")),
            PathBuf::from("/etc/bitgrid/fonts/vga.png")
        );
        assert_eq!(
            resolve(Some(base), Path::new("/abs/vga.png")),
            PathBuf::from("/abs/vga.png")
        );
        assert_eq!(resolve(None, Path::new("vga.png")), PathBuf::from("vga.png"));
    }

    #[test]
    fn default_config_location_anchors_font_paths() {
        let explicit = Path::new("/etc/bitgrid/config.toml");
        assert_eq!(config_base(Some(explicit)), Some(explicit.to_path_buf()));

        let base = config_base(None);
        assert_eq!(base, Config::default_path());
        if let Some(default) = base {
            let dir = default.parent().unwrap();
            assert_eq!(
                resolve(Some(default.as_path()), Path::new("vga.png")),
                dir.join("vga.png")
            );
        }
    }

    fn bdf_font() -> FontConfig {
        FontConfig {
            bdf: Some(PathBuf::from(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../../fixtures/test.bdf"
            ))),
            mapping: " A.".to_string(),
            ..FontConfig::default()
        }
    }

    #[test]
    fn bdf_font_builds_atlas_with_its_own_cell_size() {
        let atlas = load_atlas(&bdf_font(), None).unwrap();
        assert_eq!(atlas.cell_size(), (6, 13));
        assert_eq!(atlas.len(), 3);
        assert_eq!(atlas.glyph('A').unwrap()[0], [6.0, 0.0]);
    }

    #[test]
    fn relative_bdf_path_resolves_against_config_dir() {
        // Only the file's directory matters; the config itself is never read
        let config_file = Path::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../fixtures/config.toml"
        ));
        let font = FontConfig {
            bdf: Some(PathBuf::from("test.bdf")),
            ..bdf_font()
        };
        assert!(load_atlas(&font, Some(config_file)).is_ok());
    }

    #[test]
    fn atlas_json_lists_glyph_quads_in_char_order() {
        let atlas = load_atlas(&bdf_font(), None).unwrap();
        let json: serde_json::Value = serde_json::from_str(&atlas_json(&atlas).unwrap()).unwrap();

        assert_eq!(json["cell_size"], serde_json::json!([6, 13]));
        assert_eq!(json["texture_size"], serde_json::json!([96, 13]));
        let glyphs = json["glyphs"].as_object().unwrap();
        assert_eq!(glyphs.keys().collect::<Vec<_>>(), vec![" ", ".", "A"]);
        assert_eq!(
            glyphs["A"],
            serde_json::json!([[6.0, 0.0], [12.0, 0.0], [12.0, 13.0], [6.0, 13.0]])
        );
    }

    #[test]
    fn missing_font_is_an_error() {
        let err = load_atlas(&FontConfig::default(), None).err().unwrap();
        assert!(err.to_string().contains("No font configured"));
    }

    #[test]
    fn text_lines_fill_rows_and_clip() {
        let sheet = RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]));
        let atlas = Arc::new(GlyphAtlas::new(sheet, "#", (2, 2)).unwrap());
        let config = GridConfig {
            columns: 2,
            rows: 2,
            foreground: Color::RED,
            background: Color::BLUE,
            clear_color: Color::BLACK,
            ..GridConfig::default()
        };

        let grid = CellGrid::new(atlas, (2, 2)).unwrap();
        let pixels = fill_and_rebuild(grid, "###\n\n#", &config).unwrap();
        assert_eq!(pixels.dimensions(), (4, 4));
        // Row 0 fully written, clipped at two columns
        assert_eq!(pixels.get_pixel(3, 0).0, [255, 0, 0, 255]);
        // Blank line leaves row 1 at the clear color
        assert_eq!(pixels.get_pixel(0, 2).0, [0, 0, 0, 255]);
    }
}
