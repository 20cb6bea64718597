// ABOUTME: Application configuration handling.
// ABOUTME: Loads and saves font and grid settings from TOML config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::Color;

/// How the font image is turned into a tintable atlas texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecolorMode {
    /// Pure black becomes transparent, everything else opaque white
    #[default]
    BlackKey,
    /// White with alpha taken from the pixel's luma; keeps anti-aliasing
    Luminance,
}

/// What to draw in the glyph layer for a character the atlas does not map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedGlyph {
    /// Quad at the cell with zero texture coordinates, tinted with the foreground
    #[default]
    SolidBlock,
    /// Zero-area quad, so only the cell background shows
    Skip,
}

/// Which render target implementation draws the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Software,
    Gpu,
}

/// Printable ASCII, space through tilde
pub fn ascii_mapping() -> String {
    (' '..='~').collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    /// Font sheet image (PNG); glyph cells in row-major order
    pub image: Option<PathBuf>,

    /// BDF font used to build the sheet when no image is given
    pub bdf: Option<PathBuf>,

    /// Characters present in the sheet, in cell order
    pub mapping: String,

    /// Cell size in pixels (ignored for BDF fonts, which carry their own)
    pub cell_width: u32,
    pub cell_height: u32,

    pub recolor: RecolorMode,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            image: None,
            bdf: None,
            mapping: ascii_mapping(),
            cell_width: 8,
            cell_height: 16,
            recolor: RecolorMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Grid size in character cells
    pub columns: u32,
    pub rows: u32,

    /// Default colors for cells written from text
    pub foreground: Color,
    pub background: Color,

    /// Color the whole target is cleared to before cells are drawn
    pub clear_color: Color,

    pub unmapped_glyph: UnmappedGlyph,

    pub backend: Backend,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: 80,
            rows: 25,
            foreground: Color::AMBER,
            background: Color::BLACK,
            clear_color: Color::BLACK,
            unmapped_glyph: UnmappedGlyph::default(),
            backend: Backend::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub font: FontConfig,
    pub grid: GridConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

impl Config {
    /// Get the default config file path (~/.config/bitgrid/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bitgrid").join("config.toml"))
    }

    /// Load config from a path
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load config from default path, or return default config if not found
    pub fn load_or_default() -> Self {
        Self::default_path()
            .and_then(|path| Self::load(&path).ok())
            .unwrap_or_default()
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save config to a path
    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mapping_is_printable_ascii() {
        let mapping = ascii_mapping();
        assert_eq!(mapping.chars().count(), 95);
        assert!(mapping.starts_with(" !\"#"));
        assert!(mapping.ends_with('~'));
    }

    #[test]
    fn empty_document_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
[font]
cell_width = 6
recolor = "luminance"

[grid]
columns = 40
unmapped_glyph = "skip"
backend = "gpu"
background = { r = 0.0, g = 0.0, b = 1.0, a = 1.0 }
"#,
        )
        .unwrap();

        assert_eq!(config.font.cell_width, 6);
        assert_eq!(config.font.cell_height, 16);
        assert_eq!(config.font.recolor, RecolorMode::Luminance);
        assert_eq!(config.grid.columns, 40);
        assert_eq!(config.grid.rows, 25);
        assert_eq!(config.grid.unmapped_glyph, UnmappedGlyph::Skip);
        assert_eq!(config.grid.backend, Backend::Gpu);
        assert_eq!(config.grid.background, Color::BLUE);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = std::env::temp_dir().join(format!("bitgrid-config-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = Config::default();
        config.font.image = Some(PathBuf::from("fonts/cp437.png"));
        config.font.mapping = "ABC".to_string();
        config.grid.rows = 3;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = Config::parse("[grid\ncolumns = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
