//! Application configuration.
//!
//! The configuration is read from `$XDG_CONFIG_HOME/i3expo/config.json`.
//! Every section and every key is optional: a minimal `{}` file is valid and
//! everything falls back to the compiled-in defaults.  Unknown keys are
//! ignored so the file can carry settings for newer versions.
//!
//! # Example
//!
//! ```json
//! {
//!   "layout": { "padding_percent_x": 4, "frame_width_px": 3 },
//!   "appearance": {
//!     "background": "gray15",
//!     "palette": { "active": { "frame": "#ff8800", "tile": [40, 40, 40] } },
//!     "wallpaper": "/home/me/Pictures/wall.png"
//!   },
//!   "labels": { "position": "inside", "size": 18 },
//!   "output_aliases": { "HDMI-A-1": "TV" },
//!   "new_workspace": { "policy": "filler" },
//!   "capture": { "backend": "grim", "min_interval_ms": 100 }
//! }
//! ```

use crate::allocator::AllocationPolicy;
use crate::capture::CaptureBackend;
use crate::controller::SessionSettings;
use crate::tile::TileStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub layout: LayoutConfig,
    pub appearance: AppearanceConfig,
    pub labels: LabelConfig,
    /// Display label per output name.
    pub output_aliases: HashMap<String, String>,
    pub new_workspace: NewWorkspaceConfig,
    pub capture: CaptureConfig,
    pub overlay: OverlayConfig,
}

/// Grid geometry, in percent of the screen size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub padding_percent_x: f64,
    pub padding_percent_y: f64,
    pub spacing_percent_x: f64,
    pub spacing_percent_y: f64,
    /// Thickness of the colored frame around each tile.
    pub frame_width_px: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            padding_percent_x: 5.0,
            padding_percent_y: 5.0,
            spacing_percent_x: 5.0,
            spacing_percent_y: 5.0,
            frame_width_px: 5,
        }
    }
}

/// Frame and fill color for one tile status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileColors {
    pub frame: Color,
    pub tile: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    pub active: TileColors,
    pub inactive: TileColors,
    pub unknown: TileColors,
    pub placeholder: TileColors,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            active: TileColors {
                frame: Color::rgb(0x3b, 0x4f, 0x8a),
                tile: Color::rgb(0x5a, 0x6d, 0xa4),
            },
            inactive: TileColors {
                frame: Color::rgb(0x43, 0x74, 0x7b),
                tile: Color::rgb(0x93, 0xaf, 0xb3),
            },
            unknown: TileColors {
                frame: Color::rgb(0xc8, 0x98, 0x6b),
                tile: Color::rgb(0xff, 0xe6, 0xd0),
            },
            placeholder: TileColors {
                frame: Color::gray(60),
                tile: Color::gray(80),
            },
        }
    }
}

impl Palette {
    pub fn for_status(&self, status: TileStatus) -> TileColors {
        match status {
            TileStatus::Active => self.active,
            TileStatus::Inactive => self.inactive,
            TileStatus::Unknown => self.unknown,
            TileStatus::Placeholder => self.placeholder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppearanceConfig {
    pub background: Color,
    /// How much lighter a hovered tile is drawn (0 to 100).
    pub highlight_percentage: u8,
    /// Stretch thumbnails to fill their tile instead of letterboxing.
    pub thumb_stretch: bool,
    /// Image drawn in placeholder tiles.
    pub wallpaper: Option<PathBuf>,
    pub palette: Palette,
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            background: Color::gray(20),
            highlight_percentage: 20,
            thumb_stretch: false,
            wallpaper: None,
            palette: Palette::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPosition {
    #[default]
    Below,
    Above,
    Inside,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub show: bool,
    pub font: String,
    pub size: f64,
    pub color: Color,
    pub position: LabelPosition,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            show: true,
            font: "sans-serif".into(),
            size: 25.0,
            color: Color::WHITE,
            position: LabelPosition::Below,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewWorkspaceConfig {
    /// Offer one placeholder tile per output.
    pub enabled: bool,
    pub policy: AllocationPolicy,
}

impl Default for NewWorkspaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: AllocationPolicy::Sequential,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    /// Sync requests closer together than this are dropped.
    pub min_interval_ms: u64,
    /// Sync at least this often even without window-manager events.
    pub fallback_tick_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::Auto,
            min_interval_ms: 150,
            fallback_tick_ms: 1000,
        }
    }
}

impl CaptureConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn fallback_tick(&self) -> Duration {
        Duration::from_millis(self.fallback_tick_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Input polling and redraw rate, in frames per second.
    pub frame_rate: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { frame_rate: 60 }
    }
}

impl OverlayConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.frame_rate.max(1)))
    }
}

impl Config {
    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ConfigError(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Config::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values the layout or the render loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.layout;
        for (axis, padding, spacing) in [
            ("x", l.padding_percent_x, l.spacing_percent_x),
            ("y", l.padding_percent_y, l.spacing_percent_y),
        ] {
            if !(0.0..50.0).contains(&padding) {
                return Err(ConfigError(format!(
                    "layout.padding_percent_{} must be in [0, 50), got {}",
                    axis, padding
                )));
            }
            if spacing < 0.0 || padding + spacing >= 100.0 {
                return Err(ConfigError(format!(
                    "layout: padding + spacing on {} must stay below 100%, got {} + {}",
                    axis, padding, spacing
                )));
            }
        }
        if self.appearance.highlight_percentage > 100 {
            return Err(ConfigError(format!(
                "appearance.highlight_percentage must be at most 100, got {}",
                self.appearance.highlight_percentage
            )));
        }
        if !(1..=240).contains(&self.overlay.frame_rate) {
            return Err(ConfigError(format!(
                "overlay.frame_rate must be in 1..=240, got {}",
                self.overlay.frame_rate
            )));
        }
        if self.labels.size <= 0.0 {
            return Err(ConfigError(format!(
                "labels.size must be positive, got {}",
                self.labels.size
            )));
        }
        if self.capture.min_interval_ms > self.capture.fallback_tick_ms {
            return Err(ConfigError(format!(
                "capture.min_interval_ms ({}) exceeds capture.fallback_tick_ms ({})",
                self.capture.min_interval_ms, self.capture.fallback_tick_ms
            )));
        }
        Ok(())
    }

    /// What the overlay controller needs to lay out a session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            padding_percent: (self.layout.padding_percent_x, self.layout.padding_percent_y),
            spacing_percent: (self.layout.spacing_percent_x, self.layout.spacing_percent_y),
            frame_width: self.layout.frame_width_px,
            thumb_stretch: self.appearance.thumb_stretch,
            new_workspaces: self
                .new_workspace
                .enabled
                .then_some(self.new_workspace.policy),
        }
    }
}

/// Error from loading, parsing or validating a configuration file.
#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(String);

//  Colors

/// An RGBA color with 8 bits per channel.
///
/// Accepted spellings: `"#rgb"`, `"#rrggbb"`, `"#rrggbbaa"`, `[r, g, b]`,
/// `[r, g, b, a]`, `"white"`, `"black"` and `"grayN"` / `"greyN"` with N a
/// percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ColorSpec", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Neutral gray at `percent` brightness.
    pub const fn gray(percent: u8) -> Self {
        let percent = if percent > 100 { 100 } else { percent };
        let v = ((percent as u32 * 255 + 50) / 100) as u8;
        Self::rgb(v, v, v)
    }

    /// Move each channel `percent` of the way towards white.
    pub fn lighten(self, percent: u8) -> Self {
        let p = u32::from(percent.min(100));
        let mix = |c: u8| (u32::from(c) + (255 - u32::from(c)) * p / 100) as u8;
        Self {
            r: mix(self.r),
            g: mix(self.g),
            b: mix(self.b),
            a: self.a,
        }
    }

    /// Channels as `0.0..=1.0` floats, for cairo.
    pub fn to_f64(self) -> (f64, f64, f64, f64) {
        (
            f64::from(self.r) / 255.0,
            f64::from(self.g) / 255.0,
            f64::from(self.b) / 255.0,
            f64::from(self.a) / 255.0,
        )
    }

    /// Parse the string spellings.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let s = raw.trim().to_ascii_lowercase();
        let bad = || ConfigError(format!("invalid color {:?}", raw));
        if let Some(hex) = s.strip_prefix('#') {
            if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(bad());
            }
            let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| bad());
            return match hex.len() {
                3 => {
                    let nib = |i: usize| {
                        u8::from_str_radix(&hex[i..i + 1], 16)
                            .map(|v| v * 17)
                            .map_err(|_| bad())
                    };
                    Ok(Self::rgb(nib(0)?, nib(1)?, nib(2)?))
                }
                6 => Ok(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
                8 => Ok(Self {
                    r: byte(0)?,
                    g: byte(2)?,
                    b: byte(4)?,
                    a: byte(6)?,
                }),
                _ => Err(bad()),
            };
        }
        match s.as_str() {
            "white" => return Ok(Self::WHITE),
            "black" => return Ok(Self::BLACK),
            _ => {}
        }
        let level = s.strip_prefix("gray").or_else(|| s.strip_prefix("grey"));
        match level.map(str::parse::<u8>) {
            Some(Ok(percent)) if percent <= 100 => Ok(Self::gray(percent)),
            _ => Err(bad()),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorSpec {
    Name(String),
    Channels(Vec<u8>),
}

impl TryFrom<ColorSpec> for Color {
    type Error = ConfigError;

    fn try_from(spec: ColorSpec) -> Result<Self, ConfigError> {
        match spec {
            ColorSpec::Name(name) => Color::parse(&name),
            ColorSpec::Channels(c) => match c.as_slice() {
                [r, g, b] => Ok(Color::rgb(*r, *g, *b)),
                [r, g, b, a] => Ok(Color {
                    r: *r,
                    g: *g,
                    b: *b,
                    a: *a,
                }),
                _ => Err(ConfigError(format!(
                    "a color needs 3 or 4 channels, got {}",
                    c.len()
                ))),
            },
        }
    }
}

impl From<Color> for String {
    fn from(color: Color) -> String {
        color.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_ID: AtomicU32 = AtomicU32::new(0);

    fn tmp_config_path() -> PathBuf {
        let id = TEST_ID.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("i3expo-config-{}-{}.json", std::process::id(), id))
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.layout.frame_width_px, 5);
        assert_eq!(cfg.capture.min_interval_ms, 150);
        assert_eq!(cfg.overlay.frame_rate, 60);
        assert!(cfg.new_workspace.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_sections() {
        let json = r##"{
            "layout": { "padding_percent_x": 2.5 },
            "appearance": {
                "palette": { "active": { "frame": "#ff8800", "tile": [1, 2, 3] } },
                "wallpaper": "/tmp/wall.png"
            },
            "labels": { "position": "inside" },
            "output_aliases": { "HDMI-A-1": "TV" },
            "new_workspace": { "policy": "filler" },
            "capture": { "backend": "x11" }
        }"##;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.layout.padding_percent_x, 2.5);
        assert_eq!(cfg.layout.padding_percent_y, 5.0);
        assert_eq!(cfg.appearance.palette.active.frame, Color::rgb(0xff, 0x88, 0));
        assert_eq!(cfg.appearance.palette.active.tile, Color::rgb(1, 2, 3));
        assert_eq!(cfg.appearance.palette.unknown, Palette::default().unknown);
        assert_eq!(cfg.appearance.wallpaper, Some(PathBuf::from("/tmp/wall.png")));
        assert_eq!(cfg.labels.position, LabelPosition::Inside);
        assert_eq!(cfg.output_aliases.get("HDMI-A-1").map(String::as_str), Some("TV"));
        assert_eq!(cfg.new_workspace.policy, AllocationPolicy::Filler);
        assert_eq!(cfg.capture.backend, CaptureBackend::X11);
    }

    #[test]
    fn unknown_keys_ignored() {
        let json = r#"{ "future": 1, "layout": { "wobble": true } }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.layout, LayoutConfig::default());
    }

    #[test]
    fn color_spellings() {
        assert_eq!(Color::parse("#fff").unwrap(), Color::WHITE);
        assert_eq!(Color::parse("#3B4F8A").unwrap(), Color::rgb(0x3b, 0x4f, 0x8a));
        assert_eq!(Color::parse("#00000080").unwrap().a, 0x80);
        assert_eq!(Color::parse("black").unwrap(), Color::BLACK);
        assert_eq!(Color::parse("gray100").unwrap(), Color::WHITE);
        assert_eq!(Color::parse("grey0").unwrap(), Color::BLACK);
        assert_eq!(Color::parse("gray50").unwrap(), Color::rgb(128, 128, 128));
        for bad in ["#12", "#ggg", "gray101", "grayish", "teal", ""] {
            assert!(Color::parse(bad).is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn color_channel_lists() {
        let c: Color = serde_json::from_str("[10, 20, 30, 40]").unwrap();
        assert_eq!((c.r, c.g, c.b, c.a), (10, 20, 30, 40));
        assert!(serde_json::from_str::<Color>("[1, 2]").is_err());
        assert!(serde_json::from_str::<Color>("[1, 2, 300]").is_err());
    }

    #[test]
    fn color_serializes_as_hex() {
        assert_eq!(serde_json::to_string(&Color::rgb(1, 2, 255)).unwrap(), r##""#0102ff""##);
        let round: Color = serde_json::from_str(r##""#0102ff80""##).unwrap();
        assert_eq!(round.to_string(), "#0102ff80");
    }

    #[test]
    fn lighten_moves_towards_white() {
        let c = Color::rgb(0, 100, 255).lighten(50);
        assert_eq!((c.r, c.g, c.b), (127, 177, 255));
        assert_eq!(Color::BLACK.lighten(0), Color::BLACK);
        assert_eq!(Color::BLACK.lighten(100), Color::WHITE);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.layout.padding_percent_x = 50.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.layout.padding_percent_y = 40.0;
        cfg.layout.spacing_percent_y = 60.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.overlay.frame_rate = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.capture.min_interval_ms = 5000;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.appearance.highlight_percentage = 101;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn session_settings_follow_config() {
        let mut cfg = Config::default();
        cfg.new_workspace.enabled = false;
        cfg.appearance.thumb_stretch = true;
        let s = cfg.session_settings();
        assert_eq!(s.new_workspaces, None);
        assert!(s.thumb_stretch);
        assert_eq!(Config::default().session_settings(), SessionSettings::default());
    }

    #[test]
    fn load_from_file() {
        let path = tmp_config_path();
        std::fs::write(&path, r#"{ "overlay": { "frame_rate": 30 } }"#).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.overlay.frame_rate, 30);
        assert_eq!(cfg.overlay.frame_interval(), Duration::from_millis(33));

        std::fs::write(&path, r#"{ "overlay": { "frame_rate": 999 } }"#).unwrap();
        assert!(Config::load(&path).is_err());

        std::fs::write(&path, "not json").unwrap();
        assert!(Config::load(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_means_defaults() {
        let path = tmp_config_path();
        assert!(Config::load(&path).is_err());
        assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
    }
}
