use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Side lengths accepted for atlas pages.
pub const VALID_TEXTURE_SIZES: [u32; 8] = [128, 256, 512, 1024, 2048, 4096, 8192, 16384];

/// Fallback side length for anything outside [`VALID_TEXTURE_SIZES`].
pub const DEFAULT_TEXTURE_SIZE: u32 = 1024;

/// Validated square texture side length.
///
/// Every constructor is permissive: values outside [`VALID_TEXTURE_SIZES`]
/// (non power-of-two, out of range, unparsable strings, JSON that is neither
/// an integer nor a numeric string)
/// become [`DEFAULT_TEXTURE_SIZE`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "u32")]
pub struct TextureSize(u32);

impl TextureSize {
    pub fn new(size: u32) -> Self {
        if VALID_TEXTURE_SIZES.contains(&size) {
            Self(size)
        } else {
            Self(DEFAULT_TEXTURE_SIZE)
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for TextureSize {
    fn default() -> Self {
        Self(DEFAULT_TEXTURE_SIZE)
    }
}

impl fmt::Display for TextureSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TextureSize {
    fn from(size: u32) -> Self {
        Self::new(size)
    }
}

impl From<TextureSize> for u32 {
    fn from(size: TextureSize) -> Self {
        size.0
    }
}

impl From<&str> for TextureSize {
    fn from(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl FromStr for TextureSize {
    type Err = Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.trim().parse::<u32>().map(Self::new).unwrap_or_default())
    }
}

/// Numbers and numeric strings read the same way as [`FromStr`]; anything
/// else (bools, floats, objects) is the default.
impl From<serde_json::Value> for TextureSize {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Self::new)
                .unwrap_or_default(),
            serde_json::Value::String(s) => Self::from(s.as_str()),
            _ => Self::default(),
        }
    }
}

/// Texture manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Side length of every atlas page in pixels.
    #[serde(default)]
    pub texture_size: TextureSize,
    /// Draw split/claim outlines onto the pages (diagnostics only).
    #[serde(default)]
    pub debug: bool,
    /// RGBA fill for freshly created surfaces.
    #[serde(default = "default_background")]
    pub background: [u8; 4],
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            texture_size: TextureSize::default(),
            debug: false,
            background: default_background(),
        }
    }
}

fn default_background() -> [u8; 4] {
    [0, 0, 0, 0]
}

/// Builder for `ManagerConfig` for ergonomic construction.
#[derive(Debug, Default, Clone)]
pub struct ManagerConfigBuilder {
    cfg: ManagerConfig,
}

impl ManagerConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: ManagerConfig::default(),
        }
    }
    pub fn texture_size(mut self, v: u32) -> Self {
        self.cfg.texture_size = TextureSize::new(v);
        self
    }
    pub fn validated_size(mut self, v: TextureSize) -> Self {
        self.cfg.texture_size = v;
        self
    }
    pub fn debug(mut self, v: bool) -> Self {
        self.cfg.debug = v;
        self
    }
    pub fn background(mut self, v: [u8; 4]) -> Self {
        self.cfg.background = v;
        self
    }
    pub fn build(self) -> ManagerConfig {
        self.cfg
    }
}

impl ManagerConfig {
    /// Create a fluent builder for `ManagerConfig`.
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_power_of_two_choice() {
        for size in VALID_TEXTURE_SIZES {
            assert_eq!(TextureSize::new(size).get(), size);
        }
    }

    #[test]
    fn falls_back_on_invalid_sizes() {
        assert_eq!(TextureSize::new(123).get(), 1024);
        assert_eq!(TextureSize::new(64).get(), 1024);
        assert_eq!(TextureSize::new(32768).get(), 1024);
        assert_eq!(TextureSize::from("invalid").get(), 1024);
        assert_eq!(TextureSize::from("2048").get(), 2048);
    }

    #[test]
    fn deserializes_permissively() {
        let cfg: ManagerConfig = serde_json::from_str(r#"{"texture_size": "plonk"}"#).unwrap();
        assert_eq!(cfg.texture_size.get(), 1024);
        assert!(!cfg.debug);
        assert_eq!(cfg.background, [0, 0, 0, 0]);

        let cfg: ManagerConfig =
            serde_json::from_str(r#"{"texture_size": 256, "debug": true}"#).unwrap();
        assert_eq!(cfg.texture_size.get(), 256);
        assert!(cfg.debug);

        let cfg: ManagerConfig = serde_json::from_str(r#"{"texture_size": -5}"#).unwrap();
        assert_eq!(cfg.texture_size.get(), 1024);
    }

    #[test]
    fn text_and_json_strings_agree() {
        for text in ["512", " 2048 ", "300", "plonk", ""] {
            let from_json: TextureSize =
                serde_json::from_value(serde_json::Value::String(text.to_string())).unwrap();
            assert_eq!(from_json, TextureSize::from(text), "input {text:?}");
        }
        let size: TextureSize = serde_json::from_str(r#""512""#).unwrap();
        assert_eq!(size.get(), 512);
        let size: TextureSize = serde_json::from_str("true").unwrap();
        assert_eq!(size.get(), 1024);
        let size: TextureSize = serde_json::from_str("512.0").unwrap();
        assert_eq!(size.get(), 1024);
    }

    #[test]
    fn serializes_as_plain_number() {
        let cfg = ManagerConfig::builder().texture_size(512).build();
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["texture_size"], 512);
    }
}
