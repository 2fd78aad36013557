//! Tile coordinates, validation and cache keys.
//!
//! Coordinates arrive as raw signed integers parsed from the request path so
//! that negative values can be represented and rejected. A validated
//! [`TileCoordinate`] is unsigned and immutable.
//!
//! Only the zoom range and the sign of `x`/`y` are checked. Values of `x`/`y`
//! at or beyond `2^zoom` are accepted and passed through to the provider.

use std::fmt;

use crate::error::TileError;

/// Highest zoom level served.
pub const MAX_ZOOM: i64 = 22;

/// File extension used for cached tiles.
pub const TILE_FILE_EXTENSION: &str = "png";

/// A validated slippy-map tile coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    /// Zoom level (0-22)
    pub zoom: u8,

    /// Column, 0-indexed from the west edge
    pub x: u64,

    /// Row, 0-indexed from the north edge
    pub y: u64,
}

impl TileCoordinate {
    /// Validate raw coordinate values.
    ///
    /// Checks run in order: negative zoom, zoom above [`MAX_ZOOM`], negative
    /// `x`, negative `y`.
    pub fn new(zoom: i64, x: i64, y: i64) -> Result<Self, TileError> {
        let invalid = || TileError::InvalidCoordinate { zoom, x, y };

        if zoom < 0 || zoom > MAX_ZOOM {
            return Err(invalid());
        }
        if x < 0 || y < 0 {
            return Err(invalid());
        }

        Ok(Self {
            zoom: zoom as u8,
            x: x as u64,
            y: y as u64,
        })
    }

    /// Stable cache key, `"{zoom}_{x}_{y}"`.
    pub fn cache_key(&self) -> String {
        key_for(self.zoom, self.x, self.y)
    }

    /// On-disk file name, the cache key plus `.png`.
    pub fn file_name(&self) -> String {
        file_name_for_key(&self.cache_key())
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Validate raw values into a [`TileCoordinate`].
pub fn validate(zoom: i64, x: i64, y: i64) -> Result<TileCoordinate, TileError> {
    TileCoordinate::new(zoom, x, y)
}

/// Derive the cache key for a coordinate.
pub fn key_for(zoom: impl fmt::Display, x: impl fmt::Display, y: impl fmt::Display) -> String {
    format!("{}_{}_{}", zoom, x, y)
}

/// File name for a cache key.
pub fn file_name_for_key(key: &str) -> String {
    format!("{}.{}", key, TILE_FILE_EXTENSION)
}

/// Recover the cache key from a cached file name, if it looks like one of ours.
///
/// Temp files and anything not matching `{zoom}_{x}_{y}.png` yield `None`.
pub fn key_from_file_name(name: &str) -> Option<&str> {
    let key = name.strip_suffix(".png")?;
    let mut parts = key.split('_');
    let zoom: u8 = parts.next()?.parse().ok()?;
    let _x: u64 = parts.next()?.parse().ok()?;
    let _y: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || i64::from(zoom) > MAX_ZOOM {
        return None;
    }
    Some(key)
}
