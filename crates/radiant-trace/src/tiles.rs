//! Tile grids for spreading one sample over several submissions.

use serde::{Deserialize, Serialize};

/// Edge length of a final-render tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole image.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x - self.x < self.width && y - self.y < self.height
    }

    /// True when non-empty and entirely inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.is_empty()
            && self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

/// Row-major tiling of an image; edge tiles are clipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    tiles: Vec<TileRect>,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        let tile_size = tile_size.max(1);
        let mut tiles = Vec::new();
        let mut y = 0;
        while y < height {
            let h = tile_size.min(height - y);
            let mut x = 0;
            while x < width {
                let w = tile_size.min(width - x);
                tiles.push(TileRect::new(x, y, w, h));
                x += w;
            }
            y += h;
        }
        Self { tiles }
    }

    /// A single tile covering the whole frame.
    pub fn single(width: u32, height: u32) -> Self {
        Self {
            tiles: vec![TileRect::full(width, height)],
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<TileRect> {
        self.tiles.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileRect> {
        self.tiles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_uneven_image_exactly_once() {
        let (width, height) = (601, 299);
        let grid = TileGrid::new(width, height, TILE_SIZE);
        assert_eq!(grid.len(), 3 * 2);

        let mut coverage = vec![0u8; (width * height) as usize];
        for tile in grid.iter() {
            assert!(tile.fits_within(width, height));
            for y in tile.y..tile.y + tile.height {
                for x in tile.x..tile.x + tile.width {
                    coverage[(y * width + x) as usize] += 1;
                }
            }
        }
        assert!(coverage.iter().all(|&c| c == 1));

        let total: u64 = grid.iter().map(TileRect::area).sum();
        assert_eq!(total, u64::from(width * height));
    }

    #[test]
    fn small_image_is_one_tile() {
        let grid = TileGrid::new(64, 64, TILE_SIZE);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.get(0), Some(TileRect::full(64, 64)));
        assert_eq!(TileGrid::single(64, 64), grid);
    }

    #[test]
    fn rect_bounds() {
        let rect = TileRect::new(10, 10, 5, 5);
        assert!(rect.contains(10, 14));
        assert!(!rect.contains(15, 10));
        assert!(rect.fits_within(15, 15));
        assert!(!rect.fits_within(14, 15));
        assert!(!TileRect::new(0, 0, 0, 4).fits_within(4, 4));
    }
}
