//! Quad-tree level cache.
//!
//! Level 0 holds one [`TerrainSquare`] per grid cell. Every level above halves
//! the side length by merging 2x2 children, up to a single root whose range
//! spans the whole block. External LOD selectors and the ray caster read the
//! per-node bounds and flags directly instead of walking the height field.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use super::heightfield::{fixed_to_float, HeightField};
use super::mutator::GridRect;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SquareFlags: u8 {
        /// Hole. No collision or render geometry.
        const EMPTY = 1 << 0;
        /// The cell is split along the (x, y) to (x + 1, y + 1) diagonal.
        const SPLIT45 = 1 << 1;
        /// At least one cell below this node is a hole.
        const HAS_EMPTY = 1 << 2;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TerrainSquare {
    pub min_height: u16,
    pub max_height: u16,
    flags: u8,
    _pad: u8,
}

impl TerrainSquare {
    pub fn new(min_height: u16, max_height: u16, flags: SquareFlags) -> Self {
        Self {
            min_height,
            max_height,
            flags: flags.bits(),
            _pad: 0,
        }
    }

    #[inline]
    pub fn flags(&self) -> SquareFlags {
        SquareFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flags().contains(SquareFlags::EMPTY)
    }

    /// `[min, max]` in world units, `None` for a fully empty node.
    pub fn height_range(&self) -> Option<(f32, f32)> {
        if self.is_empty() {
            None
        } else {
            Some((fixed_to_float(self.min_height), fixed_to_float(self.max_height)))
        }
    }

    fn aggregate(children: [TerrainSquare; 4]) -> Self {
        let mut min = u16::MAX;
        let mut max = 0u16;
        let mut flags = SquareFlags::empty();
        let mut all_empty = true;
        for child in children {
            let f = child.flags();
            if f.intersects(SquareFlags::EMPTY | SquareFlags::HAS_EMPTY) {
                flags |= SquareFlags::HAS_EMPTY;
            }
            if f.contains(SquareFlags::EMPTY) {
                continue;
            }
            all_empty = false;
            min = min.min(child.min_height);
            max = max.max(child.max_height);
        }
        if all_empty {
            // sentinel: inverted range, skipped by parents
            flags |= SquareFlags::EMPTY;
        }
        Self::new(min, max, flags)
    }
}

#[derive(Clone, Debug)]
pub struct LevelCache {
    size: u32,
    levels: Vec<Vec<TerrainSquare>>,
}

impl LevelCache {
    pub fn build(field: &HeightField) -> Self {
        let size = field.size();
        let levels = (0..=field.shift())
            .map(|level| {
                let side = (size >> level) as usize;
                vec![TerrainSquare::default(); side * side]
            })
            .collect();
        let mut cache = Self { size, levels };
        let all = GridRect::new(0, 0, size as i32 - 1, size as i32 - 1);
        for level in 0..cache.level_count() {
            cache.rebuild_level(level, field, &all);
        }
        cache
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Nodes per side at `level`.
    #[inline]
    pub fn level_size(&self, level: u32) -> u32 {
        self.size.checked_shr(level).unwrap_or(0)
    }

    /// Level 0 (one node per grid cell) first, root last.
    pub fn levels(&self) -> impl Iterator<Item = &[TerrainSquare]> + '_ {
        self.levels.iter().map(Vec::as_slice)
    }

    pub fn level(&self, level: u32) -> Option<&[TerrainSquare]> {
        self.levels.get(level as usize).map(Vec::as_slice)
    }

    /// Raw bytes of one level, for handing to an external LOD selector or GPU.
    pub fn level_bytes(&self, level: u32) -> Option<&[u8]> {
        self.level(level).map(bytemuck::cast_slice)
    }

    pub fn root(&self) -> &TerrainSquare {
        // the top level always has exactly one node
        &self.levels[self.levels.len() - 1][0]
    }

    pub fn height_range(&self) -> Option<(f32, f32)> {
        self.root().height_range()
    }

    /// Node at `level` covering grid cell `(x, y)`.
    pub fn find_square(&self, level: u32, x: i32, y: i32) -> Option<&TerrainSquare> {
        if x < 0 || y < 0 || x as u32 >= self.size || y as u32 >= self.size {
            return None;
        }
        let nx = (x as u32).checked_shr(level)?;
        let ny = (y as u32).checked_shr(level)?;
        self.node(level, nx, ny)
    }

    /// Node by its own coordinates within `level`.
    pub fn node(&self, level: u32, nx: u32, ny: u32) -> Option<&TerrainSquare> {
        let side = self.level_size(level);
        if nx >= side || ny >= side {
            return None;
        }
        self.levels
            .get(level as usize)
            .map(|nodes| &nodes[(ny * side + nx) as usize])
    }

    /// Recompute every node at `level` whose footprint overlaps `rect`.
    ///
    /// `rect` is in cell coordinates. A range that leaves the grid on either
    /// side stands for wrapped corners and refreshes the whole row or column
    /// span of that level.
    pub fn rebuild_level(&mut self, level: u32, field: &HeightField, rect: &GridRect) {
        let Some(side) = self.levels.get(level as usize).map(|_| self.level_size(level)) else {
            return;
        };
        let (x0, x1) = node_span(rect.min.x, rect.max.x, level, side, self.size);
        let (y0, y1) = node_span(rect.min.y, rect.max.y, level, side, self.size);

        for ny in y0..=y1 {
            for nx in x0..=x1 {
                let square = if level == 0 {
                    Self::cell_square(field, nx as i32, ny as i32)
                } else {
                    let below = &self.levels[level as usize - 1];
                    let child_side = side * 2;
                    let at = |cx: u32, cy: u32| below[(cy * child_side + cx) as usize];
                    TerrainSquare::aggregate([
                        at(nx * 2, ny * 2),
                        at(nx * 2 + 1, ny * 2),
                        at(nx * 2, ny * 2 + 1),
                        at(nx * 2 + 1, ny * 2 + 1),
                    ])
                };
                self.levels[level as usize][(ny * side + nx) as usize] = square;
            }
        }
    }

    fn cell_square(field: &HeightField, x: i32, y: i32) -> TerrainSquare {
        let corners = [
            field.get_height(x, y),
            field.get_height(x + 1, y),
            field.get_height(x, y + 1),
            field.get_height(x + 1, y + 1),
        ];
        let min = corners.iter().copied().min().unwrap_or(0);
        let max = corners.iter().copied().max().unwrap_or(0);
        TerrainSquare::new(min, max, field.cell_flags(x, y))
    }
}

fn node_span(min: i32, max: i32, level: u32, side: u32, size: u32) -> (u32, u32) {
    if min < 0 || max < min || max as u32 >= size {
        (0, side - 1)
    } else {
        ((min as u32) >> level, ((max as u32) >> level).min(side - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::heightfield::float_to_fixed;

    fn field_with_peak() -> HeightField {
        let mut field = HeightField::new(8).unwrap();
        field.set_height(3, 5, float_to_fixed(20.0));
        field.set_height(6, 1, float_to_fixed(4.0));
        field
    }

    #[test]
    fn level_sizes_halve() {
        let cache = LevelCache::build(&HeightField::new(16).unwrap());
        assert_eq!(cache.level_count(), 5);
        assert_eq!(cache.level_size(0), 16);
        assert_eq!(cache.level_size(4), 1);
        assert_eq!(cache.level(2).unwrap().len(), 16);
        let lens: Vec<usize> = cache.levels().map(|l| l.len()).collect();
        assert_eq!(lens, vec![256, 64, 16, 4, 1]);
    }

    #[test]
    fn root_spans_whole_field() {
        let cache = LevelCache::build(&field_with_peak());
        assert_eq!(cache.root().min_height, 0);
        assert_eq!(cache.root().max_height, float_to_fixed(20.0));
        assert_eq!(cache.height_range(), Some((0.0, 20.0)));
    }

    #[test]
    fn level_zero_uses_cell_corners() {
        let cache = LevelCache::build(&field_with_peak());
        // (3, 5) is a corner of cells (2..=3, 4..=5)
        for (x, y) in [(2, 4), (3, 4), (2, 5), (3, 5)] {
            assert_eq!(
                cache.find_square(0, x, y).unwrap().max_height,
                float_to_fixed(20.0)
            );
        }
        assert_eq!(cache.find_square(0, 4, 5).unwrap().max_height, 0);
    }

    #[test]
    fn huge_levels_are_out_of_range() {
        let cache = LevelCache::build(&field_with_peak());
        assert_eq!(cache.level_size(32), 0);
        assert_eq!(cache.level_size(40), 0);
        assert!(cache.find_square(32, 1, 1).is_none());
        assert!(cache.find_square(u32::MAX, 0, 0).is_none());
        assert!(cache.node(33, 0, 0).is_none());
    }

    #[test]
    fn find_square_rejects_outside_cells() {
        let cache = LevelCache::build(&field_with_peak());
        assert!(cache.find_square(0, -1, 0).is_none());
        assert!(cache.find_square(0, 0, 8).is_none());
        assert!(cache.find_square(9, 0, 0).is_none());
        assert!(cache.find_square(3, 7, 7).is_some());
    }

    #[test]
    fn all_empty_children_propagate_sentinel() {
        let mut field = field_with_peak();
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            field.set_empty(x, y, true);
        }
        let cache = LevelCache::build(&field);
        let parent = cache.find_square(1, 0, 0).unwrap();
        assert!(parent.is_empty());
        assert!(parent.height_range().is_none());
        let grand = cache.find_square(2, 0, 0).unwrap();
        assert!(!grand.is_empty());
        assert!(grand.flags().contains(SquareFlags::HAS_EMPTY));
    }

    #[test]
    fn level_bytes_match_node_layout() {
        let cache = LevelCache::build(&HeightField::new(4).unwrap());
        assert_eq!(
            cache.level_bytes(0).unwrap().len(),
            16 * std::mem::size_of::<TerrainSquare>()
        );
        assert!(cache.level_bytes(3).is_none());
    }
}
