//! Render-cell quad-tree.
//!
//! Cells mirror level-cache nodes from the root down to the level whose nodes
//! are `min_cell_size` grid cells wide. The renderer owns geometry; this tree
//! only tracks bounds and which cells need new geometry.

use glam::Vec3;
use tracing::debug;

use crate::scene::Aabb;

use super::mutator::GridRect;
use super::square::LevelCache;

#[derive(Clone, Debug)]
pub struct RenderCell {
    /// Level-cache level this cell mirrors.
    pub level: u32,
    /// Grid cells covered, inclusive.
    pub rect: GridRect,
    /// Object-space bounds.
    pub bounds: Aabb,
    /// Every grid cell below is a hole.
    pub empty: bool,
    pub dirty: bool,
    children: Option<[usize; 4]>,
}

impl RenderCell {
    pub fn children(&self) -> Option<[usize; 4]> {
        self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

#[derive(Clone, Debug, Default)]
pub struct CellTree {
    cells: Vec<RenderCell>,
    leaf_level: u32,
}

impl CellTree {
    pub fn build(cache: &LevelCache, square_size: f32, min_cell_size: u32) -> Self {
        let size = cache.size();
        let leaf_side = min_cell_size.max(1).next_power_of_two().min(size);
        let mut tree = Self {
            cells: Vec::new(),
            leaf_level: leaf_side.trailing_zeros(),
        };
        tree.push_node(cache, square_size, cache.level_count() - 1, 0, 0);
        debug!(
            "built {} render cells, leaves {}x{} grid cells",
            tree.cells.len(),
            leaf_side,
            leaf_side
        );
        tree
    }

    fn push_node(
        &mut self,
        cache: &LevelCache,
        square_size: f32,
        level: u32,
        nx: u32,
        ny: u32,
    ) -> usize {
        let id = self.cells.len();
        let side = 1i32 << level;
        let rect = GridRect::new(
            nx as i32 * side,
            ny as i32 * side,
            (nx as i32 + 1) * side - 1,
            (ny as i32 + 1) * side - 1,
        );
        let (bounds, empty) = node_bounds(cache, square_size, level, &rect);
        self.cells.push(RenderCell {
            level,
            rect,
            bounds,
            empty,
            dirty: true,
            children: None,
        });
        if level > self.leaf_level {
            let children = [(0, 0), (1, 0), (0, 1), (1, 1)].map(|(dx, dy)| {
                self.push_node(cache, square_size, level - 1, nx * 2 + dx, ny * 2 + dy)
            });
            self.cells[id].children = Some(children);
        }
        id
    }

    pub fn cells(&self) -> &[RenderCell] {
        &self.cells
    }

    pub fn cell(&self, id: usize) -> Option<&RenderCell> {
        self.cells.get(id)
    }

    pub fn root(&self) -> Option<&RenderCell> {
        self.cells.first()
    }

    pub fn leaf_level(&self) -> u32 {
        self.leaf_level
    }

    pub fn leaves(&self) -> impl Iterator<Item = (usize, &RenderCell)> {
        self.cells.iter().enumerate().filter(|(_, c)| c.is_leaf())
    }

    /// Refresh every cell from the cache and mark all of them dirty.
    pub fn rebuild(&mut self, cache: &LevelCache, square_size: f32) {
        for cell in &mut self.cells {
            let (bounds, empty) = node_bounds(cache, square_size, cell.level, &cell.rect);
            cell.bounds = bounds;
            cell.empty = empty;
            cell.dirty = true;
        }
    }

    /// Refresh and mark dirty the cells overlapping `cells`, a rectangle of
    /// grid cells. Returns the ids of the touched leaves.
    pub fn update_region(
        &mut self,
        cache: &LevelCache,
        square_size: f32,
        cells: &GridRect,
    ) -> Vec<usize> {
        let mut touched = Vec::new();
        if self.cells.is_empty() {
            return touched;
        }
        let size = cache.size() as i32;
        // wrapped corners touch the far row or column
        let mut rects = vec![*cells];
        if cells.min.x < 0 {
            rects.push(GridRect::new(size - 1, cells.min.y.max(0), size - 1, cells.max.y));
        }
        if cells.min.y < 0 {
            rects.push(GridRect::new(cells.min.x.max(0), size - 1, cells.max.x, size - 1));
        }
        if cells.min.x < 0 && cells.min.y < 0 {
            rects.push(GridRect::new(size - 1, size - 1, size - 1, size - 1));
        }
        for rect in &rects {
            self.patch(0, cache, square_size, rect, &mut touched);
        }
        touched.sort_unstable();
        touched.dedup();
        touched
    }

    fn patch(
        &mut self,
        id: usize,
        cache: &LevelCache,
        square_size: f32,
        rect: &GridRect,
        touched: &mut Vec<usize>,
    ) {
        if !self.cells[id].rect.overlaps(rect) {
            return;
        }
        let cell = &mut self.cells[id];
        let (bounds, empty) = node_bounds(cache, square_size, cell.level, &cell.rect);
        cell.bounds = bounds;
        cell.empty = empty;
        cell.dirty = true;
        let children = cell.children;
        match children {
            Some(children) => {
                for child in children {
                    self.patch(child, cache, square_size, rect, touched);
                }
            }
            None => touched.push(id),
        }
    }

    /// Ids of dirty leaves, clearing the dirty mark on every cell.
    pub fn take_dirty(&mut self) -> Vec<usize> {
        let mut out = Vec::new();
        for (id, cell) in self.cells.iter_mut().enumerate() {
            if cell.dirty && cell.children.is_none() {
                out.push(id);
            }
            cell.dirty = false;
        }
        out
    }
}

fn node_bounds(
    cache: &LevelCache,
    square_size: f32,
    level: u32,
    rect: &GridRect,
) -> (Aabb, bool) {
    let node = cache.find_square(level, rect.min.x, rect.min.y);
    let range = node.and_then(|n| n.height_range());
    let (zmin, zmax) = range.unwrap_or((0.0, 0.0));
    let min = Vec3::new(
        rect.min.x as f32 * square_size,
        rect.min.y as f32 * square_size,
        zmin,
    );
    let max = Vec3::new(
        (rect.max.x + 1) as f32 * square_size,
        (rect.max.y + 1) as f32 * square_size,
        zmax,
    );
    (Aabb::new(min, max), range.is_none())
}
