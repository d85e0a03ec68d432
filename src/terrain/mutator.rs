//! Height and material edits plus dirty-rectangle invalidation.
//!
//! Writes go straight to the [`HeightField`](super::HeightField) and are not
//! reflected in the level cache until [`TerrainFile::update_grid`] runs over
//! the edited rectangle. Batches are validated in full before the first write.

use glam::IVec2;
use tracing::{debug, warn};

use crate::error::{Error, RangeError, Result};

use super::file::TerrainFile;
use super::heightfield::float_to_fixed;

/// Inclusive rectangle of grid samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridRect {
    pub min: IVec2,
    pub max: IVec2,
}

impl GridRect {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min: IVec2::new(min_x, min_y),
            max: IVec2::new(max_x, max_y),
        }
    }

    pub fn from_points(a: IVec2, b: IVec2) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn point(p: IVec2) -> Self {
        Self { min: p, max: p }
    }

    pub fn contains(&self, p: IVec2) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn overlaps(&self, other: &GridRect) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    pub fn union(&self, other: &GridRect) -> GridRect {
        GridRect {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Cells whose corners include any sample of this rectangle.
    pub fn touched_cells(&self) -> GridRect {
        GridRect {
            min: self.min - IVec2::ONE,
            max: self.max,
        }
    }
}

/// Reject rectangles that are inverted or leave the `size x size` grid.
pub fn validate_rect(rect: &GridRect, size: u32) -> Result<()> {
    let limit = size as i32;
    let inside = rect.min.cmpge(IVec2::ZERO).all() && rect.max.cmplt(IVec2::splat(limit)).all();
    if rect.min.cmple(rect.max).all() && inside {
        Ok(())
    } else {
        Err(Error::OutOfRange(RangeError {
            what: "grid rectangle",
            min: [rect.min.x as i64, rect.min.y as i64],
            max: [rect.max.x as i64, rect.max.y as i64],
            size,
        }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum EditOp {
    Height(f32),
    Material(u8),
    Empty(bool),
}

/// A batch of grid writes applied atomically by [`TerrainFile::apply_edit`].
#[derive(Clone, Debug, Default)]
pub struct GridEdit {
    ops: Vec<(IVec2, EditOp)>,
}

impl GridEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_height(&mut self, x: i32, y: i32, height: f32) -> &mut Self {
        self.ops.push((IVec2::new(x, y), EditOp::Height(height)));
        self
    }

    pub fn set_material(&mut self, x: i32, y: i32, index: u8) -> &mut Self {
        self.ops.push((IVec2::new(x, y), EditOp::Material(index)));
        self
    }

    pub fn set_empty(&mut self, x: i32, y: i32, empty: bool) -> &mut Self {
        self.ops.push((IVec2::new(x, y), EditOp::Empty(empty)));
        self
    }

    /// Fill a whole rectangle with one height.
    pub fn fill_height(&mut self, rect: GridRect, height: f32) -> &mut Self {
        for y in rect.min.y..=rect.max.y {
            for x in rect.min.x..=rect.max.x {
                self.set_height(x, y, height);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn writes_materials(&self) -> bool {
        self.ops
            .iter()
            .any(|(_, op)| matches!(op, EditOp::Material(_)))
    }

    /// Smallest rectangle covering every write, `None` for an empty batch.
    pub fn bounds(&self) -> Option<GridRect> {
        self.ops
            .iter()
            .map(|(p, _)| GridRect::point(*p))
            .reduce(|a, b| a.union(&b))
    }
}

impl TerrainFile {
    /// Validated single-sample write. The level cache is left stale.
    pub fn set_height(&mut self, x: i32, y: i32, height: f32) -> Result<()> {
        let p = IVec2::new(x, y);
        validate_rect(&GridRect::point(p), self.size())?;
        self.field_mut().set_height(x, y, float_to_fixed(height));
        Ok(())
    }

    pub fn set_material_index(&mut self, x: i32, y: i32, index: u8) -> Result<()> {
        validate_rect(&GridRect::point(IVec2::new(x, y)), self.size())?;
        self.field_mut().set_material_index(x, y, index);
        Ok(())
    }

    pub fn set_empty(&mut self, x: i32, y: i32, empty: bool) -> Result<()> {
        validate_rect(&GridRect::point(IVec2::new(x, y)), self.size())?;
        self.field_mut().set_empty(x, y, empty);
        Ok(())
    }

    /// Apply every write in `edit` or none of them. Returns the covered
    /// rectangle; the level cache is left stale.
    pub fn apply_edit(&mut self, edit: &GridEdit) -> Result<GridRect> {
        let Some(bounds) = edit.bounds() else {
            return Err(Error::format("grid edit", "edit contains no writes"));
        };
        if let Err(err) = validate_rect(&bounds, self.size()) {
            warn!("rejecting grid edit of {} writes: {}", edit.len(), err);
            return Err(err);
        }

        let field = self.field_mut();
        for (p, op) in &edit.ops {
            match *op {
                EditOp::Height(h) => field.set_height(p.x, p.y, float_to_fixed(h)),
                EditOp::Material(m) => field.set_material_index(p.x, p.y, m),
                EditOp::Empty(e) => field.set_empty(p.x, p.y, e),
            }
        }
        Ok(bounds)
    }

    /// Reconcile the level cache with the samples in `[min, max]`.
    ///
    /// Every level is rebuilt bottom-up over the cells touched by the
    /// rectangle. Fails without touching the cache when the rectangle is out of
    /// range.
    pub fn update_grid(&mut self, min: IVec2, max: IVec2) -> Result<GridRect> {
        let rect = GridRect { min, max };
        validate_rect(&rect, self.size())?;

        let cells = rect.touched_cells();
        let (field, cache) = self.parts_mut();
        for level in 0..cache.level_count() {
            cache.rebuild_level(level, field, &cells);
        }
        self.mark_checksum_stale();
        debug!(
            "rebuilt level cache over [{}, {}]..[{}, {}]",
            min.x, min.y, max.x, max.y
        );
        Ok(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_inverted_and_outside() {
        assert!(validate_rect(&GridRect::new(0, 0, 3, 3), 4).is_ok());
        assert!(validate_rect(&GridRect::new(2, 0, 1, 3), 4).is_err());
        assert!(validate_rect(&GridRect::new(-1, 0, 1, 1), 4).is_err());
        assert!(validate_rect(&GridRect::new(0, 0, 4, 1), 4).is_err());
    }

    #[test]
    fn touched_cells_reach_back_one() {
        let cells = GridRect::new(2, 3, 4, 3).touched_cells();
        assert_eq!(cells, GridRect::new(1, 2, 4, 3));
    }

    #[test]
    fn edit_bounds_cover_all_writes() {
        let mut edit = GridEdit::new();
        edit.set_height(5, 1, 1.0).set_material(2, 7, 3).set_empty(4, 4, true);
        assert_eq!(edit.bounds(), Some(GridRect::new(2, 1, 5, 7)));
        assert_eq!(GridEdit::new().bounds(), None);
    }

    #[test]
    fn rejected_edit_writes_nothing() {
        let mut file = TerrainFile::new(8).unwrap();
        let mut edit = GridEdit::new();
        edit.set_height(1, 1, 50.0).set_height(9, 1, 50.0);
        assert!(file.apply_edit(&edit).is_err());
        assert_eq!(file.field().get_height(1, 1), 0);
    }

    #[test]
    fn update_grid_refreshes_cache() {
        let mut file = TerrainFile::new(8).unwrap();
        file.set_height(0, 0, 10.0).unwrap();
        assert_eq!(file.cache().height_range(), Some((0.0, 0.0)));
        file.update_grid(IVec2::ZERO, IVec2::ZERO).unwrap();
        assert_eq!(file.cache().height_range(), Some((0.0, 10.0)));
        // (0, 0) is a wrapped corner of cell (7, 7)
        assert_eq!(
            file.cache().find_square(0, 7, 7).unwrap().max_height,
            float_to_fixed(10.0)
        );
    }
}
