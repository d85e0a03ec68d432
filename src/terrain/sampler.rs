//! Height and normal queries over a height field and its level cache.
//!
//! Positions are object-space XY in world units. Each cell is two triangles;
//! the [`SquareFlags::SPLIT45`] bit of the level-0 square picks the diagonal.
//! Queries outside the block, or on holes when asked to skip them, return
//! `None` so sweeps over the terrain edge can treat it as "no ground".

use glam::{Vec2, Vec3};

use super::heightfield::HeightField;
use super::square::{LevelCache, SquareFlags};

/// Normal, height and nearest-sample material at one position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceSample<'a> {
    pub normal: Vec3,
    pub height: f32,
    pub material: u8,
    pub material_name: Option<&'a str>,
}

/// One located cell with its corner heights in world units.
#[derive(Clone, Copy, Debug)]
struct Cell {
    x: i32,
    y: i32,
    xp: f32,
    yp: f32,
    flags: SquareFlags,
    bottom_left: f32,
    bottom_right: f32,
    top_left: f32,
    top_right: f32,
}

impl Cell {
    fn corners(&self) -> [f32; 4] {
        [
            self.bottom_left,
            self.bottom_right,
            self.top_left,
            self.top_right,
        ]
    }

    fn split45(&self) -> bool {
        self.flags.contains(SquareFlags::SPLIT45)
    }

    fn height(&self) -> f32 {
        triangle_height(self.split45(), self.xp, self.yp, self.corners())
    }

    fn normal(&self, square_size: f32) -> Vec3 {
        let corners = self.corners();
        triangle_normal(self.split45(), self.xp, self.yp, corners, square_size)
    }
}

/// Height inside one cell at fractional `(xp, yp)`.
///
/// `corners` is `[bottom_left, bottom_right, top_left, top_right]`. With
/// `split45` the cell is cut from bottom-left to top-right, otherwise from
/// bottom-right to top-left, and the height is planar on each half.
pub(crate) fn triangle_height(split45: bool, xp: f32, yp: f32, corners: [f32; 4]) -> f32 {
    let [bl, br, tl, tr] = corners;
    if split45 {
        if xp > yp {
            bl + xp * (br - bl) + yp * (tr - br)
        } else {
            bl + xp * (tr - tl) + yp * (tl - bl)
        }
    } else if 1.0 - xp > yp {
        bl + xp * (br - bl) + yp * (tl - bl)
    } else {
        tr + (1.0 - xp) * (tl - tr) + (1.0 - yp) * (br - tr)
    }
}

/// Unnormalized facet normal of the half containing `(xp, yp)`. The z term
/// carries the grid spacing so the slope is metric.
pub(crate) fn triangle_normal(
    split45: bool,
    xp: f32,
    yp: f32,
    corners: [f32; 4],
    square_size: f32,
) -> Vec3 {
    let [bl, br, tl, tr] = corners;
    let (nx, ny) = if split45 {
        if xp > yp {
            (bl - br, br - tr)
        } else {
            (tl - tr, bl - tl)
        }
    } else if 1.0 - xp > yp {
        (bl - br, bl - tl)
    } else {
        (tl - tr, br - tr)
    };
    Vec3::new(nx, ny, square_size)
}

pub struct Sampler<'a> {
    field: &'a HeightField,
    cache: &'a LevelCache,
    square_size: f32,
    inv_square_size: f32,
}

impl<'a> Sampler<'a> {
    pub fn new(field: &'a HeightField, cache: &'a LevelCache, square_size: f32) -> Self {
        Self {
            field,
            cache,
            square_size,
            inv_square_size: 1.0 / square_size,
        }
    }

    pub fn square_size(&self) -> f32 {
        self.square_size
    }

    fn locate(&self, pos: Vec2, skip_empty: bool) -> Option<Cell> {
        let grid = pos * self.inv_square_size;
        if !grid.is_finite() {
            return None;
        }
        let floor = grid.floor();
        let (x, y) = (floor.x as i32, floor.y as i32);
        // one test catches negative and overflowing coordinates
        if ((x | y) as u32 & !self.field.mask()) != 0 {
            return None;
        }
        let frac = (grid - floor).clamp(Vec2::ZERO, Vec2::splat(1.0 - f32::EPSILON));

        let flags = self.cache.find_square(0, x, y)?.flags();
        if skip_empty && flags.contains(SquareFlags::EMPTY) {
            return None;
        }

        let field = self.field;
        Some(Cell {
            x,
            y,
            xp: frac.x,
            yp: frac.y,
            flags,
            bottom_left: field.get_height_f32(x, y),
            bottom_right: field.get_height_f32(x + 1, y),
            top_left: field.get_height_f32(x, y + 1),
            top_right: field.get_height_f32(x + 1, y + 1),
        })
    }

    /// Interpolated height. Holes have no surface and report `None`.
    pub fn get_height(&self, pos: Vec2) -> Option<f32> {
        self.locate(pos, true).map(|c| c.height())
    }

    pub fn get_normal(&self, pos: Vec2, normalize: bool, skip_empty: bool) -> Option<Vec3> {
        let cell = self.locate(pos, skip_empty)?;
        let n = cell.normal(self.square_size);
        Some(if normalize { n.normalize() } else { n })
    }

    pub fn get_normal_and_height(
        &self,
        pos: Vec2,
        normalize: bool,
        skip_empty: bool,
    ) -> Option<(Vec3, f32)> {
        let cell = self.locate(pos, skip_empty)?;
        let n = cell.normal(self.square_size);
        let n = if normalize { n.normalize() } else { n };
        Some((n, cell.height()))
    }

    /// Like [`Sampler::get_normal_and_height`], plus the material of the
    /// nearest sample. Ties round up (`floor(xp + 0.5)`) and wrap at the edge.
    pub fn get_normal_height_material(
        &self,
        pos: Vec2,
        normalize: bool,
        skip_empty: bool,
    ) -> Option<SurfaceSample<'a>> {
        let cell = self.locate(pos, skip_empty)?;
        let n = cell.normal(self.square_size);
        let mx = cell.x + (cell.xp + 0.5).floor() as i32;
        let my = cell.y + (cell.yp + 0.5).floor() as i32;
        let material = self.field.get_material_index(mx, my);
        Some(SurfaceSample {
            normal: if normalize { n.normalize() } else { n },
            height: cell.height(),
            material,
            material_name: self.field.material_name(material),
        })
    }

    /// Continuous normal from central differences at the four corners,
    /// blended across the cell. Ignores the split diagonal.
    pub fn get_smooth_normal(&self, pos: Vec2, skip_empty: bool) -> Option<Vec3> {
        let cell = self.locate(pos, skip_empty)?;
        let corner = |sx: i32, sy: i32| {
            let h = |x: i32, y: i32| self.field.get_height_f32(x, y);
            Vec3::new(
                h(sx - 1, sy) - h(sx + 1, sy),
                h(sx, sy - 1) - h(sx, sy + 1),
                2.0 * self.square_size,
            )
        };
        let (x, y, xp, yp) = (cell.x, cell.y, cell.xp, cell.yp);
        let bottom = corner(x, y).lerp(corner(x + 1, y), xp);
        let top = corner(x, y + 1).lerp(corner(x + 1, y + 1), xp);
        Some(bottom.lerp(top, yp).normalize())
    }
}
