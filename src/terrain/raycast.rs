//! Segment casts against the terrain surface using the level cache for
//! rejection.

use glam::{IVec2, Vec3};

use super::file::TerrainFile;
use super::square::SquareFlags;

/// Slack added to node boxes so flat nodes are not missed to rounding.
const BOX_EPSILON: f32 = 1.0e-3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Fraction along the segment, in `[0, 1]`.
    pub t: f32,
    pub position: Vec3,
    /// Unit facet normal, pointing up.
    pub normal: Vec3,
    pub cell: IVec2,
}

impl TerrainFile {
    /// Nearest intersection of the object-space segment `start..end` with the
    /// surface. Holes are skipped.
    pub fn cast_ray(&self, start: Vec3, end: Vec3, square_size: f32) -> Option<RayHit> {
        let caster = RayCaster {
            file: self,
            square_size,
            start,
            dir: end - start,
        };
        caster.descend(self.cache().level_count() - 1, 0, 0, 1.0)
    }
}

struct RayCaster<'a> {
    file: &'a TerrainFile,
    square_size: f32,
    start: Vec3,
    dir: Vec3,
}

impl RayCaster<'_> {
    fn descend(&self, level: u32, nx: u32, ny: u32, best: f32) -> Option<RayHit> {
        let square = self.file.cache().node(level, nx, ny)?;
        if square.is_empty() {
            return None;
        }
        let (zmin, zmax) = square.height_range()?;
        let extent = (1u32 << level) as f32 * self.square_size;
        let lo = Vec3::new(nx as f32 * extent, ny as f32 * extent, zmin) - BOX_EPSILON;
        let hi = Vec3::new((nx + 1) as f32 * extent, (ny + 1) as f32 * extent, zmax) + BOX_EPSILON;
        let enter = segment_box(self.start, self.dir, lo, hi)?;
        if enter > best {
            return None;
        }

        if level == 0 {
            return self.cell_hit(nx as i32, ny as i32, square.flags(), best);
        }

        let mut children = [(0u32, 0u32, 0.0f32); 4];
        let mut count = 0;
        for (cx, cy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let (cx, cy) = (nx * 2 + cx, ny * 2 + cy);
            let child_extent = extent * 0.5;
            let lo = Vec3::new(cx as f32 * child_extent, cy as f32 * child_extent, f32::MIN);
            let hi = Vec3::new(
                (cx + 1) as f32 * child_extent,
                (cy + 1) as f32 * child_extent,
                f32::MAX,
            );
            if let Some(t) = segment_box(self.start, self.dir, lo - BOX_EPSILON, hi + BOX_EPSILON) {
                children[count] = (cx, cy, t);
                count += 1;
            }
        }
        let children = &mut children[..count];
        children.sort_by(|a, b| a.2.total_cmp(&b.2));

        let mut hit: Option<RayHit> = None;
        for &(cx, cy, t) in children.iter() {
            let limit = hit.map_or(best, |h| h.t);
            if t > limit {
                break;
            }
            if let Some(h) = self.descend(level - 1, cx, cy, limit) {
                hit = Some(h);
            }
        }
        hit
    }

    fn cell_hit(&self, x: i32, y: i32, flags: SquareFlags, best: f32) -> Option<RayHit> {
        let field = self.file.field();
        let s = self.square_size;
        let corner = |cx: i32, cy: i32| {
            Vec3::new(cx as f32 * s, cy as f32 * s, field.get_height_f32(cx, cy))
        };
        let bl = corner(x, y);
        let br = corner(x + 1, y);
        let tl = corner(x, y + 1);
        let tr = corner(x + 1, y + 1);
        let tris = if flags.contains(SquareFlags::SPLIT45) {
            [[bl, br, tr], [bl, tr, tl]]
        } else {
            [[bl, br, tl], [br, tr, tl]]
        };

        let mut hit: Option<RayHit> = None;
        for [a, b, c] in tris {
            let limit = hit.map_or(best, |h| h.t);
            if let Some(t) = segment_triangle(self.start, self.dir, a, b, c) {
                if t <= limit {
                    let mut normal = (b - a).cross(c - a).normalize();
                    if normal.z < 0.0 {
                        normal = -normal;
                    }
                    hit = Some(RayHit {
                        t,
                        position: self.start + self.dir * t,
                        normal,
                        cell: IVec2::new(x, y),
                    });
                }
            }
        }
        hit
    }
}

/// Entry fraction of the segment into an axis-aligned box.
fn segment_box(start: Vec3, dir: Vec3, lo: Vec3, hi: Vec3) -> Option<f32> {
    let mut t0 = 0.0f32;
    let mut t1 = 1.0f32;
    for axis in 0..3 {
        let (s, d) = (start[axis], dir[axis]);
        if d.abs() < f32::EPSILON {
            if s < lo[axis] || s > hi[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let mut a = (lo[axis] - s) * inv;
        let mut b = (hi[axis] - s) * inv;
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }
        t0 = t0.max(a);
        t1 = t1.min(b);
        if t0 > t1 {
            return None;
        }
    }
    Some(t0)
}

/// Möller-Trumbore, limited to the segment.
fn segment_triangle(start: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1.0e-9 {
        return None;
    }
    let inv = 1.0 / det;
    let s = start - a;
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    (0.0..=1.0).contains(&t).then_some(t)
}
