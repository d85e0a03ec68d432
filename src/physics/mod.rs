use glam::*;
use resource_pool::{Handle, Pool};
use tracing::{debug, warn};

use crate::terrain::sampler::{triangle_height, triangle_normal};

/// Everything needed to build a height-field collision body.
#[derive(Default, Clone)]
pub struct HeightFieldShapeInfo {
    /// Row-major samples in world units, `size * size` long.
    pub heights: Vec<f32>,
    /// One entry per cell, `true` for holes.
    pub holes: Vec<bool>,
    /// One entry per cell, `true` where the cell is cut along the
    /// `(x, y)`-`(x + 1, y + 1)` diagonal.
    pub split45: Vec<bool>,
    /// Samples per side, a power of two. Cells on the last row and column
    /// take their far corners from the first.
    pub size: u32,
    /// Distance between adjacent samples.
    pub spacing: f32,
    pub transform: Affine3A,
}

#[derive(Default, Clone)]
pub struct HeightFieldBody {
    heights: Vec<f32>,
    holes: Vec<bool>,
    split45: Vec<bool>,
    size: u32,
    spacing: f32,
    transform: Affine3A,
    inverse: Affine3A,
}

impl HeightFieldBody {
    fn from_info(info: &HeightFieldShapeInfo) -> Option<Self> {
        let count = (info.size * info.size) as usize;
        if info.size < 2
            || !info.size.is_power_of_two()
            || info.spacing <= 0.0
            || info.heights.len() != count
            || info.holes.len() != count
            || info.split45.len() != count
        {
            return None;
        }
        Some(Self {
            heights: info.heights.clone(),
            holes: info.holes.clone(),
            split45: info.split45.clone(),
            size: info.size,
            spacing: info.spacing,
            transform: info.transform,
            inverse: info.transform.inverse(),
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    pub fn hole_count(&self) -> usize {
        self.holes.iter().filter(|h| **h).count()
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        let mask = self.size - 1;
        ((y & mask) * self.size + (x & mask)) as usize
    }

    /// Cell under a local XY with its fractional position and corner
    /// heights. `None` off the block or over a hole.
    fn cell(&self, p: Vec2) -> Option<(usize, Vec2, [f32; 4])> {
        let g = p / self.spacing;
        let size = self.size as f32;
        if !g.is_finite() || g.x < 0.0 || g.y < 0.0 || g.x >= size || g.y >= size {
            return None;
        }
        let floor = g.floor();
        let (x, y) = (floor.x as u32, floor.y as u32);
        let cell = self.index(x, y);
        if self.holes[cell] {
            return None;
        }
        let frac = (g - floor).clamp(Vec2::ZERO, Vec2::splat(1.0 - f32::EPSILON));
        let corners = [
            self.heights[self.index(x, y)],
            self.heights[self.index(x + 1, y)],
            self.heights[self.index(x, y + 1)],
            self.heights[self.index(x + 1, y + 1)],
        ];
        Some((cell, frac, corners))
    }

    /// Surface height at a local XY on the cell's triangle.
    fn local_height(&self, p: Vec2) -> Option<f32> {
        let (cell, frac, corners) = self.cell(p)?;
        Some(triangle_height(self.split45[cell], frac.x, frac.y, corners))
    }

    fn local_normal(&self, p: Vec2) -> Option<Vec3> {
        let (cell, frac, corners) = self.cell(p)?;
        let split = self.split45[cell];
        Some(triangle_normal(split, frac.x, frac.y, corners, self.spacing).normalize())
    }
}

#[derive(Clone, Copy)]
pub struct SphereContact {
    pub body: Handle<HeightFieldBody>,
    /// Surface point below the sphere center, world space.
    pub point: Vec3,
    /// Surface normal, world space.
    pub normal: Vec3,
    pub penetration: f32,
}

/// Collision world for static terrain. Only height-field bodies are tracked.
#[derive(Default)]
pub struct PhysicsSimulation {
    heightfields: Pool<HeightFieldBody>,
    handles: Vec<Handle<HeightFieldBody>>,
}

impl PhysicsSimulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_heightfield(
        &mut self,
        info: &HeightFieldShapeInfo,
    ) -> Option<Handle<HeightFieldBody>> {
        let Some(body) = HeightFieldBody::from_info(info) else {
            warn!(
                "rejecting height field: size {}, spacing {}, {} samples, {} hole bits",
                info.size,
                info.spacing,
                info.heights.len(),
                info.holes.len()
            );
            return None;
        };
        let handle = self.heightfields.insert(body)?;
        self.handles.push(handle);
        debug!("created {}x{} height field body", info.size, info.size);
        Some(handle)
    }

    pub fn release_heightfield(&mut self, h: Handle<HeightFieldBody>) {
        if !h.valid() {
            return;
        }
        if let Some(i) = self.handles.iter().position(|x| *x == h) {
            self.handles.swap_remove(i);
            self.heightfields.release(h);
        }
    }

    pub fn heightfield(&self, h: Handle<HeightFieldBody>) -> Option<&HeightFieldBody> {
        if !h.valid() {
            return None;
        }
        self.heightfields.get_ref(h)
    }

    pub fn heightfield_count(&self) -> usize {
        self.handles.len()
    }

    /// World-space surface height under `pos` along the body's up axis.
    pub fn heightfield_height_at(&self, h: Handle<HeightFieldBody>, pos: Vec3) -> Option<f32> {
        let body = self.heightfield(h)?;
        let local = body.inverse.transform_point3(pos);
        let z = body.local_height(local.truncate())?;
        Some(body.transform.transform_point3(local.truncate().extend(z)).z)
    }

    /// Contacts between a sphere and every height-field body. Holes never
    /// produce contacts.
    pub fn sphere_contacts(&self, center: Vec3, radius: f32) -> Vec<SphereContact> {
        let mut contacts = Vec::new();
        for &h in &self.handles {
            let Some(body) = self.heightfields.get_ref(h) else {
                continue;
            };
            let local = body.inverse.transform_point3(center);
            let Some(ground) = body.local_height(local.truncate()) else {
                continue;
            };
            let penetration = radius - (local.z - ground);
            if penetration <= 0.0 {
                continue;
            }
            let Some(normal) = body.local_normal(local.truncate()) else {
                continue;
            };
            let normal = body.transform.transform_vector3(normal).normalize();
            contacts.push(SphereContact {
                body: h,
                point: body.transform.transform_point3(local.truncate().extend(ground)),
                normal,
                penetration,
            });
        }
        contacts
    }
}
