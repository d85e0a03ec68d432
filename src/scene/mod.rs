use glam::{Affine3A, Vec3};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Box enclosing all eight corners after `transform`.
    pub fn transformed(&self, transform: &Affine3A) -> Aabb {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            let p = transform.transform_point3(corner);
            min = min.min(p);
            max = max.max(p);
        }
        Aabb { min, max }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SceneId(usize);

impl SceneId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Flat registry of world-space bounds. Slots are reused after
/// [`SceneGraph::unregister`].
#[derive(Default)]
pub struct SceneGraph {
    entries: Vec<Option<Aabb>>,
    free: Vec<usize>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, bounds: Aabb) -> SceneId {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.entries[idx] = Some(bounds);
                idx
            }
            None => {
                self.entries.push(Some(bounds));
                self.entries.len() - 1
            }
        };
        debug!("registered scene object {}", idx);
        SceneId(idx)
    }

    pub fn update_bounds(&mut self, id: SceneId, bounds: Aabb) -> bool {
        match self.entries.get_mut(id.0) {
            Some(Some(entry)) => {
                *entry = bounds;
                true
            }
            _ => {
                warn!("bounds update for unknown scene object {}", id.0);
                false
            }
        }
    }

    pub fn unregister(&mut self, id: SceneId) -> bool {
        match self.entries.get_mut(id.0) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.free.push(id.0);
                debug!("unregistered scene object {}", id.0);
                true
            }
            _ => false,
        }
    }

    pub fn bounds(&self, id: SceneId) -> Option<Aabb> {
        self.entries.get(id.0).copied().flatten()
    }

    pub fn objects_containing(&self, point: Vec3) -> Vec<SceneId> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match e {
                Some(b) if b.contains(point) => Some(SceneId(i)),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
