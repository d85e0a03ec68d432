//! Terrain block: the scene object that owns a shared terrain file and keeps
//! its render cells, collision body, bounds and replication state in step
//! with edits.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use glam::{Affine3A, IVec2, Vec2, Vec3};
use resource_pool::Handle;
use tracing::{debug, info, warn};

use crate::config::TerrainConfig;
use crate::error::{ChecksumError, Error, LoadingError, Result};
use crate::physics::{HeightFieldBody, HeightFieldShapeInfo, PhysicsSimulation};
use crate::scene::{Aabb, SceneGraph, SceneId};
use crate::utils::timer::Debounce;

use super::cells::CellTree;
use super::file::{ResourceCache, TerrainResource};
use super::mutator::{validate_rect, GridEdit, GridRect};
use super::raycast::RayHit;
use super::replication::{DirtyTracker, NetDirty, TerrainReplication};
use super::sampler::Sampler;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TerrainRole {
    /// Owns the data and is allowed to edit it.
    #[default]
    Authoritative,
    /// Replicated view. Edits arrive through [`TerrainBlock::update_grid`]
    /// notifications only.
    Dependent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerrainState {
    Unloaded,
    Loading,
    Ready,
    RebuildingCache,
    BoundsDirty,
}

#[derive(Clone, Debug, Default)]
pub struct TerrainBlockInfo {
    pub config: TerrainConfig,
    pub role: TerrainRole,
    pub transform: Affine3A,
}

impl TerrainBlockInfo {
    pub fn from_config(config: TerrainConfig, role: TerrainRole) -> Self {
        Self {
            config,
            role,
            transform: Affine3A::IDENTITY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerrainUpdateKind {
    Loaded,
    Heights,
    SquareSize,
    Materials,
    Transform,
    Unloaded,
}

/// Passed to observers after every change to a block.
#[derive(Clone, Debug)]
pub struct TerrainUpdate {
    pub kind: TerrainUpdateKind,
    /// Edited sample rectangle, for [`TerrainUpdateKind::Heights`].
    pub rect: Option<GridRect>,
    /// Render cells that need new geometry.
    pub cells: Vec<usize>,
    pub object_box: Aabb,
}

type UpdateCallback = Box<dyn FnMut(&TerrainUpdate)>;

pub struct TerrainBlock {
    role: TerrainRole,
    state: TerrainState,
    square_size: f32,
    min_cell_size: u32,
    base_texture_size: u32,
    light_map_size: u32,
    configured_file: Option<PathBuf>,
    file: Option<TerrainResource>,
    cells: CellTree,
    physics: Option<Handle<HeightFieldBody>>,
    physics_rebuild: Debounce,
    physics_stale: bool,
    transform: Affine3A,
    object_box: Aabb,
    world_box: Aabb,
    scene_id: Option<SceneId>,
    scene_stale: bool,
    net_dirty: DirtyTracker,
    callbacks: Vec<UpdateCallback>,
}

impl TerrainBlock {
    pub fn new(info: TerrainBlockInfo) -> Self {
        let config = info.config;
        let square_size = if config.square_size > 0.0 && config.square_size.is_finite() {
            config.square_size
        } else {
            warn!(
                "invalid square size {}, using {}",
                config.square_size,
                TerrainConfig::default().square_size
            );
            TerrainConfig::default().square_size
        };
        let empty = Aabb::new(Vec3::ZERO, Vec3::ZERO);
        Self {
            role: info.role,
            state: TerrainState::Unloaded,
            square_size,
            min_cell_size: config.min_cell_size,
            base_texture_size: config.base_texture_size,
            light_map_size: config.light_map_size,
            configured_file: config.file,
            file: None,
            cells: CellTree::default(),
            physics: None,
            physics_rebuild: Debounce::from_millis(config.physics_rebuild_delay_ms),
            physics_stale: false,
            transform: info.transform,
            object_box: empty,
            world_box: empty.transformed(&info.transform),
            scene_id: None,
            scene_stale: false,
            net_dirty: DirtyTracker::default(),
            callbacks: Vec::new(),
        }
    }

    pub fn state(&self) -> TerrainState {
        self.state
    }

    pub fn role(&self) -> TerrainRole {
        self.role
    }

    pub fn is_loaded(&self) -> bool {
        self.file.is_some()
    }

    pub fn square_size(&self) -> f32 {
        self.square_size
    }

    pub fn transform(&self) -> &Affine3A {
        &self.transform
    }

    pub fn file(&self) -> Option<&TerrainResource> {
        self.file.as_ref()
    }

    pub fn cells(&self) -> &CellTree {
        &self.cells
    }

    /// Render cells that changed since the last call.
    pub fn take_dirty_cells(&mut self) -> Vec<usize> {
        self.cells.take_dirty()
    }

    pub fn scene_id(&self) -> Option<SceneId> {
        self.scene_id
    }

    pub fn physics_handle(&self) -> Option<Handle<HeightFieldBody>> {
        self.physics
    }

    pub fn is_physics_pending(&self) -> bool {
        self.physics_stale || self.physics_rebuild.is_pending()
    }

    // Loading

    /// Load `path` through `cache`, sharing the file with other blocks.
    ///
    /// On failure the block keeps whatever it had loaded before.
    pub fn load(&mut self, cache: &mut ResourceCache, path: impl AsRef<Path>) -> Result<()> {
        let previous = self.state;
        self.state = TerrainState::Loading;
        match cache.load(path.as_ref()) {
            Ok(resource) => {
                self.attach(resource);
                Ok(())
            }
            Err(err) => {
                warn!(
                    "failed to load terrain '{}': {}",
                    path.as_ref().display(),
                    err
                );
                self.state = previous;
                Err(err)
            }
        }
    }

    /// Load the file named in the block's [`TerrainConfig`].
    pub fn load_configured(&mut self, cache: &mut ResourceCache) -> Result<()> {
        let Some(path) = self.configured_file.clone() else {
            return Err(Error::LoadingError(LoadingError {
                entry: "no terrain file configured".to_string(),
                path: String::new(),
            }));
        };
        self.load(cache, path)
    }

    pub fn configured_file(&self) -> Option<&Path> {
        self.configured_file.as_deref()
    }

    /// Dependent load. The file must hash to the authoritative checksum.
    pub fn load_replicated(
        &mut self,
        cache: &mut ResourceCache,
        path: impl AsRef<Path>,
        replication: &TerrainReplication,
    ) -> Result<()> {
        let previous = self.state;
        self.state = TerrainState::Loading;
        let resource = match cache.load(path.as_ref()) {
            Ok(resource) => resource,
            Err(err) => {
                warn!(
                    "failed to load terrain '{}': {}",
                    path.as_ref().display(),
                    err
                );
                self.state = previous;
                return Err(err);
            }
        };
        let found = resource.borrow().checksum();
        if found != replication.checksum {
            warn!(
                "terrain '{}' checksum {:#018x} does not match {:#018x}",
                path.as_ref().display(),
                found,
                replication.checksum
            );
            self.state = previous;
            return Err(Error::ChecksumMismatch(ChecksumError {
                expected: replication.checksum,
                found,
            }));
        }
        if replication.square_size > 0.0 && replication.square_size.is_finite() {
            self.square_size = replication.square_size;
        }
        self.base_texture_size = replication.base_texture_size;
        self.light_map_size = replication.light_map_size;
        self.attach(resource);
        Ok(())
    }

    /// Take a share of an already loaded file.
    pub fn attach(&mut self, resource: TerrainResource) {
        self.state = TerrainState::Loading;
        {
            let file = resource.borrow();
            self.cells = CellTree::build(file.cache(), self.square_size, self.min_cell_size);
            info!(
                "attached {}x{} terrain{}",
                file.size(),
                file.size(),
                file.path()
                    .map(|p| format!(" '{}'", p.display()))
                    .unwrap_or_default()
            );
        }
        self.file = Some(resource);
        self.refresh_bounds();
        self.physics_stale = true;
        self.physics_rebuild.cancel();
        self.mark_net_dirty(NetDirty::INIT | NetDirty::FILE);
        self.state = TerrainState::Ready;
        let cells = self.all_leaves();
        self.notify(TerrainUpdateKind::Loaded, None, cells);
    }

    /// Drop this block's share of the file and its collision body.
    pub fn unload(&mut self, physics: &mut PhysicsSimulation) {
        if self.file.take().is_none() {
            return;
        }
        self.release_physics(physics);
        self.physics_rebuild.cancel();
        self.physics_stale = false;
        self.cells = CellTree::default();
        self.refresh_bounds();
        self.state = TerrainState::Unloaded;
        self.notify(TerrainUpdateKind::Unloaded, None, Vec::new());
    }

    // Scene

    /// Register the world box with `scene`. A collision body is rebuilt on
    /// the next [`TerrainBlock::update`] if the block has none.
    pub fn add_to_scene(&mut self, scene: &mut SceneGraph) -> SceneId {
        self.physics_stale |= self.file.is_some() && self.physics.is_none();
        if let Some(id) = self.scene_id {
            if scene.update_bounds(id, self.world_box) {
                self.scene_stale = false;
                return id;
            }
        }
        let id = scene.register(self.world_box);
        self.scene_id = Some(id);
        self.scene_stale = false;
        id
    }

    /// Leave the scene and release the collision body.
    pub fn remove_from_scene(&mut self, scene: &mut SceneGraph, physics: &mut PhysicsSimulation) {
        if let Some(id) = self.scene_id.take() {
            scene.unregister(id);
        }
        self.release_physics(physics);
        self.physics_rebuild.cancel();
        self.physics_stale = false;
    }

    /// Push bounds changed by edits to the scene. Returns `true` when the
    /// registration was updated.
    pub fn sync_scene(&mut self, scene: &mut SceneGraph) -> bool {
        match self.scene_id {
            Some(id) if self.scene_stale => {
                self.scene_stale = false;
                scene.update_bounds(id, self.world_box)
            }
            _ => false,
        }
    }

    pub fn set_transform(&mut self, transform: Affine3A, scene: &mut SceneGraph) {
        let loaded = self.file.is_some();
        if loaded {
            self.state = TerrainState::BoundsDirty;
        }
        self.transform = transform;
        self.refresh_bounds();
        self.scene_stale = true;
        self.sync_scene(scene);
        if loaded {
            self.physics_rebuild.trigger();
            self.state = TerrainState::Ready;
        }
        self.notify(TerrainUpdateKind::Transform, None, Vec::new());
    }

    // Bounds

    pub fn object_box(&self) -> Aabb {
        self.object_box
    }

    pub fn world_box(&self) -> Aabb {
        self.world_box
    }

    fn refresh_bounds(&mut self) {
        self.object_box = match &self.file {
            Some(file) => {
                let file = file.borrow();
                let extent = file.size() as f32 * self.square_size;
                let (zmin, zmax) = file.cache().height_range().unwrap_or((0.0, 0.0));
                Aabb::new(Vec3::new(0.0, 0.0, zmin), Vec3::new(extent, extent, zmax))
            }
            None => Aabb::new(Vec3::ZERO, Vec3::ZERO),
        };
        let world_box = self.object_box.transformed(&self.transform);
        if world_box != self.world_box {
            self.scene_stale = true;
        }
        self.world_box = world_box;
    }

    // Settings

    pub fn set_square_size(&mut self, square_size: f32) -> Result<()> {
        if !(square_size > 0.0 && square_size.is_finite()) {
            return Err(Error::format(
                "square size",
                format!("{} is not a positive size", square_size),
            ));
        }
        if square_size == self.square_size {
            return Ok(());
        }
        self.square_size = square_size;
        self.mark_net_dirty(NetDirty::SQUARE_SIZE);
        if let Some(file) = &self.file {
            self.cells.rebuild(file.borrow().cache(), square_size);
            self.physics_rebuild.trigger();
        }
        self.refresh_bounds();
        let cells = self.all_leaves();
        self.notify(TerrainUpdateKind::SquareSize, None, cells);
        Ok(())
    }

    pub fn texture_sizes(&self) -> (u32, u32) {
        (self.base_texture_size, self.light_map_size)
    }

    pub fn set_texture_sizes(&mut self, base_texture_size: u32, light_map_size: u32) {
        if (base_texture_size, light_map_size) != self.texture_sizes() {
            self.base_texture_size = base_texture_size;
            self.light_map_size = light_map_size;
            self.mark_net_dirty(NetDirty::TEXTURE_SIZES);
        }
    }

    pub fn add_material(&mut self, name: &str) -> Result<u8> {
        let file = self.writable_file()?;
        let index = file.borrow_mut().add_material(name)?;
        self.mark_net_dirty(NetDirty::MATERIALS);
        self.notify(TerrainUpdateKind::Materials, None, Vec::new());
        Ok(index)
    }

    pub fn register_update_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&TerrainUpdate) + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    fn notify(&mut self, kind: TerrainUpdateKind, rect: Option<GridRect>, cells: Vec<usize>) {
        if self.callbacks.is_empty() {
            return;
        }
        let update = TerrainUpdate {
            kind,
            rect,
            cells,
            object_box: self.object_box,
        };
        for callback in &mut self.callbacks {
            callback(&update);
        }
    }

    fn all_leaves(&self) -> Vec<usize> {
        self.cells.leaves().map(|(id, _)| id).collect()
    }

    // Editing

    fn writable_file(&self) -> Result<TerrainResource> {
        if self.role == TerrainRole::Dependent {
            return Err(Error::ReadOnly());
        }
        self.file.clone().ok_or(Error::NotLoaded())
    }

    /// Write a batch of edits and reconcile everything downstream.
    pub fn apply_edit(&mut self, edit: &GridEdit) -> Result<GridRect> {
        let file = self.writable_file()?;
        let rect = file.borrow_mut().apply_edit(edit)?;
        if edit.writes_materials() {
            self.mark_net_dirty(NetDirty::MATERIALS);
        }
        self.update_grid(rect.min, rect.max)
    }

    /// Reconcile derived state with the samples in `[min, max]`.
    ///
    /// Authoritative blocks rebuild the level cache and record the rectangle
    /// for replication. Dependent blocks take the shared cache as is and only
    /// refresh bounds, render cells and the collision body.
    pub fn update_grid(&mut self, min: IVec2, max: IVec2) -> Result<GridRect> {
        let Some(file) = self.file.clone() else {
            return Err(Error::NotLoaded());
        };
        let rect = match self.role {
            TerrainRole::Authoritative => {
                self.state = TerrainState::RebuildingCache;
                let result = file.borrow_mut().update_grid(min, max);
                match result {
                    Ok(rect) => rect,
                    Err(err) => {
                        warn!("rejected grid update: {}", err);
                        self.state = TerrainState::Ready;
                        return Err(err);
                    }
                }
            }
            TerrainRole::Dependent => {
                let rect = GridRect { min, max };
                validate_rect(&rect, file.borrow().size())?;
                rect
            }
        };

        self.refresh_bounds();
        let touched = {
            let file = file.borrow();
            self.cells
                .update_region(file.cache(), self.square_size, &rect.touched_cells())
        };
        self.physics_rebuild.trigger();
        if self.role == TerrainRole::Authoritative {
            self.net_dirty.push_rect(rect);
        }
        self.state = TerrainState::Ready;
        debug!(
            "grid update [{}, {}]..[{}, {}] touched {} render cells",
            min.x,
            min.y,
            max.x,
            max.y,
            touched.len()
        );
        self.notify(TerrainUpdateKind::Heights, Some(rect), touched);
        Ok(rect)
    }

    // Physics

    /// Run a due collision rebuild. Returns `true` when one ran.
    pub fn update(&mut self, physics: &mut PhysicsSimulation) -> bool {
        if self.file.is_none() {
            return false;
        }
        let due = self.physics_rebuild.poll() || self.physics_stale;
        due && self.rebuild_physics_now(physics)
    }

    pub fn rebuild_physics_now(&mut self, physics: &mut PhysicsSimulation) -> bool {
        let Some(file) = &self.file else {
            return false;
        };
        let info = {
            let file = file.borrow();
            let field = file.field();
            HeightFieldShapeInfo {
                heights: field.heights_f32(),
                holes: field.hole_mask(),
                split45: field.split_mask(),
                size: field.size(),
                spacing: self.square_size,
                transform: self.transform,
            }
        };
        self.release_physics(physics);
        self.physics_rebuild.cancel();
        self.physics_stale = false;
        self.physics = physics.create_heightfield(&info);
        if self.physics.is_some() {
            debug!("rebuilt {}x{} terrain collision", info.size, info.size);
            true
        } else {
            warn!("failed to create terrain collision body");
            false
        }
    }

    fn release_physics(&mut self, physics: &mut PhysicsSimulation) {
        if let Some(h) = self.physics.take() {
            physics.release_heightfield(h);
        }
    }

    // Sampling, in object space unless noted

    /// Run `f` against a sampler over the loaded file.
    pub fn with_sampler<R>(&self, f: impl FnOnce(&Sampler) -> R) -> Option<R> {
        let file = self.file.as_ref()?.borrow();
        let sampler = file.sampler(self.square_size);
        Some(f(&sampler))
    }

    pub fn get_height(&self, pos: Vec2) -> Option<f32> {
        self.with_sampler(|s| s.get_height(pos)).flatten()
    }

    pub fn get_normal(&self, pos: Vec2, normalize: bool, skip_empty: bool) -> Option<Vec3> {
        self.with_sampler(|s| s.get_normal(pos, normalize, skip_empty))
            .flatten()
    }

    pub fn get_smooth_normal(&self, pos: Vec2, skip_empty: bool) -> Option<Vec3> {
        self.with_sampler(|s| s.get_smooth_normal(pos, skip_empty))
            .flatten()
    }

    pub fn get_normal_and_height(
        &self,
        pos: Vec2,
        normalize: bool,
        skip_empty: bool,
    ) -> Option<(Vec3, f32)> {
        self.with_sampler(|s| s.get_normal_and_height(pos, normalize, skip_empty))
            .flatten()
    }

    /// Normal, height and material index at `pos`.
    pub fn get_normal_height_material(
        &self,
        pos: Vec2,
        normalize: bool,
        skip_empty: bool,
    ) -> Option<(Vec3, f32, u8)> {
        self.with_sampler(|s| {
            s.get_normal_height_material(pos, normalize, skip_empty)
                .map(|hit| (hit.normal, hit.height, hit.material))
        })
        .flatten()
    }

    /// World-space surface height under `pos`, along the block's up axis.
    pub fn height_at_world(&self, pos: Vec3) -> Option<f32> {
        let local = self.transform.inverse().transform_point3(pos);
        let h = self.get_height(local.truncate())?;
        Some(self.transform.transform_point3(local.truncate().extend(h)).z)
    }

    /// World-space segment cast. `t` is preserved by the transform.
    pub fn cast_ray(&self, start: Vec3, end: Vec3) -> Option<RayHit> {
        let file = self.file.as_ref()?.borrow();
        let inverse = self.transform.inverse();
        let hit = file.cast_ray(
            inverse.transform_point3(start),
            inverse.transform_point3(end),
            self.square_size,
        )?;
        let normal = inverse.matrix3.transpose() * glam::Vec3A::from(hit.normal);
        Some(RayHit {
            position: self.transform.transform_point3(hit.position),
            normal: Vec3::from(normal).normalize(),
            ..hit
        })
    }

    // Replication

    pub fn checksum(&self) -> Option<u64> {
        self.file.as_ref().map(|f| f.borrow().checksum())
    }

    pub fn replication_state(&self) -> Option<TerrainReplication> {
        Some(TerrainReplication {
            checksum: self.checksum()?,
            square_size: self.square_size,
            base_texture_size: self.base_texture_size,
            light_map_size: self.light_map_size,
        })
    }

    /// Dependents mirror replicated state and never originate traffic.
    fn mark_net_dirty(&mut self, flags: NetDirty) {
        if self.role == TerrainRole::Authoritative {
            self.net_dirty.mark(flags);
        }
    }

    pub fn is_net_dirty(&self) -> bool {
        self.net_dirty.is_dirty()
    }

    pub fn take_net_dirty(&mut self) -> (NetDirty, Vec<GridRect>) {
        self.net_dirty.take()
    }

    /// True when both blocks hold the same file.
    pub fn shares_file_with(&self, other: &TerrainBlock) -> bool {
        match (&self.file, &other.file) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::file::TerrainFile;
    use std::cell::RefCell;

    fn block_with_file(size: u32, role: TerrainRole) -> (TerrainBlock, TerrainResource) {
        let config = TerrainConfig {
            square_size: 1.0,
            physics_rebuild_delay_ms: 0,
            min_cell_size: 4,
            ..Default::default()
        };
        let mut block = TerrainBlock::new(TerrainBlockInfo::from_config(config, role));
        let resource = Rc::new(RefCell::new(TerrainFile::new(size).unwrap()));
        block.attach(resource.clone());
        (block, resource)
    }

    #[test]
    fn attach_makes_block_ready() {
        let (block, _) = block_with_file(8, TerrainRole::Authoritative);
        assert_eq!(block.state(), TerrainState::Ready);
        assert!(block.is_physics_pending());
        assert_eq!(block.object_box().max, Vec3::new(8.0, 8.0, 0.0));
    }

    #[test]
    fn dependent_blocks_reject_edits() {
        let (mut block, _) = block_with_file(8, TerrainRole::Dependent);
        let mut edit = GridEdit::new();
        edit.set_height(1, 1, 4.0);
        assert!(matches!(block.apply_edit(&edit), Err(Error::ReadOnly())));
    }

    #[test]
    fn edits_mark_net_dirty() {
        let (mut block, _) = block_with_file(8, TerrainRole::Authoritative);
        block.take_net_dirty();
        let mut edit = GridEdit::new();
        edit.set_height(2, 3, 4.0).set_material(2, 3, 1);
        let rect = block.apply_edit(&edit).unwrap();
        let (flags, rects) = block.take_net_dirty();
        assert!(flags.contains(NetDirty::HEIGHTMAP | NetDirty::MATERIALS));
        assert_eq!(rects, vec![rect]);
        assert_eq!(block.object_box().max.z, 4.0);
    }

    #[test]
    fn bad_square_size_is_rejected() {
        let (mut block, _) = block_with_file(8, TerrainRole::Authoritative);
        assert!(block.set_square_size(0.0).is_err());
        assert!(block.set_square_size(f32::NAN).is_err());
        assert_eq!(block.square_size(), 1.0);
    }
}
