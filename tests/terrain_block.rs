use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use glam::{Affine3A, IVec2, Vec2, Vec3};
use meshi_terrain::terrain::{
    GridEdit, GridRect, NetDirty, ResourceCache, TerrainBlock, TerrainBlockInfo, TerrainFile,
    TerrainRole, TerrainState, TerrainUpdate, TerrainUpdateKind,
};
use meshi_terrain::{Error, SceneGraph, TerrainConfig};
use tempfile::{tempdir, TempDir};

mod common;
use common::ramp_file;

fn config() -> TerrainConfig {
    TerrainConfig {
        square_size: 2.0,
        physics_rebuild_delay_ms: 0,
        min_cell_size: 4,
        ..Default::default()
    }
}

fn block(role: TerrainRole) -> TerrainBlock {
    TerrainBlock::new(TerrainBlockInfo::from_config(config(), role))
}

fn saved_ramp() -> (TempDir, ResourceCache) {
    let dir = tempdir().unwrap();
    ramp_file(16, 0.5).save(dir.path().join("ramp.ter")).unwrap();
    let cache = ResourceCache::new(dir.path());
    (dir, cache)
}

fn recorder(block: &mut TerrainBlock) -> Rc<RefCell<Vec<TerrainUpdate>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    block.register_update_callback(move |update| sink.borrow_mut().push(update.clone()));
    seen
}

#[test]
fn load_moves_block_to_ready() {
    let (_dir, mut cache) = saved_ramp();
    let mut terrain = block(TerrainRole::Authoritative);
    assert_eq!(terrain.state(), TerrainState::Unloaded);
    assert!(terrain.get_height(Vec2::ONE).is_none());

    let seen = recorder(&mut terrain);
    terrain.load(&mut cache, "ramp.ter").unwrap();
    assert_eq!(terrain.state(), TerrainState::Ready);
    assert!(terrain.is_loaded());

    let updates = seen.borrow();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].kind, TerrainUpdateKind::Loaded);
    assert_eq!(updates[0].cells.len(), 16);
}

#[test]
fn failed_load_leaves_block_unloaded() {
    let (_dir, mut cache) = saved_ramp();
    let mut terrain = block(TerrainRole::Authoritative);
    let err = terrain.load(&mut cache, "missing.ter").unwrap_err();
    assert!(matches!(err, Error::LoadingError(_)));
    assert_eq!(terrain.state(), TerrainState::Unloaded);
    assert!(matches!(
        terrain.update_grid(IVec2::ZERO, IVec2::ONE),
        Err(Error::NotLoaded())
    ));
}

#[test]
fn object_box_tracks_root_range() {
    let (_dir, mut cache) = saved_ramp();
    let mut terrain = block(TerrainRole::Authoritative);
    terrain.load(&mut cache, "ramp.ter").unwrap();

    let b = terrain.object_box();
    assert_eq!(b.min, Vec3::ZERO);
    assert_eq!(b.max, Vec3::new(32.0, 32.0, 7.5));

    let mut edit = GridEdit::new();
    edit.set_height(3, 3, 40.0);
    terrain.apply_edit(&edit).unwrap();
    assert_eq!(terrain.object_box().max.z, 40.0);
    assert_eq!(terrain.state(), TerrainState::Ready);
}

#[test]
fn edits_notify_observers_with_rect_and_cells() {
    let (_dir, mut cache) = saved_ramp();
    let mut terrain = block(TerrainRole::Authoritative);
    terrain.load(&mut cache, "ramp.ter").unwrap();
    terrain.take_dirty_cells();
    let seen = recorder(&mut terrain);

    let mut edit = GridEdit::new();
    edit.fill_height(GridRect::new(5, 5, 6, 6), 9.0);
    let rect = terrain.apply_edit(&edit).unwrap();
    assert_eq!(rect, GridRect::new(5, 5, 6, 6));

    let updates = seen.borrow();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].kind, TerrainUpdateKind::Heights);
    assert_eq!(updates[0].rect, Some(rect));
    // cells 4..=6 all fall in the leaf covering 4..=7
    assert_eq!(updates[0].cells.len(), 1);
    assert_eq!(terrain.take_dirty_cells(), updates[0].cells);
}

#[test]
fn transform_updates_world_box_and_scene() {
    let (_dir, mut cache) = saved_ramp();
    let mut scene = SceneGraph::new();
    let mut terrain = block(TerrainRole::Authoritative);
    terrain.load(&mut cache, "ramp.ter").unwrap();
    let id = terrain.add_to_scene(&mut scene);

    let transform = Affine3A::from_translation(Vec3::new(100.0, 0.0, 10.0));
    terrain.set_transform(transform, &mut scene);
    assert_eq!(terrain.state(), TerrainState::Ready);
    let world = scene.bounds(id).unwrap();
    assert_eq!(world, terrain.world_box());
    assert_eq!(world.min, Vec3::new(100.0, 0.0, 10.0));
    assert_eq!(scene.objects_containing(Vec3::new(110.0, 5.0, 12.0)), vec![id]);

    // world height follows the transform, ramp rises 0.25 per world unit
    let h = terrain.height_at_world(Vec3::new(104.0, 3.0, 0.0)).unwrap();
    assert!((h - 11.0).abs() < 1e-4, "{}", h);

    // edits change bounds; the scene catches up on sync
    let mut edit = GridEdit::new();
    edit.set_height(1, 1, 60.0);
    terrain.apply_edit(&edit).unwrap();
    assert!(terrain.sync_scene(&mut scene));
    assert!(!terrain.sync_scene(&mut scene));
    assert_eq!(scene.bounds(id).unwrap().max.z, 70.0);
}

#[test]
fn world_ray_cast_hits_transformed_surface() {
    let (_dir, mut cache) = saved_ramp();
    let mut scene = SceneGraph::new();
    let mut terrain = block(TerrainRole::Authoritative);
    terrain.load(&mut cache, "ramp.ter").unwrap();
    let transform = Affine3A::from_translation(Vec3::new(-50.0, -50.0, 0.0));
    terrain.set_transform(transform, &mut scene);

    let hit = terrain
        .cast_ray(Vec3::new(-45.5, -45.0, 50.0), Vec3::new(-45.5, -45.0, -50.0))
        .unwrap();
    // object x = 4.5, sample x = 2.25
    assert!((hit.position.z - 1.125).abs() < 1e-4);
    assert!((hit.t - 0.48875).abs() < 1e-4);
    assert!(hit.normal.z > 0.9 && hit.normal.x < 0.0);
}

#[test]
fn square_size_change_marks_replication_dirty() {
    let (_dir, mut cache) = saved_ramp();
    let mut terrain = block(TerrainRole::Authoritative);
    terrain.load(&mut cache, "ramp.ter").unwrap();
    let (flags, _) = terrain.take_net_dirty();
    assert!(flags.contains(NetDirty::INIT | NetDirty::FILE));

    let seen = recorder(&mut terrain);
    terrain.set_square_size(4.0).unwrap();
    assert_eq!(terrain.object_box().max.x, 64.0);
    assert_eq!(seen.borrow()[0].kind, TerrainUpdateKind::SquareSize);

    terrain.set_texture_sizes(2048, 512);
    let (flags, rects) = terrain.take_net_dirty();
    assert_eq!(flags, NetDirty::SQUARE_SIZE | NetDirty::TEXTURE_SIZES);
    assert!(rects.is_empty());
    assert!(!terrain.is_net_dirty());
}

#[test]
fn authoritative_edits_are_recorded_for_replication() {
    let (_dir, mut cache) = saved_ramp();
    let mut terrain = block(TerrainRole::Authoritative);
    terrain.load(&mut cache, "ramp.ter").unwrap();
    terrain.take_net_dirty();

    let checksum = terrain.checksum().unwrap();
    let mut edit = GridEdit::new();
    edit.set_height(2, 2, 3.0);
    terrain.apply_edit(&edit).unwrap();
    let mut edit = GridEdit::new();
    edit.set_height(12, 12, 3.0);
    terrain.apply_edit(&edit).unwrap();

    let (flags, rects) = terrain.take_net_dirty();
    assert_eq!(flags, NetDirty::HEIGHTMAP);
    assert_eq!(rects, vec![GridRect::new(2, 2, 2, 2), GridRect::new(12, 12, 12, 12)]);
    assert_ne!(terrain.checksum().unwrap(), checksum);
}

#[test]
fn dependent_loads_when_checksums_match() {
    let (_dir, mut cache) = saved_ramp();
    let mut server = block(TerrainRole::Authoritative);
    server.load(&mut cache, "ramp.ter").unwrap();
    server.set_square_size(3.0).unwrap();
    let state = server.replication_state().unwrap();

    let mut client = block(TerrainRole::Dependent);
    client.load_replicated(&mut cache, "ramp.ter", &state).unwrap();
    assert_eq!(client.state(), TerrainState::Ready);
    assert_eq!(client.square_size(), 3.0);
    assert!(client.shares_file_with(&server));
}

#[test]
fn dependent_rejects_mismatched_checksum() {
    let (_dir, mut cache) = saved_ramp();
    let server_file = cache.load("ramp.ter").unwrap();
    let mut state = meshi_terrain::TerrainReplication {
        checksum: server_file.borrow().checksum(),
        square_size: 2.0,
        base_texture_size: 1024,
        light_map_size: 256,
    };
    state.checksum ^= 1;

    let mut client = block(TerrainRole::Dependent);
    match client.load_replicated(&mut cache, "ramp.ter", &state).unwrap_err() {
        Error::ChecksumMismatch(err) => assert_eq!(err.expected, state.checksum),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(client.state(), TerrainState::Unloaded);
    assert!(!client.is_loaded());
}

#[test]
fn dependent_refreshes_from_shared_data() {
    let (_dir, mut cache) = saved_ramp();
    let mut server = block(TerrainRole::Authoritative);
    server.load(&mut cache, "ramp.ter").unwrap();
    let mut client = block(TerrainRole::Dependent);
    client
        .load_replicated(&mut cache, "ramp.ter", &server.replication_state().unwrap())
        .unwrap();
    let seen = recorder(&mut client);

    let mut edit = GridEdit::new();
    edit.set_height(8, 8, 50.0);
    let rect = server.apply_edit(&edit).unwrap();
    assert_eq!(client.object_box().max.z, 7.5);

    client.update_grid(rect.min, rect.max).unwrap();
    assert_eq!(client.object_box().max.z, 50.0);
    assert_eq!(seen.borrow()[0].rect, Some(rect));
    // dependents never originate replication traffic
    let (flags, rects) = client.take_net_dirty();
    assert!(!flags.contains(NetDirty::HEIGHTMAP));
    assert!(rects.is_empty());

    assert!(matches!(client.apply_edit(&edit), Err(Error::ReadOnly())));
}

#[test]
fn blocks_release_shared_file_on_drop() {
    let dir = tempdir().unwrap();
    let mut cache = ResourceCache::new(dir.path());
    let file = cache.insert("flat.ter", TerrainFile::new(8).unwrap());
    let mut a = block(TerrainRole::Authoritative);
    let mut b = block(TerrainRole::Dependent);
    a.load(&mut cache, "flat.ter").unwrap();
    b.load(&mut cache, "flat.ter").unwrap();
    assert_eq!(Rc::strong_count(&file), 3);
    drop(file);
    drop(a);
    assert!(cache.is_resident("flat.ter"));
    drop(b);
    assert!(!cache.is_resident("flat.ter"));
}

#[test]
fn out_of_range_update_is_rejected() {
    let (_dir, mut cache) = saved_ramp();
    let mut terrain = block(TerrainRole::Authoritative);
    terrain.load(&mut cache, "ramp.ter").unwrap();
    let before = terrain.object_box();
    assert!(matches!(
        terrain.update_grid(IVec2::new(0, 0), IVec2::new(16, 3)),
        Err(Error::OutOfRange(_))
    ));
    assert_eq!(terrain.state(), TerrainState::Ready);
    assert_eq!(terrain.object_box(), before);
}

#[test]
fn failed_reload_keeps_loaded_file() {
    let (_dir, mut cache) = saved_ramp();
    let mut terrain = block(TerrainRole::Authoritative);
    terrain.load(&mut cache, "ramp.ter").unwrap();
    let before = terrain.object_box();

    assert!(matches!(
        terrain.load(&mut cache, "missing.ter"),
        Err(Error::LoadingError(_))
    ));
    assert_eq!(terrain.state(), TerrainState::Ready);
    assert!(terrain.is_loaded());
    assert_eq!(terrain.object_box(), before);
    let h = terrain.get_height(Vec2::new(2.0, 1.0)).unwrap();
    assert!((h - 0.5).abs() < 1e-4, "{}", h);

    let mut edit = GridEdit::new();
    edit.set_height(3, 3, 4.0);
    assert!(terrain.apply_edit(&edit).is_ok());
}

#[test]
fn failed_replicated_reload_keeps_loaded_file() {
    let (_dir, mut cache) = saved_ramp();
    let mut server = block(TerrainRole::Authoritative);
    server.load(&mut cache, "ramp.ter").unwrap();
    let mut state = server.replication_state().unwrap();

    let mut client = block(TerrainRole::Dependent);
    client.load_replicated(&mut cache, "ramp.ter", &state).unwrap();
    state.checksum ^= 1;
    assert!(client.load_replicated(&mut cache, "ramp.ter", &state).is_err());
    assert!(client.load_replicated(&mut cache, "missing.ter", &state).is_err());
    assert_eq!(client.state(), TerrainState::Ready);
    assert!(client.shares_file_with(&server));
}

#[test]
fn dependents_never_mark_replication_dirty() {
    let (_dir, mut cache) = saved_ramp();
    let mut server = block(TerrainRole::Authoritative);
    server.load(&mut cache, "ramp.ter").unwrap();

    let mut client = block(TerrainRole::Dependent);
    client
        .load_replicated(&mut cache, "ramp.ter", &server.replication_state().unwrap())
        .unwrap();
    assert!(!client.is_net_dirty());

    client.set_square_size(5.0).unwrap();
    client.set_texture_sizes(64, 32);
    assert_eq!(client.square_size(), 5.0);
    assert_eq!(client.texture_sizes(), (64, 32));
    assert!(!client.is_net_dirty());
    let (flags, rects) = client.take_net_dirty();
    assert!(flags.is_empty());
    assert!(rects.is_empty());
}

#[test]
fn configured_file_loads_through_cache() {
    let (_dir, mut cache) = saved_ramp();
    let config = TerrainConfig {
        file: Some("ramp.ter".into()),
        ..config()
    };
    let mut terrain = TerrainBlock::new(TerrainBlockInfo::from_config(
        config,
        TerrainRole::Authoritative,
    ));
    assert_eq!(terrain.configured_file(), Some(Path::new("ramp.ter")));
    terrain.load_configured(&mut cache).unwrap();
    assert_eq!(terrain.state(), TerrainState::Ready);
    assert_eq!(terrain.object_box().max.z, 7.5);

    let mut bare = block(TerrainRole::Authoritative);
    assert!(matches!(
        bare.load_configured(&mut cache),
        Err(Error::LoadingError(_))
    ));
    assert_eq!(bare.state(), TerrainState::Unloaded);
}
