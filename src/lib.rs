pub mod config;
pub mod error;
pub mod physics;
pub mod scene;
pub mod terrain;
pub mod utils;

pub use config::TerrainConfig;
pub use error::{Error, Result};
pub use physics::{HeightFieldBody, HeightFieldShapeInfo, PhysicsSimulation, SphereContact};
pub use scene::{Aabb, SceneGraph, SceneId};
pub use terrain::{
    GridEdit, GridRect, HeightField, NetDirty, ResourceCache, Sampler, TerrainBlock,
    TerrainBlockInfo, TerrainFile, TerrainReplication, TerrainRole, TerrainState, TerrainUpdate,
};

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install a stdout subscriber for the crate's `tracing` output.
///
/// Returns `false` if a global subscriber was already set, e.g. by the host
/// application or an earlier call.
pub fn init_logging(level: Level) -> bool {
    // a builder for `FmtSubscriber`.
    let subscriber = FmtSubscriber::builder()
        // spans/events at `level` and above are written to stdout.
        .with_max_level(level)
        // completes the builder.
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
