pub mod block;
pub mod cells;
pub mod file;
pub mod heightfield;
pub mod mutator;
pub mod raycast;
pub mod replication;
pub mod sampler;
pub mod square;

pub use block::{
    TerrainBlock, TerrainBlockInfo, TerrainRole, TerrainState, TerrainUpdate, TerrainUpdateKind,
};
pub use cells::{CellTree, RenderCell};
pub use file::{ResourceCache, TerrainFile, TerrainResource, FILE_MAGIC, FILE_VERSION};
pub use heightfield::{fixed_to_float, float_to_fixed, HeightField, FIXED_SCALE, FIXED_STEP};
pub use mutator::{validate_rect, GridEdit, GridRect};
pub use raycast::RayHit;
pub use replication::{NetDirty, TerrainReplication};
pub use sampler::{Sampler, SurfaceSample};
pub use square::{LevelCache, SquareFlags, TerrainSquare};
