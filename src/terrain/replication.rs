use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::mutator::GridRect;

bitflags! {
    /// What changed on an authoritative block since the last
    /// [`TerrainBlock::take_net_dirty`](super::TerrainBlock::take_net_dirty).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NetDirty: u32 {
        const INIT = 1 << 0;
        const SQUARE_SIZE = 1 << 1;
        const FILE = 1 << 2;
        const HEIGHTMAP = 1 << 3;
        const MATERIALS = 1 << 4;
        const TEXTURE_SIZES = 1 << 5;
    }
}

/// Snapshot a dependent block needs to validate and lay out its copy.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct TerrainReplication {
    pub checksum: u64,
    pub square_size: f32,
    pub base_texture_size: u32,
    pub light_map_size: u32,
}

/// Accumulates dirty bits and edited rectangles between network flushes.
#[derive(Debug, Default)]
pub(crate) struct DirtyTracker {
    flags: NetDirty,
    rects: Vec<GridRect>,
}

impl DirtyTracker {
    pub fn mark(&mut self, flags: NetDirty) {
        self.flags |= flags;
    }

    /// Record an edited rectangle, folding it into an overlapping one when
    /// possible.
    pub fn push_rect(&mut self, rect: GridRect) {
        self.flags |= NetDirty::HEIGHTMAP;
        match self.rects.iter_mut().find(|r| r.overlaps(&rect)) {
            Some(existing) => *existing = existing.union(&rect),
            None => self.rects.push(rect),
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.flags.is_empty()
    }

    pub fn take(&mut self) -> (NetDirty, Vec<GridRect>) {
        (
            std::mem::take(&mut self.flags),
            std::mem::take(&mut self.rects),
        )
    }
}
