//! Raw height samples, material indices and per-cell flags.
//!
//! The grid is square with a power of two side so every lookup can wrap with a
//! mask. Nothing in here knows about the level cache; callers that write must
//! follow up with [`crate::terrain::TerrainFile::update_grid`].

use crate::error::{Error, FormatError, Result};

use super::square::SquareFlags;

/// Fixed16 steps per world unit.
pub const FIXED_SCALE: f32 = 32.0;
/// Height of one fixed16 step in world units.
pub const FIXED_STEP: f32 = 1.0 / FIXED_SCALE;

/// Converts a world height to fixed16, rounding to the nearest step and
/// clamping to the representable range.
#[inline]
pub fn float_to_fixed(height: f32) -> u16 {
    if height.is_nan() {
        return 0;
    }
    (height * FIXED_SCALE).round().clamp(0.0, u16::MAX as f32) as u16
}

#[inline]
pub fn fixed_to_float(value: u16) -> f32 {
    value as f32 * FIXED_STEP
}

/// Default diagonal for a freshly created cell.
#[inline]
pub(crate) fn default_split45(x: u32, y: u32) -> bool {
    (x ^ y) & 1 == 0
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeightField {
    size: u32,
    shift: u32,
    heights: Vec<u16>,
    material_indices: Vec<u8>,
    cell_flags: Vec<u8>,
    material_names: Vec<String>,
}

impl HeightField {
    pub fn new(size: u32) -> Result<Self> {
        Self::flat(size, 0.0)
    }

    pub fn flat(size: u32, height: f32) -> Result<Self> {
        if size < 2 || !size.is_power_of_two() {
            return Err(Error::FormatError(FormatError {
                context: "height field",
                detail: format!("size {} is not a power of two >= 2", size),
            }));
        }

        let count = (size * size) as usize;
        let mut cell_flags = vec![0u8; count];
        for y in 0..size {
            for x in 0..size {
                if default_split45(x, y) {
                    cell_flags[(y * size + x) as usize] = SquareFlags::SPLIT45.bits();
                }
            }
        }

        Ok(Self {
            size,
            shift: size.trailing_zeros(),
            heights: vec![float_to_fixed(height); count],
            material_indices: vec![0; count],
            cell_flags,
            material_names: Vec::new(),
        })
    }

    /// Assemble a field from decoded parts. Lengths must match `size * size`.
    pub(crate) fn from_parts(
        size: u32,
        heights: Vec<u16>,
        material_indices: Vec<u8>,
        cell_flags: Vec<u8>,
        material_names: Vec<String>,
    ) -> Result<Self> {
        let mut field = Self::new(size)?;
        let count = field.heights.len();
        if heights.len() != count || material_indices.len() != count || cell_flags.len() != count
        {
            return Err(Error::format(
                "height field",
                format!("expected {} samples per layer", count),
            ));
        }
        field.heights = heights;
        field.material_indices = material_indices;
        field.cell_flags = cell_flags;
        field.material_names = material_names;
        Ok(field)
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// `log2(size)`, which is also the index of the quad-tree root level.
    #[inline]
    pub fn shift(&self) -> u32 {
        self.shift
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.size - 1
    }

    /// True block-extents check, for callers that do not want wraparound.
    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        ((x | y) as u32 & !self.mask()) == 0
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> usize {
        let mask = self.mask();
        (((y as u32 & mask) << self.shift) | (x as u32 & mask)) as usize
    }

    #[inline]
    pub fn get_height(&self, x: i32, y: i32) -> u16 {
        self.heights[self.index(x, y)]
    }

    #[inline]
    pub fn get_height_f32(&self, x: i32, y: i32) -> f32 {
        fixed_to_float(self.get_height(x, y))
    }

    #[inline]
    pub fn set_height(&mut self, x: i32, y: i32, value: u16) {
        let i = self.index(x, y);
        self.heights[i] = value;
    }

    #[inline]
    pub fn get_material_index(&self, x: i32, y: i32) -> u8 {
        self.material_indices[self.index(x, y)]
    }

    #[inline]
    pub fn set_material_index(&mut self, x: i32, y: i32, index: u8) {
        let i = self.index(x, y);
        self.material_indices[i] = index;
    }

    #[inline]
    pub fn cell_flags(&self, x: i32, y: i32) -> SquareFlags {
        SquareFlags::from_bits_truncate(self.cell_flags[self.index(x, y)])
            & (SquareFlags::EMPTY | SquareFlags::SPLIT45)
    }

    pub fn is_empty(&self, x: i32, y: i32) -> bool {
        self.cell_flags(x, y).contains(SquareFlags::EMPTY)
    }

    pub fn set_empty(&mut self, x: i32, y: i32, empty: bool) {
        self.set_cell_flag(x, y, SquareFlags::EMPTY, empty);
    }

    pub fn set_split45(&mut self, x: i32, y: i32, split: bool) {
        self.set_cell_flag(x, y, SquareFlags::SPLIT45, split);
    }

    fn set_cell_flag(&mut self, x: i32, y: i32, flag: SquareFlags, on: bool) {
        let i = self.index(x, y);
        let mut flags = SquareFlags::from_bits_truncate(self.cell_flags[i]);
        flags.set(flag, on);
        self.cell_flags[i] = flags.bits();
    }

    pub fn material_names(&self) -> &[String] {
        &self.material_names
    }

    pub fn material_name(&self, index: u8) -> Option<&str> {
        self.material_names.get(index as usize).map(String::as_str)
    }

    /// Add a material to the name table, returning its index. Existing names
    /// are reused.
    pub fn add_material(&mut self, name: &str) -> Result<u8> {
        if let Some(i) = self.material_names.iter().position(|n| n == name) {
            return Ok(i as u8);
        }
        if self.material_names.len() > u8::MAX as usize {
            return Err(Error::format(
                "material table",
                format!("cannot add '{}', table is full", name),
            ));
        }
        self.material_names.push(name.to_string());
        Ok((self.material_names.len() - 1) as u8)
    }

    pub fn heights(&self) -> &[u16] {
        &self.heights
    }

    pub fn material_indices(&self) -> &[u8] {
        &self.material_indices
    }

    pub(crate) fn raw_cell_flags(&self) -> &[u8] {
        &self.cell_flags
    }

    /// Heights in world units, row-major. Used to feed the physics collaborator.
    pub fn heights_f32(&self) -> Vec<f32> {
        self.heights.iter().copied().map(fixed_to_float).collect()
    }

    /// One entry per cell, `true` where the cell is a hole.
    pub fn hole_mask(&self) -> Vec<bool> {
        self.cell_flags
            .iter()
            .map(|f| f & SquareFlags::EMPTY.bits() != 0)
            .collect()
    }

    /// One entry per cell, `true` where the cell uses the SPLIT45 diagonal.
    pub fn split_mask(&self) -> Vec<bool> {
        self.cell_flags
            .iter()
            .map(|f| f & SquareFlags::SPLIT45.bits() != 0)
            .collect()
    }
}
