#![allow(dead_code)]

use meshi_terrain::terrain::{HeightField, TerrainFile};

/// Small deterministic generator so failures reproduce.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1))
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    pub fn range(&mut self, lo: i32, hi: i32) -> i32 {
        lo + (self.next_u32() % (hi - lo + 1) as u32) as i32
    }

    pub fn unit(&mut self) -> f32 {
        self.next_u32() as f32 / u32::MAX as f32
    }
}

pub fn random_field(size: u32, seed: u64, max_height: f32) -> HeightField {
    let mut rng = Lcg::new(seed);
    let mut field = HeightField::new(size).unwrap();
    for y in 0..size as i32 {
        for x in 0..size as i32 {
            let h = rng.unit() * max_height;
            field.set_height(x, y, meshi_terrain::terrain::float_to_fixed(h));
        }
    }
    field
}

pub fn random_file(size: u32, seed: u64, max_height: f32) -> TerrainFile {
    TerrainFile::from_field(random_field(size, seed, max_height))
}

/// Heights rising by `slope` per sample along +x.
pub fn ramp_file(size: u32, slope: f32) -> TerrainFile {
    let mut file = TerrainFile::new(size).unwrap();
    for y in 0..size as i32 {
        for x in 0..size as i32 {
            file.set_height(x, y, x as f32 * slope).unwrap();
        }
    }
    file.rebuild_cache();
    file
}
