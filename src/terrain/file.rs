//! Terrain file resource: a [`HeightField`] plus its [`LevelCache`], the
//! on-disk codec, and a cache that shares loaded files between blocks.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Error, LoadingError, Result};

use super::heightfield::HeightField;
use super::sampler::Sampler;
use super::square::LevelCache;

pub const FILE_MAGIC: [u8; 4] = *b"MTER";
pub const FILE_VERSION: u8 = 1;

/// Shared handle to a loaded terrain file.
pub type TerrainResource = Rc<RefCell<TerrainFile>>;

#[derive(Debug)]
pub struct TerrainFile {
    field: HeightField,
    cache: LevelCache,
    path: Option<PathBuf>,
    checksum: Cell<Option<u64>>,
}

impl TerrainFile {
    pub fn new(size: u32) -> Result<Self> {
        Ok(Self::from_field(HeightField::new(size)?))
    }

    pub fn from_field(field: HeightField) -> Self {
        let cache = LevelCache::build(&field);
        Self {
            field,
            cache,
            path: None,
            checksum: Cell::new(None),
        }
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.field.size()
    }

    pub fn field(&self) -> &HeightField {
        &self.field
    }

    pub fn cache(&self) -> &LevelCache {
        &self.cache
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn sampler(&self, square_size: f32) -> Sampler<'_> {
        Sampler::new(&self.field, &self.cache, square_size)
    }

    pub(crate) fn field_mut(&mut self) -> &mut HeightField {
        self.mark_checksum_stale();
        &mut self.field
    }

    pub(crate) fn parts_mut(&mut self) -> (&HeightField, &mut LevelCache) {
        (&self.field, &mut self.cache)
    }

    pub(crate) fn mark_checksum_stale(&self) {
        self.checksum.set(None);
    }

    /// Rebuild the whole level cache, e.g. after replacing the field wholesale.
    pub fn rebuild_cache(&mut self) {
        self.cache = LevelCache::build(&self.field);
    }

    pub fn add_material(&mut self, name: &str) -> Result<u8> {
        self.field_mut().add_material(name)
    }

    /// Content hash used to detect diverged authoritative and dependent copies.
    pub fn checksum(&self) -> u64 {
        if let Some(sum) = self.checksum.get() {
            return sum;
        }
        let mut hasher = Sha256::new();
        hasher.update(self.field.size().to_le_bytes());
        let heights: Vec<u8> = self
            .field
            .heights()
            .iter()
            .flat_map(|h| h.to_le_bytes())
            .collect();
        hasher.update(&heights);
        hasher.update(self.field.material_indices());
        hasher.update(self.field.raw_cell_flags());
        for name in self.field.material_names() {
            hasher.update((name.len() as u16).to_le_bytes());
            hasher.update(name.as_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let sum = u64::from_le_bytes(bytes);
        self.checksum.set(Some(sum));
        sum
    }

    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        let field = &self.field;
        out.write_all(&FILE_MAGIC)?;
        out.write_all(&[FILE_VERSION])?;
        out.write_all(&field.size().to_le_bytes())?;
        let heights: Vec<u8> = field.heights().iter().flat_map(|h| h.to_le_bytes()).collect();
        out.write_all(&heights)?;
        out.write_all(field.material_indices())?;
        out.write_all(field.raw_cell_flags())?;
        out.write_all(&(field.material_names().len() as u32).to_le_bytes())?;
        for name in field.material_names() {
            let len = u16::try_from(name.len())
                .map_err(|_| Error::format("material table", format!("name too long: {}", name)))?;
            out.write_all(&len.to_le_bytes())?;
            out.write_all(name.as_bytes())?;
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader { data, pos: 0 };
        if r.take(4, "header")? != &FILE_MAGIC[..] {
            return Err(Error::format("header", "bad magic"));
        }
        let version = r.u8("header")?;
        if version != FILE_VERSION {
            return Err(Error::format("header", format!("unsupported version {}", version)));
        }
        let size = r.u32("header")?;
        if size < 2 || !size.is_power_of_two() || size > 1 << 15 {
            return Err(Error::format("header", format!("invalid size {}", size)));
        }

        let count = (size * size) as usize;
        let heights = r
            .take(count * 2, "heights")?
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let materials = r.take(count, "material indices")?.to_vec();
        let flags = r.take(count, "cell flags")?.to_vec();

        let name_count = r.u32("material table")?;
        let mut names = Vec::new();
        for _ in 0..name_count {
            let len = u16::from_le_bytes([r.u8("material table")?, r.u8("material table")?]);
            let bytes = r.take(len as usize, "material table")?;
            let name = std::str::from_utf8(bytes)
                .map_err(|e| Error::format("material table", e.to_string()))?;
            names.push(name.to_string());
        }
        if r.pos != data.len() {
            return Err(Error::format(
                "trailer",
                format!("{} unexpected trailing bytes", data.len() - r.pos),
            ));
        }

        let field = HeightField::from_parts(size, heights, materials, flags, names)?;
        Ok(Self::from_field(field))
    }

    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        std::fs::write(path, bytes)?;
        info!("saved terrain '{}' ({}x{})", path.display(), self.size(), self.size());
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            Error::LoadingError(LoadingError {
                entry: e.to_string(),
                path: path.display().to_string(),
            })
        })?;
        let mut file = Self::decode(&data)?;
        file.path = Some(path.to_path_buf());
        info!("loaded terrain '{}' ({}x{})", path.display(), file.size(), file.size());
        Ok(file)
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(Error::format(context, "unexpected end of data"));
        };
        let data = self.data;
        let out = &data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self, context: &'static str) -> Result<u8> {
        Ok(self.take(1, context)?[0])
    }

    fn u32(&mut self, context: &'static str) -> Result<u32> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Shares terrain files between blocks. Entries are weak, so a file is freed
/// once the last block holding it lets go.
pub struct ResourceCache {
    base_path: PathBuf,
    entries: HashMap<PathBuf, Weak<RefCell<TerrainFile>>>,
}

impl ResourceCache {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            entries: HashMap::new(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    /// Fetch a live file or load it from disk.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<TerrainResource> {
        let full = self.resolve(path.as_ref());
        if let Some(live) = self.entries.get(&full).and_then(Weak::upgrade) {
            debug!("terrain '{}' already resident", full.display());
            return Ok(live);
        }
        let file = TerrainFile::load(&full).map_err(|e| {
            warn!("failed to load terrain '{}': {}", full.display(), e);
            e
        })?;
        let resource = Rc::new(RefCell::new(file));
        self.entries.insert(full, Rc::downgrade(&resource));
        Ok(resource)
    }

    /// Register an in-memory file under `path` so later loads share it.
    pub fn insert(&mut self, path: impl AsRef<Path>, file: TerrainFile) -> TerrainResource {
        let full = self.resolve(path.as_ref());
        let resource = Rc::new(RefCell::new(file));
        self.entries.insert(full, Rc::downgrade(&resource));
        resource
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<TerrainResource> {
        self.entries
            .get(&self.resolve(path.as_ref()))
            .and_then(Weak::upgrade)
    }

    pub fn is_resident(&self, path: impl AsRef<Path>) -> bool {
        self.get(path).is_some()
    }

    /// Forget entries whose files have been dropped. Returns how many went.
    pub fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }
}
