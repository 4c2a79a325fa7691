//! Directory-backed raster provider.
//!
//! Layout: `<root>/<source>/<year>/<tile>.json` for source tiles and
//! `<root>/mask/<tile>.json` for tile masks, each a serialized [`CropGrid`].

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::error::FetchError;
use crate::grid::CropGrid;
use crate::provider::RasterProvider;
use crate::years::Year;

pub const MASK_DIR: &str = "mask";

#[derive(Debug, Clone)]
pub struct DirRasterProvider {
    root: PathBuf,
}

impl DirRasterProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tile_path(&self, source: &str, year: Year, tile: &str) -> PathBuf {
        self.root
            .join(source)
            .join(year.to_string())
            .join(format!("{tile}.json"))
    }

    pub fn mask_path(&self, tile: &str) -> PathBuf {
        self.root.join(MASK_DIR).join(format!("{tile}.json"))
    }

    /// Write a grid where `fetch` will find it. Used to stage inputs.
    pub fn put(&self, source: &str, year: Year, tile: &str, grid: &CropGrid) -> io::Result<()> {
        write_grid(&self.tile_path(source, year, tile), grid)
    }

    pub fn put_mask(&self, tile: &str, grid: &CropGrid) -> io::Result<()> {
        write_grid(&self.mask_path(tile), grid)
    }
}

fn write_grid(path: &Path, grid: &CropGrid) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string(grid).map_err(io::Error::other)?;
    fs::write(path, text)
}

fn read_grid(path: &Path) -> Result<Option<CropGrid>, FetchError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(classify_io(path, err)),
    };
    let grid: CropGrid = serde_json::from_str(&text)
        .map_err(|e| FetchError::Permanent(format!("{}: {e}", path.display())))?;
    if !grid.is_consistent() {
        return Err(FetchError::Permanent(format!(
            "{}: {} cells for a {}x{} grid",
            path.display(),
            grid.data.len(),
            grid.width,
            grid.height
        )));
    }
    Ok(Some(grid))
}

fn classify_io(path: &Path, err: io::Error) -> FetchError {
    let message = format!("{}: {err}", path.display());
    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            FetchError::Transient(message)
        }
        _ => FetchError::Permanent(message),
    }
}

impl RasterProvider for DirRasterProvider {
    fn fetch(&self, source: &str, year: Year, tile: &str) -> Result<Option<CropGrid>, FetchError> {
        let path = self.tile_path(source, year, tile);
        tracing::trace!(target: "croptype::raster", path = %path.display(), "fetch");
        read_grid(&path)
    }

    fn mask(&self, tile: &str) -> Result<Option<CropGrid>, FetchError> {
        read_grid(&self.mask_path(tile))
    }
}
