//! Working storage for a combine call.
//!
//! Input frames are copied once, at working precision, before any tile is
//! processed. Two modes:
//! - In-memory: the converted frames are kept on the heap.
//! - Disk-backed: each frame component is written to a raw file and
//!   memory-mapped read-only.
//!
//! `StorageMode::Auto` keeps the copies in memory only while samples plus
//! masks of all frames fit the memory budget.
//!
//! Disk format:
//! - One directory per call under `cache_dir`: `imcombine_{pid}_{seq}`
//! - Per frame `{index}_data.bin`, `{index}_mask.bin` and, when kept,
//!   `{index}_unct.bin`
//! - Samples are raw native-endian values in row-major order, masks one byte
//!   per pixel (0 or 1)
//!
//! Files are removed when the working set is dropped, on every exit path.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::Mmap;

use crate::common::Shape;
use crate::common::buffer2::crop_plane;
use crate::frame::{Frame, FrameSource, Pixel, Unit};

use super::chunks::Tile;
use super::config::{CacheConfig, StorageMode};
use super::error::Error;
use super::progress::{CombineStage, ProgressCallback, report_progress};
use super::stack::{Slabs, Stack};

static CALL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Check that the sources can be combined and return their common shape and
/// unit. Nothing is copied.
pub(crate) fn validate_sources<F: FrameSource>(sources: &[F]) -> Result<(Shape, Unit), Error> {
    let Some(first) = sources.first() else {
        return Err(Error::EmptyInput);
    };
    let shape = first.shape();
    let unit = first.unit();

    for (index, source) in sources.iter().enumerate().skip(1) {
        let actual = source.shape();
        if actual != shape {
            return Err(Error::ShapeMismatch {
                index,
                expected: shape,
                actual,
            });
        }
        let actual = source.unit();
        if actual != unit {
            return Err(Error::UnitMismatch {
                index,
                expected: unit,
                actual,
            });
        }
    }

    if sources.iter().any(|s| !s.is_frame()) {
        tracing::warn!(
            "The images to combine are not full frames; mask and uncertainty propagation is limited"
        );
    }

    Ok((shape, unit))
}

/// Memory-mapped components of one frame.
#[derive(Debug)]
struct MappedFrame {
    data: Mmap,
    mask: Mmap,
    uncertainty: Option<Mmap>,
}

/// Disk-backed frames. Dropping removes every file and the call directory.
#[derive(Debug)]
struct DiskFrames {
    frames: Vec<MappedFrame>,
    paths: Vec<PathBuf>,
    dir: PathBuf,
}

impl DiskFrames {
    fn cleanup(&mut self) {
        // Unmap before unlinking.
        self.frames.clear();
        for path in self.paths.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
        if let Err(e) = std::fs::remove_dir(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to remove cache directory");
        }
    }
}

impl Drop for DiskFrames {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[derive(Debug)]
enum Storage<T: Pixel> {
    InMemory(Vec<Frame<T>>),
    DiskBacked(DiskFrames),
}

/// Validated, independent copies of the input frames.
#[derive(Debug)]
pub(crate) struct WorkingSet<T: Pixel> {
    storage: Storage<T>,
    shape: Shape,
    unit: Unit,
    frame_count: usize,
    has_uncertainty: bool,
}

impl<T: Pixel> WorkingSet<T> {
    /// Validate and copy `sources`. Uncertainties are kept only when
    /// `keep_uncertainty` is set and every source has one.
    pub fn load<F: FrameSource>(
        sources: &[F],
        config: &CacheConfig,
        memory_budget: u64,
        keep_uncertainty: bool,
        progress: Option<&ProgressCallback>,
    ) -> Result<Self, Error> {
        let (shape, unit) = validate_sources(sources)?;
        let all_have_uncertainty = sources.iter().all(|s| s.has_uncertainty());
        if keep_uncertainty && !all_have_uncertainty {
            tracing::info!("One or more frames have no uncertainty; some features are disabled");
        }
        let has_uncertainty = keep_uncertainty && all_have_uncertainty;

        let mode = config.storage.resolve(
            shape.pixel_count(),
            sources.len(),
            size_of::<T>() + size_of::<bool>(),
            memory_budget,
        );
        tracing::debug!(
            requested = ?config.storage,
            resolved = ?mode,
            memory_budget,
            "Working storage decision"
        );

        report_progress(progress, 0, sources.len(), CombineStage::Loading);

        let storage = match mode {
            StorageMode::InMemory => {
                let frames = sources
                    .iter()
                    .enumerate()
                    .map(|(i, source)| {
                        let frame = source.to_frame::<T>();
                        report_progress(progress, i + 1, sources.len(), CombineStage::Loading);
                        frame
                    })
                    .collect();
                Storage::InMemory(frames)
            }
            // `resolve` never returns `Auto`.
            StorageMode::DiskBacked | StorageMode::Auto => Storage::DiskBacked(
                write_to_disk::<T, F>(sources, config, has_uncertainty, progress)?,
            ),
        };

        tracing::info!(
            frame_count = sources.len(),
            height = shape.height,
            width = shape.width,
            storage = ?mode,
            has_uncertainty,
            "Loaded frames for combining"
        );

        Ok(Self {
            storage,
            shape,
            unit,
            frame_count: sources.len(),
            has_uncertainty,
        })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn has_uncertainty(&self) -> bool {
        self.has_uncertainty
    }

    /// Working stack for one tile. A tile covering the whole image borrows the
    /// stored samples instead of copying them.
    pub fn stack(&self, tile: &Tile) -> Stack<'_, T> {
        let width = self.shape.width;
        let (rows, cols) = (&tile.rows, &tile.cols);

        let (data, masks, uncertainty): (Slabs<'_, T>, Vec<Vec<bool>>, Option<Slabs<'_, T>>) =
            match &self.storage {
                Storage::InMemory(frames) => (
                    frames
                        .iter()
                        .map(|f| self.tile_samples(f.data().pixels(), tile))
                        .collect(),
                    frames
                        .iter()
                        .map(|f| crop_plane(f.mask().pixels(), width, rows.clone(), cols.clone(), |m| m))
                        .collect(),
                    frames
                        .iter()
                        .map(|f| f.uncertainty().map(|u| self.tile_samples(u.pixels(), tile)))
                        .collect(),
                ),
                Storage::DiskBacked(disk) => (
                    disk.frames
                        .iter()
                        .map(|f| self.tile_samples(bytemuck::cast_slice(&f.data[..]), tile))
                        .collect(),
                    disk.frames
                        .iter()
                        .map(|f| crop_plane(&f.mask[..], width, rows.clone(), cols.clone(), |b| b != 0))
                        .collect(),
                    disk.frames
                        .iter()
                        .map(|f| {
                            f.uncertainty
                                .as_ref()
                                .map(|u| self.tile_samples(bytemuck::cast_slice(&u[..]), tile))
                        })
                        .collect(),
                ),
            };

        let uncertainty = uncertainty.filter(|_| self.has_uncertainty);
        Stack::new(tile.shape(), data, masks, uncertainty)
    }

    fn tile_samples<'a>(&self, plane: &'a [T], tile: &Tile) -> Cow<'a, [T]> {
        if tile.covers(self.shape) {
            Cow::Borrowed(plane)
        } else {
            Cow::Owned(crop_plane(
                plane,
                self.shape.width,
                tile.rows.clone(),
                tile.cols.clone(),
                |v| v,
            ))
        }
    }

    /// Files backing a disk working set, empty for in-memory storage.
    pub fn cache_files(&self) -> Vec<PathBuf> {
        match &self.storage {
            Storage::InMemory(_) => Vec::new(),
            Storage::DiskBacked(disk) => disk.paths.clone(),
        }
    }
}

fn write_to_disk<T: Pixel, F: FrameSource>(
    sources: &[F],
    config: &CacheConfig,
    keep_uncertainty: bool,
    progress: Option<&ProgressCallback>,
) -> Result<DiskFrames, Error> {
    let seq = CALL_SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = config
        .cache_dir
        .join(format!("imcombine_{}_{}", std::process::id(), seq));
    std::fs::create_dir_all(&dir).map_err(|e| Error::CreateCacheDir {
        path: dir.clone(),
        source: e,
    })?;

    // Owns the directory from here on, so an early return still cleans up.
    let mut disk = DiskFrames {
        frames: Vec::with_capacity(sources.len()),
        paths: Vec::new(),
        dir,
    };

    for (i, source) in sources.iter().enumerate() {
        let frame = source.to_frame::<T>();

        let data_path = disk.dir.join(format!("{i}_data.bin"));
        let data = write_and_map(&mut disk.paths, &data_path, bytemuck::cast_slice(frame.data().pixels()))?;

        let mask_bytes: Vec<u8> = frame.mask().iter().map(|&m| u8::from(m)).collect();
        let mask_path = disk.dir.join(format!("{i}_mask.bin"));
        let mask = write_and_map(&mut disk.paths, &mask_path, &mask_bytes)?;

        let uncertainty = match frame.uncertainty() {
            Some(u) if keep_uncertainty => {
                let path = disk.dir.join(format!("{i}_unct.bin"));
                Some(write_and_map(&mut disk.paths, &path, bytemuck::cast_slice(u.pixels()))?)
            }
            _ => None,
        };

        disk.frames.push(MappedFrame {
            data,
            mask,
            uncertainty,
        });
        report_progress(progress, i + 1, sources.len(), CombineStage::Loading);
    }

    tracing::info!(
        frames = disk.frames.len(),
        bytes_per_sample = size_of::<T>(),
        dir = %disk.dir.display(),
        "Cached frames to disk"
    );

    Ok(disk)
}

/// Write `bytes` to `path`, record the path for cleanup and map it.
fn write_and_map(paths: &mut Vec<PathBuf>, path: &Path, bytes: &[u8]) -> Result<Mmap, Error> {
    let file = File::create(path).map_err(|e| Error::WriteCacheFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    paths.push(path.to_path_buf());

    let mut writer = BufWriter::new(file);
    writer
        .write_all(bytes)
        .and_then(|_| writer.flush())
        .map_err(|e| Error::WriteCacheFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    drop(writer);

    let file = File::open(path).map_err(|e| Error::OpenCacheFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    // SAFETY: the file lives in a per-call directory owned by this process and
    // is not modified while mapped.
    unsafe {
        Mmap::map(&file).map_err(|e| Error::MmapCacheFile {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
