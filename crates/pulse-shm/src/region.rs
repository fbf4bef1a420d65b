//! File-backed shared region
//!
//! The supervisor creates the region (and owns the file's lifetime); workers
//! open it by path and rebind their own handles. Geometry travels in the
//! header so a worker needs nothing but the path.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64};

use memmap2::MmapMut;

use pulse_core::EngineConfig;

use crate::layout::RegionLayout;
use crate::{ShmError, ShmResult};

const MAGIC: u64 = u64::from_le_bytes(*b"PULSESHM");
const VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RegionHeader {
    magic: u64,
    version: u32,
    sample_rate: u32,
    buffer_size: u32,
    ring_frames: u32,
    cmd_slots: u32,
    _reserved: u32,
}

/// A mapped shared region. Cheap to clone via `Arc`; ring handles keep the
/// mapping alive.
pub struct SharedRegion {
    base: *mut u8,
    len: usize,
    layout: RegionLayout,
    sample_rate: u32,
    path: PathBuf,
    owner: bool,
    // Held for the mapping's lifetime.
    _mmap: MmapMut,
    _file: File,
}

// SAFETY: the region is plain shared memory; all mutation goes through
// atomics or through ring slots governed by the SPSC publication protocol.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create a fresh region file sized for `config`. The creating process
    /// owns the file and unlinks it on drop.
    pub fn create(path: &Path, config: &EngineConfig) -> ShmResult<Arc<Self>> {
        let layout = RegionLayout::compute(
            size_of::<RegionHeader>(),
            config.buffer_size.as_usize(),
            config.ring_frames,
            config.cmd_slots,
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        // ftruncate zero-fills, so rings start empty and cells start at zero.
        file.set_len(layout.total_len as u64)?;

        // SAFETY: the file is open read/write and sized above.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        let header = RegionHeader {
            magic: MAGIC,
            version: VERSION,
            sample_rate: config.sample_rate.as_u32(),
            buffer_size: config.buffer_size.as_u32(),
            ring_frames: config.ring_frames as u32,
            cmd_slots: config.cmd_slots as u32,
            _reserved: 0,
        };
        // SAFETY: the mapping is at least header-sized and freshly zeroed;
        // no other process can observe it before spawn.
        unsafe { std::ptr::write(base as *mut RegionHeader, header) };

        log::debug!(
            "created shared region {} ({} bytes, {} frames x {} samples)",
            path.display(),
            layout.total_len,
            config.ring_frames,
            config.buffer_size.as_usize()
        );

        Ok(Arc::new(Self {
            base,
            len: layout.total_len,
            layout,
            sample_rate: config.sample_rate.as_u32(),
            path: path.to_path_buf(),
            owner: true,
            _mmap: mmap,
            _file: file,
        }))
    }

    /// Open an existing region created by another process.
    pub fn open(path: &Path) -> ShmResult<Arc<Self>> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len() as usize;
        if file_len < size_of::<RegionHeader>() {
            return Err(ShmError::TooSmall {
                len: file_len,
                need: size_of::<RegionHeader>(),
            });
        }

        // SAFETY: the file is open read/write and at least header-sized.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        // SAFETY: bounds checked above; RegionHeader is plain old data.
        let header = unsafe { std::ptr::read(base as *const RegionHeader) };
        if header.magic != MAGIC {
            return Err(ShmError::BadMagic);
        }
        if header.version != VERSION {
            return Err(ShmError::VersionMismatch {
                found: header.version,
                expected: VERSION,
            });
        }
        for (field, value) in [
            ("buffer_size", header.buffer_size),
            ("ring_frames", header.ring_frames),
            ("cmd_slots", header.cmd_slots),
            ("sample_rate", header.sample_rate),
        ] {
            if value == 0 {
                return Err(ShmError::BadHeaderField { field, value });
            }
        }

        let layout = RegionLayout::compute(
            size_of::<RegionHeader>(),
            header.buffer_size as usize,
            header.ring_frames as usize,
            header.cmd_slots as usize,
        );
        if file_len < layout.total_len {
            return Err(ShmError::TooSmall {
                len: file_len,
                need: layout.total_len,
            });
        }

        log::debug!(
            "opened shared region {} in pid {}",
            path.display(),
            std::process::id()
        );

        Ok(Arc::new(Self {
            base,
            len: layout.total_len,
            layout,
            sample_rate: header.sample_rate,
            path: path.to_path_buf(),
            owner: false,
            _mmap: mmap,
            _file: file,
        }))
    }

    #[inline]
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.layout.buffer_size
    }

    #[inline]
    pub fn ring_frames(&self) -> usize {
        self.layout.ring_frames
    }

    #[inline]
    pub fn cmd_slots(&self) -> usize {
        self.layout.cmd_slots
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── raw cell access (crate-internal) ────────────────────────────────

    /// # Safety
    /// `offset` must be a layout-computed offset of a u32 cell.
    #[inline]
    pub(crate) unsafe fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        debug_assert!(offset + 4 <= self.len);
        // SAFETY: caller passes layout offsets, which are in-bounds and
        // cache-line aligned.
        unsafe { &*(self.base.add(offset) as *const AtomicU32) }
    }

    /// # Safety
    /// `offset` must be a layout-computed offset of a u64 cell.
    #[inline]
    pub(crate) unsafe fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset + 8 <= self.len);
        // SAFETY: as above.
        unsafe { &*(self.base.add(offset) as *const AtomicU64) }
    }

    /// # Safety
    /// `offset` must be a layout-computed offset of a bool cell.
    #[inline]
    pub(crate) unsafe fn atomic_bool(&self, offset: usize) -> &AtomicBool {
        debug_assert!(offset < self.len);
        // SAFETY: as above.
        unsafe { &*(self.base.add(offset) as *const AtomicBool) }
    }

    /// # Safety
    /// `offset..offset+len` must lie inside the region and, per the ring
    /// protocol, not be concurrently written by the peer process.
    #[inline]
    pub(crate) unsafe fn ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.len);
        // SAFETY: bounds asserted; aliasing is the caller's protocol.
        unsafe { self.base.add(offset) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("failed to unlink shared region {}: {e}", self.path.display());
            }
        }
    }
}
