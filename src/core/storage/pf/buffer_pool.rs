use log::debug;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use crate::core::common::error::OxibaseError;
use crate::core::common::types::{FileId, PageNum};
use crate::core::storage::pf::disk_manager::{DiskManager, PAGE_SIZE};

/// Shared handle to one frame's page bytes. Callers read and write
/// through it while they hold a pin on the page.
pub type PageData = Arc<RwLock<[u8; PAGE_SIZE]>>;

/// Which unpinned frame the pool evicts when it needs room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementPolicy {
    /// Evict the least recently released frame.
    Lru,
    /// Evict the most recently released frame.
    Mru,
}

/// I/O counters. `logical_reads` counts pins; the physical counters
/// count page transfers to and from disk. Header I/O is not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub logical_reads: u64,
    pub physical_reads: u64,
    pub physical_writes: u64,
}

impl IoStats {
    /// Fraction of pins served without touching disk.
    pub fn hit_rate(&self) -> f64 {
        if self.logical_reads == 0 {
            return 0.0;
        }
        (self.logical_reads - self.physical_reads) as f64 / self.logical_reads as f64
    }
}

#[derive(Debug)]
struct Frame {
    key: Option<(FileId, PageNum)>,
    data: PageData,
    pin_count: u32,
    dirty: bool,
    /// Disk handle of the owning file, so a dirty victim can be written
    /// back no matter which file's page is being pinned.
    disk: Option<Arc<Mutex<DiskManager>>>,
}

impl Frame {
    fn new() -> Self {
        Frame {
            key: None,
            data: Arc::new(RwLock::new([0u8; PAGE_SIZE])),
            pin_count: 0,
            dirty: false,
            disk: None,
        }
    }

    fn reset(&mut self) {
        self.key = None;
        self.pin_count = 0;
        self.dirty = false;
        self.disk = None;
    }
}

/// Fixed-capacity pool of page frames.
///
/// Three structures index the frames and must agree at all times: the
/// hash index mapping `(file, page)` to a resident frame, the free-frame
/// pool of empty frames, and the replacement list of unpinned resident
/// frames ordered by release time (head = most recently released). A
/// pinned frame appears in the hash index only.
pub struct BufferPool {
    frames: Vec<Frame>,
    page_table: HashMap<(FileId, PageNum), usize>,
    free_frames: VecDeque<usize>,
    replace_list: VecDeque<usize>,
    policy: ReplacementPolicy,
    stats: IoStats,
}

impl BufferPool {
    pub fn new(capacity: usize, policy: ReplacementPolicy) -> Self {
        let mut frames = Vec::with_capacity(capacity);
        let mut free_frames = VecDeque::with_capacity(capacity);
        for i in 0..capacity {
            frames.push(Frame::new());
            free_frames.push_back(i);
        }
        BufferPool {
            frames,
            page_table: HashMap::new(),
            free_frames,
            replace_list: VecDeque::new(),
            policy,
            stats: IoStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Takes effect at the next eviction.
    pub fn set_policy(&mut self, policy: ReplacementPolicy) {
        self.policy = policy;
    }

    pub fn stats(&self) -> IoStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = IoStats::default();
    }

    pub fn is_pinned(&self, file: FileId, page: PageNum) -> bool {
        self.page_table
            .get(&(file, page))
            .is_some_and(|&idx| self.frames[idx].pin_count > 0)
    }

    /// Pins `(file, page)`, reading it from disk on a miss. Every call
    /// counts as one logical read.
    pub fn fetch(
        &mut self,
        file: FileId,
        page: PageNum,
        disk: &Arc<Mutex<DiskManager>>,
    ) -> Result<PageData, OxibaseError> {
        self.stats.logical_reads += 1;
        if let Some(&idx) = self.page_table.get(&(file, page)) {
            let frame = &mut self.frames[idx];
            frame.pin_count += 1;
            // Pinned frames leave the replacement list.
            self.replace_list.retain(|&i| i != idx);
            return Ok(Arc::clone(&frame.data));
        }

        let idx = self.take_victim()?;
        let read_result = {
            let mut buf = self.frames[idx].data.write().unwrap();
            disk.lock().unwrap().read_page(page, &mut buf)
        };
        if let Err(e) = read_result {
            self.frames[idx].reset();
            self.free_frames.push_back(idx);
            return Err(e);
        }
        self.stats.physical_reads += 1;
        self.install(idx, file, page, disk);
        Ok(Arc::clone(&self.frames[idx].data))
    }

    /// Pins `(file, page)` with a zero-filled buffer, for a page that
    /// does not exist on disk yet.
    pub fn fetch_new(
        &mut self,
        file: FileId,
        page: PageNum,
        disk: &Arc<Mutex<DiskManager>>,
    ) -> Result<PageData, OxibaseError> {
        self.stats.logical_reads += 1;
        if self.page_table.contains_key(&(file, page)) {
            return Err(OxibaseError::PageInBuffer { file, page });
        }
        let idx = self.take_victim()?;
        self.frames[idx].data.write().unwrap().fill(0);
        self.install(idx, file, page, disk);
        Ok(Arc::clone(&self.frames[idx].data))
    }

    /// Releases one pin, ORing in the caller's dirty hint. A frame whose
    /// pin count reaches zero becomes the most recently released entry of
    /// the replacement list.
    pub fn unpin(
        &mut self,
        file: FileId,
        page: PageNum,
        dirty: bool,
    ) -> Result<(), OxibaseError> {
        let &idx = self
            .page_table
            .get(&(file, page))
            .ok_or(OxibaseError::PageNotInBuffer { file, page })?;
        let frame = &mut self.frames[idx];
        if frame.pin_count == 0 {
            return Err(OxibaseError::PageUnfixed { file, page });
        }
        frame.dirty |= dirty;
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            self.replace_list.push_front(idx);
        }
        Ok(())
    }

    /// Flags a pinned page as modified. The frame's recency is refreshed
    /// when the pin is released.
    pub fn mark_dirty(&mut self, file: FileId, page: PageNum) -> Result<(), OxibaseError> {
        let &idx = self
            .page_table
            .get(&(file, page))
            .ok_or(OxibaseError::PageNotInBuffer { file, page })?;
        let frame = &mut self.frames[idx];
        if frame.pin_count == 0 {
            return Err(OxibaseError::PageUnfixed { file, page });
        }
        frame.dirty = true;
        Ok(())
    }

    /// Writes back and drops every resident page of `file`. Fails with
    /// `PageFixed` before touching anything if some page is still pinned.
    pub fn flush_file(&mut self, file: FileId) -> Result<(), OxibaseError> {
        let owned: Vec<usize> = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| matches!(f.key, Some((owner, _)) if owner == file))
            .map(|(i, _)| i)
            .collect();

        for &idx in &owned {
            if self.frames[idx].pin_count > 0 {
                if let Some((file, page)) = self.frames[idx].key {
                    return Err(OxibaseError::PageFixed { file, page });
                }
            }
        }

        for idx in owned {
            self.write_back(idx)?;
            if let Some(key) = self.frames[idx].key {
                self.page_table.remove(&key);
            }
            self.replace_list.retain(|&i| i != idx);
            self.frames[idx].reset();
            self.free_frames.push_back(idx);
        }
        Ok(())
    }

    fn install(
        &mut self,
        idx: usize,
        file: FileId,
        page: PageNum,
        disk: &Arc<Mutex<DiskManager>>,
    ) {
        let frame = &mut self.frames[idx];
        frame.key = Some((file, page));
        frame.pin_count = 1;
        frame.dirty = false;
        frame.disk = Some(Arc::clone(disk));
        self.page_table.insert((file, page), idx);
    }

    /// A free frame if one exists, else a victim chosen from the
    /// replacement list per policy. Every listed frame has pin count
    /// zero, so the list ends are always legal victims.
    fn take_victim(&mut self) -> Result<usize, OxibaseError> {
        if let Some(idx) = self.free_frames.pop_front() {
            return Ok(idx);
        }
        let idx = match self.policy {
            ReplacementPolicy::Lru => self.replace_list.pop_back(),
            ReplacementPolicy::Mru => self.replace_list.pop_front(),
        }
        .ok_or(OxibaseError::NoBuffer)?;

        if let Err(e) = self.evict(idx) {
            match self.policy {
                ReplacementPolicy::Lru => self.replace_list.push_back(idx),
                ReplacementPolicy::Mru => self.replace_list.push_front(idx),
            }
            return Err(e);
        }
        Ok(idx)
    }

    fn evict(&mut self, idx: usize) -> Result<(), OxibaseError> {
        self.write_back(idx)?;
        let key = self.frames[idx]
            .key
            .ok_or_else(|| OxibaseError::Internal("victim frame holds no page".into()))?;
        self.page_table.remove(&key);
        debug!("evicted page {} of file {}", key.1, key.0);
        Ok(())
    }

    /// Writes a dirty frame's page to its owning file and clears the
    /// dirty flag. Clean frames are left alone.
    fn write_back(&mut self, idx: usize) -> Result<(), OxibaseError> {
        if !self.frames[idx].dirty {
            return Ok(());
        }
        let (file, page) = self.frames[idx]
            .key
            .ok_or_else(|| OxibaseError::Internal("dirty frame holds no page".into()))?;
        let disk = self.frames[idx]
            .disk
            .clone()
            .ok_or_else(|| OxibaseError::Internal("dirty frame has no disk handle".into()))?;
        {
            let buf = self.frames[idx].data.read().unwrap();
            disk.lock().unwrap().write_page(page, &buf)?;
        }
        self.frames[idx].dirty = false;
        self.stats.physical_writes += 1;
        debug!("wrote back page {page} of file {file}");
        Ok(())
    }
}
