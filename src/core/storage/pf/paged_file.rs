use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::core::common::error::OxibaseError;
use crate::core::common::types::{FileId, PageNum};
use crate::core::config::Config;
use crate::core::storage::pf::buffer_pool::{
    BufferPool, IoStats, PageData, ReplacementPolicy,
};
use crate::core::storage::pf::disk_manager::{DiskManager, FileHeader, NO_PAGE};

/// Upper bound on simultaneously open paged files.
pub const MAX_OPEN_FILES: usize = 32;

/// Width of the free-list link word at the front of a disposed page.
const FREE_LINK_SIZE: usize = 4;

struct OpenFile {
    /// Canonicalized, so one host file cannot be opened twice under
    /// different spellings.
    path: PathBuf,
    disk: Arc<Mutex<DiskManager>>,
    header: FileHeader,
    header_dirty: bool,
    /// Last page returned by the file iterator.
    cursor: Option<PageNum>,
}

/// The paged-file layer: an open-file table, per-file headers with their
/// free-page lists, and page access through a shared buffer pool.
///
/// Pages handed out by `alloc_page`, `get_this_page` and the iterator
/// come back pinned; the caller owes exactly one `unfix_page` per handle
/// on every path, or `close_file` will refuse with `PageFixed`.
///
/// Disposed pages form a per-file LIFO list threaded through the first
/// four bytes of the disposed pages themselves; only the list head lives
/// in the header.
pub struct PagedFileManager {
    buffer: BufferPool,
    files: HashMap<FileId, OpenFile>,
    next_file_id: u32,
}

impl PagedFileManager {
    pub fn new(config: &Config) -> Self {
        Self::with_capacity(config.buffer_pool_frames, config.replacement_policy)
    }

    pub fn with_capacity(frames: usize, policy: ReplacementPolicy) -> Self {
        PagedFileManager {
            buffer: BufferPool::new(frames, policy),
            files: HashMap::new(),
            next_file_id: 0,
        }
    }

    /// Takes effect at the next eviction.
    pub fn set_policy(&mut self, policy: ReplacementPolicy) {
        self.buffer.set_policy(policy);
    }

    pub fn create_file(&self, path: &Path) -> Result<(), OxibaseError> {
        DiskManager::create(path)
    }

    /// Removes a paged file from disk. Refuses while the file is open.
    pub fn destroy_file(&self, path: &Path) -> Result<(), OxibaseError> {
        let canonical = path.canonicalize()?;
        if self.files.values().any(|f| f.path == canonical) {
            return Err(OxibaseError::FileOpen(path.display().to_string()));
        }
        DiskManager::destroy(&canonical)
    }

    pub fn open_file(&mut self, path: &Path) -> Result<FileId, OxibaseError> {
        let canonical = path.canonicalize()?;
        if self.files.values().any(|f| f.path == canonical) {
            return Err(OxibaseError::FileOpen(path.display().to_string()));
        }
        if self.files.len() >= MAX_OPEN_FILES {
            return Err(OxibaseError::FileTableFull(MAX_OPEN_FILES));
        }
        let mut disk = DiskManager::open(&canonical)?;
        let header = disk.read_header()?;
        let fd = FileId(self.next_file_id);
        self.next_file_id += 1;
        self.files.insert(
            fd,
            OpenFile {
                path: canonical,
                disk: Arc::new(Mutex::new(disk)),
                header,
                header_dirty: false,
                cursor: None,
            },
        );
        debug!("opened file {fd} ({} pages)", header.num_pages);
        Ok(fd)
    }

    /// Flushes every resident page of the file, writes the header back
    /// if it changed, and releases the table entry. A still-pinned page
    /// fails the close with `PageFixed` and leaves the file open.
    pub fn close_file(&mut self, fd: FileId) -> Result<(), OxibaseError> {
        if !self.files.contains_key(&fd) {
            return Err(OxibaseError::BadFileId(fd));
        }
        self.buffer.flush_file(fd)?;
        if let Some(entry) = self.files.get_mut(&fd) {
            if entry.header_dirty {
                entry.disk.lock().unwrap().write_header(&entry.header)?;
                entry.header_dirty = false;
            }
        }
        self.files.remove(&fd);
        debug!("closed file {fd}");
        Ok(())
    }

    /// Total page count of an open file, data pages only.
    pub fn num_pages(&self, fd: FileId) -> Result<u32, OxibaseError> {
        Ok(self.entry(fd)?.header.num_pages)
    }

    /// Allocates a page: the head of the free list when one exists,
    /// otherwise a fresh page extending the file. Returned zeroed,
    /// pinned and already marked dirty.
    pub fn alloc_page(&mut self, fd: FileId) -> Result<(PageNum, PageData), OxibaseError> {
        let (first_free, num_pages, disk) = {
            let e = self.entry(fd)?;
            (e.header.first_free, e.header.num_pages, Arc::clone(&e.disk))
        };
        match first_free {
            Some(page) => {
                let data = self.buffer.fetch(fd, page, &disk)?;
                let next = {
                    let mut buf = data.write().unwrap();
                    let link = read_link(&buf[..FREE_LINK_SIZE])?;
                    buf.fill(0);
                    link
                };
                self.buffer.mark_dirty(fd, page)?;
                let entry = self.entry_mut(fd)?;
                entry.header.first_free = next;
                entry.header_dirty = true;
                debug!("file {fd}: reused page {page} from the free list");
                Ok((page, data))
            }
            None => {
                let page = PageNum(num_pages);
                let data = self.buffer.fetch_new(fd, page, &disk)?;
                self.buffer.mark_dirty(fd, page)?;
                // The header grows only once the frame is secured, so a
                // failed allocation leaves num_pages unchanged.
                let entry = self.entry_mut(fd)?;
                entry.header.num_pages += 1;
                entry.header_dirty = true;
                debug!("file {fd}: extended to page {page}");
                Ok((page, data))
            }
        }
    }

    /// Pushes a live, unpinned page onto the file's free list. Its bytes
    /// become the list link and are no longer caller-visible.
    pub fn dispose_page(&mut self, fd: FileId, page: PageNum) -> Result<(), OxibaseError> {
        let (num_pages, first_free, disk) = {
            let e = self.entry(fd)?;
            (e.header.num_pages, e.header.first_free, Arc::clone(&e.disk))
        };
        if page.0 >= num_pages {
            return Err(OxibaseError::InvalidPage { page, num_pages });
        }
        if self.buffer.is_pinned(fd, page) {
            return Err(OxibaseError::PageFixed { file: fd, page });
        }
        if self.on_free_list(fd, page, first_free, &disk)? {
            return Err(OxibaseError::PageFree { file: fd, page });
        }

        let data = self.buffer.fetch(fd, page, &disk)?;
        {
            let mut buf = data.write().unwrap();
            write_link(&mut buf[..FREE_LINK_SIZE], first_free)?;
        }
        self.buffer.unpin(fd, page, true)?;

        let entry = self.entry_mut(fd)?;
        entry.header.first_free = Some(page);
        entry.header_dirty = true;
        debug!("file {fd}: disposed page {page}");
        Ok(())
    }

    /// Pins an existing page. The caller owns one pin and releases it
    /// with `unfix_page`.
    pub fn get_this_page(&mut self, fd: FileId, page: PageNum) -> Result<PageData, OxibaseError> {
        let (num_pages, disk) = {
            let e = self.entry(fd)?;
            (e.header.num_pages, Arc::clone(&e.disk))
        };
        if page.0 >= num_pages {
            return Err(OxibaseError::InvalidPage { page, num_pages });
        }
        self.buffer.fetch(fd, page, &disk)
    }

    /// Resets the file cursor and returns the first live page.
    pub fn get_first_page(
        &mut self,
        fd: FileId,
    ) -> Result<Option<(PageNum, PageData)>, OxibaseError> {
        self.entry_mut(fd)?.cursor = None;
        self.get_next_page(fd)
    }

    /// Returns the next live page after the cursor, pinned, skipping
    /// pages on the free list; `None` past the last page.
    ///
    /// Mutating the file by anything other than `unfix_page` between
    /// calls invalidates the iteration. Liveness is evaluated per call,
    /// so pages allocated mid-iteration above the cursor do appear.
    pub fn get_next_page(
        &mut self,
        fd: FileId,
    ) -> Result<Option<(PageNum, PageData)>, OxibaseError> {
        let (start, num_pages, first_free, disk) = {
            let e = self.entry(fd)?;
            (
                e.cursor.map_or(0, |c| c.0 + 1),
                e.header.num_pages,
                e.header.first_free,
                Arc::clone(&e.disk),
            )
        };
        for n in start..num_pages {
            let page = PageNum(n);
            if self.on_free_list(fd, page, first_free, &disk)? {
                continue;
            }
            let data = self.buffer.fetch(fd, page, &disk)?;
            self.entry_mut(fd)?.cursor = Some(page);
            return Ok(Some((page, data)));
        }
        Ok(None)
    }

    pub fn unfix_page(&mut self, fd: FileId, page: PageNum, dirty: bool) -> Result<(), OxibaseError> {
        self.entry(fd)?;
        self.buffer.unpin(fd, page, dirty)
    }

    pub fn mark_dirty(&mut self, fd: FileId, page: PageNum) -> Result<(), OxibaseError> {
        self.entry(fd)?;
        self.buffer.mark_dirty(fd, page)
    }

    pub fn stats(&self) -> IoStats {
        self.buffer.stats()
    }

    pub fn reset_stats(&mut self) {
        self.buffer.reset_stats();
    }

    fn entry(&self, fd: FileId) -> Result<&OpenFile, OxibaseError> {
        self.files.get(&fd).ok_or(OxibaseError::BadFileId(fd))
    }

    fn entry_mut(&mut self, fd: FileId) -> Result<&mut OpenFile, OxibaseError> {
        self.files.get_mut(&fd).ok_or(OxibaseError::BadFileId(fd))
    }

    /// Walks the on-disk free list looking for `page`. Link pages are
    /// pinned briefly through the pool, so the walk shows up in the
    /// logical-read counter.
    fn on_free_list(
        &mut self,
        fd: FileId,
        page: PageNum,
        first_free: Option<PageNum>,
        disk: &Arc<Mutex<DiskManager>>,
    ) -> Result<bool, OxibaseError> {
        let mut cur = first_free;
        while let Some(p) = cur {
            if p == page {
                return Ok(true);
            }
            let data = self.buffer.fetch(fd, p, disk)?;
            let link = {
                let buf = data.read().unwrap();
                read_link(&buf[..FREE_LINK_SIZE])?
            };
            self.buffer.unpin(fd, p, false)?;
            cur = link;
        }
        Ok(false)
    }
}

fn read_link(bytes: &[u8]) -> Result<Option<PageNum>, OxibaseError> {
    let raw = Cursor::new(bytes)
        .read_i32::<LittleEndian>()
        .map_err(|e| OxibaseError::Internal(format!("bad free-list link: {e}")))?;
    Ok((raw >= 0).then(|| PageNum(raw as u32)))
}

fn write_link(bytes: &mut [u8], link: Option<PageNum>) -> Result<(), OxibaseError> {
    Cursor::new(bytes)
        .write_i32::<LittleEndian>(link.map_or(NO_PAGE, |p| p.0 as i32))
        .map_err(|e| OxibaseError::Internal(format!("bad free-list link: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::pf::disk_manager::PAGE_SIZE;
    use tempfile::TempDir;

    fn setup(frames: usize) -> (PagedFileManager, PathBuf, TempDir) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("data.pf");
        let mgr = PagedFileManager::with_capacity(frames, ReplacementPolicy::Lru);
        mgr.create_file(&path).unwrap();
        (mgr, path, dir)
    }

    /// Allocates `count` pages and releases every pin.
    fn alloc_pages(mgr: &mut PagedFileManager, fd: FileId, count: u32) -> Vec<PageNum> {
        let mut pages = Vec::new();
        for _ in 0..count {
            let (page, _data) = mgr.alloc_page(fd).unwrap();
            mgr.unfix_page(fd, page, false).unwrap();
            pages.push(page);
        }
        pages
    }

    #[test]
    fn open_close_round_trip() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        assert_eq!(mgr.num_pages(fd).unwrap(), 0);
        mgr.close_file(fd).unwrap();
        assert!(matches!(mgr.num_pages(fd), Err(OxibaseError::BadFileId(_))));
    }

    #[test]
    fn double_open_is_refused() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        assert!(matches!(mgr.open_file(&path), Err(OxibaseError::FileOpen(_))));
        mgr.close_file(fd).unwrap();
        let fd2 = mgr.open_file(&path).unwrap();
        assert_ne!(fd, fd2, "file ids are never reused");
        mgr.close_file(fd2).unwrap();
    }

    #[test]
    fn open_file_table_has_a_hard_cap() {
        let dir = TempDir::new().unwrap();
        let mut mgr = PagedFileManager::with_capacity(4, ReplacementPolicy::Lru);

        let mut fds = Vec::new();
        for i in 0..MAX_OPEN_FILES {
            let path = dir.path().join(format!("file{i}.pf"));
            mgr.create_file(&path).unwrap();
            fds.push(mgr.open_file(&path).unwrap());
        }

        let overflow = dir.path().join("overflow.pf");
        mgr.create_file(&overflow).unwrap();
        assert!(matches!(
            mgr.open_file(&overflow),
            Err(OxibaseError::FileTableFull(MAX_OPEN_FILES))
        ));

        // Closing any file frees a table slot.
        mgr.close_file(fds[0]).unwrap();
        let fd = mgr.open_file(&overflow).unwrap();
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn destroy_refuses_an_open_file() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        assert!(matches!(mgr.destroy_file(&path), Err(OxibaseError::FileOpen(_))));
        mgr.close_file(fd).unwrap();
        mgr.destroy_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn alloc_numbers_pages_in_order() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        let pages = alloc_pages(&mut mgr, fd, 3);
        assert_eq!(pages, vec![PageNum(0), PageNum(1), PageNum(2)]);
        assert_eq!(mgr.num_pages(fd).unwrap(), 3);
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn alloc_returns_a_zeroed_page() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        let (page, data) = mgr.alloc_page(fd).unwrap();
        assert!(data.read().unwrap().iter().all(|&b| b == 0));
        mgr.unfix_page(fd, page, false).unwrap();
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn disposed_page_is_reallocated_lifo() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        alloc_pages(&mut mgr, fd, 3);

        mgr.dispose_page(fd, PageNum(1)).unwrap();
        let (page, _data) = mgr.alloc_page(fd).unwrap();
        mgr.unfix_page(fd, page, false).unwrap();

        assert_eq!(page, PageNum(1));
        assert_eq!(mgr.num_pages(fd).unwrap(), 3, "reuse must not grow the file");

        // The free list is drained; the next allocation extends.
        let (page, _data) = mgr.alloc_page(fd).unwrap();
        mgr.unfix_page(fd, page, false).unwrap();
        assert_eq!(page, PageNum(3));
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn free_list_pops_in_reverse_dispose_order() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        alloc_pages(&mut mgr, fd, 4);

        mgr.dispose_page(fd, PageNum(0)).unwrap();
        mgr.dispose_page(fd, PageNum(2)).unwrap();

        let (first, _d) = mgr.alloc_page(fd).unwrap();
        mgr.unfix_page(fd, first, false).unwrap();
        let (second, _d) = mgr.alloc_page(fd).unwrap();
        mgr.unfix_page(fd, second, false).unwrap();
        let (third, _d) = mgr.alloc_page(fd).unwrap();
        mgr.unfix_page(fd, third, false).unwrap();

        assert_eq!((first, second, third), (PageNum(2), PageNum(0), PageNum(4)));
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn dispose_validations() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        alloc_pages(&mut mgr, fd, 2);

        assert!(matches!(
            mgr.dispose_page(fd, PageNum(5)),
            Err(OxibaseError::InvalidPage { .. })
        ));

        let (page, _data) = mgr.alloc_page(fd).unwrap();
        assert!(matches!(
            mgr.dispose_page(fd, page),
            Err(OxibaseError::PageFixed { .. })
        ));
        mgr.unfix_page(fd, page, false).unwrap();

        mgr.dispose_page(fd, PageNum(1)).unwrap();
        assert!(matches!(
            mgr.dispose_page(fd, PageNum(1)),
            Err(OxibaseError::PageFree { .. })
        ));
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn iteration_skips_free_pages() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        alloc_pages(&mut mgr, fd, 5);
        mgr.dispose_page(fd, PageNum(1)).unwrap();
        mgr.dispose_page(fd, PageNum(3)).unwrap();

        let mut seen = Vec::new();
        let mut next = mgr.get_first_page(fd).unwrap();
        while let Some((page, _data)) = next {
            seen.push(page);
            mgr.unfix_page(fd, page, false).unwrap();
            next = mgr.get_next_page(fd).unwrap();
        }
        assert_eq!(seen, vec![PageNum(0), PageNum(2), PageNum(4)]);
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn get_first_page_rewinds_the_cursor() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        alloc_pages(&mut mgr, fd, 2);

        let (page, _data) = mgr.get_first_page(fd).unwrap().unwrap();
        mgr.unfix_page(fd, page, false).unwrap();
        let (page, _data) = mgr.get_next_page(fd).unwrap().unwrap();
        assert_eq!(page, PageNum(1));
        mgr.unfix_page(fd, page, false).unwrap();

        let (page, _data) = mgr.get_first_page(fd).unwrap().unwrap();
        assert_eq!(page, PageNum(0));
        mgr.unfix_page(fd, page, false).unwrap();
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn get_this_page_bounds_check() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        alloc_pages(&mut mgr, fd, 1);
        assert!(matches!(
            mgr.get_this_page(fd, PageNum(1)),
            Err(OxibaseError::InvalidPage { .. })
        ));
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn close_flushes_dirty_pages() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        alloc_pages(&mut mgr, fd, 6);

        let pattern: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 199) as u8).collect();
        {
            let data = mgr.get_this_page(fd, PageNum(5)).unwrap();
            data.write().unwrap().copy_from_slice(&pattern);
            mgr.unfix_page(fd, PageNum(5), true).unwrap();
        }
        mgr.close_file(fd).unwrap();

        let fd = mgr.open_file(&path).unwrap();
        assert_eq!(mgr.num_pages(fd).unwrap(), 6);
        let data = mgr.get_this_page(fd, PageNum(5)).unwrap();
        assert_eq!(&data.read().unwrap()[..], &pattern[..]);
        mgr.unfix_page(fd, PageNum(5), false).unwrap();
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn close_with_a_pinned_page_fails_and_keeps_the_file_open() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        let (page, _data) = mgr.alloc_page(fd).unwrap();

        assert!(matches!(mgr.close_file(fd), Err(OxibaseError::PageFixed { .. })));
        // Still usable after the refused close.
        assert_eq!(mgr.num_pages(fd).unwrap(), 1);

        mgr.unfix_page(fd, page, false).unwrap();
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn free_list_survives_reopen() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        alloc_pages(&mut mgr, fd, 3);
        mgr.dispose_page(fd, PageNum(0)).unwrap();
        mgr.close_file(fd).unwrap();

        let fd = mgr.open_file(&path).unwrap();
        let (page, _data) = mgr.alloc_page(fd).unwrap();
        mgr.unfix_page(fd, page, false).unwrap();
        assert_eq!(page, PageNum(0));
        assert_eq!(mgr.num_pages(fd).unwrap(), 3);
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn live_and_free_pages_partition_the_file() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        alloc_pages(&mut mgr, fd, 6);
        for n in [1u32, 4, 2] {
            mgr.dispose_page(fd, PageNum(n)).unwrap();
        }

        let mut live = Vec::new();
        let mut next = mgr.get_first_page(fd).unwrap();
        while let Some((page, _data)) = next {
            live.push(page.0);
            mgr.unfix_page(fd, page, false).unwrap();
            next = mgr.get_next_page(fd).unwrap();
        }
        assert_eq!(live, vec![0, 3, 5]);

        // Draining the free list yields exactly the disposed pages, most
        // recently disposed first, then the file extends.
        let mut freed = Vec::new();
        for _ in 0..3 {
            let (page, _d) = mgr.alloc_page(fd).unwrap();
            mgr.unfix_page(fd, page, false).unwrap();
            freed.push(page.0);
        }
        assert_eq!(freed, vec![2, 4, 1]);
        let (page, _d) = mgr.alloc_page(fd).unwrap();
        mgr.unfix_page(fd, page, false).unwrap();
        assert_eq!(page, PageNum(6));
        mgr.close_file(fd).unwrap();
    }

    #[test]
    fn stats_pass_through_and_reset() {
        let (mut mgr, path, _dir) = setup(8);
        let fd = mgr.open_file(&path).unwrap();
        alloc_pages(&mut mgr, fd, 2);
        assert!(mgr.stats().logical_reads >= 2);
        mgr.reset_stats();
        assert_eq!(mgr.stats(), IoStats::default());
        mgr.close_file(fd).unwrap();
    }
}
