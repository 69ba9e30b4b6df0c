use log::{debug, warn};
use std::path::Path;
use std::sync::Arc;

use crate::core::common::error::OxibaseError;
use crate::core::common::types::{FileId, PageNum, Rid, SlotNum};
use crate::core::config::Config;
use crate::core::storage::heap::record_page::{RecordPage, MAX_RECORD_LEN};
use crate::core::storage::pf::{PageData, PagedFileManager, ReplacementPolicy};

/// Heap files: unordered variable-length records over paged files,
/// addressed by stable [`Rid`]s.
///
/// Every page of a heap file is a [`RecordPage`]. Records never move
/// once inserted; deletion tombstones the slot and later inserts may
/// reuse it, so a rid is valid exactly as long as its record lives.
pub struct HeapFileManager {
    pf: PagedFileManager,
}

impl HeapFileManager {
    pub fn new(config: &Config) -> Self {
        HeapFileManager { pf: PagedFileManager::new(config) }
    }

    pub fn with_capacity(frames: usize, policy: ReplacementPolicy) -> Self {
        HeapFileManager { pf: PagedFileManager::with_capacity(frames, policy) }
    }

    /// The underlying paged-file layer, for statistics and policy.
    pub fn paged_files(&self) -> &PagedFileManager {
        &self.pf
    }

    pub fn paged_files_mut(&mut self) -> &mut PagedFileManager {
        &mut self.pf
    }

    pub fn create_file(&self, path: &Path) -> Result<(), OxibaseError> {
        self.pf.create_file(path)
    }

    pub fn destroy_file(&self, path: &Path) -> Result<(), OxibaseError> {
        self.pf.destroy_file(path)
    }

    pub fn open_file(&mut self, path: &Path) -> Result<FileId, OxibaseError> {
        self.pf.open_file(path)
    }

    pub fn close_file(&mut self, fd: FileId) -> Result<(), OxibaseError> {
        self.pf.close_file(fd)
    }

    /// Inserts a record into the first page with room, in file order,
    /// extending the file when none has any. Returns the record's rid.
    pub fn insert_record(&mut self, fd: FileId, data: &[u8]) -> Result<Rid, OxibaseError> {
        if data.len() > MAX_RECORD_LEN {
            return Err(OxibaseError::RecordTooLarge { len: data.len(), max: MAX_RECORD_LEN });
        }

        let mut next = self.pf.get_first_page(fd)?;
        let (page, handle) = loop {
            match next {
                Some((page, handle)) => {
                    let fits = RecordPage::can_hold(&handle.read().unwrap(), data.len());
                    if fits {
                        break (page, handle);
                    }
                    self.pf.unfix_page(fd, page, false)?;
                    next = self.pf.get_next_page(fd)?;
                }
                None => {
                    let (page, handle) = self.pf.alloc_page(fd)?;
                    RecordPage::init(&mut handle.write().unwrap());
                    debug!("file {fd}: started record page {page}");
                    break (page, handle);
                }
            }
        };

        let slot = {
            let mut buf = handle.write().unwrap();
            RecordPage::insert(&mut buf, data).ok_or_else(|| {
                OxibaseError::Internal(format!("page {page} reported room it does not have"))
            })?
        };
        self.pf.unfix_page(fd, page, true)?;
        Ok(Rid::new(page, slot))
    }

    /// Copies out the record at `rid`.
    pub fn get_record(&mut self, fd: FileId, rid: Rid) -> Result<Vec<u8>, OxibaseError> {
        let handle = self.pin_rid_page(fd, rid)?;
        let result = {
            let buf = handle.read().unwrap();
            match RecordPage::slot(&buf, rid.slot) {
                None => Err(OxibaseError::InvalidRid(rid)),
                Some(slot) if slot.is_tombstone() => Err(OxibaseError::NoRecord(rid)),
                Some(slot) => RecordPage::record(&buf, slot).map(<[u8]>::to_vec),
            }
        };
        self.pf.unfix_page(fd, rid.page, false)?;
        result
    }

    /// Deletes the record at `rid`, tombstoning its slot. The body bytes
    /// are not reclaimed; the slot becomes reusable by later inserts.
    pub fn delete_record(&mut self, fd: FileId, rid: Rid) -> Result<(), OxibaseError> {
        let handle = self.pin_rid_page(fd, rid)?;
        let result = {
            let mut buf = handle.write().unwrap();
            match RecordPage::slot(&buf, rid.slot) {
                None => Err(OxibaseError::InvalidRid(rid)),
                Some(slot) if slot.is_tombstone() => Err(OxibaseError::NoRecord(rid)),
                Some(_) => {
                    RecordPage::delete(&mut buf, rid.slot);
                    Ok(())
                }
            }
        };
        self.pf.unfix_page(fd, rid.page, result.is_ok())?;
        result
    }

    /// Starts a scan over every live record of the file. The scan
    /// borrows the manager, so the file cannot be mutated underneath it.
    pub fn scan(&mut self, fd: FileId) -> HeapScan<'_> {
        HeapScan { mgr: self, fd, started: false, page: None, next_slot: SlotNum(0) }
    }

    fn pin_rid_page(&mut self, fd: FileId, rid: Rid) -> Result<PageData, OxibaseError> {
        match self.pf.get_this_page(fd, rid.page) {
            Err(OxibaseError::InvalidPage { .. }) => Err(OxibaseError::InvalidRid(rid)),
            other => other,
        }
    }
}

/// Cursor over the live records of one heap file.
///
/// Holds at most one pinned page between calls. [`HeapScan::close`]
/// releases it; dropping the scan releases it best-effort.
pub struct HeapScan<'a> {
    mgr: &'a mut HeapFileManager,
    fd: FileId,
    started: bool,
    page: Option<(PageNum, PageData)>,
    next_slot: SlotNum,
}

impl HeapScan<'_> {
    /// Returns the next live record and its rid, or `None` at end of
    /// file.
    pub fn next_record(&mut self) -> Result<Option<(Rid, Vec<u8>)>, OxibaseError> {
        loop {
            let (page, handle) = match &self.page {
                Some((page, handle)) => (*page, Arc::clone(handle)),
                None => {
                    let next = if self.started {
                        self.mgr.pf.get_next_page(self.fd)?
                    } else {
                        self.started = true;
                        self.mgr.pf.get_first_page(self.fd)?
                    };
                    match next {
                        Some((page, handle)) => {
                            self.page = Some((page, Arc::clone(&handle)));
                            self.next_slot = SlotNum(0);
                            (page, handle)
                        }
                        None => return Ok(None),
                    }
                }
            };

            let found = {
                let buf = handle.read().unwrap();
                let num_slots = RecordPage::num_slots(&buf);
                let mut hit = None;
                while self.next_slot.0 < num_slots {
                    let at = self.next_slot;
                    // Advance before returning so the next call resumes
                    // past this slot.
                    self.next_slot = SlotNum(at.0 + 1);
                    if let Some(slot) = RecordPage::slot(&buf, at) {
                        if !slot.is_tombstone() {
                            hit = Some((at, RecordPage::record(&buf, slot)?.to_vec()));
                            break;
                        }
                    }
                }
                hit
            };

            match found {
                Some((slot, bytes)) => return Ok(Some((Rid::new(page, slot), bytes))),
                None => {
                    self.page = None;
                    self.mgr.pf.unfix_page(self.fd, page, false)?;
                }
            }
        }
    }

    /// Releases the held page, if any, and ends the scan.
    pub fn close(mut self) -> Result<(), OxibaseError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), OxibaseError> {
        if let Some((page, _)) = self.page.take() {
            self.mgr.pf.unfix_page(self.fd, page, false)?;
        }
        Ok(())
    }
}

impl Drop for HeapScan<'_> {
    fn drop(&mut self) {
        if self.release().is_err() {
            warn!("failed to release scan page of file {}", self.fd);
        }
    }
}
