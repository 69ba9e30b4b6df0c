use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::common::error::OxibaseError;
use crate::core::common::types::PageNum;

/// Fixed page size. The whole stack reads and writes in these units.
pub const PAGE_SIZE: usize = 4096;

/// Bytes reserved at the front of every paged file for [`FileHeader`].
/// A full page keeps the data pages aligned; only the first few bytes
/// are meaningful.
pub const FILE_HEADER_SIZE: usize = PAGE_SIZE;

/// On-disk sentinel for "no page" in free-list links.
pub(crate) const NO_PAGE: i32 = -1;

/// Per-file header persisted in the file's first [`FILE_HEADER_SIZE`]
/// bytes: total page count and the head of the free-page list. Held in
/// memory while the file is open and written back at close when dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileHeader {
    pub num_pages: u32,
    pub first_free: Option<PageNum>,
}

impl FileHeader {
    const SERIALIZED_SIZE: usize = 8;
}

/// Block I/O facade over one paged file.
///
/// Pages live at byte offset `FILE_HEADER_SIZE + n * PAGE_SIZE`. The
/// layer treats page contents as opaque; interpreting them is the
/// caller's business. Physical I/O is counted by the buffer pool, which
/// is the only caller of the page read/write paths.
#[derive(Debug)]
pub struct DiskManager {
    file: File,
    path: PathBuf,
}

impl DiskManager {
    /// Creates a new paged file holding an empty header. Fails if the
    /// file already exists.
    pub fn create(path: &Path) -> Result<(), OxibaseError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut dm = DiskManager { file, path: path.to_path_buf() };
        dm.write_header(&FileHeader::default())?;
        debug!("created paged file '{}'", path.display());
        Ok(())
    }

    /// Removes the host file.
    pub fn destroy(path: &Path) -> Result<(), OxibaseError> {
        fs::remove_file(path)?;
        debug!("destroyed paged file '{}'", path.display());
        Ok(())
    }

    /// Opens an existing paged file read/write.
    pub fn open(path: &Path) -> Result<Self, OxibaseError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(DiskManager { file, path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn page_offset(page: PageNum) -> u64 {
        FILE_HEADER_SIZE as u64 + u64::from(page.0) * PAGE_SIZE as u64
    }

    /// Reads page `page` into `buf`.
    ///
    /// A read landing at or past end of file is [`OxibaseError::Eof`]; a
    /// transfer torn mid-page is [`OxibaseError::IncompleteRead`].
    pub fn read_page(
        &mut self,
        page: PageNum,
        buf: &mut [u8; PAGE_SIZE],
    ) -> Result<(), OxibaseError> {
        self.file.seek(SeekFrom::Start(Self::page_offset(page)))?;
        let mut got = 0usize;
        while got < PAGE_SIZE {
            match self.file.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        match got {
            0 => Err(OxibaseError::Eof { page }),
            n if n < PAGE_SIZE => {
                Err(OxibaseError::IncompleteRead { page, got: n, expected: PAGE_SIZE })
            }
            _ => Ok(()),
        }
    }

    /// Writes page `page`. Writing past the current end extends the
    /// file; that is how freshly allocated pages first reach disk.
    pub fn write_page(
        &mut self,
        page: PageNum,
        buf: &[u8; PAGE_SIZE],
    ) -> Result<(), OxibaseError> {
        self.file.seek(SeekFrom::Start(Self::page_offset(page)))?;
        let mut written = 0usize;
        while written < PAGE_SIZE {
            match self.file.write(&buf[written..]) {
                Ok(0) => {
                    return Err(OxibaseError::IncompleteWrite {
                        page,
                        got: written,
                        expected: PAGE_SIZE,
                    })
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn read_header(&mut self) -> Result<FileHeader, OxibaseError> {
        let mut buf = [0u8; FileHeader::SERIALIZED_SIZE];
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| OxibaseError::HeaderRead(e.to_string()))?;
        let mut cursor = Cursor::new(&buf[..]);
        let num_pages = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| OxibaseError::HeaderRead(e.to_string()))?;
        let raw_free = cursor
            .read_i32::<LittleEndian>()
            .map_err(|e| OxibaseError::HeaderRead(e.to_string()))?;
        let first_free = (raw_free >= 0).then(|| PageNum(raw_free as u32));
        Ok(FileHeader { num_pages, first_free })
    }

    pub fn write_header(&mut self, header: &FileHeader) -> Result<(), OxibaseError> {
        let mut buf = [0u8; FileHeader::SERIALIZED_SIZE];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            cursor
                .write_u32::<LittleEndian>(header.num_pages)
                .and_then(|_| {
                    cursor.write_i32::<LittleEndian>(
                        header.first_free.map_or(NO_PAGE, |p| p.0 as i32),
                    )
                })
                .map_err(|e| OxibaseError::HeaderWrite(e.to_string()))?;
        }
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&buf))
            .map_err(|e| OxibaseError::HeaderWrite(e.to_string()))?;
        Ok(())
    }
}
