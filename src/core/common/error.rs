//! Error types for oxibase.
//!
//! One enum covers the whole crate; every variant carries a stable
//! integer code (see [`OxibaseError::code`]) so callers can dispatch on
//! categories without inspecting messages.

use std::io;
use thiserror::Error;

use crate::core::common::types::{FileId, PageNum, Rid};

#[derive(Debug, Error)]
pub enum OxibaseError {
    /// Every buffer frame is pinned; no victim can be chosen. The caller
    /// should unpin something and retry.
    #[error("no unpinned buffer frame available")]
    NoBuffer,

    /// The page is pinned where the operation requires it unpinned.
    #[error("page {page} of file {file} is pinned")]
    PageFixed { file: FileId, page: PageNum },

    /// Unpin or mark-dirty on a page whose pin count is already zero.
    #[error("page {page} of file {file} is not pinned")]
    PageUnfixed { file: FileId, page: PageNum },

    /// The page is not resident in the buffer pool.
    #[error("page {page} of file {file} is not in the buffer pool")]
    PageNotInBuffer { file: FileId, page: PageNum },

    /// Dispose of a page that is already on the free list.
    #[error("page {page} of file {file} is already free")]
    PageFree { file: FileId, page: PageNum },

    /// Host I/O failure other than the torn-transfer cases below.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A page read stopped mid-page.
    #[error("incomplete read of page {page}: {got} of {expected} bytes")]
    IncompleteRead { page: PageNum, got: usize, expected: usize },

    /// A page write stopped mid-page.
    #[error("incomplete write of page {page}: {got} of {expected} bytes")]
    IncompleteWrite { page: PageNum, got: usize, expected: usize },

    #[error("failed to read file header: {0}")]
    HeaderRead(String),

    #[error("failed to write file header: {0}")]
    HeaderWrite(String),

    /// Page number outside `[0, num_pages)`.
    #[error("invalid page number {page} (file has {num_pages} pages)")]
    InvalidPage { page: PageNum, num_pages: u32 },

    /// A block-level read landed at or past end of file.
    #[error("end of file reading page {page}")]
    Eof { page: PageNum },

    /// The file is open where the operation requires it closed, or vice
    /// versa a second open of an already-open path.
    #[error("file '{0}' is open")]
    FileOpen(String),

    #[error("open file table is full ({0} files)")]
    FileTableFull(usize),

    /// The file id does not name an open file.
    #[error("bad file id {0}")]
    BadFileId(FileId),

    /// A freshly allocated page was unexpectedly already resident.
    #[error("page {page} of file {file} is already in the buffer pool")]
    PageInBuffer { file: FileId, page: PageNum },

    /// Broken internal invariant (frame and hash index disagree, a free
    /// chain points nowhere, and kin). Not recoverable at the call site.
    #[error("internal error: {0}")]
    Internal(String),

    /// The record can never fit on any page.
    #[error("record of {len} bytes exceeds page capacity of {max}")]
    RecordTooLarge { len: usize, max: usize },

    /// The rid does not name a slot on a live page.
    #[error("invalid rid {0}")]
    InvalidRid(Rid),

    /// The slot exists but holds no live record.
    #[error("no record at rid {0}")]
    NoRecord(Rid),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl OxibaseError {
    /// Stable integer code of the variant. Codes never change meaning
    /// across releases.
    pub const fn code(&self) -> i32 {
        match self {
            OxibaseError::NoBuffer => 1,
            OxibaseError::PageFixed { .. } => 2,
            OxibaseError::PageUnfixed { .. } => 3,
            OxibaseError::PageNotInBuffer { .. } => 4,
            OxibaseError::PageFree { .. } => 5,
            OxibaseError::Io(_) => 6,
            OxibaseError::IncompleteRead { .. } => 7,
            OxibaseError::IncompleteWrite { .. } => 8,
            OxibaseError::HeaderRead(_) => 9,
            OxibaseError::HeaderWrite(_) => 10,
            OxibaseError::InvalidPage { .. } => 11,
            OxibaseError::Eof { .. } => 12,
            OxibaseError::FileOpen(_) => 13,
            OxibaseError::FileTableFull(_) => 14,
            OxibaseError::BadFileId(_) => 15,
            OxibaseError::PageInBuffer { .. } => 16,
            OxibaseError::Internal(_) => 17,
            OxibaseError::RecordTooLarge { .. } => 20,
            OxibaseError::InvalidRid(_) => 21,
            OxibaseError::NoRecord(_) => 22,
            OxibaseError::Configuration(_) => 30,
        }
    }
}
