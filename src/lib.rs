#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation
)]

//! Storage foundation for a teaching-quality database.
//!
//! Two layers over a host file:
//!
//! * the **paged file** layer ([`PagedFileManager`]) — fixed-size pages
//!   behind a bounded buffer pool with pin-count discipline, LRU/MRU
//!   replacement, dirty write-back, a per-file free-page list and I/O
//!   accounting;
//! * the **record heap** layer ([`HeapFileManager`]) — variable-length
//!   records on slotted pages, addressed by stable [`Rid`]s.
//!
//! All access is single-threaded; the library assumes exclusive use of
//! its files for the lifetime of the process. Every pinned page must be
//! released before its file can be closed.

pub mod core;

pub use crate::core::common::error::OxibaseError;
pub use crate::core::common::types::{FileId, PageNum, Rid, SlotNum};
pub use crate::core::config::Config;
pub use crate::core::storage::heap::{HeapFileManager, HeapScan};
pub use crate::core::storage::pf::{
    IoStats, PageData, PagedFileManager, ReplacementPolicy, PAGE_SIZE,
};
