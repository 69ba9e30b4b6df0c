pub mod heap_file;
pub mod record_page;

pub use heap_file::{HeapFileManager, HeapScan};
pub use record_page::{RecordPage, Slot, MAX_RECORD_LEN};
