pub mod ids;

pub use ids::{FileId, PageNum, Rid, SlotNum};
