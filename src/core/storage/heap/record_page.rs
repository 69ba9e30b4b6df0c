use crate::core::common::error::OxibaseError;
use crate::core::common::types::SlotNum;
use crate::core::storage::pf::PAGE_SIZE;

// Field offsets of the page-local header.
pub(crate) const NUM_SLOTS_OFFSET: usize = 0;
pub(crate) const FREE_SPACE_PTR_OFFSET: usize = 2;
pub(crate) const NEXT_FREE_SLOT_OFFSET: usize = 4;

/// Bytes of page-local header before the slot array.
pub const PAGE_HEADER_SIZE: usize = 6;

/// Terminates the free-slot chain; doubles as the tombstone length.
pub(crate) const NO_SLOT: i16 = -1;

/// Largest record a page can ever hold: a fresh page must fit the
/// header, one slot and the record bytes. Anything bigger is rejected
/// outright by the heap layer.
pub const MAX_RECORD_LEN: usize = PAGE_SIZE - PAGE_HEADER_SIZE - Slot::SERIALIZED_SIZE;

/// One slot directory entry.
///
/// A live slot holds the record's byte offset and length. A tombstone is
/// marked by `length == -1`, and its `offset` field is repurposed as the
/// index of the next tombstoned slot in the page's free-slot chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: i16,
    pub length: i16,
}

impl Slot {
    /// Size of a slot when serialized on the page.
    pub const SERIALIZED_SIZE: usize = 4;

    pub fn is_tombstone(&self) -> bool {
        self.length < 0
    }
}

/// Interprets a raw PF page as a slotted record page:
///
/// ```text
/// [header][slot 0][slot 1]...    free    ...[record 1][record 0]
/// ^                          ^            ^                     ^
/// 0             slot array end            free_space_ptr    PAGE_SIZE
/// ```
///
/// The slot array grows from the low end, record bodies from the high
/// end; `free_space_ptr` is the low edge of the stored bodies. Deleted
/// bodies are not reclaimed until the page is reinitialized, so
/// `free_space_ptr` only falls between `init` calls. Reusing a
/// tombstoned slot costs no directory bytes; appending a slot costs
/// [`Slot::SERIALIZED_SIZE`].
pub struct RecordPage;

impl RecordPage {
    /// Formats `buf` as an empty record page.
    pub fn init(buf: &mut [u8; PAGE_SIZE]) {
        Self::set_num_slots(buf, 0);
        Self::set_free_space_ptr(buf, PAGE_SIZE as u16);
        Self::set_next_free_slot(buf, NO_SLOT);
    }

    pub fn num_slots(buf: &[u8; PAGE_SIZE]) -> u16 {
        read_u16(buf, NUM_SLOTS_OFFSET)
    }

    fn set_num_slots(buf: &mut [u8; PAGE_SIZE], count: u16) {
        write_u16(buf, NUM_SLOTS_OFFSET, count);
    }

    pub fn free_space_ptr(buf: &[u8; PAGE_SIZE]) -> u16 {
        read_u16(buf, FREE_SPACE_PTR_OFFSET)
    }

    fn set_free_space_ptr(buf: &mut [u8; PAGE_SIZE], ptr: u16) {
        write_u16(buf, FREE_SPACE_PTR_OFFSET, ptr);
    }

    /// Head of the free-slot chain, `-1` when no slot is reusable.
    pub fn next_free_slot(buf: &[u8; PAGE_SIZE]) -> i16 {
        read_u16(buf, NEXT_FREE_SLOT_OFFSET) as i16
    }

    fn set_next_free_slot(buf: &mut [u8; PAGE_SIZE], slot: i16) {
        write_u16(buf, NEXT_FREE_SLOT_OFFSET, slot as u16);
    }

    /// The slot's directory entry, or `None` past the end of the array.
    pub fn slot(buf: &[u8; PAGE_SIZE], slot: SlotNum) -> Option<Slot> {
        if slot.0 >= Self::num_slots(buf) {
            return None;
        }
        let at = PAGE_HEADER_SIZE + usize::from(slot.0) * Slot::SERIALIZED_SIZE;
        Some(Slot {
            offset: read_u16(buf, at) as i16,
            length: read_u16(buf, at + 2) as i16,
        })
    }

    fn set_slot(buf: &mut [u8; PAGE_SIZE], slot: SlotNum, entry: Slot) {
        let at = PAGE_HEADER_SIZE + usize::from(slot.0) * Slot::SERIALIZED_SIZE;
        write_u16(buf, at, entry.offset as u16);
        write_u16(buf, at + 2, entry.length as u16);
    }

    /// Bytes the page can still hand out between the slot array and the
    /// record heap.
    pub fn free_space(buf: &[u8; PAGE_SIZE]) -> usize {
        let used = PAGE_HEADER_SIZE + usize::from(Self::num_slots(buf)) * Slot::SERIALIZED_SIZE;
        usize::from(Self::free_space_ptr(buf)).saturating_sub(used)
    }

    /// Whether a record of `len` bytes fits, counting the directory
    /// entry a fresh slot would cost. Reusing a tombstone is free.
    pub fn can_hold(buf: &[u8; PAGE_SIZE], len: usize) -> bool {
        let slot_cost = if Self::next_free_slot(buf) == NO_SLOT {
            Slot::SERIALIZED_SIZE
        } else {
            0
        };
        Self::free_space(buf) >= len + slot_cost
    }

    /// Stores `data`, reusing the chained tombstone when one exists.
    /// Returns `None` when the record does not fit on this page.
    pub fn insert(buf: &mut [u8; PAGE_SIZE], data: &[u8]) -> Option<SlotNum> {
        if !Self::can_hold(buf, data.len()) {
            return None;
        }

        let head = Self::next_free_slot(buf);
        let slot = if head >= 0 {
            let slot = SlotNum(head as u16);
            let tomb = Self::slot(buf, slot)?;
            // The tombstone's offset field carries the chain link.
            Self::set_next_free_slot(buf, tomb.offset);
            slot
        } else {
            let slot = SlotNum(Self::num_slots(buf));
            Self::set_num_slots(buf, slot.0 + 1);
            slot
        };

        let new_ptr = Self::free_space_ptr(buf) - data.len() as u16;
        buf[usize::from(new_ptr)..usize::from(new_ptr) + data.len()].copy_from_slice(data);
        Self::set_slot(buf, slot, Slot { offset: new_ptr as i16, length: data.len() as i16 });
        Self::set_free_space_ptr(buf, new_ptr);
        Some(slot)
    }

    /// Borrows the bytes of a live record.
    pub fn record<'a>(buf: &'a [u8; PAGE_SIZE], slot: Slot) -> Result<&'a [u8], OxibaseError> {
        if slot.is_tombstone() || slot.offset < 0 {
            return Err(OxibaseError::Internal("record lookup on a dead slot".into()));
        }
        let start = slot.offset as usize;
        let end = start + slot.length as usize;
        if end > PAGE_SIZE || start < PAGE_HEADER_SIZE {
            return Err(OxibaseError::Internal(format!(
                "slot points outside the page: offset {} length {}",
                slot.offset, slot.length
            )));
        }
        Ok(&buf[start..end])
    }

    /// Tombstones `slot` and pushes it onto the free-slot chain. The
    /// record's body bytes stay where they are; only the directory
    /// forgets them. The caller has already checked the slot is live.
    pub fn delete(buf: &mut [u8; PAGE_SIZE], slot: SlotNum) {
        let head = Self::next_free_slot(buf);
        Self::set_slot(buf, slot, Slot { offset: head, length: NO_SLOT });
        Self::set_next_free_slot(buf, slot.0 as i16);
    }
}

fn read_u16(buf: &[u8; PAGE_SIZE], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn write_u16(buf: &mut [u8; PAGE_SIZE], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}
