//! The layout of a heap page on disk.
//!
//! A page is exactly `page_size` bytes: a slot-occupancy bitmap followed by
//! `num_slots` fixed-width tuple slots.
//!
//! ```text
//! [header: ceil(num_slots / 8) bytes][slot 0][slot 1]...[slot num_slots - 1]
//! ```
//!
//! Bit `i % 8` of header byte `i / 8` is set iff slot `i` holds a tuple.

use std::sync::Arc;

use bytes::BufMut;

use crate::error::{DbError, Result};
use crate::page_id::{PageId, RecordId};
use crate::tuple::{Tuple, TupleDesc};

/// A record id addresses a slot with a `u16`, so no page may have more slots.
pub const MAX_SLOTS: usize = u16::MAX as usize + 1;

/// Slot geometry derived from a tuple width and a page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub page_size: usize,
    pub tuple_size: usize,
    pub num_slots: usize,
    pub header_size: usize,
}

impl PageLayout {
    pub fn new(desc: &TupleDesc, page_size: usize) -> Self {
        let tuple_size = desc.size();
        // each slot costs its tuple bytes plus one header bit
        let num_slots = (page_size * 8) / (tuple_size * 8 + 1);
        Self {
            page_size,
            tuple_size,
            num_slots,
            header_size: num_slots.div_ceil(8),
        }
    }

    /// Fails unless the page holds at least one tuple and every slot is addressable.
    pub fn check(&self) -> Result<()> {
        if self.num_slots == 0 {
            return Err(DbError::Schema(format!(
                "tuples of {} bytes do not fit in a {} byte page",
                self.tuple_size, self.page_size
            )));
        }
        if self.num_slots > MAX_SLOTS {
            return Err(DbError::Schema(format!(
                "a {} byte page of {} byte tuples has {} slots, more than {MAX_SLOTS}",
                self.page_size, self.tuple_size, self.num_slots
            )));
        }
        Ok(())
    }
}

fn record_id(page_id: PageId, slot: usize) -> Result<RecordId> {
    let slot = u16::try_from(slot).map_err(|_| DbError::TupleNotFound {
        page_id,
        slot: None,
    })?;
    Ok(RecordId::new(page_id, slot))
}

/// A page of a heap file, parsed into its slots.
#[derive(Debug, Clone)]
pub struct HeapPage {
    id: PageId,
    desc: Arc<TupleDesc>,
    layout: PageLayout,
    header: Vec<u8>,
    slots: Vec<Option<Tuple>>,
}

impl HeapPage {
    /// Parses a page from exactly `page_size` bytes.
    pub fn from_bytes(
        id: PageId,
        desc: Arc<TupleDesc>,
        page_size: usize,
        data: &[u8],
    ) -> Result<Self> {
        if data.len() != page_size {
            return Err(DbError::CorruptPage {
                page_id: id,
                reason: format!("expected {page_size} bytes, got {}", data.len()),
            });
        }
        let layout = PageLayout::new(&desc, page_size);
        layout.check()?;
        let header = data[..layout.header_size].to_vec();

        let mut slots = Vec::with_capacity(layout.num_slots);
        for slot in 0..layout.num_slots {
            if !bit_is_set(&header, slot) {
                slots.push(None);
                continue;
            }
            let start = layout.header_size + slot * layout.tuple_size;
            let mut bytes = &data[start..start + layout.tuple_size];
            let mut tuple =
                Tuple::parse(desc.clone(), &mut bytes).map_err(|e| DbError::CorruptPage {
                    page_id: id,
                    reason: format!("slot {slot}: {e}"),
                })?;
            tuple.set_record_id(Some(record_id(id, slot)?));
            slots.push(Some(tuple));
        }

        Ok(Self {
            id,
            desc,
            layout,
            header,
            slots,
        })
    }

    /// An all-free page image of `page_size` bytes.
    pub fn empty_page_bytes(page_size: usize) -> Vec<u8> {
        vec![0; page_size]
    }

    /// An all-free page, as created when a file is extended.
    pub fn empty(id: PageId, desc: Arc<TupleDesc>, page_size: usize) -> Result<Self> {
        Self::from_bytes(id, desc, page_size, &Self::empty_page_bytes(page_size))
    }

    pub fn page_id(&self) -> PageId {
        self.id
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn num_slots(&self) -> usize {
        self.layout.num_slots
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.layout.num_slots)
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.layout.num_slots && bit_is_set(&self.header, slot)
    }

    /// Places `tuple` in the lowest free slot and stamps its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> Result<RecordId> {
        if **tuple.tuple_desc() != *self.desc {
            return Err(DbError::Schema(format!(
                "tuple schema ({}) does not match page schema ({})",
                tuple.tuple_desc(),
                self.desc
            )));
        }
        let slot = (0..self.layout.num_slots)
            .find(|&slot| !self.is_slot_used(slot))
            .ok_or(DbError::PageFull(self.id))?;

        // reject incomplete rows before touching the page
        let mut scratch = Vec::with_capacity(self.layout.tuple_size);
        tuple.serialize(&mut scratch)?;

        let rid = record_id(self.id, slot)?;
        tuple.set_record_id(Some(rid));
        self.slots[slot] = Some(tuple.clone());
        set_bit(&mut self.header, slot, true);
        Ok(rid)
    }

    /// Frees the slot named by the tuple's record id.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let rid = tuple.record_id().ok_or(DbError::TupleNotFound {
            page_id: self.id,
            slot: None,
        })?;
        if rid.page_id != self.id {
            return Err(DbError::TupleNotFound {
                page_id: self.id,
                slot: Some(rid.slot),
            });
        }
        let slot = rid.slot as usize;
        if !self.is_slot_used(slot) {
            return Err(DbError::TupleNotFound {
                page_id: self.id,
                slot: Some(rid.slot),
            });
        }
        self.slots[slot] = None;
        set_bit(&mut self.header, slot, false);
        Ok(())
    }

    /// Occupied slots in increasing slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().flatten()
    }

    /// Serializes the page back to `page_size` bytes; free slots and padding are zero.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.layout.page_size);
        buf.put_slice(&self.header);
        for slot in &self.slots {
            match slot {
                Some(tuple) => tuple.serialize(&mut buf)?,
                None => buf.put_bytes(0, self.layout.tuple_size),
            }
        }
        buf.put_bytes(0, self.layout.page_size - buf.len());
        Ok(buf)
    }
}

fn bit_is_set(header: &[u8], slot: usize) -> bool {
    header[slot / 8] & (1 << (slot % 8)) != 0
}

fn set_bit(header: &mut [u8], slot: usize, value: bool) {
    if value {
        header[slot / 8] |= 1 << (slot % 8);
    } else {
        header[slot / 8] &= !(1 << (slot % 8));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_id::TableId;
    use crate::types::{Field, Type};

    const PAGE_SIZE: usize = 256;

    fn two_ints() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::from_types(&[Type::Int, Type::Int]).unwrap())
    }

    fn row(desc: &Arc<TupleDesc>, a: i32, b: i32) -> Tuple {
        Tuple::with_fields(desc.clone(), vec![Field::Int(a), Field::Int(b)]).unwrap()
    }

    fn pid() -> PageId {
        PageId::new(TableId(7), 0)
    }

    #[test]
    fn test_layout() {
        let layout = PageLayout::new(&two_ints(), PAGE_SIZE);
        // 256 * 8 / (8 * 8 + 1) = 31
        assert_eq!(layout.num_slots, 31);
        assert_eq!(layout.header_size, 4);
        assert!(layout.header_size + layout.num_slots * layout.tuple_size <= PAGE_SIZE);
    }

    #[test]
    fn test_layout_bounds_slot_count() {
        let one_int = Arc::new(TupleDesc::from_types(&[Type::Int]).unwrap());
        // 300_000 * 8 / 33 = 72727 slots, past what a record id can address
        let err = HeapPage::empty(pid(), one_int.clone(), 300_000).unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));

        // the largest accepted page: place one tuple in its highest slot
        let page_size = crate::config::MAX_PAGE_SIZE;
        let layout = PageLayout::new(&one_int, page_size);
        assert!(layout.num_slots <= MAX_SLOTS);
        let last = layout.num_slots - 1;
        let mut bytes = HeapPage::empty_page_bytes(page_size);
        set_bit(&mut bytes[..layout.header_size], last, true);
        let start = layout.header_size + last * layout.tuple_size;
        bytes[start..start + 4].copy_from_slice(&7i32.to_be_bytes());

        let mut page = HeapPage::from_bytes(pid(), one_int, page_size, &bytes).unwrap();
        let tuple = page.iter().next().unwrap().clone();
        assert_eq!(tuple.field(0).unwrap(), Some(&Field::Int(7)));
        assert_eq!(tuple.record_id().unwrap().slot as usize, last);

        page.delete_tuple(&tuple).unwrap();
        assert_eq!(page.num_empty_slots(), layout.num_slots);
    }

    #[test]
    fn test_tuple_wider_than_page_is_rejected() {
        let err = HeapPage::empty(pid(), two_ints(), 8).unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        let err = HeapPage::from_bytes(pid(), two_ints(), PAGE_SIZE, &[0; 10]).unwrap_err();
        assert!(matches!(err, DbError::CorruptPage { .. }));
    }

    #[test]
    fn test_insert_uses_lowest_free_slot() {
        let desc = two_ints();
        let mut page = HeapPage::empty(pid(), desc.clone(), PAGE_SIZE).unwrap();
        let mut a = row(&desc, 1, 1);
        let mut b = row(&desc, 2, 2);
        assert_eq!(page.insert_tuple(&mut a).unwrap().slot, 0);
        assert_eq!(page.insert_tuple(&mut b).unwrap().slot, 1);
        assert_eq!(a.record_id(), Some(RecordId::new(pid(), 0)));

        page.delete_tuple(&a).unwrap();
        let mut c = row(&desc, 3, 3);
        assert_eq!(page.insert_tuple(&mut c).unwrap().slot, 0);
    }

    #[test]
    fn test_insert_then_delete_restores_free_count() {
        let desc = two_ints();
        let mut page = HeapPage::empty(pid(), desc.clone(), PAGE_SIZE).unwrap();
        let before = page.num_empty_slots();
        let mut t = row(&desc, 4, 5);
        page.insert_tuple(&mut t).unwrap();
        assert_eq!(page.num_empty_slots(), before - 1);
        page.delete_tuple(&t).unwrap();
        assert_eq!(page.num_empty_slots(), before);
    }

    #[test]
    fn test_full_page_is_unchanged_by_failed_insert() {
        let desc = two_ints();
        let mut page = HeapPage::empty(pid(), desc.clone(), PAGE_SIZE).unwrap();
        for i in 0..page.num_slots() {
            page.insert_tuple(&mut row(&desc, i as i32, 0)).unwrap();
        }
        let image = page.to_bytes().unwrap();
        let err = page.insert_tuple(&mut row(&desc, -1, -1)).unwrap_err();
        assert!(matches!(err, DbError::PageFull(_)));
        assert_eq!(page.num_empty_slots(), 0);
        assert_eq!(page.to_bytes().unwrap(), image);
    }

    #[test]
    fn test_schema_mismatch_is_rejected() {
        let mut page = HeapPage::empty(pid(), two_ints(), PAGE_SIZE).unwrap();
        let other = Arc::new(TupleDesc::from_types(&[Type::Int]).unwrap());
        let mut t = Tuple::with_fields(other, vec![Field::Int(1)]).unwrap();
        assert!(matches!(page.insert_tuple(&mut t), Err(DbError::Schema(_))));
    }

    #[test]
    fn test_delete_errors() {
        let desc = two_ints();
        let mut page = HeapPage::empty(pid(), desc.clone(), PAGE_SIZE).unwrap();
        let unplaced = row(&desc, 1, 2);
        assert!(matches!(
            page.delete_tuple(&unplaced),
            Err(DbError::TupleNotFound { slot: None, .. })
        ));

        let mut placed = row(&desc, 1, 2);
        page.insert_tuple(&mut placed).unwrap();
        page.delete_tuple(&placed).unwrap();
        assert!(matches!(
            page.delete_tuple(&placed),
            Err(DbError::TupleNotFound { slot: Some(0), .. })
        ));
    }

    #[test]
    fn test_bytes_round_trip() {
        let desc = two_ints();
        let mut page = HeapPage::empty(pid(), desc.clone(), PAGE_SIZE).unwrap();
        for i in 0..5 {
            page.insert_tuple(&mut row(&desc, i, i * 10)).unwrap();
        }
        let second = page.iter().nth(1).unwrap().clone();
        page.delete_tuple(&second).unwrap();

        let bytes = page.to_bytes().unwrap();
        assert_eq!(bytes.len(), PAGE_SIZE);
        // slots 0, 2, 3, 4 occupied
        assert_eq!(bytes[0], 0b0001_1101);

        let reread = HeapPage::from_bytes(pid(), desc, PAGE_SIZE, &bytes).unwrap();
        let before: Vec<_> = page.iter().cloned().collect();
        let after: Vec<_> = reread.iter().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(
            after.iter().map(|t| t.record_id().unwrap().slot).collect::<Vec<_>>(),
            vec![0, 2, 3, 4]
        );
    }
}
