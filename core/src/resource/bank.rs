use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::codec::Unpacker;
use crate::error::{Error, Result};
use crate::resource::Platform;

/// Tuned to the largest tile-bank working set across all levels.
pub const BANK_DATA_SIZE: usize = 0x7000;
/// More live banks than this in one frame means the engine was mis-sized.
pub const MAX_BANK_ENTRIES: usize = 100;

/// Which tile-bank table is active. The demo `.BNQ` table stores signed
/// lengths on DOS; the rule keys on the table identity, not on the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankTable {
    Mbk,
    Bnq,
}

/// Borrowed view of the active tile-bank table. Records are 6 bytes:
/// a 32-bit offset into the same blob and a 16-bit flags/length word.
/// Both fields are big-endian on every platform.
pub struct BankTableRef<'a> {
    pub bytes: &'a [u8],
    pub id: BankTable,
    pub platform: Platform,
}

impl BankTableRef<'_> {
    /// Decoded byte length of one bank. The length word counts 32-byte
    /// tile cells; the high bit doubles as the raw-copy flag.
    pub fn data_size(&self, num: u16) -> usize {
        let mut len = BigEndian::read_u16(&self.bytes[num as usize * 6 + 4..]) as i32;
        match self.platform {
            Platform::Amiga => {
                if len & 0x8000 != 0 {
                    len = -((len as u16 as i16) as i32);
                }
            }
            Platform::Dos => {
                if len & 0x8000 != 0 {
                    if self.id == BankTable::Bnq {
                        // demo .bnq uses signed lengths
                        len = -((len as u16 as i16) as i32);
                    } else {
                        len &= 0x7FFF;
                    }
                }
            }
        }
        (len * 32) as usize
    }

    fn data_offset(&self, num: u16) -> usize {
        let mut offset = BigEndian::read_u32(&self.bytes[num as usize * 6..]) as usize;
        if self.platform == Platform::Dos {
            // the first byte of the blob holds the total entry count, so
            // only the low 16 bits of the offset are meaningful
            offset &= 0xFFFF;
        }
        offset
    }

    fn is_raw(&self, num: u16) -> bool {
        BigEndian::read_u16(&self.bytes[num as usize * 6 + 4..]) & 0x8000 != 0
    }
}

/// Handle to one materialized bank. Valid until the next arena clear;
/// `BankCache::get` refuses handles from a previous generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankHandle {
    generation: u32,
    offset: u32,
    len: u32,
}

#[derive(Debug, Clone, Copy)]
struct BankEntry {
    num: u16,
    handle: BankHandle,
}

/// Arena of decompressed tile banks. Allocation only moves forward; when a
/// load does not fit, the whole arena is discarded and refilled on demand.
pub struct BankCache {
    data: Box<[u8; BANK_DATA_SIZE]>,
    head: usize,
    generation: u32,
    entries: heapless::Vec<BankEntry, MAX_BANK_ENTRIES>,
}

impl Default for BankCache {
    fn default() -> Self {
        Self {
            data: Box::new([0; BANK_DATA_SIZE]),
            head: 0,
            generation: 0,
            entries: heapless::Vec::new(),
        }
    }
}

impl BankCache {
    pub fn clear(&mut self) {
        self.head = 0;
        self.generation = self.generation.wrapping_add(1);
        self.entries.clear();
    }

    pub fn find(&self, num: u16) -> Option<BankHandle> {
        self.entries
            .iter()
            .find(|e| e.num == num)
            .map(|e| e.handle)
    }

    pub fn get(&self, handle: BankHandle) -> Option<&[u8]> {
        if handle.generation != self.generation {
            debug_assert!(false, "bank handle outlived an arena clear");
            return None;
        }
        let start = handle.offset as usize;
        Some(&self.data[start..start + handle.len as usize])
    }

    pub fn live_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn load(
        &mut self,
        table: &BankTableRef<'_>,
        codec: &dyn Unpacker,
        num: u16,
    ) -> Result<BankHandle> {
        let size = table.data_size(num);
        if BANK_DATA_SIZE - self.head < size {
            debug!(target: "res", "bank arena full, discarding {} entries", self.entries.len());
            self.clear();
        }
        if self.head + size > BANK_DATA_SIZE {
            return Err(Error::ArenaOverflow {
                bank: num,
                need: size,
                capacity: BANK_DATA_SIZE,
            });
        }
        let handle = BankHandle {
            generation: self.generation,
            offset: self.head as u32,
            len: size as u32,
        };
        self.entries
            .push(BankEntry { num, handle })
            .map_err(|_| Error::BankTableFull { bank: num })?;

        let data_offset = table.data_offset(num);
        let dst = &mut self.data[self.head..self.head + size];
        if table.is_raw(num) {
            dst.copy_from_slice(&table.bytes[data_offset..data_offset + size]);
        } else {
            // the packed stream ends at the table offset; its last 4
            // bytes hold the unpacked size
            debug_assert!(data_offset > 4);
            let src = &table.bytes[..data_offset];
            let stored = BigEndian::read_u32(&src[data_offset - 4..]) as usize;
            if stored != size {
                return Err(Error::UnexpectedSize {
                    name: format!("bank data {num}"),
                    size: stored,
                });
            }
            if !codec.unpack(dst, src, 0) {
                return Err(Error::BadCrc {
                    name: format!("bank data {num}"),
                });
            }
        }
        self.head += size;
        debug!(target: "res", "loaded bank {} ({} bytes), head=0x{:X}", num, size, self.head);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use byteorder::{BigEndian, ByteOrder};

    use super::*;
    use crate::codec::testing::{pack, CopyCodec};

    // One blob holding `records` 6-byte entries at the front and raw data
    // wherever the offsets say.
    fn write_record(blob: &mut [u8], num: u16, offset: u32, len: u16) {
        let at = num as usize * 6;
        BigEndian::write_u32(&mut blob[at..], offset);
        BigEndian::write_u16(&mut blob[at + 4..], len);
    }

    fn table(blob: &[u8], id: BankTable, platform: Platform) -> BankTableRef<'_> {
        BankTableRef {
            bytes: blob,
            id,
            platform,
        }
    }

    #[test]
    fn size_rules_per_platform_and_table() {
        let mut blob = vec![0u8; 64];
        write_record(&mut blob, 0, 0, 0x8005);

        // plain DOS table: high bit masked off
        let t = table(&blob, BankTable::Mbk, Platform::Dos);
        assert_eq!(t.data_size(0), 5 * 32);

        // DOS demo .bnq table: two's-complement negation
        let t = table(&blob, BankTable::Bnq, Platform::Dos);
        assert_eq!(t.data_size(0), (-((0x8005u16 as i16) as i32) * 32) as usize);

        // Amiga always negates
        write_record(&mut blob, 1, 0, 0xFFFBu16); // stores -5
        let t = table(&blob, BankTable::Mbk, Platform::Amiga);
        assert_eq!(t.data_size(1), 5 * 32);

        // no high bit: taken verbatim everywhere
        write_record(&mut blob, 2, 0, 3);
        for platform in [Platform::Dos, Platform::Amiga] {
            let t = table(&blob, BankTable::Mbk, platform);
            assert_eq!(t.data_size(2), 3 * 32);
        }
    }

    #[test]
    fn raw_bank_is_byte_copied() {
        let mut blob = vec![0u8; 0x100];
        write_record(&mut blob, 0, 0x40, 0x8001); // raw, one 32-byte cell
        for (i, b) in blob[0x40..0x60].iter_mut().enumerate() {
            *b = i as u8 ^ 0xA5;
        }
        let expected = blob[0x40..0x60].to_vec();

        let mut cache = BankCache::default();
        let t = table(&blob, BankTable::Mbk, Platform::Dos);
        let h = cache.load(&t, &CopyCodec, 0).unwrap();
        assert_eq!(cache.get(h).unwrap(), &expected[..]);
    }

    #[test]
    fn packed_bank_goes_through_the_codec() {
        // the packed stream sits behind the table and ends at the
        // record's offset
        let payload: Vec<u8> = (0..64u8).collect();
        let mut blob = vec![0u8; 0x40];
        blob.extend_from_slice(&pack(&payload));
        let data_offset = blob.len();
        write_record(&mut blob, 0, data_offset as u32, 2); // 2 cells = 64 bytes

        let mut cache = BankCache::default();
        let t = table(&blob, BankTable::Mbk, Platform::Dos);
        let h = cache.load(&t, &CopyCodec, 0).unwrap();
        assert_eq!(cache.get(h).unwrap(), &payload[..]);
    }

    #[test]
    fn packed_bank_size_mismatch_is_fatal() {
        let payload = vec![0u8; 32];
        let mut blob = vec![0u8; 0x40];
        blob.extend_from_slice(&pack(&payload));
        let data_offset = blob.len();
        write_record(&mut blob, 0, data_offset as u32, 2); // claims 64 bytes

        let mut cache = BankCache::default();
        let t = table(&blob, BankTable::Mbk, Platform::Dos);
        assert!(matches!(
            cache.load(&t, &CopyCodec, 0),
            Err(Error::UnexpectedSize { .. })
        ));
    }

    #[test]
    fn find_is_idempotent_between_clears() {
        let mut blob = vec![0u8; 0x200];
        write_record(&mut blob, 0, 0x100, 0x8002);
        let mut cache = BankCache::default();
        let t = table(&blob, BankTable::Mbk, Platform::Dos);
        let h = cache.load(&t, &CopyCodec, 0).unwrap();
        assert_eq!(cache.find(0), Some(h));
        assert_eq!(cache.find(0), Some(h));
        assert_eq!(cache.find(1), None);
    }

    #[test]
    fn overflow_discards_the_whole_arena() {
        // three raw banks of 0x2800 bytes each; the third does not fit
        // in the 0x7000 arena
        let cells = (0x2800 / 32) as u16;
        let mut blob = vec![0u8; 0x20];
        let mut offsets = Vec::new();
        for _ in 0..3 {
            offsets.push(blob.len() as u32);
            blob.extend(std::iter::repeat(0xEE).take(0x2800));
        }
        for (num, off) in offsets.iter().enumerate() {
            write_record(&mut blob, num as u16, *off, 0x8000 | cells);
        }

        let mut cache = BankCache::default();
        let t = table(&blob, BankTable::Mbk, Platform::Dos);
        let h0 = cache.load(&t, &CopyCodec, 0).unwrap();
        cache.load(&t, &CopyCodec, 1).unwrap();
        assert_eq!(cache.live_entries(), 2);

        let h2 = cache.load(&t, &CopyCodec, 2).unwrap();
        assert_eq!(cache.live_entries(), 1);
        assert_eq!(cache.head(), 0x2800);
        assert_eq!(cache.find(2), Some(h2));
        assert_eq!(cache.find(0), None);
        assert_ne!(h0, h2);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "bank handle outlived an arena clear")]
    fn stale_handle_is_caught_in_debug() {
        let mut blob = vec![0u8; 0x100];
        write_record(&mut blob, 0, 0x40, 0x8001);
        let mut cache = BankCache::default();
        let t = table(&blob, BankTable::Mbk, Platform::Dos);
        let h = cache.load(&t, &CopyCodec, 0).unwrap();
        cache.clear();
        let _ = cache.get(h);
    }

    #[test]
    fn single_bank_larger_than_arena_is_fatal() {
        let cells = (BANK_DATA_SIZE / 32 + 1) as u16;
        let mut blob = vec![0u8; 0x10000];
        write_record(&mut blob, 0, 0x100, 0x8000 | cells);
        let mut cache = BankCache::default();
        let t = table(&blob, BankTable::Mbk, Platform::Dos);
        assert!(matches!(
            cache.load(&t, &CopyCodec, 0),
            Err(Error::ArenaOverflow { bank: 0, .. })
        ));
    }

    #[test]
    fn entry_table_overflow_is_fatal() {
        let count = MAX_BANK_ENTRIES + 1;
        let mut blob = vec![0u8; count * 6];
        let mut offsets = Vec::new();
        for _ in 0..count {
            offsets.push(blob.len() as u32);
            blob.extend_from_slice(&[0u8; 32]);
        }
        for (num, off) in offsets.iter().enumerate() {
            write_record(&mut blob, num as u16, *off, 0x8001);
        }

        let mut cache = BankCache::default();
        let t = table(&blob, BankTable::Mbk, Platform::Dos);
        for num in 0..MAX_BANK_ENTRIES as u16 {
            cache.load(&t, &CopyCodec, num).unwrap();
        }
        assert!(matches!(
            cache.load(&t, &CopyCodec, MAX_BANK_ENTRIES as u16),
            Err(Error::BankTableFull { .. })
        ));
    }
}
