pub mod bank;
pub mod objects;

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::codec::Unpacker;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, Stream};
use crate::resource::bank::{BankCache, BankHandle, BankTable, BankTableRef};
use crate::resource::objects::{InitPge, ObjectNodes};

/// Source data variant. Selected once at construction; every format
/// asymmetry between the two releases dispatches on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Amiga,
    Dos,
}

pub const NUM_SPRITES: usize = 1287;
/// Split point between the two character sprite buffers of the Amiga data.
const PERSO_DAT_SIZE: u32 = 178_647;
const SPRM_SIZE: usize = 0x10000;
const CT_DATA_SIZE: usize = 0x1D00;
const RP_SIZE: usize = 0x4A;

/// Which buffer a character sprite frame lives in, plus its byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SprChunk {
    Spr1(u32),
    Sprm(u32),
}

impl SprChunk {
    pub fn offset(self) -> u32 {
        match self {
            SprChunk::Spr1(o) | SprChunk::Sprm(o) => o,
        }
    }

    pub fn with_offset(self, offset: u32) -> Self {
        match self {
            SprChunk::Spr1(_) => SprChunk::Spr1(offset),
            SprChunk::Sprm(_) => SprChunk::Sprm(offset),
        }
    }
}

/// Asset kinds, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Mbk,
    Bnq,
    Pal,
    Map,
    Lev,
    Sgd,
    Ani,
    Spc,
    Rp,
    Ct,
    Spr,
    Sprm,
    Obj,
    Obc,
    Pge,
}

impl ResourceKind {
    fn ext(self) -> &'static str {
        match self {
            ResourceKind::Mbk => "MBK",
            ResourceKind::Bnq => "BNQ",
            ResourceKind::Pal => "PAL",
            ResourceKind::Map => "MAP",
            ResourceKind::Lev => "LEV",
            ResourceKind::Sgd => "SGD",
            ResourceKind::Ani => "ANI",
            ResourceKind::Spc => "SPC",
            ResourceKind::Rp => "RP",
            ResourceKind::Ct => "CT",
            ResourceKind::Spr | ResourceKind::Sprm => "SPR",
            ResourceKind::Obj => "OBJ",
            ResourceKind::Obc => "OBC",
            ResourceKind::Pge => "PGE",
        }
    }
}

/// Owns every typed asset buffer plus the tile-bank cache. Per-level
/// buffers are replaced wholesale by `clear_level`.
pub struct ResourceStore {
    pub platform: Platform,
    codec: Box<dyn Unpacker>,

    pub mbk: Vec<u8>,
    pub bnq: Vec<u8>,
    active_table: BankTable,
    pub bank_cache: BankCache,

    pub pal: Vec<u8>,
    pub map: Vec<u8>,
    pub lev: Vec<u8>,
    pub lev_num: i32,
    pub sgd: Vec<u8>,
    pub ani: Vec<u8>,
    pub spc: Vec<u8>,
    pub num_spc: u16,
    pub rp: [u8; RP_SIZE],
    pub ct_data: Box<[u8; CT_DATA_SIZE]>,

    pub obj: Option<ObjectNodes>,
    pub pge_init: Vec<InitPge>,

    pub spr1: Vec<u8>,
    pub sprm: Box<[u8; SPRM_SIZE]>,
    pub spr_offsets: Box<[Option<SprChunk>; NUM_SPRITES]>,
}

impl ResourceStore {
    pub fn new(platform: Platform, codec: Box<dyn Unpacker>) -> Self {
        Self {
            platform,
            codec,
            mbk: Vec::new(),
            bnq: Vec::new(),
            active_table: BankTable::Mbk,
            bank_cache: BankCache::default(),
            pal: Vec::new(),
            map: Vec::new(),
            lev: Vec::new(),
            lev_num: -1,
            sgd: Vec::new(),
            ani: Vec::new(),
            spc: Vec::new(),
            num_spc: 0,
            rp: [0; RP_SIZE],
            ct_data: Box::new([0; CT_DATA_SIZE]),
            obj: None,
            pge_init: Vec::new(),
            spr1: Vec::new(),
            sprm: Box::new([0; SPRM_SIZE]),
            spr_offsets: Box::new([None; NUM_SPRITES]),
        }
    }

    /// Drops the per-level buffers before loading the next level's set.
    pub fn clear_level(&mut self) {
        self.mbk = Vec::new();
        self.bnq = Vec::new();
        self.active_table = BankTable::Mbk;
        self.pal = Vec::new();
        self.map = Vec::new();
        self.lev = Vec::new();
        self.lev_num = -1;
        self.sgd = Vec::new();
        self.ani = Vec::new();
        self.obj = None;
    }

    // --- tile banks -----------------------------------------------------

    pub fn use_bank_table(&mut self, table: BankTable) {
        self.active_table = table;
    }

    pub fn active_bank_table(&self) -> BankTable {
        self.active_table
    }

    fn bank_table(&self) -> BankTableRef<'_> {
        BankTableRef {
            bytes: match self.active_table {
                BankTable::Mbk => &self.mbk,
                BankTable::Bnq => &self.bnq,
            },
            id: self.active_table,
            platform: self.platform,
        }
    }

    pub fn bank_data_size(&self, num: u16) -> usize {
        self.bank_table().data_size(num)
    }

    pub fn find_bank_data(&self, num: u16) -> Option<BankHandle> {
        self.bank_cache.find(num)
    }

    pub fn load_bank_data(&mut self, num: u16) -> Result<BankHandle> {
        let table = BankTableRef {
            bytes: match self.active_table {
                BankTable::Mbk => &self.mbk,
                BankTable::Bnq => &self.bnq,
            },
            id: self.active_table,
            platform: self.platform,
        };
        self.bank_cache.load(&table, &*self.codec, num)
    }

    /// Cache hit or load.
    pub fn bank(&mut self, num: u16) -> Result<BankHandle> {
        if let Some(h) = self.bank_cache.find(num) {
            return Ok(h);
        }
        self.load_bank_data(num)
    }

    pub fn bank_bytes(&self, handle: BankHandle) -> Result<&[u8]> {
        self.bank_cache.get(handle).ok_or(Error::InvalidBankHandle)
    }

    pub fn clear_bank_data(&mut self) {
        self.bank_cache.clear();
    }

    /// Runs the external decompressor; `src_size` 0 means self-describing.
    pub fn unpack(&self, dst: &mut [u8], src: &[u8], src_size: u32) -> bool {
        self.codec.unpack(dst, src, src_size)
    }

    // --- loaders --------------------------------------------------------

    pub fn load(&mut self, fs: &dyn FileSystem, name: &str, kind: ResourceKind) -> Result<()> {
        let entry = format!("{}.{}", name, kind.ext());
        debug!(target: "res", "load('{}')", entry);
        let mut f = fs.open(&entry).ok_or(Error::MissingResource {
            name: entry.clone(),
        })?;
        match kind {
            ResourceKind::Mbk => self.mbk = f.read_rest()?,
            ResourceKind::Bnq => self.bnq = f.read_rest()?,
            ResourceKind::Pal => self.pal = f.read_rest()?,
            ResourceKind::Map => self.map = f.read_rest()?,
            ResourceKind::Lev => self.lev = f.read_rest()?,
            ResourceKind::Sgd => self.read_sgd(&mut f)?,
            ResourceKind::Ani => self.ani = f.read_rest()?,
            ResourceKind::Spc => {
                self.spc = f.read_rest()?;
                self.num_spc = BigEndian::read_u16(&self.spc) / 2;
            }
            ResourceKind::Rp => {
                let len = f.size();
                if len != RP_SIZE {
                    return Err(Error::UnexpectedSize {
                        name: entry,
                        size: len,
                    });
                }
                f.read_exact(&mut self.rp)?;
            }
            ResourceKind::Ct => {
                let tmp = f.read_rest()?;
                if !self.codec.unpack(&mut self.ct_data[..], &tmp, tmp.len() as u32) {
                    return Err(Error::BadCrc {
                        name: "collision data".into(),
                    });
                }
            }
            ResourceKind::Spr => {
                // 12-byte header carries no pixel data
                f.seek(12)?;
                self.spr1 = f.read_rest()?;
            }
            ResourceKind::Sprm => {
                let len = f.size() - 12;
                if len > SPRM_SIZE {
                    return Err(Error::UnexpectedSize {
                        name: entry,
                        size: len,
                    });
                }
                f.seek(12)?;
                f.read_exact(&mut self.sprm[..len])?;
            }
            ResourceKind::Obj => self.read_obj(&mut f)?,
            ResourceKind::Obc => self.read_obc(&mut f)?,
            ResourceKind::Pge => self.read_pge(&mut f)?,
        }
        Ok(())
    }

    fn read_sgd(&mut self, f: &mut Stream) -> Result<()> {
        let len = f.size();
        if self.platform == Platform::Dos {
            self.sgd = f.read_rest()?;
            // first byte holds the entry count; clear it so the 32-bit
            // big-endian offsets decode
            self.sgd[0] = 0;
            return Ok(());
        }
        f.seek(len as u64 - 4)?;
        let size = f.read_u32_be()? as usize;
        f.seek(0)?;
        let tmp = f.read_vec(len)?;
        let mut sgd = vec![0u8; size];
        if !self.codec.unpack(&mut sgd, &tmp, len as u32) {
            return Err(Error::BadCrc {
                name: "SGD data".into(),
            });
        }
        self.sgd = sgd;
        Ok(())
    }

    fn read_obj(&mut self, f: &mut Stream) -> Result<()> {
        if self.platform == Platform::Amiga {
            // demo data stores the object nodes uncompressed
            let data = f.read_rest()?;
            self.obj = Some(objects::decode_obj(self.platform, &data));
            return Ok(());
        }
        self.obj = Some(objects::read_obj(f)?);
        Ok(())
    }

    fn read_obc(&mut self, f: &mut Stream) -> Result<()> {
        let packed_size = f.read_u32_be()? as usize;
        f.seek(packed_size as u64)?;
        let unpacked_size = f.read_u32_be()? as usize;
        f.seek(4)?;
        let packed = f.read_vec(packed_size)?;
        let mut tmp = vec![0u8; unpacked_size];
        if !self.codec.unpack(&mut tmp, &packed, packed_size as u32) {
            return Err(Error::BadCrc {
                name: "compressed object data".into(),
            });
        }
        self.obj = Some(objects::decode_obj(self.platform, &tmp));
        Ok(())
    }

    fn read_pge(&mut self, f: &mut Stream) -> Result<()> {
        let data = f.read_rest()?;
        self.pge_init = objects::decode_pge(self.platform, &data)?;
        Ok(())
    }

    /// Loads a `.OFF` sprite-offset table: `(index: u16, offset: u32)`
    /// little-endian pairs terminated by index 0xFFFF. `chunk` names the
    /// buffer the offsets point into.
    pub fn load_spr_off(
        &mut self,
        fs: &dyn FileSystem,
        name: &str,
        chunk: SprChunk,
    ) -> Result<()> {
        let entry = format!("{name}.OFF");
        debug!(target: "res", "load_spr_off('{}')", entry);
        let mut f = fs.open(&entry).ok_or(Error::MissingResource {
            name: entry.clone(),
        })?;
        let data = f.read_rest()?;
        let mut p = 0usize;
        loop {
            let pos = byteorder::LittleEndian::read_u16(&data[p..]);
            if pos == 0xFFFF {
                break;
            }
            if pos as usize >= NUM_SPRITES {
                return Err(Error::BadEntryCount {
                    name: "sprite offsets",
                    count: pos as u32,
                });
            }
            let off = byteorder::LittleEndian::read_u32(&data[p + 2..]);
            self.spr_offsets[pos as usize] = if off == 0xFFFF_FFFF {
                None
            } else {
                Some(chunk.with_offset(off))
            };
            p += 6;
        }
        Ok(())
    }

    /// Loads the Amiga character sprite archive (`.SPM`). The trailing
    /// 32-bit word gives the unpacked size; the full game archive becomes
    /// `spr1`, the smaller per-monster archives fill `sprm`. `offsets` is
    /// the per-sprite offset table owned by the driving game data.
    pub fn load_spm(&mut self, fs: &dyn FileSystem, name: &str, offsets: &[u32]) -> Result<()> {
        let entry = format!("{name}.SPM");
        debug!(target: "res", "load_spm('{}')", entry);
        let mut f = fs.open(&entry).ok_or(Error::MissingResource {
            name: entry.clone(),
        })?;
        let len = f.size();
        f.seek(len as u64 - 4)?;
        let size = f.read_u32_be()?;
        f.seek(0)?;
        let tmp = f.read_vec(len)?;
        if size == PERSO_DAT_SIZE {
            let mut spr1 = vec![0u8; size as usize];
            if !self.codec.unpack(&mut spr1, &tmp, len as u32) {
                return Err(Error::BadCrc { name: entry });
            }
            self.spr1 = spr1;
        } else {
            if size as usize > SPRM_SIZE {
                return Err(Error::UnexpectedSize {
                    name: entry,
                    size: size as usize,
                });
            }
            if !self.codec.unpack(&mut self.sprm[..], &tmp, len as u32) {
                return Err(Error::BadCrc { name: entry });
            }
        }
        for (i, &off) in offsets.iter().take(NUM_SPRITES).enumerate() {
            self.spr_offsets[i] = Some(if off >= PERSO_DAT_SIZE {
                SprChunk::Sprm(off - PERSO_DAT_SIZE)
            } else {
                SprChunk::Spr1(off)
            });
        }
        Ok(())
    }

    // --- sprite data access ---------------------------------------------

    /// Bytes of a character sprite buffer from the chunk's offset onward.
    pub fn spr_data(&self, chunk: SprChunk) -> &[u8] {
        match chunk {
            SprChunk::Spr1(o) => &self.spr1[o as usize..],
            SprChunk::Sprm(o) => &self.sprm[o as usize..],
        }
    }

    /// Intrinsic frame dimensions from the first bytes of character sprite
    /// data, plus the header length to skip to reach the pixels.
    pub fn sprite_frame_header(platform: Platform, data: &[u8]) -> (u8, u8, usize) {
        match platform {
            Platform::Amiga => (((data[2] >> 7) + 1) * 16, data[2] & 0x7F, 0),
            Platform::Dos => (data[2], data[3], 4),
        }
    }
}
