//! Composition of the engine core and the per-frame draw pass: the four
//! priority buffers drain back to front onto the front layer, then the
//! dirty-rectangle pass pushes what changed.

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::codec::Unpacker;
use crate::error::{Error, Result};
use crate::resource::bank::{BankHandle, BankTable};
use crate::resource::{Platform, ResourceStore, SprChunk};
use crate::scheduler::{AnimBuffers, AnimEntry, SpriteData};
use crate::sys::PaletteSink;
use crate::video::{decode, set_palette_slot_be, DecodeScratch, Video};

/// Working set of the tile assembly pass, in 32-byte cells.
const ROOM_TILE_CELLS: usize = 1024;

pub struct Engine {
    pub res: ResourceStore,
    pub video: Video,
    pub anims: AnimBuffers,
    pub scratch: DecodeScratch,
    erase_background: bool,
}

impl Engine {
    pub fn new(platform: Platform, codec: Box<dyn Unpacker>) -> Self {
        Self {
            res: ResourceStore::new(platform, codec),
            video: Video::default(),
            anims: AnimBuffers::default(),
            scratch: DecodeScratch::default(),
            erase_background: false,
        }
    }

    /// Resets the front layer to the room background at frame start.
    pub fn restore_background(&mut self) {
        self.video.restore_background();
    }

    /// Drains the four priority buffers onto the front layer: 2, 1 and 0
    /// back to front with priority-masked blits, then 3 in erase mode.
    /// `player_hidden` drops the remaining character draws of class 1
    /// (the player flicker frames).
    pub fn draw_anims(&mut self, player_hidden: bool) -> Result<()> {
        debug!(target: "game", "draw_anims()");
        self.erase_background = false;
        self.draw_anim_buffer(2, player_hidden)?;
        self.draw_anim_buffer(1, player_hidden)?;
        self.draw_anim_buffer(0, player_hidden)?;
        self.erase_background = true;
        self.draw_anim_buffer(3, player_hidden)
    }

    fn draw_anim_buffer(&mut self, class: u8, player_hidden: bool) -> Result<()> {
        debug!(target: "game", "draw_anim_buffer() class={}", class);
        while let Some(state) = self.anims.pop(class) {
            match state.data {
                SpriteData::Character(chunk) => {
                    if class == 1 && player_hidden {
                        self.anims.clear(class);
                        break;
                    }
                    self.draw_character_entry(&state, chunk);
                }
                SpriteData::Object(off) => {
                    self.draw_object(off, state.x, state.y, state.flags)?;
                }
            }
        }
        Ok(())
    }

    fn draw_character_entry(&mut self, state: &AnimEntry, chunk: SprChunk) {
        match self.res.platform {
            Platform::Amiga => {
                let data = self.res.spr_data(chunk);
                decode::decode_spm_amiga(data, &mut self.scratch.buf);
                self.video.draw_character(
                    &self.scratch.buf,
                    state.x,
                    state.y,
                    state.h,
                    state.w,
                    state.flags,
                );
            }
            Platform::Dos => {
                let data = self.res.spr_data(chunk);
                if data[2] & 0x80 == 0 {
                    decode_character_frame(&data[4..], &mut self.scratch.buf);
                    self.video.draw_character(
                        &self.scratch.buf,
                        state.x,
                        state.y,
                        state.h,
                        state.w,
                        state.flags,
                    );
                } else {
                    self.video.draw_character(
                        &data[4..],
                        state.x,
                        state.y,
                        state.h,
                        state.w,
                        state.flags,
                    );
                }
            }
        }
    }

    /// Draws one interactive object: its SPC record names the frame list
    /// and the tile bank (via the frame-to-slot table) holding the cells.
    pub fn draw_object(&mut self, off: u32, x: i16, y: i16, flags: u8) -> Result<()> {
        let data = &self.res.spc[off as usize..];
        debug!(target: "game", "draw_object() data[0]=0x{:X} dx={} dy={}",
            data[0], data[1] as i8, data[2] as i8);
        assert!(data[0] < 0x4A);
        let frame = data[0];
        let dx = data[1] as i8;
        let dy = data[2] as i8;
        let (count, header) = match self.res.platform {
            Platform::Amiga => (data[8], 9usize),
            Platform::Dos => (data[5], 6usize),
        };
        let frames_at = off as usize + header;

        let slot = self.res.rp[frame as usize] as u16;
        let handle = match self.res.find_bank_data(slot) {
            Some(h) => h,
            None => self.res.load_bank_data(slot)?,
        };

        let pos_y = y - dy as i16;
        let pos_x = if flags & 2 != 0 {
            x + dx as i16
        } else {
            x - dx as i16
        };
        for i in 0..count as usize {
            let at = frames_at + i * 4;
            let rec = [
                self.res.spc[at],
                self.res.spc[at + 1],
                self.res.spc[at + 2],
                self.res.spc[at + 3],
            ];
            self.draw_object_frame(handle, rec, pos_x, pos_y, flags)?;
        }
        Ok(())
    }

    fn draw_object_frame(
        &mut self,
        handle: BankHandle,
        rec: [u8; 4],
        x: i16,
        y: i16,
        flags: u8,
    ) -> Result<()> {
        let sprite_y = y + rec[2] as i16;
        let sprite_x = if flags & 2 != 0 {
            x - rec[1] as i16 - ((rec[3] & 0xC) as i16 + 4) * 2
        } else {
            x + rec[1] as i16
        };
        let mut sprite_flags = rec[3];
        if flags & 2 != 0 {
            sprite_flags ^= 0x10;
        }
        let sprite_h = ((sprite_flags & 3) as usize + 1) * 8;
        let sprite_w = (((sprite_flags >> 2) & 3) as usize + 1) * 8;

        let bank = self.res.bank_bytes(handle)?;
        let src = &bank[rec[0] as usize * 32..];
        match self.res.platform {
            Platform::Amiga => decode::decode_spc_amiga(src, sprite_w, sprite_h, &mut self.scratch.buf),
            Platform::Dos => decode::decode_spc_dos(src, sprite_w, sprite_h, &mut self.scratch.buf),
        }

        let col_mask = (flags & 0x60) >> 1;
        self.video.draw_object_sprite(
            &self.scratch.buf,
            sprite_x,
            sprite_y,
            sprite_w as u16,
            sprite_h as u16,
            sprite_flags & 0x10 != 0,
            self.erase_background,
            col_mask,
        );
        Ok(())
    }

    /// Decodes a room into the layers, picking the data path the level
    /// resources dictate, then programs the level palettes.
    pub fn load_level_map(
        &mut self,
        pal: &mut dyn PaletteSink,
        level: u16,
        room: u16,
    ) -> Result<()> {
        debug!(target: "game", "load_level_map() room={}", room);
        match self.res.platform {
            Platform::Amiga => self.decode_lev_room(pal, level, room)?,
            Platform::Dos => {
                if !self.res.map.is_empty() {
                    self.video
                        .decode_map_room(&self.res, &mut self.scratch, level, room)?;
                } else if !self.res.lev.is_empty() {
                    self.decode_lev_room(pal, level, room)?;
                }
                self.video.set_level_palettes(&self.res.pal, pal);
            }
        }
        Ok(())
    }

    /// Room decode out of the `.LEV` blob. The PC demo variant stores its
    /// tile banks behind the `.BNQ` table, so the active table swaps for
    /// the duration and the cache is flushed on both sides.
    pub fn decode_lev_room(
        &mut self,
        pal: &mut dyn PaletteSink,
        level: u16,
        room: u16,
    ) -> Result<()> {
        let dos = self.res.platform == Platform::Dos;
        if dos {
            self.res.use_bank_table(BankTable::Bnq);
            self.res.clear_bank_data();
        }
        let result = self.decode_lev_room_tiles(pal, level, room);
        if dos {
            self.res.use_bank_table(BankTable::Mbk);
            self.res.clear_bank_data();
        }
        result
    }

    fn decode_lev_room_tiles(
        &mut self,
        pal: &mut dyn PaletteSink,
        level: u16,
        room: u16,
    ) -> Result<()> {
        let offset = BigEndian::read_u32(&self.res.lev[room as usize * 4..]) as usize;
        if !self
            .res
            .unpack(&mut self.scratch.buf, &self.res.lev[..offset], offset as u32)
        {
            return Err(Error::BadCrc {
                name: format!("level {level} room {room}"),
            });
        }
        let offset10 = BigEndian::read_u16(&self.scratch.buf[10..]);
        let offset12 = BigEndian::read_u16(&self.scratch.buf[12..]);
        let offset14 = BigEndian::read_u16(&self.scratch.buf[14..]);

        // assemble the room's working tile set; cell 0 stays blank
        let mut tiles = vec![0u8; 32];
        let mut pos = offset14 as usize;
        loop {
            let word = BigEndian::read_u16(&self.scratch.buf[pos..]);
            pos += 2;
            let last = word & 0x8000 != 0;
            let num = word & 0x7FFF;
            let size = self.res.bank_data_size(num);
            let handle = match self.res.find_bank_data(num) {
                Some(h) => h,
                None => self.res.load_bank_data(num)?,
            };
            let directive = self.scratch.buf[pos];
            pos += 1;
            let bank = self.res.bank_bytes(handle)?;
            if directive == 255 {
                assert!(tiles.len() + size <= ROOM_TILE_CELLS * 32);
                tiles.extend_from_slice(&bank[..size]);
            } else {
                for _ in 0..directive as usize + 1 {
                    let cell = self.scratch.buf[pos] as usize;
                    pos += 1;
                    assert!(tiles.len() + 32 <= ROOM_TILE_CELLS * 32);
                    tiles.extend_from_slice(&bank[cell * 32..cell * 32 + 32]);
                }
            }
            if last {
                break;
            }
        }

        self.video.front_layer.fill(0);
        let sgd_buf = self.scratch.buf[1] != 0;
        let mut offset10 = offset10;
        if sgd_buf {
            assert!(!self.res.sgd.is_empty());
            self.video.decode_sgd(
                &self.scratch.buf[offset10 as usize..],
                &self.res.sgd,
                self.res.platform,
            );
            offset10 = 0;
        }
        self.video.draw_tile_planes(
            &self.scratch.buf,
            offset10,
            offset12,
            &tiles,
            sgd_buf,
            self.res.platform,
        );
        self.video.copy_front_to_back();

        self.video.map_pal_slot1 = BigEndian::read_u16(&self.scratch.buf[2..]);
        self.video.map_pal_slot2 = BigEndian::read_u16(&self.scratch.buf[4..]);
        self.video.map_pal_slot3 = BigEndian::read_u16(&self.scratch.buf[6..]);
        self.video.map_pal_slot4 = BigEndian::read_u16(&self.scratch.buf[8..]);
        if self.res.platform == Platform::Dos {
            // the slot program runs once per level instead
            return Ok(());
        }
        let s1 = self.video.map_pal_slot1 as usize;
        let s2 = self.video.map_pal_slot2 as usize;
        let s3 = self.video.map_pal_slot3 as usize;
        // background
        set_palette_slot_be(pal, &self.res.pal, 0x0, s1);
        // objects
        set_palette_slot_be(pal, &self.res.pal, 0x1, if level == 0 { s3 } else { s2 });
        set_palette_slot_be(pal, &self.res.pal, 0x2, s3);
        set_palette_slot_be(pal, &self.res.pal, 0x3, s3);
        // player
        set_palette_slot_be(pal, &self.res.pal, 0x4, s3);
        // foreground
        set_palette_slot_be(pal, &self.res.pal, 0x8, s1);
        set_palette_slot_be(pal, &self.res.pal, 0x9, if level == 0 { s1 } else { s3 });
        // inventory
        set_palette_slot_be(pal, &self.res.pal, 0xA, s3);
        Ok(())
    }
}

/// Character frame RLE: the packed nibble stream expands into the upper
/// half of the scratch, then 0xF-escaped runs decode into the lower half.
/// Returns the decoded length.
pub fn decode_character_frame(src: &[u8], dst: &mut [u8]) -> usize {
    let n = BigEndian::read_u16(src);
    let mut len = n.wrapping_mul(2);
    let (lo, hi) = dst.split_at_mut(0x400);
    for k in 0..n as usize {
        let c = src[2 + k];
        hi[k * 2] = c >> 4;
        hi[k * 2 + 1] = c & 0x0F;
    }
    let mut s = 0usize;
    let mut d = 0usize;
    loop {
        let c1 = hi[s];
        s += 1;
        if c1 == 0xF {
            let mut c2 = hi[s];
            s += 1;
            let mut c3 = hi[s] as u16;
            s += 1;
            if c2 == 0xF {
                let c1b = hi[s];
                s += 1;
                c2 = hi[s];
                s += 1;
                c3 = (c3 << 4) | c1b as u16;
                len = len.wrapping_sub(2);
            }
            let run = c3 as usize + 4;
            lo[d..d + run].fill(c2);
            d += run;
            len = len.wrapping_sub(3);
        } else {
            lo[d] = c1;
            d += 1;
            len = len.wrapping_sub(1);
        }
        if len == 0 {
            break;
        }
    }
    d
}
