//! Tile and sprite-cell decoders for the two source data variants: 4-bit
//! packed pixels on DOS, bitplane-interleaved on Amiga.

use bitfield::bitfield;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::resource::{Platform, ResourceStore};
use crate::video::{DecodeScratch, Video, SCREEN_H, SCREEN_W};

bitfield! {
    /// Room tile reference word. The cell index shares its top bit with
    /// the palette-bank selector.
    pub struct TileWord(u16);
    impl Debug;
    pub u16, cell, _: 10, 0;
    pub pal_hi, _: 10;
    pub xflip, _: 11;
    pub yflip, _: 12;
    pub u8, behind, _: 14, 13;
    pub fg, _: 15;
}

/// Expands 4-bit packed pixels (high nibble first) to one byte each.
pub fn decode_spc_dos(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let size = w * h / 2;
    for i in 0..size {
        dst[i * 2] = src[i] >> 4;
        dst[i * 2 + 1] = src[i] & 15;
    }
}

/// Planar sprite cells come in a few fixed widths.
pub fn decode_spc_amiga(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    match w {
        8 => planar8(dst, w, h, src),
        16 | 32 => planar16(dst, w / 16, h, 4, src),
        24 => planar24(dst, h, src),
        _ => warn!(target: "video", "decode_spc_amiga w={} unimplemented", w),
    }
}

/// Character sprite frame: RLE-packed 3-plane data with the dimensions in
/// the third header byte.
pub fn decode_spm_amiga(src: &[u8], dst: &mut [u8]) {
    let mut buf = [0u8; 256 * 32];
    let size = (BigEndian::read_u16(&src[3..]) & 0x7FFF) as usize;
    assert!(size <= buf.len());
    decode_rle(&mut buf, &src[3..]);
    let w = ((src[2] >> 7) + 1) as usize;
    let h = (src[2] & 0x7F) as usize;
    planar16(dst, w, h, 3, &buf);
}

/// Size-prefixed RLE: codes with the high bit clear copy `code + 1`
/// literals, the rest repeat the next byte `1 - code` times.
pub fn decode_rle(dst: &mut [u8], src: &[u8]) {
    let size = (BigEndian::read_u16(src) & 0x7FFF) as usize;
    let src = &src[2..];
    let mut i = 0usize;
    let mut d = 0usize;
    while i < size {
        let code = src[i];
        i += 1;
        let len;
        if code & 0x80 == 0 {
            len = {
                let mut n = code as usize + 1;
                if i + n > size {
                    n = size - i;
                }
                n
            };
            dst[d..d + len].copy_from_slice(&src[i..i + len]);
            i += len;
        } else {
            len = (1 - (code as i8 as i32)) as usize;
            dst[d..d + len].fill(src[i]);
            i += 1;
        }
        d += len;
    }
}

/// Room map strip RLE (DOS `.MAP`): signed code byte, negative repeats,
/// positive copies.
pub fn decode_map_strip(src: &[u8], dst: &mut [u8]) {
    let mut s = 0usize;
    let mut d = 0usize;
    while s < src.len() {
        let code = src[s] as i8 as i32;
        s += 1;
        if code < 0 {
            let len = (1 - code) as usize;
            dst[d..d + len].fill(src[s]);
            s += 1;
            d += len;
        } else {
            let len = (code + 1) as usize;
            dst[d..d + len].copy_from_slice(&src[s..s + len]);
            s += len;
            d += len;
        }
    }
}

pub fn planar8(dst: &mut [u8], w: usize, h: usize, src: &[u8]) {
    assert!(w == 8);
    for y in 0..h {
        let row = &src[y * 4..];
        for i in 0..8 {
            let mask = 1 << (7 - i);
            let mut color = 0u8;
            for (bit, plane) in row.iter().take(4).enumerate() {
                if plane & mask != 0 {
                    color |= 1 << bit;
                }
            }
            dst[y * w + i] = color;
        }
    }
}

/// `w` counts 16-pixel words per row.
pub fn planar16(dst: &mut [u8], w: usize, h: usize, depth: usize, src: &[u8]) {
    let pitch = w * 16;
    let planar_size = w * 2 * h;
    let mut s = 0usize;
    for y in 0..h {
        for x in 0..w {
            for i in 0..16 {
                let mask = 1 << (15 - i);
                let mut color = 0u8;
                for bit in 0..depth {
                    if BigEndian::read_u16(&src[s + bit * planar_size..]) & mask != 0 {
                        color |= 1 << bit;
                    }
                }
                dst[y * pitch + x * 16 + i] = color;
            }
            s += 2;
        }
    }
}

/// 24-pixel-wide cells: a 16-pixel word pass then an 8-pixel byte pass.
pub fn planar24(dst: &mut [u8], h: usize, src: &[u8]) {
    const W: usize = 24;
    let mut s = 0usize;
    for y in 0..h {
        for i in 0..16 {
            let mask = 1 << (15 - i);
            let mut color = 0u8;
            for bit in 0..4 {
                if BigEndian::read_u16(&src[s + bit * 2..]) & mask != 0 {
                    color |= 1 << bit;
                }
            }
            dst[y * W + i] = color;
        }
        s += 8;
        for i in 0..8 {
            let mask = 1 << (7 - i);
            let mut color = 0u8;
            for bit in 0..4 {
                if src[s + bit] & mask != 0 {
                    color |= 1 << bit;
                }
            }
            dst[y * W + 16 + i] = color;
        }
        s += 4;
    }
}

/// Mirrors a 32-byte planar tile top to bottom.
fn mirror_tile_y(src: &[u8]) -> [u8; 32] {
    let mut buf = [0u8; 32];
    for j in 0..4 {
        for i in 0..8 {
            buf[31 - j * 8 - i] = src[24 - j * 8 + i];
        }
    }
    buf
}

/// Mirrors a 32-byte planar tile left to right by reversing each byte.
fn mirror_tile_x(src: &[u8]) -> [u8; 32] {
    let mut buf = [0u8; 32];
    for (i, b) in buf.iter_mut().enumerate() {
        let mut mask = 0u8;
        for bit in 0..8 {
            if src[i] & (1 << bit) != 0 {
                mask |= 1 << (7 - bit);
            }
        }
        *b = mask;
    }
    buf
}

impl Video {
    /// 8x8 background tile, 4-bit packed pixels. `color_key` of -1 draws
    /// every pixel; the palette/priority mask is OR-ed in.
    pub fn draw_tile_dos(
        &mut self,
        x: usize,
        y: usize,
        src: &[u8],
        mask: u8,
        xflip: bool,
        yflip: bool,
        color_key: i32,
    ) {
        let base = y * SCREEN_W + x;
        let mut s = 0usize;
        for row in 0..8 {
            let dy = if yflip { 7 - row } else { row };
            for i in (0..8).step_by(2) {
                let b = src[s];
                s += 1;
                let c1 = (b >> 4) as i32;
                if c1 != color_key {
                    let dx = if xflip { 7 - i } else { i };
                    self.front_layer[base + dy * SCREEN_W + dx] = mask | c1 as u8;
                }
                let c2 = (b & 15) as i32;
                if c2 != color_key {
                    let dx = if xflip { 7 - (i + 1) } else { i + 1 };
                    self.front_layer[base + dy * SCREEN_W + dx] = mask | c2 as u8;
                }
            }
        }
    }

    /// 8x8 background tile, 4-plane planar. The palette bank is added to
    /// the color, not OR-ed.
    pub fn draw_tile_amiga(
        &mut self,
        x: usize,
        y: usize,
        src: &[u8],
        pal: u8,
        xflip: bool,
        yflip: bool,
        color_key: i32,
    ) {
        let mut tile = [0u8; 32];
        tile.copy_from_slice(&src[..32]);
        if yflip {
            tile = mirror_tile_y(&tile);
        }
        if xflip {
            tile = mirror_tile_x(&tile);
        }
        let base = y * SCREEN_W + x;
        for row in 0..8 {
            for i in 0..8 {
                let mask = 1 << (7 - i);
                let mut color = 0i32;
                for bit in 0..4 {
                    if tile[row + 8 * bit] & mask != 0 {
                        color |= 1 << bit;
                    }
                }
                if color != color_key {
                    self.front_layer[base + row * SCREEN_W + i] = pal.wrapping_add(color as u8);
                }
            }
        }
    }

    /// Renders the two tile planes of a room over the front layer. The
    /// first plane draws opaquely behind everything, the second skips
    /// color 0 and carries the foreground priority bits.
    pub fn draw_tile_planes(
        &mut self,
        src: &[u8],
        offset10: u16,
        offset12: u16,
        tiles: &[u8],
        sgd_buf: bool,
        platform: Platform,
    ) {
        let read = |buf: &[u8]| match platform {
            Platform::Dos => LittleEndian::read_u16(buf),
            Platform::Amiga => BigEndian::read_u16(buf),
        };
        if offset10 != 0 {
            let mut pos = offset10 as usize;
            for y in (0..SCREEN_H).step_by(8) {
                for x in (0..SCREEN_W).step_by(8) {
                    let t = TileWord(read(&src[pos..]));
                    pos += 2;
                    let cell = t.cell() as usize;
                    if cell != 0 {
                        let data = &tiles[cell * 32..cell * 32 + 32];
                        let mask = if t.fg() {
                            0x80 + if t.pal_hi() { 0x10 } else { 0 }
                        } else {
                            0
                        };
                        match platform {
                            Platform::Dos => {
                                self.draw_tile_dos(x, y, data, mask, t.xflip(), t.yflip(), -1)
                            }
                            Platform::Amiga => {
                                self.draw_tile_amiga(x, y, data, mask, t.xflip(), t.yflip(), -1)
                            }
                        }
                    }
                }
            }
        }
        if offset12 != 0 {
            let mut pos = offset12 as usize;
            for y in (0..SCREEN_H).step_by(8) {
                for x in (0..SCREEN_W).step_by(8) {
                    let t = TileWord(read(&src[pos..]));
                    pos += 2;
                    let mut cell = t.cell() as i32;
                    if cell != 0 && sgd_buf {
                        // the first 896 cells belong to the background
                        // object set drawn by the SGD pass
                        cell -= 896;
                    }
                    if cell > 0 {
                        let cell = cell as usize;
                        let data = &tiles[cell * 32..cell * 32 + 32];
                        let mask = if t.behind() != 0 && sgd_buf {
                            0x10
                        } else if t.fg() {
                            0x80 + if t.pal_hi() { 0x10 } else { 0 }
                        } else {
                            0
                        };
                        match platform {
                            Platform::Dos => {
                                self.draw_tile_dos(x, y, data, mask, t.xflip(), t.yflip(), 0)
                            }
                            Platform::Amiga => {
                                self.draw_tile_amiga(x, y, data, mask, t.xflip(), t.yflip(), 0)
                            }
                        }
                    }
                }
            }
        }
    }

    /// Masked planar draw for background objects, clipped against the
    /// raster bounds.
    fn planar_mask(
        &mut self,
        x0: i32,
        y0: i32,
        w: usize,
        h: usize,
        src: &[u8],
        mask: &[u8],
        size: usize,
    ) {
        let mut pos = 0usize;
        for y in 0..h {
            for x in 0..w * 2 {
                for i in 0..8 {
                    let c_mask = 1u8 << (7 - i);
                    let mut color = 0u8;
                    for j in 0..4 {
                        if mask[pos + j * size] & c_mask != 0 {
                            color |= 1 << j;
                        }
                    }
                    if src[pos] & c_mask != 0 {
                        let px = x0 + 8 * x as i32 + i as i32;
                        let py = y0 + y as i32;
                        if px >= 0 && px < SCREEN_W as i32 && py >= 0 && py < SCREEN_H as i32 {
                            self.front_layer[py as usize * SCREEN_W + px as usize] = color;
                        }
                    }
                }
                pos += 1;
            }
        }
    }

    /// Masked 4-bit tile draw for background objects (DOS). Mask words
    /// gate the two nibbles of each pixel byte.
    fn draw_tile_mask(
        &mut self,
        x0: i32,
        y0: i32,
        w: usize,
        h: usize,
        m: &[u8],
        p: &[u8],
        size: usize,
    ) {
        assert!(size == w * 2 * h);
        let mut mp = 0usize;
        let mut pp = 0usize;
        for y in 0..h {
            for x in 0..w {
                let bits = BigEndian::read_u16(&m[mp..]);
                mp += 2;
                for bit in 0..8 {
                    let j = y0 + y as i32;
                    let i = x0 + 2 * (x as i32 * 8 + bit as i32);
                    if i >= 0 && i < SCREEN_W as i32 && j >= 0 && j < SCREEN_H as i32 {
                        let color = p[pp];
                        let at = j as usize * SCREEN_W + i as usize;
                        if bits & (1 << (15 - bit * 2)) != 0 {
                            self.front_layer[at] = color >> 4;
                        }
                        if bits & (1 << (15 - (bit * 2 + 1))) != 0 && (i as usize) + 1 < SCREEN_W {
                            self.front_layer[at + 1] = color & 15;
                        }
                    }
                    pp += 1;
                }
            }
        }
    }

    /// Background-object pass. Each record names an RLE chunk (negative
    /// offsets mean stored raw) and a screen position; chunks repeat, so
    /// the staging buffer is reused while the chunk id stays the same.
    pub fn decode_sgd(&mut self, src: &[u8], data: &[u8], platform: Platform) {
        let mut num: i32 = -1;
        let mut buf = [0u8; 256 * 32];
        let mut count = BigEndian::read_u16(src) as i32 - 1;
        let mut pos = 2usize;
        loop {
            let mut d2 = BigEndian::read_u16(&src[pos..]) as i32;
            pos += 2;
            let d0 = BigEndian::read_u16(&src[pos..]) as i16;
            pos += 2;
            let d1 = BigEndian::read_u16(&src[pos..]) as i16;
            pos += 2;
            if d2 != 0xFFFF {
                d2 &= !(1 << 15);
                let offset = BigEndian::read_u32(&data[d2 as usize * 4..]) as i32;
                if offset < 0 {
                    let ptr = &data[(-offset) as usize..];
                    let size = BigEndian::read_u16(ptr) as usize;
                    if num != d2 {
                        num = d2;
                        assert!(size <= buf.len());
                        buf[..size].copy_from_slice(&ptr[2..2 + size]);
                    }
                } else if num != d2 {
                    num = d2;
                    let size = (BigEndian::read_u16(&data[offset as usize..]) & 0x7FFF) as usize;
                    assert!(size <= buf.len());
                    decode_rle(&mut buf, &data[offset as usize..]);
                }
            }
            let w = ((buf[0] as usize) + 1) >> 1;
            let h = buf[1] as usize + 1;
            let planar_size = BigEndian::read_u16(&buf[2..]) as usize;
            match platform {
                Platform::Amiga => self.planar_mask(
                    d0 as i32,
                    d1 as i32,
                    w,
                    h,
                    &buf[4..],
                    &buf[4 + planar_size..],
                    planar_size,
                ),
                Platform::Dos => self.draw_tile_mask(
                    d0 as i32,
                    d1 as i32,
                    w,
                    h,
                    &buf[4..],
                    &buf[4 + planar_size..],
                    planar_size,
                ),
            }
            count -= 1;
            if count < 0 {
                break;
            }
        }
    }

    /// Decodes a room out of the DOS `.MAP` blob straight into the
    /// layers. Rooms store four palette slot numbers and four RLE strips
    /// (or a column-interleaved raw image when the offset is negative).
    pub fn decode_map_room(
        &mut self,
        res: &ResourceStore,
        scratch: &mut DecodeScratch,
        level: u16,
        room: u16,
    ) -> Result<()> {
        debug!(target: "video", "decode_map_room({})", room);
        assert!(room < 0x40);
        let mut off = LittleEndian::read_u32(&res.map[room as usize * 6..]) as i32;
        if off == 0 {
            return Err(Error::InvalidRoom { room });
        }
        let mut packed = true;
        if off < 0 {
            off = -off;
            packed = false;
        }
        let p = &res.map[off as usize..];
        self.map_pal_slot1 = p[0] as u16;
        self.map_pal_slot2 = p[1] as u16;
        self.map_pal_slot3 = p[2] as u16;
        self.map_pal_slot4 = p[3] as u16;
        if level == 4 && room == 60 {
            // the fire room data carries wrong palette colors
            self.map_pal_slot4 = 5;
        }
        const STRIP: usize = SCREEN_W * 56;
        if packed {
            let mut pos = 4usize;
            for i in 0..4 {
                let sz = LittleEndian::read_u16(&p[pos..]) as usize;
                pos += 2;
                decode_map_strip(&p[pos..pos + sz], &mut scratch.buf);
                pos += sz;
                self.front_layer[i * STRIP..(i + 1) * STRIP]
                    .copy_from_slice(&scratch.buf[..STRIP]);
            }
        } else {
            let p = &p[4..];
            for i in 0..4 {
                for y in 0..SCREEN_H {
                    for x in 0..64 {
                        self.front_layer[i + x * 4 + SCREEN_W * y] = p[STRIP * i + x + 64 * y];
                    }
                }
            }
        }
        self.copy_front_to_back();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spc_nibbles_expand_high_first() {
        let src = [0x12u8, 0x34];
        let mut dst = [0u8; 4];
        decode_spc_dos(&src, 2, 2, &mut dst);
        assert_eq!(dst, [1, 2, 3, 4]);
    }

    #[test]
    fn rle_copies_and_repeats() {
        // size 5: literal run of 3 (code 2), then repeat 0xAA twice
        // (code 0xFF = -1 -> 1 - (-1) = 2)
        let mut src = vec![0u8, 5];
        src.extend_from_slice(&[2, 1, 2, 3, 0xFF, 0xAA]);
        let mut dst = [0u8; 8];
        decode_rle(&mut dst, &src);
        assert_eq!(&dst[..5], &[1, 2, 3, 0xAA, 0xAA]);
    }

    #[test]
    fn map_strip_mixes_runs_and_literals() {
        // code 1 -> 2 literals; code -3 (0xFD) -> 4 repeats of 9
        let src = [1u8, 7, 8, 0xFD, 9];
        let mut dst = [0u8; 8];
        decode_map_strip(&src, &mut dst);
        assert_eq!(&dst[..6], &[7, 8, 9, 9, 9, 9]);
    }

    #[test]
    fn planar16_reassembles_bitplanes() {
        // one 16-pixel row, depth 2: plane0 = 0x8000, plane1 = 0x8001
        let mut src = [0u8; 4];
        BigEndian::write_u16(&mut src[0..], 0x8000);
        BigEndian::write_u16(&mut src[2..], 0x8001);
        let mut dst = [0u8; 16];
        planar16(&mut dst, 1, 1, 2, &src);
        assert_eq!(dst[0], 3);
        assert_eq!(dst[15], 2);
        assert_eq!(dst[1], 0);
    }

    #[test]
    fn planar8_reads_four_planes_per_row() {
        // pixel 0 set in planes 0 and 2 -> color 5
        let src = [0x80u8, 0x00, 0x80, 0x00];
        let mut dst = [0u8; 8];
        planar8(&mut dst, 8, 1, &src);
        assert_eq!(dst[0], 5);
        assert_eq!(dst[1], 0);
    }

    #[test]
    fn dos_tile_draw_flips_and_masks() {
        let mut v = Video::default();
        v.full_refresh = false;
        // 8x8 tile whose first pixel is 1, everything else 0
        let mut tile = [0u8; 32];
        tile[0] = 0x10;
        v.draw_tile_dos(0, 0, &tile, 0x80, false, false, 0);
        assert_eq!(v.front_layer[0], 0x81);

        v.draw_tile_dos(8, 0, &tile, 0, true, false, 0);
        assert_eq!(v.front_layer[8 + 7], 1);

        v.draw_tile_dos(16, 0, &tile, 0, false, true, 0);
        assert_eq!(v.front_layer[7 * 256 + 16], 1);

        // color key -1 writes zero pixels too
        v.front_layer[256 * 8] = 0xFF;
        v.draw_tile_dos(0, 8, &tile, 0, false, false, -1);
        assert_eq!(v.front_layer[256 * 8], 1);
        assert_eq!(v.front_layer[256 * 8 + 1], 0);
    }

    #[test]
    fn amiga_tile_draw_adds_the_palette_base() {
        let mut v = Video::default();
        v.full_refresh = false;
        // plane 0, row 0, leftmost pixel
        let mut tile = [0u8; 32];
        tile[0] = 0x80;
        v.draw_tile_amiga(0, 0, &tile, 0x10, false, false, 0);
        assert_eq!(v.front_layer[0], 0x11);

        v.draw_tile_amiga(8, 0, &tile, 0, true, false, 0);
        assert_eq!(v.front_layer[8 + 7], 1);

        v.draw_tile_amiga(16, 0, &tile, 0, false, true, 0);
        assert_eq!(v.front_layer[7 * 256 + 16], 1);
    }

    #[test]
    fn map_room_decodes_four_strips() {
        use crate::codec::testing::CopyCodec;
        use crate::video::DecodeScratch;

        const STRIP: usize = SCREEN_W * 56;
        // two 6-byte room records; room 1 stays zero, room 0 points at the
        // data. Each strip RLE-encodes a constant color in max-length runs.
        let mut map = vec![0u8; 12];
        LittleEndian::write_u32(&mut map[0..], 12);
        map.extend_from_slice(&[1, 2, 3, 4]); // palette slots
        for color in 0..4u8 {
            let mut strip = Vec::new();
            for _ in 0..STRIP / 128 {
                strip.extend_from_slice(&[0x81, color + 1]); // 128 repeats
            }
            let mut sz = [0u8; 2];
            LittleEndian::write_u16(&mut sz, strip.len() as u16);
            map.extend_from_slice(&sz);
            map.extend_from_slice(&strip);
        }

        let mut res = crate::resource::ResourceStore::new(Platform::Dos, Box::new(CopyCodec));
        res.map = map;

        let mut v = Video::default();
        v.full_refresh = false;
        let mut scratch = DecodeScratch::default();
        v.decode_map_room(&res, &mut scratch, 0, 0).unwrap();

        assert_eq!(v.map_pal_slot1, 1);
        assert_eq!(v.map_pal_slot4, 4);
        assert_eq!(v.front_layer[0], 1);
        assert_eq!(v.front_layer[56 * SCREEN_W], 2);
        assert_eq!(v.front_layer[168 * SCREEN_W + 255], 4);
        assert_eq!(v.back_layer[0], 1);

        // a zero room offset is a corrupt file
        assert!(matches!(
            v.decode_map_room(&res, &mut scratch, 0, 1),
            Err(Error::InvalidRoom { room: 1 })
        ));
    }

    #[test]
    fn tile_word_fields() {
        let t = TileWord(0x9C05);
        assert_eq!(t.cell(), 0x405);
        assert!(t.pal_hi());
        assert!(t.xflip());
        assert!(t.yflip());
        assert!(t.fg());
        assert_eq!(t.behind(), 0);
        let t = TileWord(0x6000);
        assert_eq!(t.behind(), 3);
    }
}
