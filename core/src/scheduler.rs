//! Per-frame draw command stacks, one per priority class. The driving
//! logic fills them once per frame; the compositor drains class 2, 1, 0,
//! then 3 in erase-background mode, most recently added first.

use log::debug;

use crate::resource::SprChunk;

/// Where a queued sprite's pixels come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpriteData {
    /// Character frame in one of the sprite buffers.
    Character(SprChunk),
    /// Interactive-object frame list, an offset into the SPC blob.
    Object(u32),
}

/// One queued draw: raster position, intrinsic size, pixel source and the
/// owning entity's id plus its flags byte (mirror and palette-select bits).
#[derive(Debug, Clone, Copy)]
pub struct AnimEntry {
    pub x: i16,
    pub y: i16,
    pub w: u8,
    pub h: u8,
    pub data: SpriteData,
    pub entity: u16,
    pub flags: u8,
}

/// Capacities match the bounded entity counts the classes serve: ambient
/// objects, the player, foreground entities, background erase sprites.
pub const ANIM_BUFFER_CAPS: [usize; 4] = [41, 6, 42, 12];

#[derive(Default)]
pub struct AnimBuffers {
    buf0: heapless::Vec<AnimEntry, 41>,
    buf1: heapless::Vec<AnimEntry, 6>,
    buf2: heapless::Vec<AnimEntry, 42>,
    buf3: heapless::Vec<AnimEntry, 12>,
}

impl AnimBuffers {
    /// Queues one draw. Overflow is a programming error: the upstream
    /// entity count is known at level-load time.
    pub fn add_state(
        &mut self,
        class: u8,
        x: i16,
        y: i16,
        data: SpriteData,
        entity: u16,
        flags: u8,
        w: u8,
        h: u8,
    ) {
        debug!(target: "game", "add_state() class={} x={} y={}", class, x, y);
        let entry = AnimEntry {
            x,
            y,
            w,
            h,
            data,
            entity,
            flags,
        };
        let overflowed = match class {
            0 => self.buf0.push(entry).is_err(),
            1 => self.buf1.push(entry).is_err(),
            2 => self.buf2.push(entry).is_err(),
            3 => self.buf3.push(entry).is_err(),
            _ => panic!("invalid priority class {class}"),
        };
        if overflowed {
            panic!("priority buffer {class} overflow");
        }
    }

    /// Most recently added entry, removed.
    pub fn pop(&mut self, class: u8) -> Option<AnimEntry> {
        match class {
            0 => self.buf0.pop(),
            1 => self.buf1.pop(),
            2 => self.buf2.pop(),
            3 => self.buf3.pop(),
            _ => panic!("invalid priority class {class}"),
        }
    }

    pub fn clear(&mut self, class: u8) {
        match class {
            0 => self.buf0.clear(),
            1 => self.buf1.clear(),
            2 => self.buf2.clear(),
            3 => self.buf3.clear(),
            _ => panic!("invalid priority class {class}"),
        }
    }

    pub fn len(&self, class: u8) -> usize {
        match class {
            0 => self.buf0.len(),
            1 => self.buf1.len(),
            2 => self.buf2.len(),
            3 => self.buf3.len(),
            _ => panic!("invalid priority class {class}"),
        }
    }

    pub fn is_empty(&self, class: u8) -> bool {
        self.len(class) == 0
    }
}
