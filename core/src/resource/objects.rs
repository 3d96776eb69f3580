use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::debug;

use crate::error::{Error, Result};
use crate::fs::Stream;
use crate::resource::Platform;

pub const NUM_OBJECT_NODES: usize = 256;
/// Fixed node count of the in-memory object data layout.
const PACKED_OBJECT_NODES: usize = 230;
const OBJECT_RECORD_SIZE: usize = 0x12;

pub const MAX_INIT_PGES: usize = 256;

/// One interactive-object record, 18 bytes on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Object {
    pub kind: u16,
    pub dx: i8,
    pub dy: i8,
    pub init_obj_type: u16,
    pub opcode2: u8,
    pub opcode1: u8,
    pub flags: u8,
    pub opcode3: u8,
    pub init_obj_number: u16,
    pub opcode_arg1: u16,
    pub opcode_arg2: u16,
    pub opcode_arg3: u16,
}

#[derive(Debug, Default)]
pub struct ObjectNode {
    pub last_obj_number: u16,
    pub objects: Vec<Object>,
}

/// Decoded object data: distinct nodes plus a dense room-index map.
/// Consecutive indices whose source offsets coincide share one node, so the
/// map stores node indices and dropping frees each node exactly once.
#[derive(Debug)]
pub struct ObjectNodes {
    nodes: Vec<ObjectNode>,
    map: [Option<u16>; NUM_OBJECT_NODES],
    num_nodes: u16,
}

impl Default for ObjectNodes {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            map: [None; NUM_OBJECT_NODES],
            num_nodes: 0,
        }
    }
}

impl ObjectNodes {
    pub fn node(&self, index: usize) -> Option<&ObjectNode> {
        self.map[index].map(|i| &self.nodes[i as usize])
    }

    /// Arena index behind a map slot; equal indices mean a shared node.
    pub fn node_index(&self, index: usize) -> Option<u16> {
        self.map[index]
    }

    pub fn num_nodes(&self) -> u16 {
        self.num_nodes
    }
}

fn read_u16(platform: Platform, buf: &[u8]) -> u16 {
    match platform {
        Platform::Amiga => BigEndian::read_u16(buf),
        Platform::Dos => LittleEndian::read_u16(buf),
    }
}

fn read_u32(platform: Platform, buf: &[u8]) -> u32 {
    match platform {
        Platform::Amiga => BigEndian::read_u32(buf),
        Platform::Dos => LittleEndian::read_u32(buf),
    }
}

fn parse_object(platform: Platform, d: &[u8]) -> Object {
    Object {
        kind: read_u16(platform, &d[0..]),
        dx: d[2] as i8,
        dy: d[3] as i8,
        init_obj_type: read_u16(platform, &d[4..]),
        opcode2: d[6],
        opcode1: d[7],
        flags: d[8],
        opcode3: d[9],
        init_obj_number: read_u16(platform, &d[10..]),
        opcode_arg1: read_u16(platform, &d[12..]),
        opcode_arg2: read_u16(platform, &d[14..]),
        opcode_arg3: read_u16(platform, &d[16..]),
    }
}

// Spans pair up with the nonzero diffs of the offset sequence; aliased
// indices contribute a zero diff and reuse the previous node.
fn build_nodes(
    data: &[u8],
    offsets: &[u32],
    num_nodes: usize,
    platform: Platform,
) -> ObjectNodes {
    let mut counts = Vec::new();
    for i in 0..num_nodes {
        let diff = offsets[i + 1] as i64 - offsets[i] as i64;
        if diff != 0 {
            counts.push(((diff - 2) / OBJECT_RECORD_SIZE as i64) as usize);
        }
    }

    let mut out = ObjectNodes {
        num_nodes: num_nodes as u16,
        ..ObjectNodes::default()
    };
    let mut prev_offset = 0u32;
    let mut i_obj = 0usize;
    for i in 0..num_nodes {
        if prev_offset != offsets[i] {
            let at = offsets[i] as usize;
            let last_obj_number = read_u16(platform, &data[at..]);
            let num_objects = counts[i_obj];
            let mut objects = Vec::with_capacity(num_objects);
            for j in 0..num_objects {
                let rec = &data[at + 2 + j * OBJECT_RECORD_SIZE..];
                let obj = parse_object(platform, rec);
                debug!(target: "res", "obj_node={} obj={} op1=0x{:X} op2=0x{:X} op3=0x{:X}",
                    i, j, obj.opcode2, obj.opcode1, obj.opcode3);
                objects.push(obj);
            }
            out.nodes.push(ObjectNode {
                last_obj_number,
                objects,
            });
            i_obj += 1;
            prev_offset = offsets[i];
        }
        out.map[i] = if out.nodes.is_empty() {
            None
        } else {
            Some((out.nodes.len() - 1) as u16)
        };
    }
    out
}

/// Decodes already-in-memory object data (fixed 230-node layout).
pub fn decode_obj(platform: Platform, data: &[u8]) -> ObjectNodes {
    let num_nodes = PACKED_OBJECT_NODES;
    let mut offsets = vec![0u32; num_nodes + 1];
    for (i, off) in offsets.iter_mut().take(num_nodes).enumerate() {
        *off = read_u32(platform, &data[i * 4..]);
    }
    offsets[num_nodes] = data.len() as u32;
    build_nodes(data, &offsets, num_nodes, platform)
}

/// Reads the count-prefixed object file layout (DOS releases).
pub fn read_obj(f: &mut Stream) -> Result<ObjectNodes> {
    let num_nodes = f.read_u16_le()? as usize;
    if num_nodes >= 255 {
        return Err(Error::BadEntryCount {
            name: "object nodes",
            count: num_nodes as u32,
        });
    }
    let mut offsets = vec![0u32; num_nodes + 1];
    for off in offsets.iter_mut().take(num_nodes) {
        *off = f.read_u32_le()?;
    }
    offsets[num_nodes] = (f.size() - 2) as u32;
    // offsets are relative to the stream position after the count word
    f.seek(2)?;
    let data = f.read_rest()?;
    Ok(build_nodes(&data, &offsets, num_nodes, Platform::Dos))
}

/// Read-only entity template, one per entity id, populated at level load.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitPge {
    pub kind: u16,
    pub pos_x: i16,
    pub pos_y: i16,
    pub obj_node_number: u16,
    pub life: i16,
    pub counter_values: [i16; 4],
    pub object_type: u8,
    pub init_room: u8,
    pub room_location: u8,
    pub init_flags: u8,
    pub colliding_icon_num: u8,
    pub icon_num: u8,
    pub object_id: u8,
    pub skill: u8,
    pub mirror_x: u8,
    pub flags: u8,
    pub unk1c: u8,
    pub text_num: u16,
}

fn parse_init_pge(platform: Platform, d: &[u8]) -> InitPge {
    InitPge {
        kind: read_u16(platform, &d[0..]),
        pos_x: read_u16(platform, &d[2..]) as i16,
        pos_y: read_u16(platform, &d[4..]) as i16,
        obj_node_number: read_u16(platform, &d[6..]),
        life: read_u16(platform, &d[8..]) as i16,
        counter_values: [
            read_u16(platform, &d[10..]) as i16,
            read_u16(platform, &d[12..]) as i16,
            read_u16(platform, &d[14..]) as i16,
            read_u16(platform, &d[16..]) as i16,
        ],
        object_type: d[18],
        init_room: d[19],
        room_location: d[20],
        init_flags: d[21],
        colliding_icon_num: d[22],
        icon_num: d[23],
        object_id: d[24],
        skill: d[25],
        mirror_x: d[26],
        flags: d[27],
        unk1c: d[28],
        // d[29] is padding
        text_num: read_u16(platform, &d[30..]),
    }
}

pub const INIT_PGE_RECORD_SIZE: usize = 32;

/// Decodes the entity template table out of a raw buffer.
pub fn decode_pge(platform: Platform, data: &[u8]) -> Result<Vec<InitPge>> {
    let count = read_u16(platform, data) as usize;
    if count > MAX_INIT_PGES {
        return Err(Error::BadEntryCount {
            name: "entity templates",
            count: count as u32,
        });
    }
    debug!(target: "res", "decode_pge count={}", count);
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        out.push(parse_init_pge(platform, &data[2 + i * INIT_PGE_RECORD_SIZE..]));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use byteorder::WriteBytesExt;

    use super::*;

    #[test]
    fn aliased_offsets_share_one_node() {
        // 3 nodes, offsets [0, 10, 10], implicit end 30: indices 1 and 2
        // alias one stored node
        let mut file = Vec::new();
        file.write_u16::<LittleEndian>(3).unwrap();
        for off in [0u32, 10, 10] {
            file.write_u32::<LittleEndian>(off).unwrap();
        }
        file.resize(32, 0); // implicit final offset = 32 - 2 = 30

        let mut s = Stream::new("t.obj", Box::new(Cursor::new(file))).unwrap();
        let nodes = read_obj(&mut s).unwrap();
        assert_eq!(nodes.node_index(0), None);
        assert!(nodes.node_index(1).is_some());
        assert_eq!(nodes.node_index(1), nodes.node_index(2));
        // one distinct node; dropping `nodes` frees it once by construction
        assert_eq!(nodes.nodes.len(), 1);
    }

    #[test]
    fn packed_layout_parses_records() {
        // 230 offsets all pointing at one node holding one object record
        let table_len = PACKED_OBJECT_NODES * 4;
        let node_off = table_len as u32;
        let mut data = Vec::new();
        for _ in 0..PACKED_OBJECT_NODES {
            data.extend_from_slice(&node_off.to_le_bytes());
        }
        data.extend_from_slice(&7u16.to_le_bytes()); // last_obj_number
        let mut rec = [0u8; 18];
        LittleEndian::write_u16(&mut rec[0..], 0x0102); // kind
        rec[2] = 0xFF; // dx = -1
        rec[3] = 0x05; // dy = 5
        LittleEndian::write_u16(&mut rec[4..], 0x0304);
        rec[6] = 0x21; // opcode2
        rec[7] = 0x22; // opcode1
        rec[8] = 0x23; // flags
        rec[9] = 0x24; // opcode3
        LittleEndian::write_u16(&mut rec[10..], 0x0506);
        LittleEndian::write_u16(&mut rec[12..], 0x1111);
        LittleEndian::write_u16(&mut rec[14..], 0x2222);
        LittleEndian::write_u16(&mut rec[16..], 0x3333);
        data.extend_from_slice(&rec);

        let nodes = decode_obj(Platform::Dos, &data);
        let n = nodes.node(0).unwrap();
        assert_eq!(n.last_obj_number, 7);
        assert_eq!(n.objects.len(), 1);
        let o = &n.objects[0];
        assert_eq!(o.kind, 0x0102);
        assert_eq!(o.dx, -1);
        assert_eq!(o.dy, 5);
        assert_eq!(o.opcode1, 0x22);
        assert_eq!(o.opcode_arg3, 0x3333);
        // every index shares the single node
        assert_eq!(nodes.node_index(0), nodes.node_index(229));
    }

    #[test]
    fn pge_records_parse_both_endiannesses() {
        let mut data = vec![0u8; 2 + INIT_PGE_RECORD_SIZE];
        LittleEndian::write_u16(&mut data[0..], 1);
        let r = &mut data[2..];
        LittleEndian::write_u16(&mut r[0..], 4); // kind
        LittleEndian::write_u16(&mut r[2..], 0xFFF0); // pos_x = -16
        LittleEndian::write_u16(&mut r[4..], 100); // pos_y
        LittleEndian::write_u16(&mut r[6..], 9); // obj_node_number
        LittleEndian::write_u16(&mut r[8..], 50); // life
        r[18] = 10; // object_type
        r[19] = 3; // init_room
        r[26] = 1; // mirror_x
        LittleEndian::write_u16(&mut r[30..], 77); // text_num

        let pges = decode_pge(Platform::Dos, &data).unwrap();
        assert_eq!(pges.len(), 1);
        let p = &pges[0];
        assert_eq!(p.kind, 4);
        assert_eq!(p.pos_x, -16);
        assert_eq!(p.pos_y, 100);
        assert_eq!(p.obj_node_number, 9);
        assert_eq!(p.life, 50);
        assert_eq!(p.object_type, 10);
        assert_eq!(p.init_room, 3);
        assert_eq!(p.mirror_x, 1);
        assert_eq!(p.text_num, 77);

        // same record big-endian
        let mut data_be = vec![0u8; 2 + INIT_PGE_RECORD_SIZE];
        BigEndian::write_u16(&mut data_be[0..], 1);
        let r = &mut data_be[2..];
        BigEndian::write_u16(&mut r[0..], 4);
        BigEndian::write_u16(&mut r[2..], 0xFFF0);
        r[18] = 10;
        let pges = decode_pge(Platform::Amiga, &data_be).unwrap();
        assert_eq!(pges[0].kind, 4);
        assert_eq!(pges[0].pos_x, -16);
        assert_eq!(pges[0].object_type, 10);
    }

    #[test]
    fn too_many_templates_is_fatal() {
        let mut data = vec![0u8; 2];
        LittleEndian::write_u16(&mut data[0..], 300);
        assert!(matches!(
            decode_pge(Platform::Dos, &data),
            Err(Error::BadEntryCount { .. })
        ));
    }
}
