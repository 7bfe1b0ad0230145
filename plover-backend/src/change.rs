use core::fmt::Debug;
use std::{
    collections::{HashMap, HashSet},
    convert::{TryFrom, TryInto},
    io::{Read, Write},
    ops::Range,
    str,
};

use flate2::{
    bufread::{DeflateDecoder, DeflateEncoder},
    Compression,
};
use plover_protocol as protocol;
use protocol::{ActorId, ChangeHash};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::{
    columnar::{ColumnEncoder, OperationIterator, COLUMN_TYPE_DEFLATE},
    decoding,
    decoding::{Decodable, InvalidChangeError},
    encoding,
    encoding::{ColData, Encodable, DEFLATE_MIN_SIZE},
};

const HASH_BYTES: usize = 32;
const BLOCK_TYPE_DOC: u8 = 0;
const BLOCK_TYPE_CHANGE: u8 = 1;
const BLOCK_TYPE_DEFLATE: u8 = 2;
const CHUNK_START: usize = 8;
const HASH_RANGE: Range<usize> = 4..8;

pub(crate) const MAGIC_BYTES: [u8; 4] = [0x85, 0x6f, 0x4a, 0x83];
pub(crate) const PREAMBLE_BYTES: usize = 8;
pub(crate) const HEADER_BYTES: usize = PREAMBLE_BYTES + 1;

impl From<protocol::Change> for Change {
    fn from(value: protocol::Change) -> Self {
        encode(&value)
    }
}

impl From<&protocol::Change> for Change {
    fn from(value: &protocol::Change) -> Self {
        encode(value)
    }
}

fn encode(change: &protocol::Change) -> Change {
    let mut bytes: Vec<u8> = Vec::new();
    let mut hasher = Sha256::new();

    let mut deps = change.deps.clone();
    deps.sort_unstable();

    let mut chunk = encode_chunk(change, &deps);

    bytes.extend(&MAGIC_BYTES);

    bytes.extend(vec![0, 0, 0, 0]); // we dont know the hash yet so fill in a fake

    bytes.push(BLOCK_TYPE_CHANGE);

    leb128::write::unsigned(&mut bytes, chunk.bytes.len() as u64).unwrap();

    increment_range(&mut chunk.message, bytes.len());
    increment_range_map(&mut chunk.ops, bytes.len());

    bytes.extend(&chunk.bytes);

    hasher.input(&bytes[CHUNK_START..bytes.len()]);
    let hash_result = hasher.result();
    let hash: ChangeHash = hash_result[..].try_into().unwrap();

    bytes.splice(HASH_RANGE, hash_result[0..4].iter().copied());

    let bytes = if bytes.len() > DEFLATE_MIN_SIZE {
        let mut result = Vec::with_capacity(bytes.len());
        result.extend(&bytes[0..8]);
        result.push(BLOCK_TYPE_DEFLATE);
        let mut deflater = DeflateEncoder::new(&chunk.bytes[..], Compression::best());
        let mut deflated = Vec::new();
        let deflated_len = deflater.read_to_end(&mut deflated).unwrap();
        leb128::write::unsigned(&mut result, deflated_len as u64).unwrap();
        result.extend(&deflated[..]);
        ChangeBytes::Compressed {
            compressed: result,
            uncompressed: bytes,
        }
    } else {
        ChangeBytes::Uncompressed(bytes)
    };

    Change {
        bytes,
        hash,
        seq: change.seq,
        start_op: change.start_op,
        time: change.time,
        actors: chunk.actors,
        message: chunk.message,
        deps,
        ops: chunk.ops,
    }
}

struct ChunkIntermediate {
    bytes: Vec<u8>,
    actors: Vec<ActorId>,
    message: Range<usize>,
    ops: HashMap<u32, Range<usize>>,
}

fn encode_chunk(change: &protocol::Change, deps: &[ChangeHash]) -> ChunkIntermediate {
    let mut bytes = Vec::new();

    // All these unwraps are okay because we're writing to an in memory
    // buffer so io errors should not happen

    // encode the change's own actor, then the header fields
    let mut actors = vec![change.actor_id.clone()];
    change.actor_id.to_bytes().encode(&mut bytes).unwrap();

    change.seq.encode(&mut bytes).unwrap();
    change.start_op.encode(&mut bytes).unwrap();
    change.time.encode(&mut bytes).unwrap();
    let before_message = bytes.len();
    let written = change
        .message
        .clone()
        .unwrap_or_default()
        .encode(&mut bytes)
        .unwrap();
    let message_len = change.message.as_ref().map_or(0, String::len);
    let message = (before_message + written - message_len)..bytes.len();

    // encode ops into a side buffer - this collects all other actors
    let (ops_buf, mut ops) = ColumnEncoder::encode_ops(&change.operations, &mut actors);

    // encode deps
    deps.len().encode(&mut bytes).unwrap();
    for hash in deps.iter() {
        bytes.write_all(&hash.0).unwrap();
    }

    // encode all other actors
    actors[1..].encode(&mut bytes).unwrap();

    // now we know how many bytes ops are offset by so we can adjust the ranges
    increment_range_map(&mut ops, bytes.len());

    // write out the ops
    bytes.write_all(&ops_buf).unwrap();

    ChunkIntermediate {
        bytes,
        actors,
        message,
        ops,
    }
}

#[derive(PartialEq, Debug, Clone)]
enum ChangeBytes {
    Compressed {
        compressed: Vec<u8>,
        uncompressed: Vec<u8>,
    },
    Uncompressed(Vec<u8>),
}

impl ChangeBytes {
    fn uncompressed(&self) -> &[u8] {
        match self {
            ChangeBytes::Compressed { uncompressed, .. } => &uncompressed[..],
            ChangeBytes::Uncompressed(b) => &b[..],
        }
    }

    fn raw(&self) -> &[u8] {
        match self {
            ChangeBytes::Compressed { compressed, .. } => &compressed[..],
            ChangeBytes::Uncompressed(b) => &b[..],
        }
    }
}

/// A change, stored in its binary encoding. The backend keeps these bytes
/// verbatim, keyed by hash, so that `get_changes` and `save` can return
/// them without re-encoding.
#[derive(PartialEq, Debug, Clone)]
pub struct Change {
    bytes: ChangeBytes,
    pub hash: ChangeHash,
    pub seq: u64,
    pub start_op: u64,
    pub time: i64,
    message: Range<usize>,
    actors: Vec<ActorId>,
    pub deps: Vec<ChangeHash>,
    ops: HashMap<u32, Range<usize>>,
}

impl Change {
    pub fn actor_id(&self) -> &ActorId {
        &self.actors[0]
    }

    pub(crate) fn actors(&self) -> &[ActorId] {
        &self.actors
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Change, decoding::Error> {
        decode_change(bytes)
    }

    pub fn max_op(&self) -> u64 {
        let len = self.iter_ops().count();
        self.start_op + (len as u64) - 1
    }

    fn message(&self) -> Option<String> {
        let m = &self.bytes.uncompressed()[self.message.clone()];
        if m.is_empty() {
            None
        } else {
            str::from_utf8(m).map(ToString::to_string).ok()
        }
    }

    pub fn decode(&self) -> protocol::Change {
        protocol::Change {
            start_op: self.start_op,
            seq: self.seq,
            time: self.time,
            hash: Some(self.hash),
            message: self.message(),
            actor_id: self.actors[0].clone(),
            deps: self.deps.clone(),
            operations: self.iter_ops().collect(),
        }
    }

    pub(crate) fn iter_ops(&self) -> OperationIterator {
        OperationIterator::new(self.bytes.uncompressed(), &self.actors, &self.ops)
    }

    pub fn raw_bytes(&self) -> &[u8] {
        self.bytes.raw()
    }
}

impl TryFrom<&[u8]> for Change {
    type Error = decoding::Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Change::from_bytes(bytes.to_vec())
    }
}

fn read_leb128(bytes: &mut &[u8]) -> Result<(usize, usize), decoding::Error> {
    let mut buf = &bytes[..];
    let val = leb128::read::unsigned(&mut buf)? as usize;
    let leb128_bytes = bytes.len() - buf.len();
    Ok((val, leb128_bytes))
}

fn read_slice<T: Decodable + Debug>(
    bytes: &[u8],
    cursor: &mut Range<usize>,
) -> Result<T, decoding::Error> {
    let mut view = &bytes[cursor.clone()];
    let init_len = view.len();
    let val = T::decode::<&[u8]>(&mut view).ok_or(decoding::Error::NoDecodedValue);
    let bytes_read = init_len - view.len();
    *cursor = (cursor.start + bytes_read)..cursor.end;
    val
}

fn slice_bytes(bytes: &[u8], cursor: &mut Range<usize>) -> Result<Range<usize>, decoding::Error> {
    let (val, len) = read_leb128(&mut &bytes[cursor.clone()])?;
    let start = cursor.start + len;
    let end = start + val;
    *cursor = end..cursor.end;
    Ok(start..end)
}

fn increment_range(range: &mut Range<usize>, len: usize) {
    range.end += len;
    range.start += len;
}

fn increment_range_map(ranges: &mut HashMap<u32, Range<usize>>, len: usize) {
    for range in ranges.values_mut() {
        increment_range(range, len)
    }
}

fn decode_header(bytes: &[u8]) -> Result<(u8, ChangeHash, Range<usize>), decoding::Error> {
    let (chunktype, body) = decode_header_without_hash(bytes)?;

    let mut hasher = Sha256::new();
    hasher.input(&bytes[PREAMBLE_BYTES..]);
    let calculated_hash = hasher.result();

    let checksum = &bytes[4..8];
    if checksum != &calculated_hash[0..4] {
        return Err(decoding::Error::InvalidChecksum {
            found: checksum.try_into().unwrap(),
            calculated: calculated_hash[0..4].try_into().unwrap(),
        });
    }

    let hash = calculated_hash[..]
        .try_into()
        .map_err(InvalidChangeError::from)?;

    Ok((chunktype, hash, body))
}

fn decode_header_without_hash(bytes: &[u8]) -> Result<(u8, Range<usize>), decoding::Error> {
    if bytes.len() <= HEADER_BYTES {
        return Err(decoding::Error::NotEnoughBytes);
    }

    if bytes[0..4] != MAGIC_BYTES {
        return Err(decoding::Error::WrongMagicBytes);
    }

    let (val, len) = read_leb128(&mut &bytes[HEADER_BYTES..])?;
    let body = (HEADER_BYTES + len)..(HEADER_BYTES + len + val);
    if bytes.len() != body.end {
        return Err(decoding::Error::WrongByteLength {
            expected: body.end,
            found: bytes.len(),
        });
    }

    let chunktype = bytes[PREAMBLE_BYTES];

    Ok((chunktype, body))
}

fn decode_hashes(
    bytes: &[u8],
    cursor: &mut Range<usize>,
) -> Result<Vec<ChangeHash>, decoding::Error> {
    let num_hashes = read_slice(bytes, cursor)?;
    let mut hashes = Vec::with_capacity(num_hashes);
    for _ in 0..num_hashes {
        let hash = cursor.start..(cursor.start + HASH_BYTES);
        *cursor = hash.end..cursor.end;
        hashes.push(
            bytes
                .get(hash)
                .ok_or(decoding::Error::NotEnoughBytes)?
                .try_into()
                .map_err(InvalidChangeError::from)?,
        );
    }
    Ok(hashes)
}

fn decode_actors(
    bytes: &[u8],
    cursor: &mut Range<usize>,
    first: Option<ActorId>,
) -> Result<Vec<ActorId>, decoding::Error> {
    let num_actors: usize = read_slice(bytes, cursor)?;
    let mut actors = Vec::with_capacity(num_actors + 1);
    if let Some(actor) = first {
        actors.push(actor)
    }
    for _ in 0..num_actors {
        actors.push(ActorId::from(
            bytes
                .get(slice_bytes(bytes, cursor)?)
                .ok_or(decoding::Error::NotEnoughBytes)?,
        ));
    }
    Ok(actors)
}

fn decode_column_info(
    bytes: &[u8],
    cursor: &mut Range<usize>,
    allow_compressed_column: bool,
) -> Result<Vec<(u32, usize)>, decoding::Error> {
    let num_columns = read_slice(bytes, cursor)?;
    let mut columns: Vec<(u32, usize)> = Vec::with_capacity(num_columns);
    let mut last_id = 0;
    for _ in 0..num_columns {
        let id: u32 = read_slice(bytes, cursor)?;
        if (id & !COLUMN_TYPE_DEFLATE) <= (last_id & !COLUMN_TYPE_DEFLATE) {
            return Err(decoding::Error::ColumnsNotInAscendingOrder {
                last: last_id,
                found: id,
            });
        }
        if id & COLUMN_TYPE_DEFLATE != 0 && !allow_compressed_column {
            return Err(decoding::Error::ChangeContainedCompressedColumns);
        }
        last_id = id;
        let length = read_slice(bytes, cursor)?;
        columns.push((id, length));
    }
    // a value-len column must be immediately followed by its value-raw
    // column, otherwise grouped decoding cannot line the two up
    for (id, _) in &columns {
        if id & 0b111 == crate::columnar::COLUMN_TYPE_VALUE_LEN
            && !columns
                .iter()
                .any(|(other, _)| (other & !COLUMN_TYPE_DEFLATE) == (id & !COLUMN_TYPE_DEFLATE) + 1)
        {
            return Err(decoding::Error::ValueLenWithoutValueRaw);
        }
    }
    Ok(columns)
}

fn decode_columns(
    cursor: &mut Range<usize>,
    columns: &[(u32, usize)],
) -> HashMap<u32, Range<usize>> {
    let mut ops = HashMap::new();
    for (id, length) in columns {
        let start = cursor.start;
        let end = start + length;
        *cursor = end..cursor.end;
        ops.insert(*id, start..end);
    }
    ops
}

fn decode_change(bytes: Vec<u8>) -> Result<Change, decoding::Error> {
    let (chunktype, body) = decode_header_without_hash(&bytes)?;
    let bytes = if chunktype == BLOCK_TYPE_DEFLATE {
        decompress_chunk(0..PREAMBLE_BYTES, body, bytes)?
    } else {
        ChangeBytes::Uncompressed(bytes)
    };

    let (chunktype, hash, body) = decode_header(bytes.uncompressed())?;

    if chunktype != BLOCK_TYPE_CHANGE {
        return Err(decoding::Error::WrongType {
            expected_one_of: vec![BLOCK_TYPE_CHANGE],
            found: chunktype,
        });
    }

    let mut cursor = body;

    let actor =
        ActorId::from(&bytes.uncompressed()[slice_bytes(bytes.uncompressed(), &mut cursor)?]);
    let seq = read_slice(bytes.uncompressed(), &mut cursor)?;
    let start_op = read_slice(bytes.uncompressed(), &mut cursor)?;
    let time = read_slice(bytes.uncompressed(), &mut cursor)?;
    let message = slice_bytes(bytes.uncompressed(), &mut cursor)?;

    let deps = decode_hashes(bytes.uncompressed(), &mut cursor)?;
    let actors = decode_actors(bytes.uncompressed(), &mut cursor, Some(actor))?;

    let ops_info = decode_column_info(bytes.uncompressed(), &mut cursor, false)?;
    let ops = decode_columns(&mut cursor, &ops_info);

    Ok(Change {
        bytes,
        hash,
        seq,
        start_op,
        time,
        actors,
        message,
        deps,
        ops,
    })
}

fn decompress_chunk(
    preamble: Range<usize>,
    body: Range<usize>,
    compressed: Vec<u8>,
) -> Result<ChangeBytes, decoding::Error> {
    let mut decoder = DeflateDecoder::new(&compressed[body]);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    let mut result = Vec::with_capacity(decompressed.len() + preamble.len());
    result.extend(&compressed[preamble]);
    result.push(BLOCK_TYPE_CHANGE);
    leb128::write::unsigned::<Vec<u8>>(&mut result, decompressed.len() as u64).unwrap();
    result.extend(decompressed);
    Ok(ChangeBytes::Compressed {
        uncompressed: result,
        compressed,
    })
}

pub(crate) fn load_blocks(bytes: &[u8]) -> Result<Vec<Change>, decoding::Error> {
    let mut changes = Vec::new();
    for slice in split_blocks(bytes)? {
        changes.push(decode_change(slice.to_vec())?);
    }
    Ok(changes)
}

fn split_blocks(bytes: &[u8]) -> Result<Vec<&[u8]>, decoding::Error> {
    let mut blocks = Vec::new();
    let mut cursor = bytes;
    while let Some(block) = pop_block(cursor)? {
        blocks.push(&cursor[block.clone()]);
        if cursor.len() <= block.end {
            break;
        }
        cursor = &cursor[block.end..];
    }
    Ok(blocks)
}

fn pop_block(bytes: &[u8]) -> Result<Option<Range<usize>>, decoding::Error> {
    if bytes.len() < 4 || bytes[0..4] != MAGIC_BYTES {
        return Ok(None);
    }
    let (val, len) = read_leb128(
        &mut bytes
            .get(HEADER_BYTES..)
            .ok_or(decoding::Error::NotEnoughBytes)?,
    )?;
    // val comes off the wire so it could overflow
    let end = (HEADER_BYTES + len)
        .checked_add(val)
        .ok_or(decoding::Error::Overflow)?;
    if end > bytes.len() {
        return Err(decoding::Error::NotEnoughBytes);
    }
    Ok(Some(0..end))
}

pub(crate) struct DocumentContents {
    pub actors: Vec<ActorId>,
    pub heads: Vec<ChangeHash>,
    pub ops_data: Vec<u8>,
    pub ops_ranges: HashMap<u32, Range<usize>>,
    pub changes: Vec<Change>,
}

/// Parse a document chunk: actor table, heads, the merged columns, and
/// the raw bytes of every change in topological order.
#[instrument(level = "debug", skip(bytes))]
pub(crate) fn decode_document(bytes: &[u8]) -> Result<DocumentContents, decoding::Error> {
    let blocks = split_blocks(bytes)?;
    let (first, rest) = blocks
        .split_first()
        .ok_or(decoding::Error::NotEnoughBytes)?;

    let (chunktype, _hash, mut cursor) = decode_header(first)?;

    if chunktype != BLOCK_TYPE_DOC {
        return Err(decoding::Error::WrongType {
            expected_one_of: vec![BLOCK_TYPE_DOC],
            found: chunktype,
        });
    }

    let actors = decode_actors(first, &mut cursor, None)?;
    let heads = decode_hashes(first, &mut cursor)?;

    let ops_info = decode_column_info(first, &mut cursor, true)?;
    let data_start = cursor.start;
    let mut ops_ranges = decode_columns(&mut cursor, &ops_info);
    let ops_data = first
        .get(data_start..cursor.start)
        .ok_or(decoding::Error::NotEnoughBytes)?
        .to_vec();
    for range in ops_ranges.values_mut() {
        range.start -= data_start;
        range.end -= data_start;
    }

    let mut changes = Vec::new();
    for block in rest {
        changes.push(decode_change(block.to_vec())?);
    }

    // the heads recorded in the header must agree with the change graph
    // that follows it
    let mut calculated: HashSet<ChangeHash> = changes.iter().map(|c| c.hash).collect();
    for change in &changes {
        for dep in &change.deps {
            calculated.remove(dep);
        }
    }
    if calculated != heads.iter().copied().collect() {
        return Err(decoding::Error::MismatchedHeads);
    }

    Ok(DocumentContents {
        actors,
        heads,
        ops_data,
        ops_ranges,
        changes,
    })
}

/// Emit the document chunk for `save`: the actor table, the sorted heads,
/// the merged columns verbatim, and every change's raw bytes.
#[instrument(level = "debug", skip(ops_data, ops_ranges, changes))]
pub(crate) fn encode_document(
    actors: &[ActorId],
    heads: &[ChangeHash],
    ops_data: &[u8],
    ops_ranges: &HashMap<u32, Range<usize>>,
    changes: &[&Change],
) -> Result<Vec<u8>, encoding::Error> {
    let mut bytes: Vec<u8> = Vec::new();
    let mut hasher = Sha256::new();

    bytes.extend(&MAGIC_BYTES);
    bytes.extend(vec![0, 0, 0, 0]); // we dont know the hash yet so fill in a fake
    bytes.push(BLOCK_TYPE_DOC);

    let mut chunk = Vec::new();

    actors.len().encode(&mut chunk)?;
    for a in actors {
        a.to_bytes().encode(&mut chunk)?;
    }

    heads.len().encode(&mut chunk)?;
    for head in heads.iter() {
        chunk.write_all(&head.0)?;
    }

    let mut coldata: Vec<ColData> = ops_ranges
        .iter()
        .map(|(col, range)| ColData::new(*col, ops_data[range.clone()].to_vec()))
        .collect();
    for d in &mut coldata {
        if d.col & COLUMN_TYPE_DEFLATE == 0 {
            d.deflate();
        }
    }
    coldata.sort_by(|a, b| (a.col & !COLUMN_TYPE_DEFLATE).cmp(&(b.col & !COLUMN_TYPE_DEFLATE)));

    coldata
        .iter()
        .filter(|&d| !d.data.is_empty())
        .count()
        .encode(&mut chunk)?;
    for d in &coldata {
        d.encode_col_len(&mut chunk)?;
    }
    for d in &coldata {
        chunk.write_all(d.data.as_slice())?;
    }

    leb128::write::unsigned(&mut bytes, chunk.len() as u64).unwrap();
    bytes.extend(&chunk);

    hasher.input(&bytes[CHUNK_START..bytes.len()]);
    let hash_result = hasher.result();
    bytes.splice(HASH_RANGE, hash_result[0..4].iter().copied());

    for change in changes {
        bytes.extend(change.raw_bytes());
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::{convert::TryInto, str::FromStr};

    use protocol::{ObjectId, Op, OpId, OpType};

    use super::*;

    #[test]
    fn test_empty_change() {
        let change1 = protocol::Change {
            start_op: 1,
            seq: 2,
            time: 1234,
            message: None,
            hash: None,
            actor_id: ActorId::from_str("deadbeefdeadbeef").unwrap(),
            deps: vec![],
            operations: vec![],
        };
        let bin1: Change = change1.clone().into();
        let change2 = bin1.decode();
        let bin2 = Change::from(change2.clone());
        assert_eq!(bin1, bin2);
        assert_eq!(change1.operations, change2.operations);
        assert_eq!(change2.hash, Some(bin1.hash));
    }

    #[test]
    fn test_complex_change() {
        let actor1 = ActorId::from_str("deadbeefdeadbeef").unwrap();
        let actor2 = ActorId::from_str("feeddefaff").unwrap();
        let actor3 = ActorId::from_str("00101010fafafafa").unwrap();
        let opid1 = OpId::new(102, &actor1);
        let opid2 = OpId::new(391, &actor1);
        let opid3 = OpId::new(299, &actor2);
        let opid4 = OpId::new(762, &actor3);
        let opid5 = OpId::new(100_203, &actor2);
        let obj1 = ObjectId::Id(opid1.clone());
        let obj2 = ObjectId::Root;
        let obj3 = ObjectId::Id(opid4.clone());
        let key1 = protocol::Key::Map("field1".into());
        let key2 = protocol::Key::Map("field2".into());
        let key3 = protocol::Key::Map("field3".into());
        let head = protocol::Key::head();
        let keyseq1 = protocol::Key::from(&opid1);
        let keyseq2 = protocol::Key::from(&opid2);
        let insert = false;
        let change1 = protocol::Change {
            start_op: 123,
            seq: 29291,
            time: 12_341_231,
            message: Some("This is my message".into()),
            hash: None,
            actor_id: actor1,
            deps: vec![],
            operations: vec![
                Op {
                    action: OpType::Set(protocol::ScalarValue::F64(10.0)),
                    key: key1,
                    obj: obj1.clone(),
                    insert,
                    pred: vec![opid1.clone(), opid2.clone()].into(),
                },
                Op {
                    action: OpType::Set(protocol::ScalarValue::Counter(-11)),
                    key: key2.clone(),
                    obj: obj1.clone(),
                    insert,
                    pred: vec![opid1.clone(), opid2.clone()].into(),
                },
                Op {
                    action: OpType::Set(protocol::ScalarValue::Timestamp(20)),
                    key: key3,
                    obj: obj1,
                    insert,
                    pred: vec![opid1.clone(), opid2].into(),
                },
                Op {
                    action: OpType::Set(protocol::ScalarValue::Str("some value".into())),
                    key: key2.clone(),
                    obj: obj2.clone(),
                    insert,
                    pred: vec![opid3.clone(), opid4.clone()].into(),
                },
                Op {
                    action: OpType::Make(protocol::ObjType::Map),
                    key: key2.clone(),
                    obj: obj2.clone(),
                    insert,
                    pred: vec![opid3.clone(), opid4.clone()].into(),
                },
                Op {
                    action: OpType::Set(protocol::ScalarValue::Str("val1".into())),
                    key: head.clone(),
                    obj: obj3.clone(),
                    insert: true,
                    pred: vec![opid3, opid4.clone()].into(),
                },
                Op {
                    action: OpType::Set(protocol::ScalarValue::Str("val2".into())),
                    key: head,
                    obj: obj3.clone(),
                    insert: true,
                    pred: vec![opid4.clone(), opid5.clone()].into(),
                },
                Op {
                    action: OpType::Inc(10),
                    key: key2,
                    obj: obj2,
                    insert,
                    pred: vec![opid1.clone(), opid5.clone()].into(),
                },
                Op {
                    action: OpType::Del,
                    obj: obj3.clone(),
                    key: keyseq1,
                    insert: true,
                    pred: vec![opid4.clone(), opid5.clone()].into(),
                },
                Op {
                    action: OpType::Del,
                    obj: obj3,
                    key: keyseq2,
                    insert: true,
                    pred: vec![opid4, opid5].into(),
                },
            ],
        };
        let bin1 = Change::from(change1.clone());
        let change2 = bin1.decode();
        let bin2 = Change::from(change2.clone());
        assert_eq!(change1.operations, change2.operations);
        assert_eq!(bin1, bin2);
    }

    #[test]
    fn test_invalid_checksum_rejected() {
        let change = protocol::Change {
            operations: Vec::new(),
            actor_id: ActorId::from_str("deadbeef").unwrap(),
            hash: None,
            seq: 1,
            start_op: 1,
            time: 0,
            message: None,
            deps: Vec::new(),
        };
        let bin: Change = change.into();
        let mut bytes = bin.raw_bytes().to_vec();
        bytes[4] ^= 1;
        let result = Change::from_bytes(bytes);
        assert!(matches!(
            result,
            Err(decoding::Error::InvalidChecksum { .. })
        ));
    }

    #[test]
    fn test_change_deps_sorted() {
        let mut h1 = ChangeHash([7; 32]);
        let mut h2 = ChangeHash([3; 32]);
        h1.0[0] = 9;
        h2.0[0] = 1;
        let change = protocol::Change {
            operations: Vec::new(),
            actor_id: ActorId::from_str("deadbeef").unwrap(),
            hash: None,
            seq: 1,
            start_op: 1,
            time: 0,
            message: None,
            deps: vec![h1, h2],
        };
        let bin: Change = change.into();
        let decoded: Change = bin.raw_bytes().try_into().unwrap();
        assert_eq!(decoded.deps, vec![h2, h1]);
    }
}
