//! LZ4 block format codec.
//!
//! Implements the block format described in
//! <https://github.com/lz4/lz4/blob/dev/doc/lz4_Block_format.md> on plain
//! slices. The match-finder hash table lives in caller-provided scratch so a
//! batched launch can hand every group its own region of one temp buffer.

use super::ChunkCodec;
use crate::{Error, Result};

const HASH_LOG: usize = 14;
const HASH_SIZE: usize = 1 << HASH_LOG;

/// Scratch bytes per chunk: one `u32` position per hash slot.
pub const HASH_TABLE_BYTES: usize = HASH_SIZE * 4;

const MIN_MATCH: usize = 4;
const LAST_LITERALS: usize = 5;
const MF_LIMIT: usize = 12;
const MAX_DISTANCE: usize = 65_535;
const RUN_MASK: usize = 15;

/// Acceleration factor for faster skipping over incompressible data.
const SKIP_TRIGGER: usize = 6;

/// Worst-case compressed size of `len` input bytes.
#[inline]
#[must_use]
pub const fn compress_bound(len: usize) -> usize {
    len + len / 255 + 16
}

/// LZ4 block codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl ChunkCodec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn max_output_chunk_size(&self, chunk_size: usize) -> usize {
        compress_bound(chunk_size)
    }

    fn temp_bytes_per_chunk(&self, _chunk_size: usize) -> usize {
        HASH_TABLE_BYTES
    }

    fn compress_chunk(&self, input: &[u8], output: &mut [u8], scratch: &mut [u8]) -> Result<usize> {
        let bound = compress_bound(input.len());
        if output.len() < bound {
            return Err(Error::BufferTooSmall { needed: bound, available: output.len() });
        }
        if scratch.len() < HASH_TABLE_BYTES {
            return Err(Error::BufferTooSmall { needed: HASH_TABLE_BYTES, available: scratch.len() });
        }
        if input.is_empty() {
            return Ok(0);
        }

        let mut sink = Sink { buf: output, pos: 0 };
        let table = HashTable { bytes: &mut scratch[..HASH_TABLE_BYTES] };
        compress_block(input, &mut sink, table)?;
        Ok(sink.pos)
    }

    fn decompress_chunk(&self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        decompress_block(input, output)
    }
}

/// Match-finder table stored as little-endian `u32` positions.
struct HashTable<'a> {
    bytes: &'a mut [u8],
}

impl HashTable<'_> {
    /// Knuth multiplicative hash.
    #[inline(always)]
    fn hash(sequence: u32) -> usize {
        (sequence.wrapping_mul(2_654_435_761) >> (32 - HASH_LOG)) as usize
    }

    #[inline(always)]
    fn get(&self, hash: usize) -> usize {
        let at = hash * 4;
        read_u32(self.bytes, at) as usize
    }

    #[inline(always)]
    fn set(&mut self, hash: usize, pos: usize) {
        let at = hash * 4;
        self.bytes[at..at + 4].copy_from_slice(&(pos as u32).to_le_bytes());
    }
}

#[inline(always)]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

/// Bounds-checked output cursor.
struct Sink<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Sink<'_> {
    #[inline(always)]
    fn push(&mut self, byte: u8) -> Result<()> {
        let available = self.buf.len();
        let slot = self
            .buf
            .get_mut(self.pos)
            .ok_or(Error::BufferTooSmall { needed: self.pos + 1, available })?;
        *slot = byte;
        self.pos += 1;
        Ok(())
    }

    #[inline(always)]
    fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(Error::BufferTooSmall { needed: end, available: self.buf.len() });
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// Variable-length continuation of a 4-bit length field.
    fn length(&mut self, mut len: usize) -> Result<()> {
        while len >= 255 {
            self.push(255)?;
            len -= 255;
        }
        self.push(len as u8)
    }
}

/// Count matching bytes of `input[a..]` and `input[b..limit]`, 8 at a time.
#[inline(always)]
fn count_match(input: &[u8], mut a: usize, mut b: usize, limit: usize) -> usize {
    let start = b;
    while b + 8 <= limit {
        let diff = read_u64(input, a) ^ read_u64(input, b);
        if diff != 0 {
            return (b - start) + (diff.trailing_zeros() as usize >> 3);
        }
        a += 8;
        b += 8;
    }
    while b < limit && input[a] == input[b] {
        a += 1;
        b += 1;
    }
    b - start
}

#[inline(always)]
fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn compress_block(input: &[u8], sink: &mut Sink<'_>, mut table: HashTable<'_>) -> Result<()> {
    let len = input.len();
    if len < MF_LIMIT {
        return emit_last_literals(sink, input);
    }

    table.bytes.fill(0);
    let match_limit = len - LAST_LITERALS;
    let mf_limit = len - MF_LIMIT;
    let mut anchor = 0;
    let mut ip = 1;

    loop {
        let mut acceleration = 1usize;
        let mut candidate;

        // Find a match
        loop {
            let step = acceleration >> SKIP_TRIGGER;
            let next = ip + step + 1;
            if next > mf_limit {
                return emit_last_literals(sink, &input[anchor..]);
            }

            let sequence = read_u32(input, ip);
            let hash = HashTable::hash(sequence);
            candidate = table.get(hash);
            table.set(hash, ip);

            if candidate < ip
                && ip - candidate <= MAX_DISTANCE
                && read_u32(input, candidate) == sequence
            {
                break;
            }
            ip = next;
            acceleration += 1;
        }

        // Extend backward
        while ip > anchor && candidate > 0 && input[ip - 1] == input[candidate - 1] {
            ip -= 1;
            candidate -= 1;
        }

        let literal_len = ip - anchor;
        let token_at = sink.pos;
        sink.push(0)?;
        if literal_len >= RUN_MASK {
            sink.length(literal_len - RUN_MASK)?;
        }
        sink.extend(&input[anchor..ip])?;

        let offset = (ip - candidate) as u16;
        sink.extend(&offset.to_le_bytes())?;

        ip += MIN_MATCH;
        let match_len = count_match(input, candidate + MIN_MATCH, ip, match_limit);
        ip += match_len;

        sink.buf[token_at] = ((literal_len.min(RUN_MASK) as u8) << 4) | match_len.min(RUN_MASK) as u8;
        if match_len >= RUN_MASK {
            sink.length(match_len - RUN_MASK)?;
        }

        anchor = ip;
        if ip < mf_limit {
            table.set(HashTable::hash(read_u32(input, ip - 2)), ip - 2);
        }
    }
}

fn emit_last_literals(sink: &mut Sink<'_>, literals: &[u8]) -> Result<()> {
    let len = literals.len();
    sink.push((len.min(RUN_MASK) as u8) << 4)?;
    if len >= RUN_MASK {
        sink.length(len - RUN_MASK)?;
    }
    sink.extend(literals)
}

fn corrupted(what: &str) -> Error {
    Error::CorruptedData(format!("lz4: {what}"))
}

fn read_length(input: &[u8], ip: &mut usize) -> Result<usize> {
    let mut len = 0usize;
    loop {
        let byte = *input.get(*ip).ok_or_else(|| corrupted("truncated length"))?;
        *ip += 1;
        len += byte as usize;
        if byte != 255 {
            return Ok(len);
        }
    }
}

fn decompress_block(input: &[u8], output: &mut [u8]) -> Result<usize> {
    if input.is_empty() {
        return Ok(0);
    }

    let mut ip = 0;
    let mut op = 0;
    loop {
        let token = *input.get(ip).ok_or_else(|| corrupted("unexpected end of input"))?;
        ip += 1;

        let mut literal_len = (token >> 4) as usize;
        if literal_len == RUN_MASK {
            literal_len += read_length(input, &mut ip)?;
        }
        if literal_len > 0 {
            let lit_end = ip + literal_len;
            if lit_end > input.len() {
                return Err(corrupted("literal run extends past input"));
            }
            if op + literal_len > output.len() {
                return Err(Error::BufferTooSmall {
                    needed: op + literal_len,
                    available: output.len(),
                });
            }
            output[op..op + literal_len].copy_from_slice(&input[ip..lit_end]);
            ip = lit_end;
            op += literal_len;
        }

        // The last sequence carries literals only
        if ip == input.len() {
            break;
        }

        if ip + 2 > input.len() {
            return Err(corrupted("truncated match offset"));
        }
        let offset = u16::from_le_bytes([input[ip], input[ip + 1]]) as usize;
        ip += 2;
        if offset == 0 {
            return Err(corrupted("zero match offset"));
        }
        if offset > op {
            return Err(Error::CorruptedData(format!(
                "lz4: offset {offset} exceeds output position {op}"
            )));
        }

        let mut match_len = (token & 0x0F) as usize;
        if match_len == RUN_MASK {
            match_len += read_length(input, &mut ip)?;
        }
        match_len += MIN_MATCH;
        if op + match_len > output.len() {
            return Err(Error::BufferTooSmall { needed: op + match_len, available: output.len() });
        }

        let from = op - offset;
        if offset >= match_len {
            output.copy_within(from..from + match_len, op);
        } else {
            // Overlapping match repeats the last `offset` bytes
            for k in 0..match_len {
                output[op + k] = output[from + k];
            }
        }
        op += match_len;
    }

    Ok(op)
}
