// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Cursor;

use bytes::Buf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadBitsError {
    #[error("requested {requested} bits but only {remaining} remain")]
    OutOfRange { requested: usize, remaining: u64 },
    #[error("more than 32 ({0}) bits were requested")]
    TooManyBitsRequested(usize),
    #[error("byte-aligned read attempted at bit position {0}")]
    Unaligned(u64),
}

pub type ReadBitsResult<T> = std::result::Result<T, ReadBitsError>;

/// A bit reader over a borrowed byte buffer. Bits are consumed most
/// significant first, and the position only ever moves forward.
///
/// A failed read leaves the position untouched.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// How many bits have been read so far.
    position: u64,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read a single bit from the stream.
    pub fn read_bit(&mut self) -> ReadBitsResult<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Read up to 32 bits from the stream.
    pub fn read_bits(&mut self, num_bits: usize) -> ReadBitsResult<u32> {
        if num_bits > 32 {
            return Err(ReadBitsError::TooManyBitsRequested(num_bits));
        }

        let remaining = self.num_bits_left();
        if remaining < num_bits as u64 {
            return Err(ReadBitsError::OutOfRange {
                requested: num_bits,
                remaining,
            });
        }

        let mut out = 0u64;
        let mut bits_left = num_bits;

        while bits_left > 0 {
            let byte = self.data[(self.position / 8) as usize];
            let available = 8 - (self.position % 8) as usize;
            let take = std::cmp::min(available, bits_left);
            let mask = ((1u16 << take) - 1) as u8;
            let chunk = (byte >> (available - take)) & mask;

            out = (out << take) | u64::from(chunk);
            bits_left -= take;
            self.position += take as u64;
        }

        Ok(out as u32)
    }

    /// Reads a two's complement signed integer of length `num_bits`.
    pub fn read_bits_signed(&mut self, num_bits: usize) -> ReadBitsResult<i32> {
        if num_bits == 0 {
            return Ok(0);
        }

        let value = i64::from(self.read_bits(num_bits)?);
        let sign_mask = 1i64 << (num_bits - 1);
        let value = if value & sign_mask != 0 {
            value - 2 * sign_mask
        } else {
            value
        };

        Ok(value as i32)
    }

    /// Reads an unsigned integer from the stream and checks that the read
    /// starts on a byte boundary.
    pub fn read_bits_aligned(&mut self, num_bits: usize) -> ReadBitsResult<u32> {
        if !self.is_aligned() {
            return Err(ReadBitsError::Unaligned(self.position));
        }

        self.read_bits(num_bits)
    }

    /// Skip `num_bits` bits from the stream.
    pub fn skip_bits(&mut self, num_bits: u64) -> ReadBitsResult<()> {
        let remaining = self.num_bits_left();
        if remaining < num_bits {
            return Err(ReadBitsError::OutOfRange {
                requested: num_bits as usize,
                remaining,
            });
        }

        self.position += num_bits;
        Ok(())
    }

    /// Returns the amount of bits left in the stream
    pub fn num_bits_left(&self) -> u64 {
        self.data.len() as u64 * 8 - self.position
    }

    pub fn is_aligned(&self) -> bool {
        self.position % 8 == 0
    }

    /// Return the position of this bitstream in bits.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The whole buffer backing this reader.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// Iterator over IVF packets.
pub struct IvfIterator<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> IvfIterator<'a> {
    const FILE_HEADER_SIZE: u64 = 32;
    const FRAME_HEADER_SIZE: usize = 12;

    pub fn new(data: &'a [u8]) -> Self {
        let mut cursor = Cursor::new(data);

        // Skip the IVF header entirely.
        cursor.set_position(Self::FILE_HEADER_SIZE);

        Self { cursor }
    }
}

impl<'a> Iterator for IvfIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        // Make sure we have a header.
        if self.cursor.remaining() < Self::FRAME_HEADER_SIZE {
            return None;
        }

        let len = self.cursor.get_u32_le() as usize;
        // Skip PTS.
        let _ = self.cursor.get_u64_le();

        if self.cursor.remaining() < len {
            return None;
        }

        let start = self.cursor.position() as usize;
        self.cursor.advance(len);
        let end = self.cursor.position() as usize;

        Some(&self.cursor.get_ref()[start..end])
    }
}

/// Writes bitstreams for tests. Only the AV1 descriptors the parser tests
/// need are implemented.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct BitWriter {
    out: Vec<u8>,
    nth_bit: u8,
    curr_byte: u8,
}

#[cfg(test)]
impl BitWriter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Writes fixed bit size integer (up to 32 bit). Corresponds to `f(n)`.
    pub fn write_f(&mut self, bits: usize, value: u32) -> &mut Self {
        assert!(bits <= 32);

        for bit in (0..bits).rev() {
            self.write_bit((u64::from(value) >> bit) & 1 == 1);
        }

        self
    }

    pub fn write_bit(&mut self, bit: bool) -> &mut Self {
        self.curr_byte |= (bit as u8) << (7u8 - self.nth_bit);
        self.nth_bit += 1;

        if self.nth_bit == 8 {
            self.out.push(self.curr_byte);
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        self
    }

    /// Corresponds to `su(bits)`.
    pub fn write_su(&mut self, bits: usize, value: i32) -> &mut Self {
        let mask = ((1u64 << bits) - 1) as u32;
        self.write_f(bits, (value as u32) & mask)
    }

    /// Corresponds to `uvlc()`.
    pub fn write_uvlc(&mut self, value: u32) -> &mut Self {
        if value == u32::MAX {
            self.write_f(32, 0);
            return self.write_bit(true);
        }

        let value = value + 1;
        let num_bits = (32 - value.leading_zeros()) as usize;
        self.write_f(num_bits - 1, 0);
        self.write_f(num_bits, value)
    }

    /// Corresponds to `leb128()`. Must be called on a byte boundary.
    pub fn write_leb128(&mut self, mut value: u32) -> &mut Self {
        assert!(self.nth_bit == 0);
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.write_f(8, u32::from(byte));
                return self;
            }
            self.write_f(8, u32::from(byte | 0x80));
        }
    }

    /// Corresponds to `trailing_bits()` up to the next byte boundary.
    pub fn write_trailing_bits(&mut self) -> &mut Self {
        self.write_bit(true);
        while self.nth_bit != 0 {
            self.write_bit(false);
        }

        self
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn byte_align(&mut self) -> &mut Self {
        while self.nth_bit != 0 {
            self.write_bit(false);
        }

        self
    }

    pub fn bits_written(&self) -> usize {
        self.out.len() * 8 + self.nth_bit as usize
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.byte_align();
        std::mem::take(&mut self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_bits_across_bytes() {
        const DATA: [u8; 6] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xa0];

        let mut reader = BitReader::new(&DATA);
        assert_eq!(reader.read_bits(1).unwrap(), 0);
        assert_eq!(reader.num_bits_left(), 47);

        assert_eq!(reader.read_bits(8).unwrap(), 0x02);
        assert_eq!(reader.num_bits_left(), 39);

        assert_eq!(reader.read_bits(31).unwrap(), 0x23456789);
        assert_eq!(reader.num_bits_left(), 8);

        assert!(reader.read_bit().unwrap());
        assert!(!reader.read_bit().unwrap());
        assert_eq!(reader.num_bits_left(), 6);
        assert_eq!(reader.position(), 42);
    }

    #[test]
    fn read_full_32_bits() {
        let mut reader = BitReader::new(&[0xde, 0xad, 0xbe, 0xef, 0x80]);
        assert_eq!(reader.read_bits(32).unwrap(), 0xdeadbeef);
        assert!(reader.read_bit().unwrap());
        assert_eq!(
            reader.read_bits(33),
            Err(ReadBitsError::TooManyBitsRequested(33))
        );
    }

    #[test]
    fn read_past_end_is_out_of_range() {
        let mut reader = BitReader::new(&[0xff]);
        assert_eq!(reader.read_bits(8).unwrap(), 0xff);
        assert_eq!(
            reader.read_bits(1),
            Err(ReadBitsError::OutOfRange {
                requested: 1,
                remaining: 0
            })
        );

        let mut reader = BitReader::new(&[0xff]);
        reader.read_bits(3).unwrap();
        assert!(reader.read_bits(6).is_err());
        // A failed read does not move the cursor.
        assert_eq!(reader.position(), 3);
        assert_eq!(reader.read_bits(5).unwrap(), 0x1f);
        assert_eq!(reader.num_bits_left(), 0);
    }

    #[test]
    fn read_exactly_remaining_bits() {
        let mut reader = BitReader::new(&[0b1010_0101, 0b1100_0011]);
        reader.read_bits(5).unwrap();
        assert_eq!(reader.read_bits(11).unwrap(), 0b101_1100_0011);
        assert_eq!(reader.num_bits_left(), 0);
        assert_eq!(reader.position(), 16);
    }

    #[test]
    fn read_signed_bits() {
        let mut reader = BitReader::new(&[0b1111_0000]);
        assert_eq!(reader.read_bits_signed(4).unwrap(), -1);
        assert_eq!(reader.read_bits_signed(4).unwrap(), 0);

        let mut reader = BitReader::new(&[0b0111_1000]);
        assert_eq!(reader.read_bits_signed(5).unwrap(), 15);
    }

    #[test]
    fn aligned_reads() {
        let mut reader = BitReader::new(&[0xaa, 0x55]);
        reader.read_bit().unwrap();
        assert_eq!(reader.read_bits_aligned(8), Err(ReadBitsError::Unaligned(1)));
        reader.skip_bits(7).unwrap();
        assert_eq!(reader.read_bits_aligned(8).unwrap(), 0x55);
        assert!(reader.skip_bits(1).is_err());
    }

    #[test]
    fn ivf_packets() {
        let mut data = vec![0u8; 32];
        data[..4].copy_from_slice(b"DKIF");
        for payload in [&[0x12u8, 0x00][..], &[0x0a, 0x01, 0x80][..]] {
            data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            data.extend_from_slice(&0u64.to_le_bytes());
            data.extend_from_slice(payload);
        }
        // A truncated frame header at the end is ignored.
        data.extend_from_slice(&[0x05, 0x00]);

        let packets: Vec<_> = IvfIterator::new(&data).collect();
        assert_eq!(packets, vec![&[0x12u8, 0x00][..], &[0x0a, 0x01, 0x80][..]]);
    }

    #[test]
    fn bitwriter_descriptors() {
        let mut writer = BitWriter::new();
        writer.write_f(3, 0b101).write_bit(true).write_su(4, -2);
        assert_eq!(writer.bits_written(), 8);
        writer.write_leb128(300).write_uvlc(4).write_trailing_bits();

        // uvlc(4): 00 101, then trailing 1 and padding.
        assert_eq!(
            writer.into_bytes(),
            vec![0b1011_1110, 0xac, 0x02, 0b0010_1100]
        );
    }
}
