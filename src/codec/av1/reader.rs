// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::ops::Deref;
use std::ops::DerefMut;

use crate::bitstream_utils::BitReader;
use crate::bitstream_utils::ReadBitsError;
use crate::codec::av1::error::ParseError;
use crate::codec::av1::error::ParseResult;
use crate::codec::av1::helpers;
use crate::trace::FieldValue;
use crate::trace::SyntaxTrace;

/// uvlc() codes with more leading zeros than this are malformed. See 4.10.3.
pub const MAX_UVLC_LEADING_ZEROS: u32 = 32;
/// leb128() codes may not be longer than this. See 4.10.5.
pub const MAX_LEB128_BYTES: usize = 8;

/// A `BitReader` that records every syntax element it reads into a
/// [`SyntaxTrace`]. All reads are named after the AV1 syntax element they
/// implement.
pub struct Reader<'a> {
    bits: BitReader<'a>,
    trace: SyntaxTrace,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], trace: SyntaxTrace) -> Self {
        Self {
            bits: BitReader::new(data),
            trace,
        }
    }

    /// A reader that records nothing besides the scope stack.
    pub fn untraced(data: &'a [u8]) -> Self {
        Self::new(data, SyntaxTrace::disabled())
    }

    pub fn into_trace(self) -> SyntaxTrace {
        self.trace
    }

    pub fn trace(&self) -> &SyntaxTrace {
        &self.trace
    }

    /// Current position in bits.
    pub fn position(&self) -> u64 {
        self.bits.position()
    }

    pub fn remaining_bits(&self) -> u64 {
        self.bits.num_bits_left()
    }

    pub fn is_aligned(&self) -> bool {
        self.bits.is_aligned()
    }

    /// Whole bytes consumed since `start_pos`, a byte offset.
    pub(crate) fn consumed(&self, start_pos: u32) -> u32 {
        (self.bits.position() / 8) as u32 - start_pos
    }

    /// Opens a scope named `name`. The scope is closed when the returned
    /// guard is dropped.
    pub fn sub_level(&mut self, name: &str) -> SubLevel<'_, 'a> {
        let position = self.bits.position();
        self.trace.open_scope(name, position);
        SubLevel { reader: self }
    }

    fn fail(&self, element: &str, err: ReadBitsError) -> ParseError {
        let scope = self.trace.scope_path();
        let element = element.to_string();

        match err {
            ReadBitsError::OutOfRange {
                requested,
                remaining,
            } => ParseError::OutOfRange {
                scope,
                element,
                requested,
                remaining,
            },
            ReadBitsError::TooManyBitsRequested(n) => ParseError::ValueOutOfSpecRange {
                scope,
                element,
                value: n as i64,
            },
            ReadBitsError::Unaligned(position) => ParseError::Unaligned {
                scope,
                element,
                position,
            },
        }
    }

    /// Builds a `ValueOutOfSpecRange` error for `element` in the current
    /// scope.
    pub fn out_of_spec(&self, element: &str, value: impl Into<i64>) -> ParseError {
        ParseError::ValueOutOfSpecRange {
            scope: self.trace.scope_path(),
            element: element.to_string(),
            value: value.into(),
        }
    }

    /// Builds a `MissingContext` error for the current scope.
    pub fn missing(&self, what: &str) -> ParseError {
        ParseError::MissingContext {
            scope: self.trace.scope_path(),
            what: what.to_string(),
        }
    }

    /// Builds a `BitstreamTruncated` error: `declared` bytes are needed but
    /// only `available` are left.
    pub fn truncated(&self, declared: u64, available: u64) -> ParseError {
        ParseError::BitstreamTruncated {
            scope: self.trace.scope_path(),
            declared,
            available,
        }
    }

    /// Builds an `Unaligned` error for `element` at the current position.
    pub fn unaligned(&self, element: &str) -> ParseError {
        self.fail(element, ReadBitsError::Unaligned(self.bits.position()))
    }

    fn malformed(&self, element: &str) -> ParseError {
        ParseError::MalformedVarint {
            scope: self.trace.scope_path(),
            element: element.to_string(),
        }
    }

    fn record(&mut self, name: &str, value: FieldValue, start: u64) {
        let end = self.bits.position();
        self.trace.record(name, value, start..end);
    }

    /// Reads `num_bits` without recording them.
    fn raw_bits(&mut self, name: &str, num_bits: usize) -> ParseResult<u32> {
        self.bits
            .read_bits(num_bits)
            .map_err(|err| self.fail(name, err))
    }

    /// Records a value that was computed rather than read, e.g. FrameWidth.
    pub fn derived(&mut self, name: &str, value: impl Into<FieldValue>) {
        let position = self.bits.position();
        self.trace.record(name, value.into(), position..position);
    }

    /// Attaches a human readable meaning to the last recorded element.
    pub fn annotate(&mut self, meaning: impl fmt::Display) {
        if self.trace.is_enabled() {
            self.trace.annotate_last(meaning.to_string());
        }
    }

    /// Implements f(n): unsigned n-bit number appearing directly in the
    /// bitstream. See 4.10.2
    pub fn read_bits(&mut self, name: &str, num_bits: usize) -> ParseResult<u32> {
        let start = self.bits.position();
        let value = self.raw_bits(name, num_bits)?;
        self.record(name, value.into(), start);
        Ok(value)
    }

    /// Implements f(1).
    pub fn read_flag(&mut self, name: &str) -> ParseResult<bool> {
        let start = self.bits.position();
        let value = self.raw_bits(name, 1)? != 0;
        self.record(name, value.into(), start);
        Ok(value)
    }

    /// Reads an f(n) element and converts it into one of the closed AV1
    /// enumerations. Unknown values are `ValueOutOfSpecRange`.
    pub fn read_enum<T: fmt::Debug>(
        &mut self,
        name: &str,
        num_bits: usize,
        from: impl FnOnce(u32) -> Option<T>,
    ) -> ParseResult<T> {
        let value = self.read_bits(name, num_bits)?;
        let converted = from(value).ok_or_else(|| self.out_of_spec(name, value))?;
        self.annotate(format_args!("{:?}", converted));
        Ok(converted)
    }

    /// Implements uvlc(): Variable length unsigned n-bit number appearing
    /// directly in the bitstream. See 4.10.3
    pub fn read_uvlc(&mut self, name: &str) -> ParseResult<u32> {
        let start = self.bits.position();
        let mut leading_zeros = 0;

        loop {
            let done = self.raw_bits(name, 1)? != 0;
            if done {
                break;
            }

            leading_zeros += 1;
            if leading_zeros > MAX_UVLC_LEADING_ZEROS {
                return Err(self.malformed(name));
            }
        }

        let value = if leading_zeros >= 32 {
            u32::MAX
        } else {
            let value = self.raw_bits(name, leading_zeros as usize)?;
            value + ((1u64 << leading_zeros) - 1) as u32
        };

        self.record(name, value.into(), start);
        Ok(value)
    }

    /// Implements leb128(): Unsigned integer represented by a variable number
    /// of little-endian bytes. See 4.10.5
    pub fn read_leb128(&mut self, name: &str) -> ParseResult<u32> {
        let start = self.bits.position();
        let mut value = 0u64;
        let mut terminated = false;

        for i in 0..MAX_LEB128_BYTES {
            let byte = u64::from(
                self.bits
                    .read_bits_aligned(8)
                    .map_err(|err| self.fail(name, err))?,
            );
            value |= (byte & 0x7f) << (i * 7);

            if byte & 0x80 == 0 {
                terminated = true;
                break;
            }
        }

        if !terminated {
            return Err(self.malformed(name));
        }

        let value = u32::try_from(value).map_err(|_| self.out_of_spec(name, value as i64))?;
        self.record(name, value.into(), start);
        Ok(value)
    }

    /// Implements le(n): unsigned little-endian n-byte number appearing
    /// directly in the bitstream. See 4.10.4
    pub fn read_le(&mut self, name: &str, num_bytes: usize) -> ParseResult<u32> {
        let start = self.bits.position();
        let mut value = 0u64;

        for i in 0..num_bytes {
            let byte = self
                .bits
                .read_bits_aligned(8)
                .map_err(|err| self.fail(name, err))?;
            value |= u64::from(byte) << (i * 8);
        }

        let value = u32::try_from(value).map_err(|_| self.out_of_spec(name, value as i64))?;
        self.record(name, value.into(), start);
        Ok(value)
    }

    /// Implements su(n): Signed integer converted from an n bits unsigned
    /// integer in the bitstream. (The unsigned integer corresponds to the
    /// bottom n bits of the signed integer.). See 4.10.6
    pub fn read_su(&mut self, name: &str, num_bits: usize) -> ParseResult<i32> {
        if num_bits == 0 {
            return Err(self.out_of_spec(name, 0));
        }

        let start = self.bits.position();
        let value = self
            .bits
            .read_bits_signed(num_bits)
            .map_err(|err| self.fail(name, err))?;
        self.record(name, value.into(), start);
        Ok(value)
    }

    fn raw_ns(&mut self, name: &str, n: u32) -> ParseResult<u32> {
        if n == 0 {
            return Err(self.out_of_spec(name, 0));
        }

        let w = helpers::floor_log2(n) + 1;
        let m = ((1u64 << w) - u64::from(n)) as u32;
        let v = self.raw_bits(name, w as usize - 1)?;

        if v < m {
            return Ok(v);
        }

        let extra_bit = self.raw_bits(name, 1)?;
        Ok((v << 1) - m + extra_bit)
    }

    /// Implements ns(n): Unsigned encoded integer with maximum number of values
    /// n (i.e. output in range 0..n-1). See 4.10.7
    pub fn read_ns(&mut self, name: &str, n: u32) -> ParseResult<u32> {
        let start = self.bits.position();
        let value = self.raw_ns(name, n)?;
        self.record(name, value.into(), start);
        Ok(value)
    }

    /// Implements read_delta_q() from 5.9.13.
    pub fn read_delta_q(&mut self, name: &str) -> ParseResult<i32> {
        let mut r = self.sub_level(name);
        let delta_coded = r.read_flag("delta_coded")?;

        if delta_coded {
            r.read_su("delta_q", 7)
        } else {
            Ok(0)
        }
    }

    /// Implements 5.3.4. `num_bits` is the number of bits left in the OBU
    /// payload.
    pub fn read_trailing_bits(&mut self, mut num_bits: u64) -> ParseResult<()> {
        let trailing_one_bit = self.raw_bits("trailing_one_bit", 1)?;
        num_bits = num_bits.saturating_sub(1);

        if trailing_one_bit != 1 {
            return Err(self.out_of_spec("trailing_one_bit", 0));
        }

        while num_bits > 0 {
            let trailing_zero_bit = self.raw_bits("trailing_zero_bit", 1)?;
            if trailing_zero_bit != 0 {
                return Err(self.out_of_spec("trailing_zero_bit", 1));
            }
            num_bits -= 1;
        }

        Ok(())
    }

    /// Implements 5.3.5 Byte alignment syntax
    pub fn byte_alignment(&mut self) -> ParseResult<()> {
        while !self.bits.is_aligned() {
            let zero_bit = self.raw_bits("zero_bit", 1)?;
            if zero_bit != 0 {
                return Err(self.out_of_spec("zero_bit", 1));
            }
        }

        Ok(())
    }

    /// Skips `num_bytes` of data that is not parsed, e.g. tile data. Must
    /// start on a byte boundary.
    pub fn skip_bytes(&mut self, name: &str, num_bytes: u64) -> ParseResult<()> {
        if !self.bits.is_aligned() {
            return Err(self.fail(name, ReadBitsError::Unaligned(self.bits.position())));
        }

        let start = self.bits.position();
        self.bits
            .skip_bits(num_bytes * 8)
            .map_err(|err| self.fail(name, err))?;
        self.record(name, num_bytes.into(), start);
        self.annotate("bytes, not parsed");
        Ok(())
    }

    /// The bytes from the current (byte aligned) position to the end of the
    /// buffer.
    pub(crate) fn remaining_data(&self) -> &'a [u8] {
        let offset = (self.bits.position() / 8) as usize;
        self.bits.data().get(offset..).unwrap_or_default()
    }

    fn decode_subexp(&mut self, name: &str, num_syms: i32) -> ParseResult<u32> {
        let mut i = 0;
        let mut mk = 0;
        let k = 3;

        loop {
            let b2 = if i != 0 { k + i - 1 } else { k };
            let a = 1 << b2;
            if num_syms <= mk + 3 * a {
                let num_bits = num_syms - mk;
                return self.raw_ns(name, num_bits as u32);
            }

            let subexp_more_bits = self.raw_bits(name, 1)? != 0;
            if subexp_more_bits {
                i += 1;
                mk += a;
            } else {
                let subexp_bits = self.raw_bits(name, b2 as usize)?;
                return Ok(subexp_bits + mk as u32);
            }
        }
    }

    /// Implements 5.9.27.
    fn decode_unsigned_subexp_with_ref(&mut self, name: &str, mx: i32, r: i32) -> ParseResult<i32> {
        let v = self.decode_subexp(name, mx)? as i32;
        if (r << 1) <= mx {
            Ok(helpers::inverse_recenter(r, v))
        } else {
            Ok(mx - 1 - helpers::inverse_recenter(mx - 1 - r, v))
        }
    }

    /// Implements 5.9.26. The whole sub-exponential code is recorded as a
    /// single element.
    pub fn decode_signed_subexp_with_ref(
        &mut self,
        name: &str,
        low: i32,
        high: i32,
        r: i32,
    ) -> ParseResult<i32> {
        let start = self.bits.position();
        let x = self.decode_unsigned_subexp_with_ref(name, high - low, r - low)?;
        let value = x + low;
        self.record(name, value.into(), start);
        Ok(value)
    }
}

/// Guard returned by [`Reader::sub_level`]. Closes its scope when dropped,
/// whether parsing succeeded or not.
pub struct SubLevel<'r, 'a> {
    reader: &'r mut Reader<'a>,
}

impl<'r, 'a> Deref for SubLevel<'r, 'a> {
    type Target = Reader<'a>;

    fn deref(&self) -> &Self::Target {
        self.reader
    }
}

impl<'r, 'a> DerefMut for SubLevel<'r, 'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.reader
    }
}

impl<'r, 'a> Drop for SubLevel<'r, 'a> {
    fn drop(&mut self) {
        let position = self.reader.bits.position();
        self.reader.trace.close_scope(position);
    }
}
