// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! OBU framing: the OBU header, Annex B length fields and the probe that
//! tells the two storage formats apart.

use std::borrow::Cow;

use enumn::N;

use crate::codec::av1::error::ParseResult;
use crate::codec::av1::reader::Reader;

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObuType {
    #[default]
    Reserved = 0,
    SequenceHeader = 1,
    TemporalDelimiter = 2,
    FrameHeader = 3,
    TileGroup = 4,
    Metadata = 5,
    Frame = 6,
    RedundantFrameHeader = 7,
    TileList = 8,
    Reserved2 = 9,
    Reserved3 = 10,
    Reserved4 = 11,
    Reserved5 = 12,
    Reserved6 = 13,
    Reserved7 = 14,
    Padding = 15,
}

impl ObuType {
    /// Whether decoders must ignore OBUs of this type.
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            ObuType::Reserved
                | ObuType::Reserved2
                | ObuType::Reserved3
                | ObuType::Reserved4
                | ObuType::Reserved5
                | ObuType::Reserved6
                | ObuType::Reserved7
        )
    }
}

pub enum ParsedObu<'a> {
    /// We should process the OBU normally.
    Process(Obu<'a>),
    /// We should drop this OBU and advance to the next one. The u32 is how much
    /// we should advance.
    Drop(u32, ObuHeader),
    /// An Annex B temporal or frame unit length with no OBU following it. The
    /// u32 is how much we should advance, zero if the data is exhausted.
    Framing(u32),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObuHeader {
    pub obu_type: ObuType,
    pub extension_flag: bool,
    pub has_size_field: bool,
    pub temporal_id: u32,
    pub spatial_id: u32,
}

impl ObuHeader {
    /// Length in bytes
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        if self.extension_flag {
            2
        } else {
            1
        }
    }

    /// Parses obu_header() and, if present, obu_extension_header(). See
    /// 5.3.2 and 5.3.3.
    pub fn parse(r: &mut Reader) -> ParseResult<Self> {
        let mut r = r.sub_level("obu_header()");

        if r.read_flag("obu_forbidden_bit")? {
            return Err(r.out_of_spec("obu_forbidden_bit", 1));
        }

        let mut header = ObuHeader {
            obu_type: r.read_enum("obu_type", 4, ObuType::n)?,
            extension_flag: r.read_flag("obu_extension_flag")?,
            has_size_field: r.read_flag("obu_has_size_field")?,
            ..Default::default()
        };

        if r.read_flag("obu_reserved_1bit")? {
            return Err(r.out_of_spec("obu_reserved_1bit", 1));
        }

        if header.extension_flag {
            let mut r = r.sub_level("obu_extension_header()");
            header.temporal_id = r.read_bits("temporal_id", 3)?;
            header.spatial_id = r.read_bits("spatial_id", 2)?;
            r.read_bits("extension_header_reserved_3bits", 3)?;
        }

        Ok(header)
    }

    /// Implements the check of drop_obu() in 7.5: whether this OBU belongs to
    /// a layer outside of the operating point described by `operating_point_idc`.
    pub fn is_dropped(&self, operating_point_idc: u32) -> bool {
        if matches!(
            self.obu_type,
            ObuType::SequenceHeader | ObuType::TemporalDelimiter
        ) || operating_point_idc == 0
            || !self.extension_flag
        {
            return false;
        }

        let in_temporal_layer = ((operating_point_idc >> self.temporal_id) & 1) != 0;
        let in_spatial_layer = ((operating_point_idc >> (self.spatial_id + 8)) & 1) != 0;
        !in_temporal_layer || !in_spatial_layer
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Obu<'a> {
    /// The OBU header.
    pub header: ObuHeader,
    /// The data backing the OBU, from the start of the unit (including any
    /// Annex B length fields) to the end of its payload.
    pub data: Cow<'a, [u8]>,
    /// Where the OBU payload starts, after the size has been read.
    pub start_offset: usize,
    /// The payload size, i.e. obu_size.
    pub size: usize,
}

impl<'a> Obu<'a> {
    /// Total number of bytes taken by this unit in the stream.
    pub fn total_len(&self) -> usize {
        self.start_offset + self.size
    }
}

impl<'a> AsRef<[u8]> for Obu<'a> {
    fn as_ref(&self) -> &[u8] {
        &self.data[self.start_offset..self.start_offset + self.size]
    }
}

/// Progress through the temporal and frame units of an Annex B stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnexBState {
    pub temporal_unit_size: u32,
    pub frame_unit_size: u32,
    pub temporal_unit_consumed: u32,
    pub frame_unit_consumed: u32,
}

impl AnnexBState {
    /// Reads the length fields in front of the next OBU, i.e.
    /// temporal_unit_size and frame_unit_size when a new unit starts, then
    /// obu_length. `None` means there is no OBU to read: the data ended or
    /// an empty unit was declared.
    pub fn next_obu_length(&mut self, r: &mut Reader) -> ParseResult<Option<usize>> {
        if r.remaining_bits() == 0 {
            return Ok(None);
        }

        #[allow(clippy::comparison_chain)]
        if self.temporal_unit_consumed == self.temporal_unit_size {
            self.temporal_unit_size = 0;
        } else if self.temporal_unit_consumed > self.temporal_unit_size {
            return Err(r.out_of_spec("temporal_unit_size", self.temporal_unit_size));
        }

        if self.temporal_unit_size == 0 {
            self.temporal_unit_size = r.read_leb128("temporal_unit_size")?;
            self.temporal_unit_consumed = 0;
            self.frame_unit_size = 0;
            self.frame_unit_consumed = 0;
            if self.temporal_unit_size == 0 {
                return Ok(None);
            }
        }

        #[allow(clippy::comparison_chain)]
        if self.frame_unit_consumed == self.frame_unit_size {
            self.frame_unit_size = 0;
        } else if self.frame_unit_consumed > self.frame_unit_size {
            return Err(r.out_of_spec("frame_unit_size", self.frame_unit_size));
        }

        if self.frame_unit_size == 0 {
            let start_pos = r.consumed(0);
            self.frame_unit_size = r.read_leb128("frame_unit_size")?;
            self.frame_unit_consumed = 0;
            self.temporal_unit_consumed += r.consumed(start_pos);
            if self.frame_unit_size == 0 {
                return Ok(None);
            }
        }

        let start_pos = r.consumed(0);
        let obu_length = r.read_leb128("obu_length")?;
        self.consume(r.consumed(start_pos));

        Ok(Some(obu_length as usize))
    }

    /// Accounts for `num_bytes` of OBU data in the current units.
    pub fn consume(&mut self, num_bytes: u32) {
        self.temporal_unit_consumed = self.temporal_unit_consumed.saturating_add(num_bytes);
        self.frame_unit_consumed = self.frame_unit_consumed.saturating_add(num_bytes);
    }
}

/// Probes the input data for the Annex B format. Anything other than Ok(true)
/// means the data should be treated as "low-overhead" instead.
pub fn annexb_probe(data: &[u8]) -> ParseResult<bool> {
    let mut r = Reader::untraced(data);
    let mut seen_sequence = false;
    let mut seen_frame = false;

    // Try reading the first TU and frame unit size
    let temporal_unit_size = r.read_leb128("temporal_unit_size")?;
    if temporal_unit_size == 0 {
        return Ok(false);
    }

    let frame_unit_size = r.read_leb128("frame_unit_size")?;
    if frame_unit_size == 0 || frame_unit_size > temporal_unit_size {
        return Ok(false);
    }

    let obu_length = r.read_leb128("obu_length")?;
    if obu_length == 0 || obu_length > frame_unit_size {
        return Ok(false);
    }

    // The first OBU in the first frame_unit of each temporal_unit must
    // be a temporal delimiter OBU (and this is the only place temporal
    // delimiter OBUs can appear)
    let header = ObuHeader::parse(&mut Reader::untraced(r.remaining_data()))?;
    if header.obu_type != ObuType::TemporalDelimiter {
        return Ok(false);
    }

    // Try identifying a sequence and a frame.
    r.skip_bytes("obu", obu_length.into())?;
    let mut num_bytes_read = 0u32;

    loop {
        let obu_length = r.read_leb128("obu_length")?;
        let header = ObuHeader::parse(&mut Reader::untraced(r.remaining_data()))?;

        r.skip_bytes("obu", obu_length.into())?;
        num_bytes_read = num_bytes_read.saturating_add(obu_length);

        seen_sequence |= header.obu_type == ObuType::SequenceHeader;
        seen_frame |= matches!(header.obu_type, ObuType::Frame | ObuType::FrameHeader);

        if seen_sequence && seen_frame {
            // OK, enough evidence of Annex B format.
            return Ok(true);
        }

        if num_bytes_read >= frame_unit_size {
            // We read what we've identified as the first frame and yet no
            // sequence and no actual frames were found.
            return Ok(false);
        }
    }
}
