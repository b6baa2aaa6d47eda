// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stateful AV1 OBU parser: framing of low-overhead and Annex B streams, the
//! current sequence header, frame header bookkeeping and the reference frame
//! state.

use std::borrow::Cow;
use std::sync::Arc;

use crate::codec::av1::error::ParseError;
use crate::codec::av1::error::ParseResult;
use crate::codec::av1::frame_header::FrameHeaderObu;
use crate::codec::av1::frame_header::ReferenceFrames;
use crate::codec::av1::helpers;
use crate::codec::av1::metadata::MetadataObu;
use crate::codec::av1::obu::annexb_probe;
use crate::codec::av1::obu::AnnexBState;
use crate::codec::av1::obu::Obu;
use crate::codec::av1::obu::ObuHeader;
use crate::codec::av1::obu::ObuType;
use crate::codec::av1::obu::ParsedObu;
use crate::codec::av1::reader::Reader;
use crate::codec::av1::sequence::SequenceHeaderObu;
use crate::codec::av1::tile_group::FrameObu;
use crate::codec::av1::tile_group::TileGroupObu;
use crate::trace::SyntaxTrace;
use crate::trace::TraceOptions;

const SEQUENCE_HEADER_OBU: &str = "sequence_header_obu()";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFormat {
    LowOverhead,
    AnnexB(AnnexBState),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParserOptions {
    /// The operating point to select when a sequence header is parsed. Clamped
    /// to the operating points the sequence declares.
    pub operating_point: u32,
    pub trace: TraceOptions,
    /// Whether to look for Annex B length fields in the first data given to
    /// the parser. If not set, the stream is assumed to be low-overhead.
    pub probe_annexb: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            operating_point: 0,
            trace: Default::default(),
            probe_annexb: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Parser {
    options: ParserOptions,
    stream_format: StreamFormat,
    should_probe_for_annexb: bool,
    operating_point: u32,
    operating_point_idc: u32,
    /// Same as SeenFrameHeader in the specification
    seen_frame_header: bool,
    /// We keep this to implement frame_header_copy() in the specification.
    last_frame_header: Option<FrameHeaderObu>,
    refs: ReferenceFrames,
    /// Trace of the unit being parsed.
    trace: SyntaxTrace,
    /// The last SequenceHeaderObu parsed. Replaced, never modified.
    sequence_header: Option<Arc<SequenceHeaderObu>>,
}

/// A parsed frame header along with the reference state once the frame is
/// decoded.
#[derive(Debug)]
struct PendingFrame {
    header: FrameHeaderObu,
    refs: ReferenceFrames,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

/// Skip the trailing bits, ensuring that they actually make sense.
fn check_trailing_bits(r: &mut Reader, obu: &Obu) -> ParseResult<()> {
    if obu.size == 0
        || matches!(
            obu.header.obu_type,
            ObuType::TileList | ObuType::TileGroup | ObuType::Frame
        )
    {
        return Ok(());
    }

    let num_trailing = (obu.size as u64 * 8).saturating_sub(r.position());
    r.read_trailing_bits(num_trailing)
}

fn expect_type(obu: &Obu, scope: &str, expected: &[ObuType]) -> ParseResult<()> {
    if expected.contains(&obu.header.obu_type) {
        Ok(())
    } else {
        Err(ParseError::ValueOutOfSpecRange {
            scope: scope.to_string(),
            element: "obu_type".to_string(),
            value: obu.header.obu_type as i64,
        })
    }
}

impl Parser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            stream_format: StreamFormat::LowOverhead,
            should_probe_for_annexb: options.probe_annexb,
            operating_point: 0,
            operating_point_idc: 0,
            seen_frame_header: false,
            last_frame_header: None,
            refs: Default::default(),
            trace: SyntaxTrace::new(&options.trace),
            sequence_header: None,
            options,
        }
    }

    pub fn stream_format(&self) -> &StreamFormat {
        &self.stream_format
    }

    /// The sequence header in effect, if any has been parsed.
    pub fn sequence_header(&self) -> Option<Arc<SequenceHeaderObu>> {
        self.sequence_header.clone()
    }

    pub fn reference_frames(&self) -> &ReferenceFrames {
        &self.refs
    }

    pub fn operating_point(&self) -> u32 {
        self.operating_point
    }

    /// Returns the trace of the last unit and starts an empty one. Bit
    /// positions are relative to the start of the data given to `parse_obu`.
    pub fn take_trace(&mut self) -> SyntaxTrace {
        std::mem::replace(&mut self.trace, SyntaxTrace::new(&self.options.trace))
    }

    fn require_sequence(&self, scope: &str) -> ParseResult<Arc<SequenceHeaderObu>> {
        self.sequence_header
            .clone()
            .ok_or_else(|| ParseError::MissingContext {
                scope: scope.to_string(),
                what: SEQUENCE_HEADER_OBU.to_string(),
            })
    }

    /// Runs `f` with a reader over the payload of `obu` that records into the
    /// trace of the current unit.
    fn with_reader<'a, T>(
        &mut self,
        obu: &'a Obu,
        f: impl FnOnce(&mut Self, &mut Reader<'a>) -> ParseResult<T>,
    ) -> ParseResult<T> {
        let mut trace = std::mem::replace(&mut self.trace, SyntaxTrace::disabled());
        trace.set_origin(obu.start_offset as u64 * 8);

        let mut r = Reader::new(obu.as_ref(), trace);
        let result = f(self, &mut r);
        self.trace = r.into_trace();
        result
    }

    /// Parses one OBU from `data`, which can be in Annex B or low-overhead
    /// format. Only the OBU header and size are read: the payload is parsed
    /// by the `parse_*_obu()` functions.
    ///
    /// `ParsedObu::Drop` is returned if the OBU is to be dropped, and
    /// `ParsedObu::Framing` if an Annex B length was read with no OBU after it.
    pub fn parse_obu<'a>(&mut self, data: &'a [u8]) -> ParseResult<ParsedObu<'a>> {
        if self.should_probe_for_annexb {
            // Try probing for Annex B data.
            self.stream_format = if matches!(annexb_probe(data), Ok(true)) {
                log::debug!("Parsing an Annex B stream");
                StreamFormat::AnnexB(AnnexBState::default())
            } else {
                log::debug!("Parsing a low-overhead stream");
                StreamFormat::LowOverhead
            };

            self.should_probe_for_annexb = false;
        }

        let mut r = Reader::new(data, SyntaxTrace::new(&self.options.trace));
        let result = self.read_obu(&mut r, data);
        self.trace = r.into_trace();
        result
    }

    fn read_obu<'a>(&mut self, r: &mut Reader, data: &'a [u8]) -> ParseResult<ParsedObu<'a>> {
        let obu_length = if let StreamFormat::AnnexB(annexb_state) = &mut self.stream_format {
            // Read the length to skip to the start of the open_bitstream_unit()
            // syntax element.
            match annexb_state.next_obu_length(r)? {
                Some(length) => Some(length),
                None => return Ok(ParsedObu::Framing(r.consumed(0))),
            }
        } else {
            None
        };

        let mut r = r.sub_level("open_bitstream_unit()");
        let start_pos = r.consumed(0);

        // Both "low-overhead" and Annex B are now at the same point, i.e.: a
        // open_bitstream_unit() follows.
        let header = ObuHeader::parse(&mut r)?;

        let obu_size = if header.has_size_field {
            r.read_leb128("obu_size")? as usize
        } else if let Some(obu_length) = obu_length {
            obu_length
                .checked_sub(header.len())
                .ok_or_else(|| r.out_of_spec("obu_length", obu_length as u32))?
        } else {
            return Err(r.out_of_spec("obu_has_size_field", 0));
        };

        let header_bytes = r.consumed(start_pos);
        if let Some(obu_length) = obu_length {
            if header_bytes as usize + obu_size != obu_length {
                return Err(r.out_of_spec("obu_size", obu_size as u32));
            }
        }

        if let StreamFormat::AnnexB(annexb_state) = &mut self.stream_format {
            annexb_state.consume(header_bytes);
            annexb_state.consume(obu_size as u32);
        }

        let start_offset = (r.position() / 8) as usize;
        let available = data.len() - start_offset;
        if obu_size > available {
            return Err(r.truncated(obu_size as u64, available as u64));
        }

        log::debug!(
            "Identified OBU type {:?}, data size: {}, obu_size: {}",
            header.obu_type,
            start_offset + obu_size,
            obu_size
        );

        if header.is_dropped(self.operating_point_idc) {
            log::debug!(
                "Dropping {:?} of layer {}/{} outside of operating point {}",
                header.obu_type,
                header.temporal_id,
                header.spatial_id,
                self.operating_point
            );
            return Ok(ParsedObu::Drop((start_offset + obu_size) as u32, header));
        }

        Ok(ParsedObu::Process(Obu {
            header,
            data: Cow::from(&data[..start_offset + obu_size]),
            start_offset,
            size: obu_size,
        }))
    }

    /// Selects an operating point. Only call this after the Sequence OBU for
    /// which the operating point should apply has been parsed.
    pub fn choose_operating_point(&mut self, operating_point: u32) -> ParseResult<()> {
        let seq = self.require_sequence(SEQUENCE_HEADER_OBU)?;
        if operating_point > seq.operating_points_cnt_minus_1 {
            return Err(ParseError::ValueOutOfSpecRange {
                scope: SEQUENCE_HEADER_OBU.to_string(),
                element: "operating_point".to_string(),
                value: operating_point.into(),
            });
        }

        self.operating_point = operating_point;
        self.operating_point_idc = seq.operating_points[operating_point as usize].idc;
        Ok(())
    }

    pub fn highest_operating_point(&self) -> Option<u32> {
        if self.operating_point_idc == 0 {
            /* No scalability information, all OBUs must be decoded */
            None
        } else {
            Some(helpers::floor_log2(self.operating_point_idc >> 8))
        }
    }

    pub fn parse_temporal_delimiter_obu(&mut self, obu: &Obu) -> ParseResult<()> {
        expect_type(obu, "temporal_delimiter_obu()", &[ObuType::TemporalDelimiter])?;

        self.seen_frame_header = false;
        if obu.size > 0 {
            return Err(ParseError::ValueOutOfSpecRange {
                scope: "temporal_delimiter_obu()".to_string(),
                element: "obu_size".to_string(),
                value: obu.size as i64,
            });
        }

        Ok(())
    }

    /// Parses a sequence header OBU and publishes it for the units that
    /// follow.
    pub fn parse_sequence_header_obu(&mut self, obu: &Obu) -> ParseResult<Arc<SequenceHeaderObu>> {
        expect_type(obu, SEQUENCE_HEADER_OBU, &[ObuType::SequenceHeader])?;

        let seq = self.with_reader(obu, |_, r| {
            let seq = {
                let mut r = r.sub_level(SEQUENCE_HEADER_OBU);
                SequenceHeaderObu::parse(&mut r, &obu.header)?
            };
            check_trailing_bits(r, obu)?;
            Ok(seq)
        })?;

        let changed = self
            .sequence_header
            .as_deref()
            .map_or(true, |current| *current != seq);
        if changed {
            log::info!(
                "New sequence header: {:?}, {}x{}, {:?}, {} operating point(s)",
                seq.seq_profile,
                seq.max_frame_width_minus_1 + 1,
                seq.max_frame_height_minus_1 + 1,
                seq.bit_depth,
                seq.operating_points_cnt_minus_1 + 1
            );
        }

        let seq = Arc::new(seq);
        self.sequence_header = Some(Arc::clone(&seq));

        let operating_point = self
            .options
            .operating_point
            .min(seq.operating_points_cnt_minus_1);
        self.choose_operating_point(operating_point)?;

        Ok(seq)
    }

    /// Parses a frame header, redundant frame header or the header part of a
    /// frame OBU.
    pub fn parse_frame_header_obu(&mut self, obu: &Obu) -> ParseResult<FrameHeaderObu> {
        const SCOPE: &str = "frame_header_obu()";
        expect_type(
            obu,
            SCOPE,
            &[
                ObuType::FrameHeader,
                ObuType::RedundantFrameHeader,
                ObuType::Frame,
            ],
        )?;

        let seq = self.require_sequence(SCOPE)?;
        self.with_reader(obu, |p, r| {
            let mut r = r.sub_level(SCOPE);

            let copy = match obu.header.obu_type {
                ObuType::Frame => false,
                ObuType::RedundantFrameHeader => true,
                _ => p.seen_frame_header,
            };

            if copy {
                p.frame_header_copy(&mut r, obu)
            } else {
                let pending = p.frame_header(&mut r, obu, &seq)?;
                Ok(p.commit_frame(pending))
            }
        })
    }

    fn frame_header_copy(&self, r: &mut Reader, obu: &Obu) -> ParseResult<FrameHeaderObu> {
        let Some(fh) = self.last_frame_header.clone().filter(|_| self.seen_frame_header) else {
            return Err(r.missing("frame_header_copy()"));
        };

        r.skip_bytes("frame_header_copy()", obu.size as u64)?;
        Ok(fh)
    }

    /// Parses uncompressed_header() and the bits that close it. Nothing in the
    /// parser changes until the result is given to `commit_frame()`.
    fn frame_header(
        &self,
        r: &mut Reader,
        obu: &Obu,
        seq: &SequenceHeaderObu,
    ) -> ParseResult<PendingFrame> {
        let mut refs = self.refs.clone();
        let mut fh = refs.parse_uncompressed_header(r, seq, &obu.header)?;

        // See 5.10
        if obu.header.obu_type == ObuType::Frame {
            r.byte_alignment()?;
        } else {
            check_trailing_bits(r, obu)?;
        }

        fh.header_bytes = (r.position() / 8) as usize;

        // Tile data is not decoded, so the frame can be considered decoded
        // as soon as its header is known.
        refs.ref_frame_update(&fh, seq);

        Ok(PendingFrame { header: fh, refs })
    }

    fn commit_frame(&mut self, pending: PendingFrame) -> FrameHeaderObu {
        let PendingFrame { header: fh, refs } = pending;
        self.refs = refs;

        if fh.show_existing_frame {
            self.last_frame_header = None;
            self.seen_frame_header = false;
        } else {
            /* TileNum = 0 */
            self.seen_frame_header = true;
            self.last_frame_header = Some(fh.clone());
        }

        log::debug!(
            "{:?} frame, order hint {}, {}x{} (upscaled width {})",
            fh.frame_type,
            fh.order_hint,
            fh.frame_width,
            fh.frame_height,
            fh.upscaled_width
        );

        fh
    }

    pub fn parse_tile_group_obu<'a>(&mut self, obu: Obu<'a>) -> ParseResult<TileGroupObu<'a>> {
        const SCOPE: &str = "tile_group_obu()";
        expect_type(&obu, SCOPE, &[ObuType::TileGroup])?;

        self.require_sequence(SCOPE)?;
        let Some(fh) = self.last_frame_header.as_ref().filter(|_| self.seen_frame_header) else {
            return Err(ParseError::MissingContext {
                scope: SCOPE.to_string(),
                what: "frame_header_obu()".to_string(),
            });
        };
        let tile_info = fh.tile_info.clone();

        let tg = self.with_reader(&obu, |_, r| TileGroupObu::parse(r, obu.clone(), &tile_info))?;
        if tg.is_last_in_frame(&tile_info) {
            self.seen_frame_header = false;
        }

        Ok(tg)
    }

    /// Parses a frame OBU. The frame header only takes effect if its tile
    /// group parses as well.
    pub fn parse_frame_obu<'a>(&mut self, obu: Obu<'a>) -> ParseResult<FrameObu<'a>> {
        const SCOPE: &str = "frame_obu()";
        expect_type(&obu, SCOPE, &[ObuType::Frame])?;

        let seq = self.require_sequence(SCOPE)?;
        self.with_reader(&obu, |p, r| {
            let mut r = r.sub_level(SCOPE);

            let pending = {
                let mut r = r.sub_level("frame_header_obu()");
                p.frame_header(&mut r, &obu, &seq)?
            };

            let header_bytes = pending.header.header_bytes;
            let tile_group_obu = Obu {
                header: obu.header.clone(),
                data: obu.data.clone(),
                start_offset: obu.start_offset + header_bytes,
                size: obu.size.saturating_sub(header_bytes),
            };
            let tile_group =
                TileGroupObu::parse(&mut r, tile_group_obu, &pending.header.tile_info)?;

            let header = p.commit_frame(pending);
            if tile_group.is_last_in_frame(&header.tile_info) {
                p.seen_frame_header = false;
            }

            Ok(FrameObu { header, tile_group })
        })
    }

    pub fn parse_metadata_obu(&mut self, obu: &Obu) -> ParseResult<MetadataObu> {
        expect_type(obu, "metadata_obu()", &[ObuType::Metadata])?;

        self.with_reader(obu, |_, r| {
            let metadata = MetadataObu::parse(r)?;
            check_trailing_bits(r, obu)?;
            Ok(metadata)
        })
    }

    /// Skips the payload of padding, tile list and reserved OBUs.
    pub fn skip_obu(&mut self, obu: &Obu) -> ParseResult<()> {
        let scope = match obu.header.obu_type {
            ObuType::Padding => "padding_obu()",
            ObuType::TileList => "tile_list_obu()",
            _ => "reserved_obu()",
        };

        self.with_reader(obu, |_, r| {
            let mut r = r.sub_level(scope);
            r.skip_bytes("payload", obu.size as u64)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bitstream_utils::BitWriter;
    use crate::codec::av1::frame_header::tests::write_still_key_frame;
    use crate::codec::av1::frame_header::tests::write_still_key_frame_with_tile_cols;
    use crate::codec::av1::sequence::tests::write_still_picture_sequence;
    use crate::codec::av1::sequence::tests::SEQ_TEST_25_FPS;
    use crate::codec::av1::superres::SuperresParams;

    /// A low-overhead OBU with a size field and no extension.
    pub(crate) fn low_overhead_obu(obu_type: ObuType, payload: &[u8]) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bit(false)
            .write_f(4, obu_type as u32)
            .write_bit(false)
            .write_bit(true)
            .write_bit(false)
            .write_leb128(payload.len() as u32);
        let mut data = w.into_bytes();
        data.extend_from_slice(payload);
        data
    }

    /// Payload of a 640x480 still picture sequence header with superres
    /// enabled.
    pub(crate) fn still_sequence_payload() -> Vec<u8> {
        let mut w = BitWriter::new();
        write_still_picture_sequence(&mut w, 640, 480, true);
        w.write_trailing_bits();
        w.into_bytes()
    }

    /// Payload of a frame OBU for `still_sequence_payload()`, coded at a
    /// 12/8 superres ratio, with a single tile of `tile_size` bytes.
    pub(crate) fn still_frame_payload(tile_size: usize) -> Vec<u8> {
        let mut w = BitWriter::new();
        write_still_key_frame(&mut w, Some(Some(3)));
        let mut data = w.into_bytes();
        data.extend((0..tile_size).map(|i| i as u8));
        data
    }

    fn process(parsed: ParsedObu) -> Obu {
        match parsed {
            ParsedObu::Process(obu) => obu,
            ParsedObu::Drop(len, header) => panic!("unexpected drop of {} bytes: {:?}", len, header),
            ParsedObu::Framing(len) => panic!("unexpected framing of {} bytes", len),
        }
    }

    #[test]
    fn parse_test25fps_sequence() {
        let _ = env_logger::try_init();

        let data = low_overhead_obu(ObuType::SequenceHeader, &SEQ_TEST_25_FPS);
        let mut parser = Parser::default();
        let obu = process(parser.parse_obu(&data).unwrap());

        assert_eq!(parser.stream_format(), &StreamFormat::LowOverhead);
        assert_eq!(obu.header.obu_type, ObuType::SequenceHeader);
        assert_eq!(obu.start_offset, 2);
        assert_eq!(obu.size, SEQ_TEST_25_FPS.len());
        assert_eq!(obu.total_len(), data.len());

        let seq = parser.parse_sequence_header_obu(&obu).unwrap();
        assert_eq!(seq.max_frame_width_minus_1, 319);
        assert!(Arc::ptr_eq(&seq, &parser.sequence_header().unwrap()));
        assert_eq!(parser.highest_operating_point(), None);

        let trace = parser.take_trace();
        let tree = trace.to_tree();
        assert_eq!(tree[0].name, "open_bitstream_unit()");
        assert_eq!(tree[1].name, "sequence_header_obu()");
        // Positions are relative to the start of the unit.
        assert_eq!(
            trace.field("max_frame_width_minus_1").unwrap().bits(),
            &(16 + 37..16 + 46)
        );
        assert!(parser.take_trace().is_empty());
    }

    #[test]
    fn frame_header_needs_sequence_header() {
        let data = low_overhead_obu(ObuType::FrameHeader, &[0x00]);
        let mut parser = Parser::default();
        let obu = process(parser.parse_obu(&data).unwrap());

        let err = parser.parse_frame_header_obu(&obu).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingContext {
                scope: "frame_header_obu()".into(),
                what: "sequence_header_obu()".into(),
            }
        );
        assert!(parser.sequence_header().is_none());
    }

    #[test]
    fn obu_size_past_the_end() {
        let mut parser = Parser::default();
        let err = parser.parse_obu(&[0x12, 0x05, 0x00]).err().unwrap();

        assert_eq!(
            err,
            ParseError::BitstreamTruncated {
                scope: "open_bitstream_unit()".into(),
                declared: 5,
                available: 1,
            }
        );
    }

    #[test]
    fn low_overhead_needs_size_field() {
        let mut parser = Parser::new(ParserOptions {
            probe_annexb: false,
            ..Default::default()
        });
        let err = parser.parse_obu(&[0x10]).err().unwrap();

        assert!(matches!(
            err,
            ParseError::ValueOutOfSpecRange { ref element, .. } if element == "obu_has_size_field"
        ));
    }

    #[test]
    fn still_picture_frame_obu() {
        let mut parser = Parser::default();

        let data = low_overhead_obu(ObuType::SequenceHeader, &still_sequence_payload());
        let obu = process(parser.parse_obu(&data).unwrap());
        parser.parse_sequence_header_obu(&obu).unwrap();

        let data = low_overhead_obu(ObuType::Frame, &still_frame_payload(4));
        let obu = process(parser.parse_obu(&data).unwrap());
        let frame = parser.parse_frame_obu(obu).unwrap();

        assert_eq!(frame.header.superres.superres_denom, 12);
        assert_eq!(frame.header.upscaled_width, 640);
        assert_eq!(frame.header.frame_width, 427);
        assert_eq!(frame.header.mi_cols, 108);
        assert_eq!(frame.header.header_bytes, 8);
        assert_eq!(frame.tile_group.tiles.len(), 1);
        assert_eq!(frame.tile_group.tiles[0].tile_offset, 0);
        assert_eq!(frame.tile_group.tiles[0].tile_size, 4);
        assert_eq!(frame.tile_group.obu.as_ref(), &[0, 1, 2, 3]);
        assert!(parser.reference_frames().slots.iter().all(|s| s.ref_valid));
        assert_eq!(parser.reference_frames().slots[0].ref_frame_width, 427);

        let trace = parser.take_trace();
        let tree = trace.to_tree();
        let frame_obu = &tree[1];
        assert_eq!(frame_obu.name, "frame_obu()");
        let superres = frame_obu.find("superres_params()").unwrap();
        // Two header bytes, then disable_cdf_update and
        // allow_screen_content_tools.
        assert_eq!(superres.bits, 18..22);

        // The frame is complete: a tile group now has no header to refer to.
        let data = low_overhead_obu(ObuType::TileGroup, &[0xaa]);
        let obu = process(parser.parse_obu(&data).unwrap());
        let err = parser.parse_tile_group_obu(obu).unwrap_err();
        assert!(matches!(err, ParseError::MissingContext { ref what, .. } if what == "frame_header_obu()"));
    }

    #[test]
    fn rejected_frame_obu_keeps_state() {
        let mut parser = Parser::default();

        let data = low_overhead_obu(ObuType::SequenceHeader, &still_sequence_payload());
        let obu = process(parser.parse_obu(&data).unwrap());
        parser.parse_sequence_header_obu(&obu).unwrap();
        let refs = parser.reference_frames().clone();

        // Two tile columns. The first tile claims 256 bytes but only two
        // follow its size.
        let mut w = BitWriter::new();
        write_still_key_frame_with_tile_cols(&mut w, Some(Some(3)), 1);
        let mut payload = w.into_bytes();
        payload.extend_from_slice(&[0x00, 0xff, 0xaa, 0xbb]);

        let data = low_overhead_obu(ObuType::Frame, &payload);
        let obu = process(parser.parse_obu(&data).unwrap());
        let err = parser.parse_frame_obu(obu).unwrap_err();
        assert_eq!(
            err,
            ParseError::BitstreamTruncated {
                scope: "frame_obu()/tile_group_obu()".into(),
                declared: 256,
                available: 2,
            }
        );
        assert_eq!(parser.reference_frames(), &refs);
        assert!(!parser.reference_frames().slots[0].ref_valid);

        // The header of the rejected frame cannot be used by a tile group.
        let data = low_overhead_obu(ObuType::TileGroup, &[0x00, 0x00, 0xaa]);
        let obu = process(parser.parse_obu(&data).unwrap());
        let err = parser.parse_tile_group_obu(obu).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingContext {
                scope: "tile_group_obu()".into(),
                what: "frame_header_obu()".into(),
            }
        );

        // Same frame, with a first tile of two bytes.
        let len = payload.len();
        payload[len - 3] = 0x01;
        payload.push(0xcc);
        let data = low_overhead_obu(ObuType::Frame, &payload);
        let obu = process(parser.parse_obu(&data).unwrap());
        let frame = parser.parse_frame_obu(obu).unwrap();
        assert_eq!(frame.header.tile_info.tile_cols, 2);
        assert_eq!(frame.tile_group.tiles.len(), 2);
        assert_eq!(frame.tile_group.tiles[0].tile_size, 2);
        assert_eq!(frame.tile_group.tiles[1].tile_size, 1);
        assert_eq!(frame.tile_group.tiles[1].mi_col_start, 64);
        assert!(parser.reference_frames().slots.iter().all(|s| s.ref_valid));
    }

    #[test]
    fn frame_header_copies_and_tile_groups() {
        let mut parser = Parser::default();

        let data = low_overhead_obu(ObuType::SequenceHeader, &still_sequence_payload());
        let obu = process(parser.parse_obu(&data).unwrap());
        parser.parse_sequence_header_obu(&obu).unwrap();

        // A redundant frame header before any frame header.
        let data = low_overhead_obu(ObuType::RedundantFrameHeader, &[0x80]);
        let obu = process(parser.parse_obu(&data).unwrap());
        let err = parser.parse_frame_header_obu(&obu).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingContext {
                scope: "frame_header_obu()".into(),
                what: "frame_header_copy()".into(),
            }
        );

        let mut w = BitWriter::new();
        write_still_key_frame(&mut w, Some(None));
        w.write_trailing_bits();
        let data = low_overhead_obu(ObuType::FrameHeader, &w.into_bytes());
        let obu = process(parser.parse_obu(&data).unwrap());
        let fh = parser.parse_frame_header_obu(&obu).unwrap();
        assert_eq!(fh.superres, SuperresParams::default());
        assert_eq!(fh.frame_width, 640);
        assert_eq!(fh.header_bytes, 8);

        // The redundant copy returns the stored header and skips its payload.
        let data = low_overhead_obu(ObuType::RedundantFrameHeader, &[0x12, 0x34, 0x80]);
        let obu = process(parser.parse_obu(&data).unwrap());
        assert_eq!(parser.parse_frame_header_obu(&obu).unwrap(), fh);

        let data = low_overhead_obu(ObuType::TileGroup, &[1, 2, 3]);
        let obu = process(parser.parse_obu(&data).unwrap());
        let tg = parser.parse_tile_group_obu(obu).unwrap();
        assert_eq!(tg.tiles.len(), 1);
        assert_eq!(tg.tiles[0].tile_size, 3);
        assert_eq!(tg.tiles[0].mi_col_end, 160);
    }

    #[test]
    fn metadata_and_padding() {
        let mut parser = Parser::default();

        let data = low_overhead_obu(ObuType::Metadata, &[1, 0x03, 0xe8, 0x01, 0x90, 0x80]);
        let obu = process(parser.parse_obu(&data).unwrap());
        let metadata = parser.parse_metadata_obu(&obu).unwrap();
        assert_eq!(metadata.metadata_type(), 1);

        // The trailing bits must be a one followed by zeros.
        let data = low_overhead_obu(ObuType::Metadata, &[1, 0x03, 0xe8, 0x01, 0x90, 0x81]);
        let obu = process(parser.parse_obu(&data).unwrap());
        let err = parser.parse_metadata_obu(&obu).unwrap_err();
        assert!(matches!(
            err,
            ParseError::ValueOutOfSpecRange { ref element, .. } if element == "trailing_zero_bit"
        ));

        let data = low_overhead_obu(ObuType::Padding, &[0xde, 0xad]);
        let obu = process(parser.parse_obu(&data).unwrap());
        parser.skip_obu(&obu).unwrap();
        let trace = parser.take_trace();
        assert_eq!(trace.field("payload").unwrap().value(), Some(2u64.into()));
    }

    #[test]
    fn annexb_stream() {
        let seq = still_sequence_payload();
        let frame = still_frame_payload(2);

        // Temporal delimiter, sequence header and frame without size fields.
        let mut frame_unit = vec![1, 0x10];
        frame_unit.push(seq.len() as u8 + 1);
        frame_unit.push(0x08);
        frame_unit.extend_from_slice(&seq);
        frame_unit.push(frame.len() as u8 + 1);
        frame_unit.push(0x30);
        frame_unit.extend_from_slice(&frame);

        let mut data = vec![frame_unit.len() as u8 + 1, frame_unit.len() as u8];
        data.extend_from_slice(&frame_unit);
        assert!(data.len() < 128);

        let mut parser = Parser::default();
        let td = process(parser.parse_obu(&data).unwrap());
        assert!(matches!(parser.stream_format(), StreamFormat::AnnexB(_)));
        assert_eq!(td.header.obu_type, ObuType::TemporalDelimiter);
        assert_eq!(td.total_len(), 4);
        parser.parse_temporal_delimiter_obu(&td).unwrap();

        let mut offset = td.total_len();
        let obu = process(parser.parse_obu(&data[offset..]).unwrap());
        assert_eq!(obu.header.obu_type, ObuType::SequenceHeader);
        assert_eq!(obu.size, seq.len());
        parser.parse_sequence_header_obu(&obu).unwrap();

        offset += obu.total_len();
        let obu = process(parser.parse_obu(&data[offset..]).unwrap());
        offset += obu.total_len();
        let frame = parser.parse_frame_obu(obu).unwrap();
        assert_eq!(frame.header.frame_width, 427);
        assert_eq!(frame.tile_group.tiles[0].tile_size, 2);
        assert_eq!(offset, data.len());

        let StreamFormat::AnnexB(state) = parser.stream_format() else {
            panic!("not an Annex B stream");
        };
        assert_eq!(state.temporal_unit_consumed, state.temporal_unit_size);
        assert_eq!(state.frame_unit_consumed, state.frame_unit_size);
    }

    #[test]
    fn operating_point_is_checked() {
        let mut parser = Parser::default();
        assert!(matches!(
            parser.choose_operating_point(0),
            Err(ParseError::MissingContext { .. })
        ));

        let data = low_overhead_obu(ObuType::SequenceHeader, &SEQ_TEST_25_FPS);
        let obu = process(parser.parse_obu(&data).unwrap());
        parser.parse_sequence_header_obu(&obu).unwrap();

        assert_eq!(parser.operating_point(), 0);
        assert!(matches!(
            parser.choose_operating_point(1),
            Err(ParseError::ValueOutOfSpecRange { value: 1, .. })
        ));
    }
}
