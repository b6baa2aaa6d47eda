// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Walks the OBUs of a chunk of data and routes each of them to its parser.
//! A unit that fails to parse is reported and skipped: only a failure to find
//! the boundaries of a unit ends the walk over a chunk.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::av1::error::ParseError;
use crate::codec::av1::error::ParseResult;
use crate::codec::av1::frame_header::FrameHeaderObu;
use crate::codec::av1::metadata::MetadataObu;
use crate::codec::av1::obu::Obu;
use crate::codec::av1::obu::ObuHeader;
use crate::codec::av1::obu::ObuType;
use crate::codec::av1::obu::ParsedObu;
use crate::codec::av1::parser::Parser;
use crate::codec::av1::parser::ParserOptions;
use crate::codec::av1::sequence::SequenceHeaderObu;
use crate::codec::av1::tile_group::FrameObu;
use crate::codec::av1::tile_group::TileGroupObu;
use crate::trace::SyntaxTrace;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitPayload<'a> {
    TemporalDelimiter,
    /// The sequence header now in effect, shared with the parser.
    SequenceHeader(Arc<SequenceHeaderObu>),
    /// A frame header or redundant frame header.
    FrameHeader(FrameHeaderObu),
    TileGroup(TileGroupObu<'a>),
    Frame(FrameObu<'a>),
    Metadata(MetadataObu),
    /// Padding, tile list and reserved OBUs.
    Skipped,
    /// An OBU outside of the selected operating point.
    Dropped,
}

#[derive(Clone, Debug)]
pub struct ParsedUnit<'a> {
    /// Index of the unit in the stream.
    pub index: usize,
    /// Offset of the unit in its chunk.
    pub offset: usize,
    pub header: ObuHeader,
    pub payload: UnitPayload<'a>,
    /// Bit positions are relative to `offset`.
    pub trace: SyntaxTrace,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unit {index} at byte {offset} ({obu_type:?}): {source}")]
pub struct UnitError {
    pub index: usize,
    pub offset: usize,
    /// Not known if the OBU header could not be parsed.
    pub obu_type: Option<ObuType>,
    pub source: ParseError,
}

#[derive(Clone, Debug, Default)]
pub struct DispatchReport<'a> {
    pub units: Vec<ParsedUnit<'a>>,
    pub errors: Vec<UnitError>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TypeStatistics {
    pub units: u64,
    pub bytes: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamStatistics {
    pub per_type: BTreeMap<ObuType, TypeStatistics>,
    pub dropped_units: u64,
    pub dropped_bytes: u64,
    /// Annex B temporal and frame unit lengths not followed by an OBU.
    pub framing_bytes: u64,
    pub failed_units: u64,
}

impl StreamStatistics {
    fn add(&mut self, obu_type: ObuType, bytes: usize) {
        let entry = self.per_type.entry(obu_type).or_default();
        entry.units += 1;
        entry.bytes += bytes as u64;
    }

    pub fn total_units(&self) -> u64 {
        self.per_type.values().map(|s| s.units).sum::<u64>() + self.dropped_units + self.failed_units
    }
}

impl fmt::Display for StreamStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (obu_type, stats) in &self.per_type {
            writeln!(f, "{:<22} {:>8} units {:>12} bytes", format!("{:?}", obu_type), stats.units, stats.bytes)?;
        }
        if self.dropped_units > 0 {
            writeln!(f, "{:<22} {:>8} units {:>12} bytes", "Dropped", self.dropped_units, self.dropped_bytes)?;
        }
        if self.framing_bytes > 0 {
            writeln!(f, "{:<22} {:>27} bytes", "Annex B framing", self.framing_bytes)?;
        }
        write!(f, "{:<22} {:>8} units", "Failed", self.failed_units)
    }
}

/// Parses the OBUs of a stream, one chunk at a time. The parser state (the
/// sequence header in effect, reference frames, Annex B progress) carries
/// over from one chunk to the next.
#[derive(Clone, Debug, Default)]
pub struct ObuDispatcher {
    parser: Parser,
    stats: StreamStatistics,
    next_index: usize,
}

impl ObuDispatcher {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            parser: Parser::new(options),
            stats: Default::default(),
            next_index: 0,
        }
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub fn statistics(&self) -> &StreamStatistics {
        &self.stats
    }

    /// Parses every OBU in `chunk`. A chunk should end on a unit boundary,
    /// e.g. be a temporal unit.
    pub fn dispatch<'a>(&mut self, chunk: &'a [u8]) -> DispatchReport<'a> {
        let mut report = DispatchReport::default();
        let mut offset = 0;

        while offset < chunk.len() {
            let index = self.next_index;

            let obu = match self.parser.parse_obu(&chunk[offset..]) {
                Ok(ParsedObu::Process(obu)) => obu,
                Ok(ParsedObu::Drop(length, header)) => {
                    self.next_index += 1;
                    self.stats.dropped_units += 1;
                    self.stats.dropped_bytes += u64::from(length);
                    report.units.push(ParsedUnit {
                        index,
                        offset,
                        header,
                        payload: UnitPayload::Dropped,
                        trace: self.parser.take_trace(),
                    });
                    offset += length as usize;
                    continue;
                }
                Ok(ParsedObu::Framing(0)) => break,
                Ok(ParsedObu::Framing(length)) => {
                    let _ = self.parser.take_trace();
                    self.stats.framing_bytes += u64::from(length);
                    offset += length as usize;
                    continue;
                }
                Err(err) => {
                    // Without a unit boundary there is no way to resume.
                    self.next_index += 1;
                    report.errors.push(self.fail(index, offset, None, err));
                    break;
                }
            };

            self.next_index += 1;
            let length = obu.total_len();
            let header = obu.header.clone();

            match self.parse_payload(obu) {
                Ok(payload) => {
                    self.stats.add(header.obu_type, length);
                    report.units.push(ParsedUnit {
                        index,
                        offset,
                        header,
                        payload,
                        trace: self.parser.take_trace(),
                    });
                }
                Err(err) => {
                    let _ = self.parser.take_trace();
                    report
                        .errors
                        .push(self.fail(index, offset, Some(header.obu_type), err));
                }
            }

            offset += length;
        }

        report
    }

    fn fail(
        &mut self,
        index: usize,
        offset: usize,
        obu_type: Option<ObuType>,
        err: ParseError,
    ) -> UnitError {
        log::warn!(
            "Failed to parse unit {} ({:?}) at byte {}, in {}: {}",
            index,
            obu_type,
            offset,
            err.scope(),
            err
        );

        self.stats.failed_units += 1;
        UnitError {
            index,
            offset,
            obu_type,
            source: err,
        }
    }

    fn parse_payload<'a>(&mut self, obu: Obu<'a>) -> ParseResult<UnitPayload<'a>> {
        let parser = &mut self.parser;

        let payload = match obu.header.obu_type {
            ObuType::TemporalDelimiter => {
                parser.parse_temporal_delimiter_obu(&obu)?;
                UnitPayload::TemporalDelimiter
            }
            ObuType::SequenceHeader => {
                UnitPayload::SequenceHeader(parser.parse_sequence_header_obu(&obu)?)
            }
            ObuType::FrameHeader | ObuType::RedundantFrameHeader => {
                UnitPayload::FrameHeader(parser.parse_frame_header_obu(&obu)?)
            }
            ObuType::TileGroup => UnitPayload::TileGroup(parser.parse_tile_group_obu(obu)?),
            ObuType::Frame => UnitPayload::Frame(parser.parse_frame_obu(obu)?),
            ObuType::Metadata => UnitPayload::Metadata(parser.parse_metadata_obu(&obu)?),
            ObuType::TileList | ObuType::Padding => {
                parser.skip_obu(&obu)?;
                UnitPayload::Skipped
            }
            obu_type => {
                log::debug!("Skipping reserved OBU type {:?}", obu_type);
                parser.skip_obu(&obu)?;
                UnitPayload::Skipped
            }
        };

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::av1::parser::tests::low_overhead_obu;
    use crate::codec::av1::parser::tests::still_frame_payload;
    use crate::codec::av1::parser::tests::still_sequence_payload;
    use crate::codec::av1::sequence::tests::SEQ_TEST_25_FPS;

    fn chunk(units: &[Vec<u8>]) -> Vec<u8> {
        units.concat()
    }

    #[test]
    fn malformed_unit_is_reported_and_skipped() {
        let _ = env_logger::try_init();

        let data = chunk(&[
            low_overhead_obu(ObuType::TemporalDelimiter, &[]),
            low_overhead_obu(ObuType::SequenceHeader, &SEQ_TEST_25_FPS),
            low_overhead_obu(ObuType::Metadata, &[1, 0x03, 0xe8, 0x01, 0x90, 0x80]),
            // metadata_type 0 is reserved.
            low_overhead_obu(ObuType::Metadata, &[0, 0x80]),
            low_overhead_obu(ObuType::Padding, &[0xaa, 0xbb]),
        ]);

        let mut dispatcher = ObuDispatcher::default();
        let report = dispatcher.dispatch(&data);

        assert_eq!(report.units.len(), 4);
        assert_eq!(report.errors.len(), 1);

        let err = &report.errors[0];
        assert_eq!(err.index, 3);
        assert_eq!(err.offset, 2 + 13 + 8);
        assert_eq!(err.obu_type, Some(ObuType::Metadata));
        assert_eq!(err.source.scope(), "metadata_obu()");

        let indices: Vec<_> = report.units.iter().map(|u| u.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 4]);
        assert!(matches!(report.units[0].payload, UnitPayload::TemporalDelimiter));
        assert!(matches!(report.units[1].payload, UnitPayload::SequenceHeader(_)));
        assert!(matches!(report.units[2].payload, UnitPayload::Metadata(MetadataObu::HdrCll(_))));
        assert!(matches!(report.units[3].payload, UnitPayload::Skipped));
        assert_eq!(report.units[3].offset, err.offset + 4);

        let stats = dispatcher.statistics();
        assert_eq!(stats.failed_units, 1);
        assert_eq!(stats.per_type[&ObuType::Metadata].units, 1);
        assert_eq!(stats.per_type[&ObuType::SequenceHeader].bytes, 13);
        assert_eq!(stats.total_units(), 5);
    }

    #[test]
    fn frame_header_before_sequence_header() {
        let data = chunk(&[
            low_overhead_obu(ObuType::FrameHeader, &[0x10]),
            low_overhead_obu(ObuType::SequenceHeader, &SEQ_TEST_25_FPS),
        ]);

        let mut dispatcher = ObuDispatcher::default();
        let report = dispatcher.dispatch(&data);

        assert_eq!(
            report.errors[0].source,
            ParseError::MissingContext {
                scope: "frame_header_obu()".into(),
                what: "sequence_header_obu()".into(),
            }
        );
        assert_eq!(report.units.len(), 1);
        assert!(dispatcher.parser().sequence_header().is_some());
    }

    #[test]
    fn framing_error_ends_the_chunk() {
        let mut data = low_overhead_obu(ObuType::TemporalDelimiter, &[]);
        // obu_size says 5 but a single byte follows.
        data.extend_from_slice(&[0x2a, 0x05, 0x01]);
        data.extend(low_overhead_obu(ObuType::Padding, &[0]));

        let mut dispatcher = ObuDispatcher::default();
        let report = dispatcher.dispatch(&data);

        assert_eq!(report.units.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].obu_type, None);
        assert!(matches!(
            report.errors[0].source,
            ParseError::BitstreamTruncated { declared: 5, available: 4, .. }
        ));

        // The next chunk starts afresh.
        let chunk = low_overhead_obu(ObuType::Padding, &[0]);
        let report = dispatcher.dispatch(&chunk);
        assert_eq!(report.units[0].index, 2);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn still_picture_stream() {
        let data = chunk(&[
            low_overhead_obu(ObuType::TemporalDelimiter, &[]),
            low_overhead_obu(ObuType::SequenceHeader, &still_sequence_payload()),
            low_overhead_obu(ObuType::Frame, &still_frame_payload(16)),
        ]);

        let mut dispatcher = ObuDispatcher::new(ParserOptions::default());
        let report = dispatcher.dispatch(&data);
        assert!(report.errors.is_empty());

        let UnitPayload::SequenceHeader(seq) = &report.units[1].payload else {
            panic!("expected a sequence header");
        };
        assert!(seq.reduced_still_picture_header);
        assert!(Arc::ptr_eq(seq, &dispatcher.parser().sequence_header().unwrap()));

        let UnitPayload::Frame(frame) = &report.units[2].payload else {
            panic!("expected a frame");
        };
        assert_eq!(frame.header.frame_width, 427);
        assert_eq!(frame.tile_group.tiles[0].tile_size, 16);

        let trace = &report.units[2].trace;
        let tree = trace.to_tree();
        assert_eq!(tree[0].name, "open_bitstream_unit()");
        assert!(tree[1].find("superres_params()").is_some());
        assert_eq!(trace.field("FrameWidth").unwrap().value(), Some(427u32.into()));
    }

    #[test]
    fn dropped_units_keep_their_header() {
        // test-25fps's sequence header with operating_point_idc = 0x101, i.e.
        // temporal layer 0 of spatial layer 0.
        let mut seq = SEQ_TEST_25_FPS;
        seq[1] = 0x01;
        seq[2] = 0x01;

        let data = chunk(&[
            low_overhead_obu(ObuType::SequenceHeader, &seq),
            // Padding OBUs with an extension, in temporal layers 1 and 0.
            vec![0x7e, 0x20, 0x01, 0xaa],
            vec![0x7e, 0x00, 0x01, 0xbb],
        ]);

        let mut dispatcher = ObuDispatcher::default();
        let report = dispatcher.dispatch(&data);
        assert!(report.errors.is_empty());
        assert_eq!(report.units.len(), 3);
        assert_eq!(dispatcher.parser().highest_operating_point(), Some(0));

        let dropped = &report.units[1];
        assert!(matches!(dropped.payload, UnitPayload::Dropped));
        assert_eq!(dropped.header.obu_type, ObuType::Padding);
        assert!(dropped.header.extension_flag);
        assert_eq!(dropped.header.temporal_id, 1);
        assert_eq!(dropped.header.spatial_id, 0);
        assert_eq!(dropped.offset, 2 + SEQ_TEST_25_FPS.len());

        assert!(matches!(report.units[2].payload, UnitPayload::Skipped));
        assert_eq!(report.units[2].header.temporal_id, 0);

        let stats = dispatcher.statistics();
        assert_eq!(stats.dropped_units, 1);
        assert_eq!(stats.dropped_bytes, 4);
        assert_eq!(stats.per_type[&ObuType::Padding].units, 1);
        assert_eq!(stats.total_units(), 3);
    }

    #[test]
    fn annexb_framing_is_not_a_unit() {
        let seq = still_sequence_payload();
        let frame = still_frame_payload(2);

        let mut frame_unit = vec![1, 0x10];
        frame_unit.push(seq.len() as u8 + 1);
        frame_unit.push(0x08);
        frame_unit.extend_from_slice(&seq);
        frame_unit.push(frame.len() as u8 + 1);
        frame_unit.push(0x30);
        frame_unit.extend_from_slice(&frame);

        let mut data = vec![frame_unit.len() as u8 + 1, frame_unit.len() as u8];
        data.extend_from_slice(&frame_unit);
        // An empty temporal unit.
        data.push(0);
        assert!(data.len() < 128);

        let mut dispatcher = ObuDispatcher::default();
        let report = dispatcher.dispatch(&data);
        assert!(report.errors.is_empty());

        let types: Vec<_> = report.units.iter().map(|u| u.header.obu_type).collect();
        assert_eq!(
            types,
            vec![ObuType::TemporalDelimiter, ObuType::SequenceHeader, ObuType::Frame]
        );

        let stats = dispatcher.statistics();
        assert_eq!(stats.framing_bytes, 1);
        assert_eq!(stats.dropped_units, 0);
        assert_eq!(stats.total_units(), 3);
        assert!(stats.to_string().contains("Annex B framing"));
    }

    #[test]
    fn sequence_header_is_shared_across_threads() {
        fn assert_send_sync<T: Send + Sync>(_: &T) {}

        let mut dispatcher = ObuDispatcher::default();
        let data = low_overhead_obu(ObuType::SequenceHeader, &SEQ_TEST_25_FPS);
        let report = dispatcher.dispatch(&data);
        let UnitPayload::SequenceHeader(seq) = &report.units[0].payload else {
            panic!("expected a sequence header");
        };

        let seq = Arc::clone(seq);
        assert_send_sync(&seq);
        let width = std::thread::spawn(move || seq.max_frame_width_minus_1 + 1)
            .join()
            .unwrap();
        assert_eq!(width, 320);
    }
}
