// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! obudump, prints the OBUs of an AV1 stream along with the syntax elements
//! read from them. Accepts IVF files as well as raw low-overhead or Annex B
//! streams.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use argh::FromArgs;

use obu_inspect::bitstream_utils::IvfIterator;
use obu_inspect::codec::av1::dispatcher::ObuDispatcher;
use obu_inspect::codec::av1::dispatcher::ParsedUnit;
use obu_inspect::codec::av1::dispatcher::UnitPayload;
use obu_inspect::codec::av1::parser::ParserOptions;
use obu_inspect::trace::TraceOptions;
use obu_inspect::trace::DEFAULT_TRACE_CAPACITY;

const IVF_SIGNATURE: &[u8] = b"DKIF";

/// Prints the OBUs of an AV1 stream
#[derive(Debug, FromArgs)]
struct Args {
    /// input file, either IVF or a raw OBU stream
    #[argh(positional)]
    input: PathBuf,

    /// print every syntax element read from each OBU
    #[argh(switch)]
    trace: bool,

    /// maximum number of trace entries kept per OBU. Default: 16384
    #[argh(option, default = "DEFAULT_TRACE_CAPACITY")]
    trace_capacity: usize,

    /// operating point to select. Default: 0
    #[argh(option, default = "0")]
    operating_point: u32,

    /// treat raw input as low-overhead without probing for Annex B
    #[argh(switch)]
    no_annexb_probe: bool,
}

fn describe(unit: &ParsedUnit) -> String {
    match &unit.payload {
        UnitPayload::SequenceHeader(seq) => format!(
            "{:?}, {}x{} max, {:?}",
            seq.seq_profile,
            seq.max_frame_width_minus_1 + 1,
            seq.max_frame_height_minus_1 + 1,
            seq.bit_depth
        ),
        UnitPayload::FrameHeader(fh) => format!(
            "{:?}, {}x{}, upscaled width {}",
            fh.frame_type, fh.frame_width, fh.frame_height, fh.upscaled_width
        ),
        UnitPayload::Frame(frame) => format!(
            "{:?}, {}x{}, upscaled width {}, tiles {}..={}",
            frame.header.frame_type,
            frame.header.frame_width,
            frame.header.frame_height,
            frame.header.upscaled_width,
            frame.tile_group.tg_start,
            frame.tile_group.tg_end
        ),
        UnitPayload::TileGroup(tg) => format!("tiles {}..={}", tg.tg_start, tg.tg_end),
        UnitPayload::Metadata(metadata) => format!("metadata type {}", metadata.metadata_type()),
        UnitPayload::TemporalDelimiter | UnitPayload::Skipped => String::new(),
        UnitPayload::Dropped => format!(
            "dropped, temporal layer {}, spatial layer {}",
            unit.header.temporal_id, unit.header.spatial_id
        ),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Args = argh::from_env();

    let mut input = File::open(&args.input)
        .with_context(|| format!("error opening {}", args.input.display()))?;
    let input = {
        let mut buf = Vec::new();
        input.read_to_end(&mut buf).context("error reading input file")?;
        buf
    };

    let chunks: Box<dyn Iterator<Item = &[u8]> + '_> = if input.starts_with(IVF_SIGNATURE) {
        Box::new(IvfIterator::new(&input))
    } else {
        Box::new(std::iter::once(input.as_slice()))
    };

    let mut dispatcher = ObuDispatcher::new(ParserOptions {
        operating_point: args.operating_point,
        trace: TraceOptions {
            enabled: args.trace,
            capacity: args.trace_capacity,
        },
        probe_annexb: !args.no_annexb_probe,
    });

    for (chunk_index, chunk) in chunks.enumerate() {
        let report = dispatcher.dispatch(chunk);

        for unit in &report.units {
            println!(
                "#{} chunk {} @{}: {:?} {}",
                unit.index,
                chunk_index,
                unit.offset,
                unit.header.obu_type,
                describe(unit)
            );

            if args.trace {
                print!("{}", unit.trace);
            }
        }

        for err in &report.errors {
            println!("#{} chunk {} @{}: error: {}", err.index, chunk_index, err.offset, err);
        }
    }

    println!("{}", dispatcher.statistics());

    Ok(())
}
