// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::av1::error::ParseResult;
use crate::codec::av1::frame_header::FrameHeaderObu;
use crate::codec::av1::obu::Obu;
use crate::codec::av1::reader::Reader;
use crate::codec::av1::tile_info::TileInfo;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tile {
    /// Same as TileOffset in the specification, relative to the start of the
    /// tile group.
    pub tile_offset: u32,
    /// Same as TileSize in the specification.
    pub tile_size: u32,
    pub tile_row: u32,
    pub tile_col: u32,
    pub mi_row_start: u32,
    pub mi_row_end: u32,
    pub mi_col_start: u32,
    pub mi_col_end: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TileGroupObu<'a> {
    /// The OBU backing this tile group. For a frame OBU, its payload starts
    /// after the frame header.
    pub obu: Obu<'a>,
    /// If not set, this tile group covers the entire frame.
    pub tile_start_and_end_present_flag: bool,
    /// Index of the first tile in the group.
    pub tg_start: u32,
    /// Index of the last tile in the group.
    pub tg_end: u32,
    /// The tiles from tg_start to tg_end. Use `tile_offset` to index into the
    /// OBU data. Tile data itself is not parsed.
    pub tiles: Vec<Tile>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameObu<'a> {
    pub header: FrameHeaderObu,
    pub tile_group: TileGroupObu<'a>,
}

impl<'a> TileGroupObu<'a> {
    /// Implements tile_group_obu() from 5.11.1. `r` must be byte aligned and
    /// end where the OBU payload ends.
    pub fn parse(r: &mut Reader, obu: Obu<'a>, tile_info: &TileInfo) -> ParseResult<Self> {
        let mut r = r.sub_level("tile_group_obu()");
        let mut tg = TileGroupObu {
            obu,
            ..Default::default()
        };

        if !r.is_aligned() {
            return Err(r.unaligned("tile_group_obu"));
        }

        let num_tiles = tile_info.num_tiles();
        let start_pos = r.position();

        if num_tiles > 1 {
            tg.tile_start_and_end_present_flag = r.read_flag("tile_start_and_end_present_flag")?;
        }

        if num_tiles == 1 || !tg.tile_start_and_end_present_flag {
            tg.tg_start = 0;
            tg.tg_end = num_tiles.saturating_sub(1);
        } else {
            let tile_bits = (tile_info.tile_cols_log2 + tile_info.tile_rows_log2) as usize;
            tg.tg_start = r.read_bits("tg_start", tile_bits)?;
            tg.tg_end = r.read_bits("tg_end", tile_bits)?;
        }

        if tg.tg_end >= num_tiles {
            return Err(r.out_of_spec("tg_end", tg.tg_end));
        }
        if tg.tg_start > tg.tg_end {
            return Err(r.out_of_spec("tg_start", tg.tg_start));
        }

        r.byte_alignment()?;

        let mut sz = r.remaining_bits() / 8;

        for tile_num in tg.tg_start..=tg.tg_end {
            let tile_row = tile_num / tile_info.tile_cols;
            let tile_col = tile_num % tile_info.tile_cols;
            let last_tile = tile_num == tg.tg_end;

            let tile_size = if last_tile {
                sz
            } else {
                let size_bytes = u64::from(tile_info.tile_size_bytes);
                let tile_size =
                    u64::from(r.read_le("tile_size_minus_1", size_bytes as usize)?) + 1;
                let available = sz.saturating_sub(size_bytes);
                if tile_size > available {
                    return Err(r.truncated(tile_size, available));
                }

                sz = available - tile_size;
                tile_size
            };

            let tile = Tile {
                tile_offset: ((r.position() - start_pos) / 8) as u32,
                tile_size: tile_size as u32,
                tile_row,
                tile_col,
                mi_row_start: tile_info.mi_row_starts[tile_row as usize],
                mi_row_end: tile_info.mi_row_starts[tile_row as usize + 1],
                mi_col_start: tile_info.mi_col_starts[tile_col as usize],
                mi_col_end: tile_info.mi_col_starts[tile_col as usize + 1],
            };

            // decode_tile() is out of scope: the tile data is only skipped.
            r.skip_bytes("tile_data", tile_size)?;
            tg.tiles.push(tile);
        }

        log::trace!(
            "Tile group {}..={} of {} tiles",
            tg.tg_start,
            tg.tg_end,
            num_tiles
        );

        Ok(tg)
    }

    /// Whether this tile group holds the last tile of the frame.
    pub fn is_last_in_frame(&self, tile_info: &TileInfo) -> bool {
        self.tg_end + 1 == tile_info.num_tiles()
    }
}
