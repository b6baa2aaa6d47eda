// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::av1::error::ParseResult;
use crate::codec::av1::helpers;
use crate::codec::av1::reader::Reader;
use crate::codec::av1::sequence::SequenceHeaderObu;

pub const MAX_TILE_COLS: usize = 64;
pub const MAX_TILE_ROWS: usize = 64;
pub const MAX_TILE_WIDTH: u32 = 4096;
pub const MAX_TILE_HEIGHT: u32 = 2304;
pub const MAX_TILE_AREA: u32 = MAX_TILE_WIDTH * MAX_TILE_HEIGHT;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileInfo {
    /// If set, all tiles have the same size, except for the ones at the right
    /// and bottom edges. If not set, the tile sizes are coded.
    pub uniform_tile_spacing_flag: bool,
    /// Width of each tile minus 1, in superblocks.
    pub width_in_sbs_minus_1: [u32; MAX_TILE_COLS],
    /// Height of each tile minus 1, in superblocks.
    pub height_in_sbs_minus_1: [u32; MAX_TILE_ROWS],
    /// Which tile to use for the CDF update.
    pub context_update_tile_id: u32,
    /// Start column of each tile in 4x4 luma units. The entry after the last
    /// tile is MiCols.
    pub mi_col_starts: [u32; MAX_TILE_COLS + 1],
    /// Start row of each tile in 4x4 luma units. The entry after the last
    /// tile is MiRows.
    pub mi_row_starts: [u32; MAX_TILE_ROWS + 1],
    pub tile_cols_log2: u32,
    pub tile_cols: u32,
    pub tile_rows_log2: u32,
    pub tile_rows: u32,
    /// Number of bytes used to code each tile size. 0 when the frame has a
    /// single tile.
    pub tile_size_bytes: u32,
}

impl Default for TileInfo {
    fn default() -> Self {
        Self {
            uniform_tile_spacing_flag: Default::default(),
            width_in_sbs_minus_1: [0; MAX_TILE_COLS],
            height_in_sbs_minus_1: [0; MAX_TILE_ROWS],
            context_update_tile_id: Default::default(),
            mi_col_starts: [0; MAX_TILE_COLS + 1],
            mi_row_starts: [0; MAX_TILE_ROWS + 1],
            tile_cols_log2: Default::default(),
            tile_cols: Default::default(),
            tile_rows_log2: Default::default(),
            tile_rows: Default::default(),
            tile_size_bytes: Default::default(),
        }
    }
}

impl TileInfo {
    /// Implements tile_info() from 5.9.15 for a frame of `mi_cols` x
    /// `mi_rows`.
    pub fn parse(
        r: &mut Reader,
        seq: &SequenceHeaderObu,
        mi_cols: u32,
        mi_rows: u32,
    ) -> ParseResult<Self> {
        let mut r = r.sub_level("tile_info()");
        let mut ti = TileInfo::default();

        let (sb_cols, sb_rows, sb_shift) = if seq.use_128x128_superblock {
            ((mi_cols + 31) >> 5, (mi_rows + 31) >> 5, 5)
        } else {
            ((mi_cols + 15) >> 4, (mi_rows + 15) >> 4, 4)
        };
        let sb_size = sb_shift + 2;

        let max_tile_width_sb = MAX_TILE_WIDTH >> sb_size;
        let mut max_tile_area_sb = MAX_TILE_AREA >> (2 * sb_size);

        let min_log2_tile_cols = helpers::tile_log2(max_tile_width_sb, sb_cols);
        let max_log2_tile_cols = helpers::tile_log2(1, std::cmp::min(sb_cols, MAX_TILE_COLS as u32));
        let max_log2_tile_rows = helpers::tile_log2(1, std::cmp::min(sb_rows, MAX_TILE_ROWS as u32));
        let min_log2_tiles = std::cmp::max(
            min_log2_tile_cols,
            helpers::tile_log2(max_tile_area_sb, sb_rows * sb_cols),
        );

        ti.uniform_tile_spacing_flag = r.read_flag("uniform_tile_spacing_flag")?;

        if ti.uniform_tile_spacing_flag {
            ti.tile_cols_log2 = min_log2_tile_cols;
            while ti.tile_cols_log2 < max_log2_tile_cols {
                if r.read_flag("increment_tile_cols_log2")? {
                    ti.tile_cols_log2 += 1;
                } else {
                    break;
                }
            }

            let tile_width_sb = (sb_cols + (1 << ti.tile_cols_log2) - 1) >> ti.tile_cols_log2;
            ti.tile_cols = uniform_starts(
                &mut ti.mi_col_starts,
                &mut ti.width_in_sbs_minus_1,
                sb_cols,
                tile_width_sb,
                sb_shift,
                mi_cols,
            )
            .ok_or_else(|| r.out_of_spec("TileCols", MAX_TILE_COLS as u32 + 1))?;

            let min_log2_tile_rows = min_log2_tiles.saturating_sub(ti.tile_cols_log2);
            ti.tile_rows_log2 = min_log2_tile_rows;
            while ti.tile_rows_log2 < max_log2_tile_rows {
                if r.read_flag("increment_tile_rows_log2")? {
                    ti.tile_rows_log2 += 1;
                } else {
                    break;
                }
            }

            let tile_height_sb = (sb_rows + (1 << ti.tile_rows_log2) - 1) >> ti.tile_rows_log2;
            ti.tile_rows = uniform_starts(
                &mut ti.mi_row_starts,
                &mut ti.height_in_sbs_minus_1,
                sb_rows,
                tile_height_sb,
                sb_shift,
                mi_rows,
            )
            .ok_or_else(|| r.out_of_spec("TileRows", MAX_TILE_ROWS as u32 + 1))?;
        } else {
            let mut widest_tile_sb = 0;
            let mut start_sb = 0;
            let mut i = 0;

            while start_sb < sb_cols {
                if i >= MAX_TILE_COLS {
                    return Err(r.out_of_spec("TileCols", i as u32 + 1));
                }

                ti.mi_col_starts[i] = start_sb << sb_shift;
                let max_width = std::cmp::min(sb_cols - start_sb, max_tile_width_sb);
                ti.width_in_sbs_minus_1[i] = r.read_ns("width_in_sbs_minus_1", max_width)?;

                let size_sb = ti.width_in_sbs_minus_1[i] + 1;
                widest_tile_sb = std::cmp::max(size_sb, widest_tile_sb);
                start_sb += size_sb;
                i += 1;
            }

            ti.mi_col_starts[i] = mi_cols;
            ti.tile_cols = i as u32;
            ti.tile_cols_log2 = helpers::tile_log2(1, ti.tile_cols);

            if min_log2_tiles > 0 {
                max_tile_area_sb = (sb_rows * sb_cols) >> (min_log2_tiles + 1);
            } else {
                max_tile_area_sb = sb_rows * sb_cols;
            }

            let max_tile_height_sb = std::cmp::max(max_tile_area_sb / widest_tile_sb.max(1), 1);
            let mut start_sb = 0;
            let mut i = 0;

            while start_sb < sb_rows {
                if i >= MAX_TILE_ROWS {
                    return Err(r.out_of_spec("TileRows", i as u32 + 1));
                }

                ti.mi_row_starts[i] = start_sb << sb_shift;
                let max_height = std::cmp::min(sb_rows - start_sb, max_tile_height_sb);
                ti.height_in_sbs_minus_1[i] = r.read_ns("height_in_sbs_minus_1", max_height)?;

                start_sb += ti.height_in_sbs_minus_1[i] + 1;
                i += 1;
            }

            ti.mi_row_starts[i] = mi_rows;
            ti.tile_rows = i as u32;
            ti.tile_rows_log2 = helpers::tile_log2(1, ti.tile_rows);
        }

        r.derived("TileCols", ti.tile_cols);
        r.derived("TileRows", ti.tile_rows);

        if ti.tile_cols_log2 > 0 || ti.tile_rows_log2 > 0 {
            let num_bits = (ti.tile_rows_log2 + ti.tile_cols_log2) as usize;
            ti.context_update_tile_id = r.read_bits("context_update_tile_id", num_bits)?;

            if ti.context_update_tile_id >= ti.tile_rows * ti.tile_cols {
                return Err(r.out_of_spec("context_update_tile_id", ti.context_update_tile_id));
            }

            ti.tile_size_bytes = r.read_bits("tile_size_bytes_minus_1", 2)? + 1;
        }

        Ok(ti)
    }

    pub fn num_tiles(&self) -> u32 {
        self.tile_cols * self.tile_rows
    }
}

/// Fills the start positions of uniformly spaced tiles and returns how many
/// there are, or `None` if there are too many.
fn uniform_starts(
    starts: &mut [u32],
    sizes_minus_1: &mut [u32],
    sb_count: u32,
    tile_size_sb: u32,
    sb_shift: u32,
    mi_count: u32,
) -> Option<u32> {
    let max_tiles = sizes_minus_1.len();
    let mut i = 0;
    let mut start_sb = 0;

    while start_sb < sb_count {
        if i >= max_tiles {
            return None;
        }

        starts[i] = start_sb << sb_shift;
        i += 1;
        start_sb += tile_size_sb;
    }

    starts[i] = mi_count;

    /* compute this anyways */
    for j in 0..i {
        sizes_minus_1[j] = ((starts[j + 1] - starts[j] + ((1 << sb_shift) - 1)) >> sb_shift) - 1;
    }

    Some(i as u32)
}
