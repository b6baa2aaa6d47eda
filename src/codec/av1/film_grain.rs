// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::av1::error::ParseResult;
use crate::codec::av1::frame_header::FrameType;
use crate::codec::av1::frame_header::REFS_PER_FRAME;
use crate::codec::av1::reader::Reader;
use crate::codec::av1::sequence::ColorConfig;

pub const MAX_NUM_Y_POINTS: usize = 16;
pub const MAX_NUM_CB_POINTS: usize = 16;
pub const MAX_NUM_CR_POINTS: usize = 16;
pub const MAX_NUM_POS_LUMA: usize = 25;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilmGrainParams {
    /// If set, film grain should be added to this frame.
    pub apply_grain: bool,
    /// Starting value of the pseudo-random numbers used for grain synthesis.
    pub grain_seed: u16,
    /// If not set, the parameters of `film_grain_params_ref_idx` are used.
    pub update_grain: bool,
    pub film_grain_params_ref_idx: u8,
    /// Number of points of the piece-wise linear luma scaling function.
    pub num_y_points: u8,
    pub point_y_value: [u8; MAX_NUM_Y_POINTS],
    pub point_y_scaling: [u8; MAX_NUM_Y_POINTS],
    /// Specifies that the chroma scaling is inferred from the luma scaling.
    pub chroma_scaling_from_luma: bool,
    pub num_cb_points: u8,
    pub point_cb_value: [u8; MAX_NUM_CB_POINTS],
    pub point_cb_scaling: [u8; MAX_NUM_CB_POINTS],
    pub num_cr_points: u8,
    pub point_cr_value: [u8; MAX_NUM_CR_POINTS],
    pub point_cr_scaling: [u8; MAX_NUM_CR_POINTS],
    pub grain_scaling_minus_8: u8,
    /// Number of auto-regressive coefficients for luma and chroma.
    pub ar_coeff_lag: u32,
    pub ar_coeffs_y_plus_128: [u8; MAX_NUM_POS_LUMA],
    pub ar_coeffs_cb_plus_128: [u8; MAX_NUM_POS_LUMA],
    pub ar_coeffs_cr_plus_128: [u8; MAX_NUM_POS_LUMA],
    pub ar_coeff_shift_minus_6: u8,
    pub grain_scale_shift: u8,
    pub cb_mult: u8,
    pub cb_luma_mult: u8,
    pub cb_offset: u16,
    pub cr_mult: u8,
    pub cr_luma_mult: u8,
    pub cr_offset: u16,
    pub overlap_flag: bool,
    pub clip_to_restricted_range: bool,
}

/// Frame level values film_grain_params() depends on.
pub struct FilmGrainContext<'a> {
    pub film_grain_params_present: bool,
    pub show_frame: bool,
    pub showable_frame: bool,
    pub frame_type: FrameType,
    pub ref_frame_idx: &'a [u8; REFS_PER_FRAME],
    pub color_config: &'a ColorConfig,
}

/// Reads `count` (value, scaling) pairs, checking that the values increase.
fn read_points(
    r: &mut Reader,
    value_name: &str,
    scaling_name: &str,
    count: usize,
    values: &mut [u8],
    scalings: &mut [u8],
) -> ParseResult<()> {
    for i in 0..count {
        values[i] = r.read_bits(value_name, 8)? as u8;
        if i > 0 && values[i - 1] >= values[i] {
            return Err(r.out_of_spec(value_name, values[i]));
        }
        scalings[i] = r.read_bits(scaling_name, 8)? as u8;
    }

    Ok(())
}

fn read_coeffs(r: &mut Reader, name: &str, count: usize, coeffs: &mut [u8]) -> ParseResult<()> {
    for coeff in coeffs.iter_mut().take(count) {
        *coeff = r.read_bits(name, 8)? as u8;
    }

    Ok(())
}

impl FilmGrainParams {
    /// Implements film_grain_params() from 5.9.30. When update_grain is not
    /// set, `load_grain_params` is called with film_grain_params_ref_idx to
    /// fetch the parameters saved with that reference frame.
    pub fn parse(
        r: &mut Reader,
        ctx: &FilmGrainContext,
        load_grain_params: impl FnOnce(u8) -> FilmGrainParams,
    ) -> ParseResult<Self> {
        let mut r = r.sub_level("film_grain_params()");

        if !ctx.film_grain_params_present || (!ctx.show_frame && !ctx.showable_frame) {
            return Ok(Default::default());
        }

        let mut fg = FilmGrainParams {
            apply_grain: r.read_flag("apply_grain")?,
            ..Default::default()
        };

        if !fg.apply_grain {
            return Ok(Default::default());
        }

        fg.grain_seed = r.read_bits("grain_seed", 16)? as u16;
        fg.update_grain = if ctx.frame_type == FrameType::InterFrame {
            r.read_flag("update_grain")?
        } else {
            true
        };

        if !fg.update_grain {
            let ref_idx = r.read_bits("film_grain_params_ref_idx", 3)? as u8;
            if !ctx.ref_frame_idx.contains(&ref_idx) {
                return Err(r.out_of_spec("film_grain_params_ref_idx", ref_idx));
            }

            let grain_seed = fg.grain_seed;
            fg = load_grain_params(ref_idx);
            fg.grain_seed = grain_seed;
            fg.film_grain_params_ref_idx = ref_idx;
            fg.update_grain = false;
            return Ok(fg);
        }

        fg.num_y_points = r.read_bits("num_y_points", 4)? as u8;
        if fg.num_y_points > 14 {
            return Err(r.out_of_spec("num_y_points", fg.num_y_points));
        }
        read_points(
            &mut r,
            "point_y_value",
            "point_y_scaling",
            usize::from(fg.num_y_points),
            &mut fg.point_y_value,
            &mut fg.point_y_scaling,
        )?;

        let cc = ctx.color_config;
        fg.chroma_scaling_from_luma = if cc.mono_chrome {
            false
        } else {
            r.read_flag("chroma_scaling_from_luma")?
        };

        if cc.mono_chrome
            || fg.chroma_scaling_from_luma
            || (cc.subsampling_x && cc.subsampling_y && fg.num_y_points == 0)
        {
            fg.num_cb_points = 0;
            fg.num_cr_points = 0;
        } else {
            fg.num_cb_points = r.read_bits("num_cb_points", 4)? as u8;
            if fg.num_cb_points > 10 {
                return Err(r.out_of_spec("num_cb_points", fg.num_cb_points));
            }
            read_points(
                &mut r,
                "point_cb_value",
                "point_cb_scaling",
                usize::from(fg.num_cb_points),
                &mut fg.point_cb_value,
                &mut fg.point_cb_scaling,
            )?;

            fg.num_cr_points = r.read_bits("num_cr_points", 4)? as u8;
            if fg.num_cr_points > 10 {
                return Err(r.out_of_spec("num_cr_points", fg.num_cr_points));
            }
            if cc.subsampling_x && cc.subsampling_y && (fg.num_cb_points == 0) != (fg.num_cr_points == 0) {
                return Err(r.out_of_spec("num_cr_points", fg.num_cr_points));
            }
            read_points(
                &mut r,
                "point_cr_value",
                "point_cr_scaling",
                usize::from(fg.num_cr_points),
                &mut fg.point_cr_value,
                &mut fg.point_cr_scaling,
            )?;
        }

        fg.grain_scaling_minus_8 = r.read_bits("grain_scaling_minus_8", 2)? as u8;
        fg.ar_coeff_lag = r.read_bits("ar_coeff_lag", 2)?;

        let num_pos_luma = (2 * fg.ar_coeff_lag * (fg.ar_coeff_lag + 1)) as usize;
        let num_pos_chroma = if fg.num_y_points > 0 {
            read_coeffs(&mut r, "ar_coeffs_y_plus_128", num_pos_luma, &mut fg.ar_coeffs_y_plus_128)?;
            num_pos_luma + 1
        } else {
            num_pos_luma
        };

        if fg.chroma_scaling_from_luma || fg.num_cb_points > 0 {
            read_coeffs(&mut r, "ar_coeffs_cb_plus_128", num_pos_chroma, &mut fg.ar_coeffs_cb_plus_128)?;
        }

        if fg.chroma_scaling_from_luma || fg.num_cr_points > 0 {
            read_coeffs(&mut r, "ar_coeffs_cr_plus_128", num_pos_chroma, &mut fg.ar_coeffs_cr_plus_128)?;
        }

        fg.ar_coeff_shift_minus_6 = r.read_bits("ar_coeff_shift_minus_6", 2)? as u8;
        fg.grain_scale_shift = r.read_bits("grain_scale_shift", 2)? as u8;

        if fg.num_cb_points > 0 {
            fg.cb_mult = r.read_bits("cb_mult", 8)? as u8;
            fg.cb_luma_mult = r.read_bits("cb_luma_mult", 8)? as u8;
            fg.cb_offset = r.read_bits("cb_offset", 9)? as u16;
        }

        if fg.num_cr_points > 0 {
            fg.cr_mult = r.read_bits("cr_mult", 8)? as u8;
            fg.cr_luma_mult = r.read_bits("cr_luma_mult", 8)? as u8;
            fg.cr_offset = r.read_bits("cr_offset", 9)? as u16;
        }

        fg.overlap_flag = r.read_flag("overlap_flag")?;
        fg.clip_to_restricted_range = r.read_flag("clip_to_restricted_range")?;

        Ok(fg)
    }
}
