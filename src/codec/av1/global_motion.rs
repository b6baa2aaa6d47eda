// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use enumn::N;

use crate::codec::av1::error::ParseResult;
use crate::codec::av1::frame_header::ReferenceFrameType;
use crate::codec::av1::frame_header::NUM_REF_FRAMES;
use crate::codec::av1::helpers;
use crate::codec::av1::reader::Reader;

pub const WARPEDMODEL_PREC_BITS: u32 = 16;
pub const WARP_PARAM_REDUCE_BITS: u32 = 6;
pub const GM_ABS_ALPHA_BITS: u32 = 12;
pub const GM_ALPHA_PREC_BITS: u32 = 15;
pub const GM_ABS_TRANS_ONLY_BITS: u32 = 9;
pub const GM_TRANS_ONLY_PREC_BITS: u32 = 3;
pub const GM_ABS_TRANS_BITS: u32 = 12;
pub const GM_TRANS_PREC_BITS: u32 = 6;

/// Warp parameters for a reference frame, in the order of 7.11.3.5.
pub type WarpParams = [i32; 6];

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarpModelType {
    #[default]
    Identity = 0,
    Translation = 1,
    RotZoom = 2,
    Affine = 3,
}

/// The identity warp, i.e. the value of gm_params when no global motion is
/// coded.
pub const fn identity_params() -> WarpParams {
    [0, 0, 1 << WARPEDMODEL_PREC_BITS, 0, 0, 1 << WARPEDMODEL_PREC_BITS]
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalMotionParams {
    /// Whether global motion parameters are present for a reference frame.
    pub is_global: [bool; NUM_REF_FRAMES],
    pub is_rot_zoom: [bool; NUM_REF_FRAMES],
    pub is_translation: [bool; NUM_REF_FRAMES],
    /// Same as gm_params, indexed by reference frame type.
    pub gm_params: [WarpParams; NUM_REF_FRAMES],
    /// Same as warpValid, see 7.11.3.6.
    pub warp_valid: [bool; NUM_REF_FRAMES],
    /// Same as GmType.
    pub gm_type: [WarpModelType; NUM_REF_FRAMES],
}

impl Default for GlobalMotionParams {
    fn default() -> Self {
        Self {
            is_global: Default::default(),
            is_rot_zoom: Default::default(),
            is_translation: Default::default(),
            gm_params: [identity_params(); NUM_REF_FRAMES],
            warp_valid: [true; NUM_REF_FRAMES],
            gm_type: Default::default(),
        }
    }
}

impl GlobalMotionParams {
    /// Implements global_motion_params() from 5.9.24. `prev_gm_params` is
    /// PrevGmParams, i.e. either the identity (after
    /// setup_past_independence()) or the parameters saved with the primary
    /// reference frame.
    pub fn parse(
        r: &mut Reader,
        frame_is_intra: bool,
        allow_high_precision_mv: bool,
        prev_gm_params: &[WarpParams; NUM_REF_FRAMES],
    ) -> ParseResult<Self> {
        let mut r = r.sub_level("global_motion_params()");
        let mut gm = GlobalMotionParams::default();

        if frame_is_intra {
            return Ok(gm);
        }

        for ref_frame in ReferenceFrameType::Last as usize..=ReferenceFrameType::AltRef as usize {
            let type_ = if r.read_flag("is_global")? {
                gm.is_global[ref_frame] = true;
                gm.is_rot_zoom[ref_frame] = r.read_flag("is_rot_zoom")?;
                if gm.is_rot_zoom[ref_frame] {
                    WarpModelType::RotZoom
                } else {
                    gm.is_translation[ref_frame] = r.read_flag("is_translation")?;
                    if gm.is_translation[ref_frame] {
                        WarpModelType::Translation
                    } else {
                        WarpModelType::Affine
                    }
                }
            } else {
                WarpModelType::Identity
            };

            gm.gm_type[ref_frame] = type_;
            r.derived("GmType", type_ as u32);
            r.annotate(format_args!("{:?}", type_));

            let prev = &prev_gm_params[ref_frame];
            let params = &mut gm.gm_params[ref_frame];

            if type_ >= WarpModelType::RotZoom {
                for idx in [2, 3] {
                    params[idx] =
                        read_global_param(&mut r, type_, idx, allow_high_precision_mv, prev)?;
                }

                if type_ == WarpModelType::Affine {
                    for idx in [4, 5] {
                        params[idx] =
                            read_global_param(&mut r, type_, idx, allow_high_precision_mv, prev)?;
                    }
                } else {
                    params[4] = -params[3];
                    params[5] = params[2];
                }
            }

            if type_ >= WarpModelType::Translation {
                for idx in [0, 1] {
                    params[idx] =
                        read_global_param(&mut r, type_, idx, allow_high_precision_mv, prev)?;
                }
            }

            gm.warp_valid[ref_frame] = setup_shear(params);
        }

        Ok(gm)
    }
}

/// Implements read_global_param() from 5.9.25.
fn read_global_param(
    r: &mut Reader,
    type_: WarpModelType,
    idx: usize,
    allow_high_precision_mv: bool,
    prev: &WarpParams,
) -> ParseResult<i32> {
    let (abs_bits, prec_bits) = if idx < 2 {
        if type_ == WarpModelType::Translation {
            let hp = u32::from(!allow_high_precision_mv);
            (GM_ABS_TRANS_ONLY_BITS - hp, GM_TRANS_ONLY_PREC_BITS - hp)
        } else {
            (GM_ABS_TRANS_BITS, GM_TRANS_PREC_BITS)
        }
    } else {
        (GM_ABS_ALPHA_BITS, GM_ALPHA_PREC_BITS)
    };

    let prec_diff = WARPEDMODEL_PREC_BITS - prec_bits;
    let (round, sub) = if idx % 3 == 2 {
        (1 << WARPEDMODEL_PREC_BITS, 1 << prec_bits)
    } else {
        (0, 0)
    };

    let mx = 1 << abs_bits;
    let reference = (prev[idx] >> prec_diff) - sub;
    let value = r.decode_signed_subexp_with_ref("gm_params", -mx, mx + 1, reference)?;

    Ok((value << prec_diff) + round)
}

/// Implements the shear process of 7.11.3.6 and returns warpValid.
pub fn setup_shear(warp_params: &WarpParams) -> bool {
    const LIMIT: i64 = 1 << WARPEDMODEL_PREC_BITS;

    if *warp_params == identity_params() {
        return true;
    }

    let clip = |v: i64| v.clamp(-32768, 32767);
    let p: [i64; 6] = warp_params.map(i64::from);

    let alpha0 = clip(p[2] - LIMIT);
    let beta0 = clip(p[3]);

    let Some((div_shift, div_factor)) = helpers::resolve_divisor(p[2]) else {
        return false;
    };

    let v = p[4] << WARPEDMODEL_PREC_BITS;
    let gamma0 = clip(helpers::round2signed(v.saturating_mul(div_factor), div_shift));
    let w = p[3] * p[4];
    let delta0 = clip(p[5] - helpers::round2signed(w.saturating_mul(div_factor), div_shift) - LIMIT);

    let reduce = |v: i64| {
        helpers::round2signed(v, WARP_PARAM_REDUCE_BITS) << WARP_PARAM_REDUCE_BITS
    };
    let (alpha, beta, gamma, delta) = (reduce(alpha0), reduce(beta0), reduce(gamma0), reduce(delta0));

    4 * alpha.abs() + 7 * beta.abs() < LIMIT && 4 * gamma.abs() + 4 * delta.abs() < LIMIT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream_utils::BitWriter;
    use crate::trace::SyntaxTrace;

    #[test]
    fn intra_frames_read_nothing() {
        let _ = env_logger::try_init();

        let mut r = Reader::untraced(&[]);
        let prev = [identity_params(); NUM_REF_FRAMES];
        let gm = GlobalMotionParams::parse(&mut r, true, false, &prev).unwrap();

        assert_eq!(gm, GlobalMotionParams::default());
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn translation_for_last_frame() {
        let mut w = BitWriter::new();
        // LAST_FRAME: is_global, !is_rot_zoom, is_translation.
        w.write_bit(true).write_bit(false).write_bit(true);
        // gm_params[1][0]: subexp_more_bits = 0, subexp_bits = 2, i.e. +1.
        w.write_bit(false).write_f(3, 2);
        // gm_params[1][1]: subexp_bits = 1, i.e. -1.
        w.write_bit(false).write_f(3, 1);
        for _ in ReferenceFrameType::Last2 as usize..=ReferenceFrameType::AltRef as usize {
            w.write_bit(false);
        }
        let data = w.into_bytes();

        let mut r = Reader::new(&data, SyntaxTrace::default());
        let prev = [identity_params(); NUM_REF_FRAMES];
        let gm = GlobalMotionParams::parse(&mut r, false, false, &prev).unwrap();

        let last = ReferenceFrameType::Last as usize;
        assert_eq!(gm.gm_type[last], WarpModelType::Translation);
        assert_eq!(gm.gm_params[last], [16384, -16384, 65536, 0, 0, 65536]);
        assert!(gm.warp_valid[last]);
        assert_eq!(gm.gm_type[ReferenceFrameType::AltRef as usize], WarpModelType::Identity);
        assert_eq!(r.position(), 17);

        let tree = r.into_trace().to_tree();
        let scope = &tree[0];
        assert_eq!(scope.name, "global_motion_params()");
        assert_eq!(scope.bits, 0..17);
        assert_eq!(scope.children.iter().filter(|n| n.name == "gm_params").count(), 2);
    }

    #[test]
    fn shear_validity() {
        assert!(setup_shear(&identity_params()));
        assert!(setup_shear(&[100, -100, 65536, 0, 0, 65536]));

        // alpha is too large.
        assert!(!setup_shear(&[0, 0, 65536 + 40000, 0, 0, 65536]));
        // A zero divisor cannot be resolved.
        assert!(!setup_shear(&[0, 0, 0, 0, 0, 65536]));
        // Large values must not overflow.
        assert!(!setup_shear(&[0, 0, 65536, i32::MAX, i32::MIN, i32::MAX]));
    }
}
