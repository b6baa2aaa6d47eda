// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Integer helpers from the AV1 specification. They are pure functions of
//! their inputs and never panic, whatever the bitstream contained.

use crate::codec::av1::frame_header::NUM_REF_FRAMES;
use crate::codec::av1::superres::SUPERRES_NUM;

const DIV_LUT: [i64; 257] = [
    16384, 16320, 16257, 16194, 16132, 16070, 16009, 15948, 15888, 15828, 15768, 15709, 15650,
    15592, 15534, 15477, 15420, 15364, 15308, 15252, 15197, 15142, 15087, 15033, 14980, 14926,
    14873, 14821, 14769, 14717, 14665, 14614, 14564, 14513, 14463, 14413, 14364, 14315, 14266,
    14218, 14170, 14122, 14075, 14028, 13981, 13935, 13888, 13843, 13797, 13752, 13707, 13662,
    13618, 13574, 13530, 13487, 13443, 13400, 13358, 13315, 13273, 13231, 13190, 13148, 13107,
    13066, 13026, 12985, 12945, 12906, 12866, 12827, 12788, 12749, 12710, 12672, 12633, 12596,
    12558, 12520, 12483, 12446, 12409, 12373, 12336, 12300, 12264, 12228, 12193, 12157, 12122,
    12087, 12053, 12018, 11984, 11950, 11916, 11882, 11848, 11815, 11782, 11749, 11716, 11683,
    11651, 11619, 11586, 11555, 11523, 11491, 11460, 11429, 11398, 11367, 11336, 11305, 11275,
    11245, 11215, 11185, 11155, 11125, 11096, 11067, 11038, 11009, 10980, 10951, 10923, 10894,
    10866, 10838, 10810, 10782, 10755, 10727, 10700, 10673, 10645, 10618, 10592, 10565, 10538,
    10512, 10486, 10460, 10434, 10408, 10382, 10356, 10331, 10305, 10280, 10255, 10230, 10205,
    10180, 10156, 10131, 10107, 10082, 10058, 10034, 10010, 9986, 9963, 9939, 9916, 9892, 9869,
    9846, 9823, 9800, 9777, 9754, 9732, 9709, 9687, 9664, 9642, 9620, 9598, 9576, 9554, 9533, 9511,
    9489, 9468, 9447, 9425, 9404, 9383, 9362, 9341, 9321, 9300, 9279, 9259, 9239, 9218, 9198, 9178,
    9158, 9138, 9118, 9098, 9079, 9059, 9039, 9020, 9001, 8981, 8962, 8943, 8924, 8905, 8886, 8867,
    8849, 8830, 8812, 8793, 8775, 8756, 8738, 8720, 8702, 8684, 8666, 8648, 8630, 8613, 8595, 8577,
    8560, 8542, 8525, 8508, 8490, 8473, 8456, 8439, 8422, 8405, 8389, 8372, 8355, 8339, 8322, 8306,
    8289, 8273, 8257, 8240, 8224, 8208, 8192,
];

const DIV_LUT_BITS: u32 = 8;
const DIV_LUT_PREC_BITS: u32 = 14;

/// Implements FloorLog2(x), which is defined to be the floor of the base 2
/// logarithm of the input x.
///
/// AV1 only calls this with x >= 1. 0 is mapped to 0 rather than panicking.
pub fn floor_log2(x: u32) -> u32 {
    if x == 0 {
        0
    } else {
        31 - x.leading_zeros()
    }
}

/// Implements 5.9.3. Get relative distance function
pub fn get_relative_dist(enable_order_hint: bool, order_hint_bits: u32, a: i32, b: i32) -> i32 {
    if !enable_order_hint || order_hint_bits == 0 {
        0
    } else {
        let diff = a - b;
        let m = 1 << (order_hint_bits - 1);
        (diff & (m - 1)) - (diff & m)
    }
}

/// Implements find_latest_backward from section 7.8.
pub fn find_latest_backward(
    shifted_order_hints: &[i32; NUM_REF_FRAMES],
    used_frame: &[bool; NUM_REF_FRAMES],
    cur_frame_hint: i32,
    latest_order_hint: &mut i32,
) -> Option<usize> {
    let mut ref_ = None;

    for i in 0..NUM_REF_FRAMES {
        let hint = shifted_order_hints[i];
        if !used_frame[i] && hint >= cur_frame_hint && (ref_.is_none() || hint >= *latest_order_hint)
        {
            ref_ = Some(i);
            *latest_order_hint = hint;
        }
    }

    ref_
}

/// Implements find_earliest_backward from section 7.8.
pub fn find_earliest_backward(
    shifted_order_hints: &[i32; NUM_REF_FRAMES],
    used_frame: &[bool; NUM_REF_FRAMES],
    cur_frame_hint: i32,
    earliest_order_hint: &mut i32,
) -> Option<usize> {
    let mut ref_ = None;

    for i in 0..NUM_REF_FRAMES {
        let hint = shifted_order_hints[i];
        if !used_frame[i]
            && hint >= cur_frame_hint
            && (ref_.is_none() || hint < *earliest_order_hint)
        {
            ref_ = Some(i);
            *earliest_order_hint = hint;
        }
    }

    ref_
}

/// Implements find_latest_forward from section 7.8.
pub fn find_latest_forward(
    shifted_order_hints: &[i32; NUM_REF_FRAMES],
    used_frame: &[bool; NUM_REF_FRAMES],
    cur_frame_hint: i32,
    latest_order_hint: &mut i32,
) -> Option<usize> {
    let mut ref_ = None;

    for i in 0..NUM_REF_FRAMES {
        let hint = shifted_order_hints[i];
        if !used_frame[i] && hint < cur_frame_hint && (ref_.is_none() || hint >= *latest_order_hint)
        {
            ref_ = Some(i);
            *latest_order_hint = hint;
        }
    }

    ref_
}

/// Smallest k such that `blk_size << k` is at least `target`. See 5.9.15.
pub fn tile_log2(blk_size: u32, target: u32) -> u32 {
    if blk_size == 0 {
        return 0;
    }

    let mut k = 0;
    while (u64::from(blk_size) << k) < u64::from(target) {
        k += 1;
    }

    k
}

pub fn clip3(x: i32, y: i32, z: i32) -> i32 {
    if z < x {
        x
    } else if z > y {
        y
    } else {
        z
    }
}

/// 5.9.29
pub fn inverse_recenter(r: i32, v: i32) -> i32 {
    if v > 2 * r {
        v
    } else if v & 1 != 0 {
        r - ((v + 1) >> 1)
    } else {
        r + (v >> 1)
    }
}

/// Implements Round2. See 4.7: mathematical functions.
pub fn round2(x: u64, n: u32) -> u64 {
    if n == 0 {
        return x;
    }

    (x + (1 << (n - 1))) >> n
}

/// Implements Round2Signed. See 4.7: mathematical functions.
pub fn round2signed(x: i64, n: u32) -> i64 {
    if x >= 0 {
        round2(x as u64, n) as i64
    } else {
        -(round2(x.unsigned_abs(), n) as i64)
    }
}

/// Implements 7.11.3.7. Resolve divisor process
///
/// Returns `None` for a zero divisor.
pub fn resolve_divisor(d: i64) -> Option<(u32, i64)> {
    let abs_d = u32::try_from(d.unsigned_abs()).ok().filter(|&d| d > 0)?;
    let n = floor_log2(abs_d);
    let e = u64::from(abs_d - (1 << n));

    let f = if n > DIV_LUT_BITS {
        round2(e, n - DIV_LUT_BITS)
    } else {
        e << (DIV_LUT_BITS - n)
    };

    let div_shift = n + DIV_LUT_PREC_BITS;
    let div_factor = *DIV_LUT.get(f as usize)?;
    let div_factor = if d < 0 { -div_factor } else { div_factor };

    Some((div_shift, div_factor))
}

/// Downscaled frame width for a super-resolution denominator, i.e. FrameWidth
/// in 5.9.8. `superres_denom` is in `SUPERRES_NUM..=16`.
pub fn superres_frame_width(upscaled_width: u32, superres_denom: u32) -> u32 {
    (upscaled_width * SUPERRES_NUM + superres_denom / 2) / superres_denom
}

/// Size in 4x4 mode info units (MiCols / MiRows) of a frame dimension. See
/// 5.9.9.
pub fn mi_size(dimension: u32) -> u32 {
    2 * ((dimension + 7) >> 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_log2_values() {
        assert_eq!(floor_log2(1), 0);
        assert_eq!(floor_log2(5), 2);
        assert_eq!(floor_log2(8), 3);
        assert_eq!(floor_log2(u32::MAX), 31);
        assert_eq!(floor_log2(0), 0);
    }

    #[test]
    fn relative_dist_wraps() {
        assert_eq!(get_relative_dist(true, 7, 2, 126), 4);
        assert_eq!(get_relative_dist(true, 7, 126, 2), -4);
        assert_eq!(get_relative_dist(false, 7, 126, 2), 0);
        assert_eq!(get_relative_dist(true, 0, 126, 2), 0);
    }

    #[test]
    fn rounding() {
        assert_eq!(round2(5, 1), 3);
        assert_eq!(round2(4, 2), 1);
        assert_eq!(round2(7, 0), 7);
        assert_eq!(round2signed(-5, 1), -3);
        assert_eq!(round2signed(5, 1), 3);
    }

    #[test]
    fn divisor() {
        assert_eq!(resolve_divisor(1 << 16), Some((30, 16384)));
        assert_eq!(resolve_divisor(-(1 << 16)), Some((30, -16384)));
        assert_eq!(resolve_divisor(3), Some((15, 10923)));
        assert_eq!(resolve_divisor(0), None);
    }

    #[test]
    fn tile_log2_values() {
        assert_eq!(tile_log2(1, 1), 0);
        assert_eq!(tile_log2(1, 5), 3);
        assert_eq!(tile_log2(32, 30), 0);
        assert_eq!(tile_log2(0, 30), 0);
    }

    #[test]
    fn superres_width() {
        assert_eq!(superres_frame_width(640, 8), 640);
        assert_eq!(superres_frame_width(640, 12), 427);
        assert_eq!(superres_frame_width(640, 16), 320);
        assert_eq!(mi_size(427), 108);
        assert_eq!(mi_size(320), 80);
    }

    #[test]
    fn superres_width_monotonic_in_denominator() {
        for upscaled_width in [1, 2, 16, 427, 640, 1920, 65536] {
            let widths: Vec<_> = (SUPERRES_NUM..=16)
                .map(|denom| superres_frame_width(upscaled_width, denom))
                .collect();
            assert!(widths.windows(2).all(|w| w[0] >= w[1]));
            assert!(widths.iter().all(|&w| w <= upscaled_width));
        }
    }
}
