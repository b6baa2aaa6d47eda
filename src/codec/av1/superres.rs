// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::av1::error::ParseResult;
use crate::codec::av1::helpers;
use crate::codec::av1::reader::Reader;
use crate::codec::av1::sequence::SequenceHeaderObu;

/// Numerator of the upscaling ratio.
pub const SUPERRES_NUM: u32 = 8;
/// Smallest denominator signalled by coded_denom.
pub const SUPERRES_DENOM_MIN: u32 = 9;
pub const SUPERRES_DENOM_BITS: usize = 3;
/// Largest denominator, i.e. a 2:1 downscale.
pub const SUPERRES_DENOM_MAX: u32 = SUPERRES_DENOM_MIN + (1 << SUPERRES_DENOM_BITS) - 1;

/// superres_params() from 5.9.8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuperresParams {
    pub use_superres: bool,
    /// Present only if use_superres was read and set.
    pub coded_denom: Option<u32>,
    /// SuperresDenom. `SUPERRES_NUM` when the frame is not downscaled.
    pub superres_denom: u32,
}

impl Default for SuperresParams {
    fn default() -> Self {
        Self {
            use_superres: false,
            coded_denom: None,
            superres_denom: SUPERRES_NUM,
        }
    }
}

impl SuperresParams {
    /// Reads superres_params(). Nothing is read when the sequence does not
    /// enable super-resolution.
    pub fn parse(r: &mut Reader, seq: &SequenceHeaderObu) -> ParseResult<Self> {
        let mut r = r.sub_level("superres_params()");

        if !seq.enable_superres {
            return Ok(Default::default());
        }

        let use_superres = r.read_flag("use_superres")?;
        if !use_superres {
            return Ok(Default::default());
        }

        let coded_denom = r.read_bits("coded_denom", SUPERRES_DENOM_BITS)?;
        let superres_denom = coded_denom + SUPERRES_DENOM_MIN;
        r.derived("SuperresDenom", superres_denom);

        Ok(Self {
            use_superres,
            coded_denom: Some(coded_denom),
            superres_denom,
        })
    }

    /// FrameWidth for an UpscaledWidth of `upscaled_width`.
    pub fn frame_width(&self, upscaled_width: u32) -> u32 {
        helpers::superres_frame_width(upscaled_width, self.superres_denom)
    }
}
