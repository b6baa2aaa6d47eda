// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Frame level coding tool parameters: quantization, segmentation, loop
//! filter, CDEF and loop restoration. See 5.9.11 to 5.9.20.

use enumn::N;

use crate::codec::av1::error::ParseResult;
use crate::codec::av1::frame_header::PRIMARY_REF_NONE;
use crate::codec::av1::frame_header::TOTAL_REFS_PER_FRAME;
use crate::codec::av1::helpers;
use crate::codec::av1::reader::Reader;
use crate::codec::av1::sequence::SequenceHeaderObu;

pub const MAX_SEGMENTS: usize = 8;
pub const SEG_LVL_ALT_Q: usize = 0;
pub const SEG_LVL_ALT_LF_Y_V: usize = 1;
pub const SEG_LVL_REF_FRAME: usize = 5;
pub const SEG_LVL_SKIP: usize = 6;
pub const SEG_LVL_GLOBAL_MV: usize = 7;
pub const SEG_LVL_MAX: usize = 8;
pub const CDEF_MAX: usize = 1 << 3;
pub const MAX_NUM_PLANES: usize = 3;
pub const RESTORATION_TILESIZE_MAX: u16 = 256;
pub const MAX_LOOP_FILTER: u32 = 63;

/// Feature_Bits from 5.9.14.
pub const FEATURE_BITS: [u8; SEG_LVL_MAX] = [8, 6, 6, 6, 6, 3, 0, 0];
/// Feature_Signed from 5.9.14.
pub const FEATURE_SIGNED: [bool; SEG_LVL_MAX] = [true, true, true, true, true, false, false, false];
/// Feature_Max from 5.9.14.
pub const FEATURE_MAX: [i32; SEG_LVL_MAX] = [255, 63, 63, 63, 63, 7, 0, 0];

/// Default loop_filter_ref_deltas, see setup_past_independence() in 7.20.
pub const DEFAULT_LOOP_FILTER_REF_DELTAS: [i8; TOTAL_REFS_PER_FRAME] = [1, 0, 0, 0, -1, 0, -1, -1];

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameRestorationType {
    #[default]
    None = 0,
    Wiener = 1,
    Sgrproj = 2,
    Switchable = 3,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxMode {
    #[default]
    Only4x4 = 0,
    Largest = 1,
    Select = 2,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuantizationParams {
    /// The base frame qindex, used for Y AC coefficients and as the base for
    /// the other quantizers.
    pub base_q_idx: u32,
    /// Set when the U and V delta quantizers are coded separately.
    pub diff_uv_delta: bool,
    pub using_qmatrix: bool,
    pub qm_y: u32,
    pub qm_u: u32,
    pub qm_v: u32,
    /// Whether quantizer index delta values are present at the block level.
    pub delta_q_present: bool,
    /// Left shift applied to decoded quantizer index deltas.
    pub delta_q_res: u32,
    /// Same as DeltaQYDc
    pub delta_q_y_dc: i32,
    /// Same as DeltaQUDc
    pub delta_q_u_dc: i32,
    /// Same as DeltaQUAc
    pub delta_q_u_ac: i32,
    /// Same as DeltaQVDc
    pub delta_q_v_dc: i32,
    /// Same as DeltaQVAc
    pub delta_q_v_ac: i32,
}

impl QuantizationParams {
    /// Implements quantization_params() from 5.9.12.
    pub fn parse(r: &mut Reader, seq: &SequenceHeaderObu) -> ParseResult<Self> {
        let mut r = r.sub_level("quantization_params()");
        let mut q = QuantizationParams {
            base_q_idx: r.read_bits("base_q_idx", 8)?,
            ..Default::default()
        };

        q.delta_q_y_dc = r.read_delta_q("DeltaQYDc")?;

        if seq.num_planes > 1 {
            if seq.color_config.separate_uv_delta_q {
                q.diff_uv_delta = r.read_flag("diff_uv_delta")?;
            }

            q.delta_q_u_dc = r.read_delta_q("DeltaQUDc")?;
            q.delta_q_u_ac = r.read_delta_q("DeltaQUAc")?;
            if q.diff_uv_delta {
                q.delta_q_v_dc = r.read_delta_q("DeltaQVDc")?;
                q.delta_q_v_ac = r.read_delta_q("DeltaQVAc")?;
            } else {
                q.delta_q_v_dc = q.delta_q_u_dc;
                q.delta_q_v_ac = q.delta_q_u_ac;
            }
        }

        q.using_qmatrix = r.read_flag("using_qmatrix")?;
        if q.using_qmatrix {
            q.qm_y = r.read_bits("qm_y", 4)?;
            q.qm_u = r.read_bits("qm_u", 4)?;
            if !seq.color_config.separate_uv_delta_q {
                q.qm_v = q.qm_u;
            } else {
                q.qm_v = r.read_bits("qm_v", 4)?;
            }
        }

        Ok(q)
    }

    /// Implements delta_q_params() from 5.9.17.
    pub fn parse_delta_q_params(&mut self, r: &mut Reader) -> ParseResult<()> {
        let mut r = r.sub_level("delta_q_params()");
        self.delta_q_res = 0;
        self.delta_q_present = false;

        if self.base_q_idx > 0 {
            self.delta_q_present = r.read_flag("delta_q_present")?;
        }
        if self.delta_q_present {
            self.delta_q_res = r.read_bits("delta_q_rem_bits", 2)?;
        }

        Ok(())
    }

    /// Implements get_qindex(1, segment_id) from 7.12.2.
    pub fn qindex(&self, seg: &SegmentationParams, segment_id: usize) -> u32 {
        if seg.feature_active(segment_id, SEG_LVL_ALT_Q) {
            let data = i32::from(seg.feature_data[segment_id][SEG_LVL_ALT_Q]);
            helpers::clip3(0, 255, self.base_q_idx as i32 + data) as u32
        } else {
            self.base_q_idx
        }
    }

    /// Whether all the delta quantizers are zero.
    pub fn deltas_are_zero(&self) -> bool {
        self.delta_q_y_dc == 0
            && self.delta_q_u_ac == 0
            && self.delta_q_u_dc == 0
            && self.delta_q_v_ac == 0
            && self.delta_q_v_dc == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentationParams {
    pub segmentation_enabled: bool,
    /// Set when the segmentation map is updated by this frame.
    pub segmentation_update_map: bool,
    /// Set when the map updates are coded relative to the existing map.
    pub segmentation_temporal_update: bool,
    /// Set when new segment parameters follow.
    pub segmentation_update_data: bool,
    pub feature_enabled: [[bool; SEG_LVL_MAX]; MAX_SEGMENTS],
    pub feature_data: [[i16; SEG_LVL_MAX]; MAX_SEGMENTS],
    /// Same as SegIdPreSkip
    pub seg_id_pre_skip: u32,
    /// Same as LastActiveSegId
    pub last_active_seg_id: u32,
}

impl SegmentationParams {
    /// Implements segmentation_params() from 5.9.14. `self` holds the feature
    /// values loaded from the primary reference frame (or cleared by
    /// setup_past_independence()), which are kept when no new data is coded.
    pub fn parse(&mut self, r: &mut Reader, primary_ref_frame: u32) -> ParseResult<()> {
        let mut r = r.sub_level("segmentation_params()");

        self.segmentation_enabled = r.read_flag("segmentation_enabled")?;
        if self.segmentation_enabled {
            if primary_ref_frame == PRIMARY_REF_NONE {
                self.segmentation_update_map = true;
                self.segmentation_temporal_update = false;
                self.segmentation_update_data = true;
            } else {
                self.segmentation_update_map = r.read_flag("segmentation_update_map")?;
                if self.segmentation_update_map {
                    self.segmentation_temporal_update =
                        r.read_flag("segmentation_temporal_update")?;
                }
                self.segmentation_update_data = r.read_flag("segmentation_update_data")?;
            }

            if self.segmentation_update_data {
                for i in 0..MAX_SEGMENTS {
                    for j in 0..SEG_LVL_MAX {
                        self.feature_data[i][j] = 0;
                        self.feature_enabled[i][j] = r.read_flag("feature_enabled")?;
                        if !self.feature_enabled[i][j] {
                            continue;
                        }

                        let bits_to_read = usize::from(FEATURE_BITS[j]);
                        let limit = FEATURE_MAX[j];

                        let clipped_value = if FEATURE_SIGNED[j] {
                            let feature_value = r.read_su("feature_value", 1 + bits_to_read)?;
                            helpers::clip3(-limit, limit, feature_value)
                        } else if bits_to_read > 0 {
                            let feature_value = r.read_bits("feature_value", bits_to_read)?;
                            helpers::clip3(0, limit, feature_value as i32)
                        } else {
                            0
                        };

                        self.feature_data[i][j] = clipped_value as i16;
                    }
                }
            }
        } else {
            self.feature_enabled = Default::default();
            self.feature_data = Default::default();
        }

        self.seg_id_pre_skip = 0;
        self.last_active_seg_id = 0;
        for i in 0..MAX_SEGMENTS {
            for j in 0..SEG_LVL_MAX {
                if self.feature_enabled[i][j] {
                    self.last_active_seg_id = i as u32;
                    if j >= SEG_LVL_REF_FRAME {
                        self.seg_id_pre_skip = 1;
                    }
                }
            }
        }

        Ok(())
    }

    /// Implements seg_feature_active_idx() from 5.11.14.
    pub fn feature_active(&self, segment_id: usize, feature: usize) -> bool {
        self.segmentation_enabled && self.feature_enabled[segment_id][feature]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopFilterParams {
    /// Filter strengths for vertical and horizontal luma edges, then the U
    /// and V planes.
    pub loop_filter_level: [u8; 4],
    pub loop_filter_sharpness: u8,
    /// Set when the filter level depends on the mode and reference frame of
    /// a block.
    pub loop_filter_delta_enabled: bool,
    pub loop_filter_delta_update: bool,
    /// Filter level adjustment per reference frame.
    pub loop_filter_ref_deltas: [i8; TOTAL_REFS_PER_FRAME],
    /// Filter level adjustment per mode.
    pub loop_filter_mode_deltas: [i8; 2],
    /// Whether loop filter delta values are present at the block level.
    pub delta_lf_present: bool,
    /// Left shift applied to decoded loop filter deltas.
    pub delta_lf_res: u32,
    /// Set when separate deltas are coded for each edge direction and plane.
    pub delta_lf_multi: u32,
}

impl LoopFilterParams {
    /// Implements loop_filter_params() from 5.9.11. The deltas in `self` are
    /// the ones loaded from the primary reference frame.
    pub fn parse(
        &mut self,
        r: &mut Reader,
        coded_lossless: bool,
        allow_intrabc: bool,
        num_planes: u32,
    ) -> ParseResult<()> {
        let mut r = r.sub_level("loop_filter_params()");

        if coded_lossless || allow_intrabc {
            self.loop_filter_level[0] = 0;
            self.loop_filter_level[1] = 0;
            self.loop_filter_ref_deltas = DEFAULT_LOOP_FILTER_REF_DELTAS;
            self.loop_filter_mode_deltas = Default::default();
            return Ok(());
        }

        self.loop_filter_level[0] = r.read_bits("loop_filter_level[0]", 6)? as u8;
        self.loop_filter_level[1] = r.read_bits("loop_filter_level[1]", 6)? as u8;
        if num_planes > 1 && (self.loop_filter_level[0] > 0 || self.loop_filter_level[1] > 0) {
            self.loop_filter_level[2] = r.read_bits("loop_filter_level[2]", 6)? as u8;
            self.loop_filter_level[3] = r.read_bits("loop_filter_level[3]", 6)? as u8;
        }

        self.loop_filter_sharpness = r.read_bits("loop_filter_sharpness", 3)? as u8;
        self.loop_filter_delta_enabled = r.read_flag("loop_filter_delta_enabled")?;
        if self.loop_filter_delta_enabled {
            self.loop_filter_delta_update = r.read_flag("loop_filter_delta_update")?;
            if self.loop_filter_delta_update {
                for i in 0..TOTAL_REFS_PER_FRAME {
                    if r.read_flag("update_ref_delta")? {
                        self.loop_filter_ref_deltas[i] = r.read_su("loop_filter_ref_deltas", 7)? as i8;
                    }
                }

                for i in 0..2 {
                    if r.read_flag("update_mode_delta")? {
                        self.loop_filter_mode_deltas[i] =
                            r.read_su("loop_filter_mode_deltas", 7)? as i8;
                    }
                }
            }
        }

        Ok(())
    }

    /// Implements delta_lf_params() from 5.9.18.
    pub fn parse_delta_lf_params(
        &mut self,
        r: &mut Reader,
        delta_q_present: bool,
        allow_intrabc: bool,
    ) -> ParseResult<()> {
        let mut r = r.sub_level("delta_lf_params()");
        self.delta_lf_present = false;
        self.delta_lf_res = 0;
        self.delta_lf_multi = 0;

        if delta_q_present {
            if !allow_intrabc {
                self.delta_lf_present = r.read_flag("delta_lf_present")?;
            }
            if self.delta_lf_present {
                self.delta_lf_res = r.read_bits("delta_lf_res", 2)?;
                self.delta_lf_multi = r.read_bits("delta_lf_multi", 1)?;
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CdefParams {
    /// Damping of the deringing filter, i.e. cdef_damping_minus_3 + 3.
    pub cdef_damping: u32,
    /// Number of bits used to select the CDEF filter of a block.
    pub cdef_bits: u32,
    pub cdef_y_pri_strength: [u32; CDEF_MAX],
    pub cdef_y_sec_strength: [u32; CDEF_MAX],
    pub cdef_uv_pri_strength: [u32; CDEF_MAX],
    pub cdef_uv_sec_strength: [u32; CDEF_MAX],
}

impl CdefParams {
    /// Implements cdef_params() from 5.9.19. Nothing is read when `disabled`,
    /// i.e. for lossless frames, intra block copy, or sequences without CDEF.
    pub fn parse(r: &mut Reader, disabled: bool, num_planes: u32) -> ParseResult<Self> {
        let mut r = r.sub_level("cdef_params()");
        let mut cdef = CdefParams {
            cdef_damping: 3,
            ..Default::default()
        };

        if disabled {
            return Ok(cdef);
        }

        cdef.cdef_damping = r.read_bits("cdef_damping_minus_3", 2)? + 3;
        cdef.cdef_bits = r.read_bits("cdef_bits", 2)?;
        for i in 0..(1 << cdef.cdef_bits) as usize {
            cdef.cdef_y_pri_strength[i] = r.read_bits("cdef_y_pri_strength", 4)?;
            cdef.cdef_y_sec_strength[i] = r.read_bits("cdef_y_sec_strength", 2)?;
            if cdef.cdef_y_sec_strength[i] == 3 {
                cdef.cdef_y_sec_strength[i] += 1;
            }

            if num_planes > 1 {
                cdef.cdef_uv_pri_strength[i] = r.read_bits("cdef_uv_pri_strength", 4)?;
                cdef.cdef_uv_sec_strength[i] = r.read_bits("cdef_uv_sec_strength", 2)?;
                if cdef.cdef_uv_sec_strength[i] == 3 {
                    cdef.cdef_uv_sec_strength[i] += 1;
                }
            }
        }

        Ok(cdef)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopRestorationParams {
    /// Set when the luma restoration size is halved.
    pub lr_unit_shift: u8,
    /// Set when the chroma restoration size is half the luma one.
    pub lr_uv_shift: u8,
    /// Same as FrameRestorationType in the specification.
    pub frame_restoration_type: [FrameRestorationType; MAX_NUM_PLANES],
    /// Same as LoopRestorationSize in the specification.
    pub loop_restoration_size: [u16; MAX_NUM_PLANES],
    /// Same as UsesLr in the specification.
    pub uses_lr: bool,
    /// Same as UsesChromaLr in the specification.
    pub uses_chroma_lr: bool,
}

impl LoopRestorationParams {
    /// Implements lr_params() from 5.9.20. Nothing is read when `disabled`.
    pub fn parse(r: &mut Reader, seq: &SequenceHeaderObu, disabled: bool) -> ParseResult<Self> {
        const REMAP_LR_TYPE: [FrameRestorationType; 4] = [
            FrameRestorationType::None,
            FrameRestorationType::Switchable,
            FrameRestorationType::Wiener,
            FrameRestorationType::Sgrproj,
        ];

        let mut r = r.sub_level("lr_params()");
        let mut lr = LoopRestorationParams::default();

        if disabled {
            return Ok(lr);
        }

        for i in 0..seq.num_planes as usize {
            let lr_type = r.read_bits("lr_type", 2)?;
            lr.frame_restoration_type[i] = REMAP_LR_TYPE[lr_type as usize];
            r.annotate(format_args!("{:?}", lr.frame_restoration_type[i]));

            if lr.frame_restoration_type[i] != FrameRestorationType::None {
                lr.uses_lr = true;
                if i > 0 {
                    lr.uses_chroma_lr = true;
                }
            }
        }

        if lr.uses_lr {
            if seq.use_128x128_superblock {
                lr.lr_unit_shift = r.read_bits("lr_unit_shift", 1)? as u8 + 1;
            } else {
                lr.lr_unit_shift = r.read_bits("lr_unit_shift", 1)? as u8;
                if lr.lr_unit_shift > 0 {
                    lr.lr_unit_shift += r.read_bits("lr_unit_extra_shift", 1)? as u8;
                }
            }

            lr.loop_restoration_size[0] = RESTORATION_TILESIZE_MAX >> (2 - lr.lr_unit_shift);

            let cc = &seq.color_config;
            if cc.subsampling_x && cc.subsampling_y && lr.uses_chroma_lr {
                lr.lr_uv_shift = r.read_bits("lr_uv_shift", 1)? as u8;
            }

            lr.loop_restoration_size[1] = lr.loop_restoration_size[0] >> lr.lr_uv_shift;
            lr.loop_restoration_size[2] = lr.loop_restoration_size[0] >> lr.lr_uv_shift;
        }

        Ok(lr)
    }
}

/// Implements read_tx_mode() from 5.9.21.
pub fn read_tx_mode(r: &mut Reader, coded_lossless: bool) -> ParseResult<TxMode> {
    if coded_lossless {
        return Ok(TxMode::Only4x4);
    }

    let tx_mode = if r.read_flag("tx_mode_select")? {
        TxMode::Select
    } else {
        TxMode::Largest
    };
    r.annotate(format_args!("{:?}", tx_mode));

    Ok(tx_mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream_utils::BitWriter;
    use crate::trace::SyntaxTrace;

    fn sequence(num_planes: u32, separate_uv_delta_q: bool) -> SequenceHeaderObu {
        let mut seq = SequenceHeaderObu {
            num_planes,
            ..Default::default()
        };
        seq.color_config.separate_uv_delta_q = separate_uv_delta_q;
        seq.color_config.subsampling_x = true;
        seq.color_config.subsampling_y = true;
        seq
    }

    #[test]
    fn quantization() {
        let _ = env_logger::try_init();

        let mut w = BitWriter::new();
        w.write_f(8, 100) // base_q_idx
            .write_bit(true)
            .write_su(7, -2) // DeltaQYDc
            .write_bit(true) // diff_uv_delta
            .write_bit(false) // DeltaQUDc
            .write_bit(true)
            .write_su(7, 3) // DeltaQUAc
            .write_bit(false) // DeltaQVDc
            .write_bit(false) // DeltaQVAc
            .write_bit(true) // using_qmatrix
            .write_f(4, 5)
            .write_f(4, 6)
            .write_f(4, 7)
            .write_bit(true) // delta_q_present
            .write_f(2, 2);
        let data = w.into_bytes();

        let mut r = Reader::new(&data, SyntaxTrace::default());
        let mut q = QuantizationParams::parse(&mut r, &sequence(3, true)).unwrap();
        q.parse_delta_q_params(&mut r).unwrap();

        assert_eq!(q.base_q_idx, 100);
        assert_eq!(q.delta_q_y_dc, -2);
        assert!(q.diff_uv_delta);
        assert_eq!(q.delta_q_u_ac, 3);
        assert_eq!(q.delta_q_v_ac, 0);
        assert_eq!((q.qm_y, q.qm_u, q.qm_v), (5, 6, 7));
        assert!(q.delta_q_present);
        assert_eq!(q.delta_q_res, 2);
        assert!(!q.deltas_are_zero());
        assert_eq!(r.position(), 8 + 8 + 1 + 1 + 8 + 1 + 1 + 1 + 12 + 3);
    }

    #[test]
    fn quantization_shared_uv() {
        let mut w = BitWriter::new();
        w.write_f(8, 0)
            .write_bit(false)
            .write_bit(true)
            .write_su(7, 4) // DeltaQUDc
            .write_bit(false)
            .write_bit(false); // using_qmatrix
        let data = w.into_bytes();

        let mut r = Reader::untraced(&data);
        let mut q = QuantizationParams::parse(&mut r, &sequence(3, false)).unwrap();
        assert_eq!(q.delta_q_v_dc, 4);

        // base_q_idx == 0: delta_q_present is not read.
        let position = r.position();
        q.parse_delta_q_params(&mut r).unwrap();
        assert_eq!(r.position(), position);
        assert!(!q.delta_q_present);
    }

    #[test]
    fn segmentation_and_qindex() {
        let mut w = BitWriter::new();
        w.write_bit(true); // segmentation_enabled
        for i in 0..MAX_SEGMENTS {
            for j in 0..SEG_LVL_MAX {
                let enabled = (i == 1 && j == SEG_LVL_ALT_Q) || (i == 3 && j == SEG_LVL_SKIP);
                w.write_bit(enabled);
                if enabled && j == SEG_LVL_ALT_Q {
                    w.write_su(9, -256);
                }
            }
        }
        let data = w.into_bytes();

        let mut r = Reader::untraced(&data);
        let mut seg = SegmentationParams::default();
        seg.parse(&mut r, PRIMARY_REF_NONE).unwrap();

        assert!(seg.segmentation_update_data);
        assert_eq!(seg.feature_data[1][SEG_LVL_ALT_Q], -255);
        assert!(seg.feature_enabled[3][SEG_LVL_SKIP]);
        assert_eq!(seg.last_active_seg_id, 3);
        assert_eq!(seg.seg_id_pre_skip, 1);

        let q = QuantizationParams {
            base_q_idx: 60,
            ..Default::default()
        };
        assert_eq!(q.qindex(&seg, 0), 60);
        assert_eq!(q.qindex(&seg, 1), 0);
    }

    #[test]
    fn segmentation_keeps_loaded_features() {
        // enabled, update_map = 0, update_data = 0
        let data = [0b1000_0000u8];
        let mut r = Reader::untraced(&data);
        let mut seg = SegmentationParams::default();
        seg.feature_enabled[2][SEG_LVL_ALT_LF_Y_V] = true;
        seg.feature_data[2][SEG_LVL_ALT_LF_Y_V] = 12;

        seg.parse(&mut r, 0).unwrap();
        assert_eq!(r.position(), 3);
        assert_eq!(seg.feature_data[2][SEG_LVL_ALT_LF_Y_V], 12);
        assert_eq!(seg.last_active_seg_id, 2);
        assert_eq!(seg.seg_id_pre_skip, 0);
    }

    #[test]
    fn loop_filter() {
        let mut w = BitWriter::new();
        w.write_f(6, 10)
            .write_f(6, 0)
            .write_f(6, 4)
            .write_f(6, 5)
            .write_f(3, 2) // sharpness
            .write_bit(true) // delta_enabled
            .write_bit(true); // delta_update
        for i in 0..TOTAL_REFS_PER_FRAME {
            w.write_bit(i == 2);
            if i == 2 {
                w.write_su(7, -7);
            }
        }
        w.write_bit(false).write_bit(true).write_su(7, 9);
        let data = w.into_bytes();

        let mut r = Reader::new(&data, SyntaxTrace::default());
        let mut lf = LoopFilterParams {
            loop_filter_ref_deltas: DEFAULT_LOOP_FILTER_REF_DELTAS,
            ..Default::default()
        };
        lf.parse(&mut r, false, false, 3).unwrap();

        assert_eq!(lf.loop_filter_level, [10, 0, 4, 5]);
        assert_eq!(lf.loop_filter_sharpness, 2);
        assert_eq!(lf.loop_filter_ref_deltas, [1, 0, -7, 0, -1, 0, -1, -1]);
        assert_eq!(lf.loop_filter_mode_deltas, [0, 9]);

        // Lossless frames read nothing.
        let mut r = Reader::untraced(&[]);
        let mut lf = LoopFilterParams::default();
        lf.parse(&mut r, true, false, 3).unwrap();
        assert_eq!(lf.loop_filter_ref_deltas, DEFAULT_LOOP_FILTER_REF_DELTAS);
    }

    #[test]
    fn cdef_and_restoration() {
        let mut w = BitWriter::new();
        w.write_f(2, 1) // damping
            .write_f(2, 1) // cdef_bits
            .write_f(4, 9)
            .write_f(2, 3)
            .write_f(4, 1)
            .write_f(2, 0)
            .write_f(4, 2)
            .write_f(2, 1)
            .write_f(4, 3)
            .write_f(2, 2);
        // lr_type: Wiener, none, Sgrproj.
        w.write_f(2, 2).write_f(2, 0).write_f(2, 3);
        w.write_bit(true).write_bit(false); // lr_unit_shift = 1
        w.write_bit(true); // lr_uv_shift
        let data = w.into_bytes();

        let seq = sequence(3, false);
        let mut r = Reader::new(&data, SyntaxTrace::default());
        let cdef = CdefParams::parse(&mut r, false, 3).unwrap();
        assert_eq!(cdef.cdef_damping, 4);
        assert_eq!(cdef.cdef_bits, 1);
        assert_eq!(cdef.cdef_y_sec_strength[0], 4);
        assert_eq!(cdef.cdef_uv_pri_strength[1], 3);

        let lr = LoopRestorationParams::parse(&mut r, &seq, false).unwrap();
        assert_eq!(
            lr.frame_restoration_type,
            [
                FrameRestorationType::Wiener,
                FrameRestorationType::None,
                FrameRestorationType::Sgrproj
            ]
        );
        assert!(lr.uses_chroma_lr);
        assert_eq!(lr.lr_unit_shift, 1);
        assert_eq!(lr.loop_restoration_size, [128, 64, 64]);

        let lr_type = r.trace().field("lr_type").unwrap();
        assert_eq!(r.trace().entries().filter(|e| e.name() == "lr_type").count(), 3);
        assert!(matches!(
            lr_type,
            crate::trace::TraceEntry::Field { meaning: Some(m), .. } if m == "Sgrproj"
        ));
    }

    #[test]
    fn disabled_tools_read_nothing() {
        let seq = sequence(3, false);
        let mut r = Reader::untraced(&[]);

        let cdef = CdefParams::parse(&mut r, true, 3).unwrap();
        assert_eq!(cdef.cdef_damping, 3);
        let lr = LoopRestorationParams::parse(&mut r, &seq, true).unwrap();
        assert!(!lr.uses_lr);
        assert_eq!(read_tx_mode(&mut r, true), Ok(TxMode::Only4x4));
        assert_eq!(r.position(), 0);
    }
}
