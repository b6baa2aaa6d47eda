// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The uncompressed frame header (5.9) and the reference frame state it reads
//! from and updates (7.20, 7.21).

use enumn::N;

use crate::codec::av1::coding_tools;
use crate::codec::av1::coding_tools::CdefParams;
use crate::codec::av1::coding_tools::LoopFilterParams;
use crate::codec::av1::coding_tools::LoopRestorationParams;
use crate::codec::av1::coding_tools::QuantizationParams;
use crate::codec::av1::coding_tools::SegmentationParams;
use crate::codec::av1::coding_tools::TxMode;
use crate::codec::av1::coding_tools::DEFAULT_LOOP_FILTER_REF_DELTAS;
use crate::codec::av1::coding_tools::MAX_SEGMENTS;
use crate::codec::av1::error::ParseResult;
use crate::codec::av1::film_grain::FilmGrainContext;
use crate::codec::av1::film_grain::FilmGrainParams;
use crate::codec::av1::global_motion;
use crate::codec::av1::global_motion::GlobalMotionParams;
use crate::codec::av1::global_motion::WarpParams;
use crate::codec::av1::helpers;
use crate::codec::av1::obu::ObuHeader;
use crate::codec::av1::obu::ObuType;
use crate::codec::av1::reader::Reader;
use crate::codec::av1::sequence::BitDepth;
use crate::codec::av1::sequence::SequenceHeaderObu;
use crate::codec::av1::sequence::MAX_NUM_OPERATING_POINTS;
use crate::codec::av1::sequence::SELECT_INTEGER_MV;
use crate::codec::av1::sequence::SELECT_SCREEN_CONTENT_TOOLS;
use crate::codec::av1::superres::SuperresParams;
use crate::codec::av1::tile_info::TileInfo;

pub const NUM_REF_FRAMES: usize = 8;
pub const REFS_PER_FRAME: usize = 7;
pub const TOTAL_REFS_PER_FRAME: usize = 8;
pub const PRIMARY_REF_NONE: u32 = 7;

const ALL_FRAMES: u32 = (1 << NUM_REF_FRAMES) - 1;

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameType {
    #[default]
    KeyFrame = 0,
    InterFrame = 1,
    IntraOnlyFrame = 2,
    SwitchFrame = 3,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterpolationFilter {
    #[default]
    EightTap = 0,
    EightTapSmooth = 1,
    EightTapSharp = 2,
    Bilinear = 3,
    Switchable = 4,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReferenceFrameType {
    #[default]
    Intra = 0,
    Last = 1,
    Last2 = 2,
    Last3 = 3,
    Golden = 4,
    BwdRef = 5,
    AltRef2 = 6,
    AltRef = 7,
}

/// A frame header OBU, i.e. uncompressed_header() and the variables it
/// derives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameHeaderObu {
    /// The original OBU header. This may be from a FrameOBU or a
    /// FrameHeaderOBU directly.
    pub obu_header: ObuHeader,
    /// If set, the frame indexed by frame_to_show_map_idx is to be output and
    /// nothing else is coded.
    pub show_existing_frame: bool,
    pub frame_to_show_map_idx: u32,
    /// Same as frame_presentation_time in temporal_point_info().
    pub frame_presentation_time: u32,
    pub display_frame_id: u32,
    pub frame_type: FrameType,
    pub show_frame: bool,
    /// Whether the frame may later be output with show_existing_frame.
    pub showable_frame: bool,
    pub error_resilient_mode: bool,
    pub disable_cdf_update: bool,
    pub allow_screen_content_tools: u32,
    pub force_integer_mv: u32,
    pub current_frame_id: u32,
    /// If not set, the frame size is the one of the sequence header.
    pub frame_size_override_flag: bool,
    /// The OrderHintBits least significant bits of the output order.
    pub order_hint: u32,
    /// Which reference frame the CDFs and other state are loaded from.
    pub primary_ref_frame: u32,
    pub buffer_removal_time_present_flag: bool,
    /// Removal time per operating point, in DecCT clock ticks.
    pub buffer_removal_time: [u32; MAX_NUM_OPERATING_POINTS],
    /// Bitmask of the reference slots updated with this frame.
    pub refresh_frame_flags: u32,
    pub ref_order_hint: [u32; NUM_REF_FRAMES],
    pub allow_intrabc: bool,
    pub frame_refs_short_signaling: bool,
    pub last_frame_idx: u8,
    pub gold_frame_idx: u8,
    /// Slot used by each of LAST_FRAME..ALTREF_FRAME.
    pub ref_frame_idx: [u8; REFS_PER_FRAME],
    pub allow_high_precision_mv: bool,
    pub is_motion_mode_switchable: bool,
    pub use_ref_frame_mvs: bool,
    pub disable_frame_end_update_cdf: bool,
    pub allow_warped_motion: bool,
    pub reduced_tx_set: bool,
    pub render_and_frame_size_different: bool,
    pub superres: SuperresParams,
    pub is_filter_switchable: bool,
    pub interpolation_filter: InterpolationFilter,
    pub loop_filter_params: LoopFilterParams,
    pub quantization_params: QuantizationParams,
    pub segmentation_params: SegmentationParams,
    pub tile_info: TileInfo,
    pub cdef_params: CdefParams,
    pub loop_restoration_params: LoopRestorationParams,
    pub skip_mode_present: bool,
    /// Whether inter blocks may use compound prediction.
    pub reference_select: bool,
    pub global_motion_params: GlobalMotionParams,
    pub film_grain_params: FilmGrainParams,

    /* CamelCase variables */
    pub frame_is_intra: bool,
    pub order_hints: [u32; NUM_REF_FRAMES],
    pub ref_frame_sign_bias: [bool; NUM_REF_FRAMES],
    pub coded_lossless: bool,
    pub all_lossless: bool,
    pub lossless_array: [bool; MAX_SEGMENTS],
    pub seg_qm_level: [[u32; MAX_SEGMENTS]; 3],
    pub upscaled_width: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub render_width: u32,
    pub render_height: u32,
    pub tx_mode: TxMode,
    pub skip_mode_frame: [u32; 2],
    pub mi_cols: u32,
    pub mi_rows: u32,
    /// Size of the header in bytes, including the trailing bits or the byte
    /// alignment that follows it.
    pub header_bytes: usize,
}

/// State saved with each reference slot by the reference frame update
/// process (7.20).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceFrameInfo {
    /// Same as RefValid.
    pub ref_valid: bool,
    pub ref_frame_id: u32,
    pub ref_upscaled_width: u32,
    pub ref_frame_width: u32,
    pub ref_frame_height: u32,
    pub ref_render_width: u32,
    pub ref_render_height: u32,
    pub ref_mi_cols: u32,
    pub ref_mi_rows: u32,
    pub ref_frame_type: FrameType,
    pub ref_subsampling_x: bool,
    pub ref_subsampling_y: bool,
    pub ref_bit_depth: BitDepth,
    pub ref_order_hint: u32,
    pub segmentation_params: SegmentationParams,
    pub global_motion_params: GlobalMotionParams,
    pub loop_filter_params: LoopFilterParams,
    pub film_grain_params: FilmGrainParams,
    pub display_frame_id: u32,
    pub showable_frame: bool,
}

/// The reference frame slots and the frame id bookkeeping of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceFrames {
    pub slots: [ReferenceFrameInfo; NUM_REF_FRAMES],
    current_frame_id: u32,
    prev_frame_id: u32,
    /// Set until the first frame header of the stream has been parsed.
    is_first_frame: bool,
}

impl Default for ReferenceFrames {
    fn default() -> Self {
        Self {
            slots: Default::default(),
            current_frame_id: 0,
            prev_frame_id: 0,
            is_first_frame: true,
        }
    }
}

/// Implements compute_image_size() from 5.9.9.
fn compute_image_size(fh: &mut FrameHeaderObu, r: &mut Reader) {
    fh.mi_cols = helpers::mi_size(fh.frame_width);
    fh.mi_rows = helpers::mi_size(fh.frame_height);
    r.derived("MiCols", fh.mi_cols);
    r.derived("MiRows", fh.mi_rows);
}

/// superres_params() followed by compute_image_size(). `fh.upscaled_width`
/// must be set.
fn superres_and_image_size(
    fh: &mut FrameHeaderObu,
    r: &mut Reader,
    seq: &SequenceHeaderObu,
) -> ParseResult<()> {
    fh.superres = SuperresParams::parse(r, seq)?;
    fh.frame_width = fh.superres.frame_width(fh.upscaled_width);
    r.derived("UpscaledWidth", fh.upscaled_width);
    r.derived("FrameWidth", fh.frame_width);

    compute_image_size(fh, r);
    Ok(())
}

/// Implements frame_size() from 5.9.5.
fn parse_frame_size(
    fh: &mut FrameHeaderObu,
    r: &mut Reader,
    seq: &SequenceHeaderObu,
) -> ParseResult<()> {
    let mut r = r.sub_level("frame_size()");

    if fh.frame_size_override_flag {
        let n = seq.frame_width_bits_minus_1 as usize + 1;
        let frame_width_minus_1 = r.read_bits("frame_width_minus_1", n)?;
        if frame_width_minus_1 > seq.max_frame_width_minus_1 {
            return Err(r.out_of_spec("frame_width_minus_1", frame_width_minus_1));
        }

        let n = seq.frame_height_bits_minus_1 as usize + 1;
        let frame_height_minus_1 = r.read_bits("frame_height_minus_1", n)?;
        if frame_height_minus_1 > seq.max_frame_height_minus_1 {
            return Err(r.out_of_spec("frame_height_minus_1", frame_height_minus_1));
        }

        fh.upscaled_width = frame_width_minus_1 + 1;
        fh.frame_height = frame_height_minus_1 + 1;
    } else {
        fh.upscaled_width = seq.max_frame_width_minus_1 + 1;
        fh.frame_height = seq.max_frame_height_minus_1 + 1;
    }

    superres_and_image_size(fh, &mut r, seq)
}

/// Implements render_size() from 5.9.6.
fn parse_render_size(fh: &mut FrameHeaderObu, r: &mut Reader) -> ParseResult<()> {
    let mut r = r.sub_level("render_size()");

    fh.render_and_frame_size_different = r.read_flag("render_and_frame_size_different")?;
    if fh.render_and_frame_size_different {
        fh.render_width = r.read_bits("render_width_minus_1", 16)? + 1;
        fh.render_height = r.read_bits("render_height_minus_1", 16)? + 1;
    } else {
        fh.render_width = fh.upscaled_width;
        fh.render_height = fh.frame_height;
    }

    Ok(())
}

impl ReferenceFrames {
    pub fn slot(&self, idx: usize) -> Option<&ReferenceFrameInfo> {
        self.slots.get(idx)
    }

    /// Parses uncompressed_header() from 5.9.2. The reference state is only
    /// modified if the whole header parses.
    pub fn parse_uncompressed_header(
        &mut self,
        r: &mut Reader,
        seq: &SequenceHeaderObu,
        obu_header: &ObuHeader,
    ) -> ParseResult<FrameHeaderObu> {
        let mut next = self.clone();
        let fh = next.uncompressed_header(r, seq, obu_header)?;
        *self = next;
        Ok(fh)
    }

    fn uncompressed_header(
        &mut self,
        r: &mut Reader,
        seq: &SequenceHeaderObu,
        obu_header: &ObuHeader,
    ) -> ParseResult<FrameHeaderObu> {
        let mut r = r.sub_level("uncompressed_header()");
        let mut fh = FrameHeaderObu {
            obu_header: obu_header.clone(),
            ..Default::default()
        };

        let id_len = seq.frame_id_length();
        let decoder_model_info_present = seq.decoder_model_info_present_flag;
        let equal_picture_interval = seq.timing_info.equal_picture_interval;

        if seq.reduced_still_picture_header {
            fh.show_existing_frame = false;
            fh.frame_type = FrameType::KeyFrame;
            fh.frame_is_intra = true;
            fh.show_frame = true;
            fh.showable_frame = false;
        } else {
            fh.show_existing_frame = r.read_flag("show_existing_frame")?;
            if fh.show_existing_frame && obu_header.obu_type == ObuType::Frame {
                return Err(r.out_of_spec("show_existing_frame", 1));
            }

            if fh.show_existing_frame {
                self.show_existing_frame(&mut fh, &mut r, seq)?;
                return Ok(fh);
            }

            fh.frame_type = r.read_enum("frame_type", 2, FrameType::n)?;
            fh.frame_is_intra = matches!(
                fh.frame_type,
                FrameType::IntraOnlyFrame | FrameType::KeyFrame
            );

            fh.show_frame = r.read_flag("show_frame")?;
            if fh.show_frame && decoder_model_info_present && !equal_picture_interval {
                fh.frame_presentation_time = Self::temporal_point_info(&mut r, seq)?;
            }

            if fh.show_frame {
                fh.showable_frame = fh.frame_type != FrameType::KeyFrame;
            } else {
                fh.showable_frame = r.read_flag("showable_frame")?;
            }

            if fh.frame_type == FrameType::SwitchFrame
                || (fh.frame_type == FrameType::KeyFrame && fh.show_frame)
            {
                fh.error_resilient_mode = true;
            } else {
                fh.error_resilient_mode = r.read_flag("error_resilient_mode")?;
            }
        }

        if fh.frame_type == FrameType::KeyFrame && fh.show_frame {
            for slot in self.slots.iter_mut() {
                slot.ref_valid = false;
                slot.ref_order_hint = 0;
            }
            for i in 0..REFS_PER_FRAME {
                fh.order_hints[ReferenceFrameType::Last as usize + i] = 0;
            }
        }

        fh.disable_cdf_update = r.read_flag("disable_cdf_update")?;
        if seq.seq_force_screen_content_tools == SELECT_SCREEN_CONTENT_TOOLS {
            fh.allow_screen_content_tools = r.read_bits("allow_screen_content_tools", 1)?;
        } else {
            fh.allow_screen_content_tools = seq.seq_force_screen_content_tools;
        }

        if fh.allow_screen_content_tools > 0 {
            if seq.seq_force_integer_mv == SELECT_INTEGER_MV {
                fh.force_integer_mv = r.read_bits("force_integer_mv", 1)?;
            } else {
                fh.force_integer_mv = seq.seq_force_integer_mv;
            }
        } else {
            fh.force_integer_mv = 0;
        }

        if fh.frame_is_intra {
            fh.force_integer_mv = 1;
        }

        if seq.frame_id_numbers_present_flag {
            self.prev_frame_id = self.current_frame_id;
            self.current_frame_id = r.read_bits("current_frame_id", id_len as usize)?;
            fh.current_frame_id = self.current_frame_id;
            self.check_frame_id(&r, seq, &fh)?;
            self.mark_ref_frames(seq);
        } else {
            self.current_frame_id = 0;
            self.prev_frame_id = 0;
            fh.current_frame_id = 0;
        }
        self.is_first_frame = false;

        if fh.frame_type == FrameType::SwitchFrame {
            fh.frame_size_override_flag = true;
        } else if seq.reduced_still_picture_header {
            fh.frame_size_override_flag = false;
        } else {
            fh.frame_size_override_flag = r.read_flag("frame_size_override_flag")?;
        }

        fh.order_hint = r.read_bits("order_hint", seq.order_hint_bits as usize)?;

        if fh.frame_is_intra || fh.error_resilient_mode {
            fh.primary_ref_frame = PRIMARY_REF_NONE;
        } else {
            fh.primary_ref_frame = r.read_bits("primary_ref_frame", 3)?;
        }

        if decoder_model_info_present {
            fh.buffer_removal_time_present_flag = r.read_flag("buffer_removal_time_present_flag")?;
            if fh.buffer_removal_time_present_flag {
                let n = seq.decoder_model_info.buffer_removal_time_length_minus_1 as usize + 1;
                let num_ops = seq.operating_points_cnt_minus_1 as usize + 1;

                for (op_num, op) in seq.operating_points.iter().enumerate().take(num_ops) {
                    if !op.decoder_model_present_for_this_op {
                        continue;
                    }

                    let in_temporal_layer = (op.idc >> obu_header.temporal_id) & 1 != 0;
                    let in_spatial_layer = (op.idc >> (obu_header.spatial_id + 8)) & 1 != 0;
                    if op.idc == 0 || (in_temporal_layer && in_spatial_layer) {
                        fh.buffer_removal_time[op_num] = r.read_bits("buffer_removal_time", n)?;
                    }
                }
            }
        }

        fh.allow_high_precision_mv = false;
        fh.use_ref_frame_mvs = false;
        fh.allow_intrabc = false;

        if fh.frame_type == FrameType::SwitchFrame
            || (fh.frame_type == FrameType::KeyFrame && fh.show_frame)
        {
            fh.refresh_frame_flags = ALL_FRAMES;
        } else {
            fh.refresh_frame_flags = r.read_bits("refresh_frame_flags", 8)?;
        }

        if fh.frame_type == FrameType::IntraOnlyFrame && fh.refresh_frame_flags == ALL_FRAMES {
            return Err(r.out_of_spec("refresh_frame_flags", fh.refresh_frame_flags));
        }

        if (!fh.frame_is_intra || fh.refresh_frame_flags != ALL_FRAMES)
            && fh.error_resilient_mode
            && seq.enable_order_hint
        {
            for i in 0..NUM_REF_FRAMES {
                fh.ref_order_hint[i] = r.read_bits("ref_order_hint", seq.order_hint_bits as usize)?;
                if fh.ref_order_hint[i] != self.slots[i].ref_order_hint {
                    self.slots[i].ref_valid = false;
                    self.slots[i].ref_order_hint = fh.ref_order_hint[i];
                }
            }
        }

        if fh.frame_is_intra {
            parse_frame_size(&mut fh, &mut r, seq)?;
            parse_render_size(&mut fh, &mut r)?;
            if fh.allow_screen_content_tools > 0 && fh.upscaled_width == fh.frame_width {
                fh.allow_intrabc = r.read_flag("allow_intrabc")?;
            }
        } else {
            self.inter_frame_refs(&mut fh, &mut r, seq)?;
        }

        if seq.reduced_still_picture_header || fh.disable_cdf_update {
            fh.disable_frame_end_update_cdf = true;
        } else {
            fh.disable_frame_end_update_cdf = r.read_flag("disable_frame_end_update_cdf")?;
        }

        let prev_gm_params = if fh.primary_ref_frame == PRIMARY_REF_NONE {
            Self::setup_past_independence(&mut fh)
        } else {
            self.load_previous(&mut fh, &r)?
        };

        fh.tile_info = TileInfo::parse(&mut r, seq, fh.mi_cols, fh.mi_rows)?;
        fh.quantization_params = QuantizationParams::parse(&mut r, seq)?;
        fh.segmentation_params.parse(&mut r, fh.primary_ref_frame)?;
        fh.quantization_params.parse_delta_q_params(&mut r)?;
        fh.loop_filter_params.parse_delta_lf_params(
            &mut r,
            fh.quantization_params.delta_q_present,
            fh.allow_intrabc,
        )?;

        Self::compute_lossless(&mut fh, &mut r);

        fh.loop_filter_params.parse(
            &mut r,
            fh.coded_lossless,
            fh.allow_intrabc,
            seq.num_planes,
        )?;
        fh.cdef_params = CdefParams::parse(
            &mut r,
            fh.coded_lossless || fh.allow_intrabc || !seq.enable_cdef,
            seq.num_planes,
        )?;
        fh.loop_restoration_params = LoopRestorationParams::parse(
            &mut r,
            seq,
            fh.all_lossless || fh.allow_intrabc || !seq.enable_restoration,
        )?;
        fh.tx_mode = coding_tools::read_tx_mode(&mut r, fh.coded_lossless)?;

        // frame_reference_mode()
        fh.reference_select = if fh.frame_is_intra {
            false
        } else {
            r.read_flag("reference_select")?
        };

        self.parse_skip_mode_params(&mut fh, &mut r, seq)?;

        if fh.frame_is_intra || fh.error_resilient_mode || !seq.enable_warped_motion {
            fh.allow_warped_motion = false;
        } else {
            fh.allow_warped_motion = r.read_flag("allow_warped_motion")?;
        }

        fh.reduced_tx_set = r.read_flag("reduced_tx_set")?;
        fh.global_motion_params = GlobalMotionParams::parse(
            &mut r,
            fh.frame_is_intra,
            fh.allow_high_precision_mv,
            &prev_gm_params,
        )?;

        let slots = &self.slots;
        fh.film_grain_params = FilmGrainParams::parse(
            &mut r,
            &FilmGrainContext {
                film_grain_params_present: seq.film_grain_params_present,
                show_frame: fh.show_frame,
                showable_frame: fh.showable_frame,
                frame_type: fh.frame_type,
                ref_frame_idx: &fh.ref_frame_idx,
                color_config: &seq.color_config,
            },
            |idx| slots[usize::from(idx)].film_grain_params.clone(),
        )?;

        Ok(fh)
    }

    /// temporal_point_info() from 5.9.31.
    fn temporal_point_info(r: &mut Reader, seq: &SequenceHeaderObu) -> ParseResult<u32> {
        let n = seq.decoder_model_info.frame_presentation_time_length_minus_1 as usize + 1;
        r.read_bits("frame_presentation_time", n)
    }

    /// The show_existing_frame == 1 branch of uncompressed_header(), including
    /// the reference frame loading process of 7.21.
    fn show_existing_frame(
        &self,
        fh: &mut FrameHeaderObu,
        r: &mut Reader,
        seq: &SequenceHeaderObu,
    ) -> ParseResult<()> {
        fh.frame_to_show_map_idx = r.read_bits("frame_to_show_map_idx", 3)?;
        let rf = &self.slots[fh.frame_to_show_map_idx as usize];

        if seq.decoder_model_info_present_flag && !seq.timing_info.equal_picture_interval {
            fh.frame_presentation_time = Self::temporal_point_info(r, seq)?;
        }

        fh.refresh_frame_flags = 0;
        if seq.frame_id_numbers_present_flag {
            fh.display_frame_id = r.read_bits("display_frame_id", seq.frame_id_length() as usize)?;
            if rf.display_frame_id != fh.display_frame_id || !rf.ref_valid {
                return Err(r.out_of_spec("display_frame_id", fh.display_frame_id));
            }
        }

        if !rf.ref_valid {
            return Err(r.missing(&format!("reference frame {}", fh.frame_to_show_map_idx)));
        }

        if !rf.showable_frame {
            return Err(r.out_of_spec("frame_to_show_map_idx", fh.frame_to_show_map_idx));
        }

        fh.show_frame = true;
        fh.frame_type = rf.ref_frame_type;
        fh.frame_is_intra = matches!(
            fh.frame_type,
            FrameType::IntraOnlyFrame | FrameType::KeyFrame
        );
        fh.upscaled_width = rf.ref_upscaled_width;
        fh.frame_width = rf.ref_frame_width;
        fh.frame_height = rf.ref_frame_height;
        fh.render_width = rf.ref_render_width;
        fh.render_height = rf.ref_render_height;
        fh.mi_cols = rf.ref_mi_cols;
        fh.mi_rows = rf.ref_mi_rows;
        fh.order_hint = rf.ref_order_hint;
        fh.current_frame_id = rf.ref_frame_id;

        if seq.film_grain_params_present {
            // load_grain_params()
            fh.film_grain_params = rf.film_grain_params.clone();
        }

        if fh.frame_type == FrameType::KeyFrame {
            fh.refresh_frame_flags = ALL_FRAMES;
            fh.showable_frame = false;
            fh.global_motion_params = rf.global_motion_params.clone();
            fh.loop_filter_params = rf.loop_filter_params.clone();
            fh.segmentation_params = rf.segmentation_params.clone();
        }

        r.derived("refresh_frame_flags", fh.refresh_frame_flags);
        Ok(())
    }

    /// Frame id conformance checks of 6.8.2.
    fn check_frame_id(
        &self,
        r: &Reader,
        seq: &SequenceHeaderObu,
        fh: &FrameHeaderObu,
    ) -> ParseResult<()> {
        let have_prev_frame_id =
            !(self.is_first_frame || (fh.frame_type == FrameType::KeyFrame && fh.show_frame));
        if !have_prev_frame_id {
            return Ok(());
        }

        let frame_id_length = seq.frame_id_length();
        let diff_frame_id = if self.current_frame_id > self.prev_frame_id {
            self.current_frame_id - self.prev_frame_id
        } else {
            (1 << frame_id_length) + self.current_frame_id - self.prev_frame_id
        };

        if self.prev_frame_id == self.current_frame_id
            || diff_frame_id >= (1 << (frame_id_length - 1))
        {
            return Err(r.out_of_spec("current_frame_id", self.current_frame_id));
        }

        Ok(())
    }

    /// Implements mark_ref_frames() from 5.9.4.
    fn mark_ref_frames(&mut self, seq: &SequenceHeaderObu) {
        let diff_len = seq.delta_frame_id_length_minus_2 + 2;
        let shifted_diff_len = 1 << diff_len;
        let shifted_id_len = 1 << seq.frame_id_length();
        let current = self.current_frame_id;

        for slot in self.slots.iter_mut() {
            if current > shifted_diff_len {
                if slot.ref_frame_id > current || slot.ref_frame_id < current - shifted_diff_len {
                    slot.ref_valid = false;
                }
            } else if slot.ref_frame_id > current
                && slot.ref_frame_id < shifted_id_len + current - shifted_diff_len
            {
                slot.ref_valid = false;
            }
        }
    }

    /// The reference frame selection and inter tools of a non intra frame.
    fn inter_frame_refs(
        &mut self,
        fh: &mut FrameHeaderObu,
        r: &mut Reader,
        seq: &SequenceHeaderObu,
    ) -> ParseResult<()> {
        if seq.enable_order_hint {
            fh.frame_refs_short_signaling = r.read_flag("frame_refs_short_signaling")?;
            if fh.frame_refs_short_signaling {
                fh.last_frame_idx = r.read_bits("last_frame_idx", 3)? as u8;
                fh.gold_frame_idx = r.read_bits("gold_frame_idx", 3)? as u8;
                fh.ref_frame_idx = self.set_frame_refs(
                    r,
                    seq,
                    fh.last_frame_idx,
                    fh.gold_frame_idx,
                    fh.order_hint,
                )?;
            }
        } else {
            fh.frame_refs_short_signaling = false;
        }

        let id_len = seq.frame_id_length();
        for i in 0..REFS_PER_FRAME {
            if !fh.frame_refs_short_signaling {
                fh.ref_frame_idx[i] = r.read_bits("ref_frame_idx", 3)? as u8;
            }

            if seq.frame_id_numbers_present_flag {
                let n = seq.delta_frame_id_length_minus_2 as usize + 2;
                let delta_frame_id = r.read_bits("delta_frame_id_minus_1", n)? + 1;

                let shifted_id_len = 1 << id_len;
                let expected_frame_id =
                    (self.current_frame_id + shifted_id_len - delta_frame_id) % shifted_id_len;
                r.derived("expectedFrameId", expected_frame_id);

                let slot = &self.slots[usize::from(fh.ref_frame_idx[i])];
                if expected_frame_id != slot.ref_frame_id || !slot.ref_valid {
                    return Err(r.out_of_spec("delta_frame_id_minus_1", delta_frame_id - 1));
                }
            }
        }

        if fh.frame_size_override_flag && !fh.error_resilient_mode {
            self.frame_size_with_refs(fh, r, seq)?;
        } else {
            parse_frame_size(fh, r, seq)?;
            parse_render_size(fh, r)?;
        }

        if fh.force_integer_mv > 0 {
            fh.allow_high_precision_mv = false;
        } else {
            fh.allow_high_precision_mv = r.read_flag("allow_high_precision_mv")?;
        }

        // read_interpolation_filter()
        fh.is_filter_switchable = r.read_flag("is_filter_switchable")?;
        if fh.is_filter_switchable {
            fh.interpolation_filter = InterpolationFilter::Switchable;
        } else {
            fh.interpolation_filter =
                r.read_enum("interpolation_filter", 2, InterpolationFilter::n)?;
        }

        fh.is_motion_mode_switchable = r.read_flag("is_motion_mode_switchable")?;

        if fh.error_resilient_mode || !seq.enable_ref_frame_mvs {
            fh.use_ref_frame_mvs = false;
        } else {
            fh.use_ref_frame_mvs = r.read_flag("use_ref_frame_mvs")?;
        }

        for i in 0..REFS_PER_FRAME {
            let ref_frame = ReferenceFrameType::Last as usize + i;
            let hint = self.slots[usize::from(fh.ref_frame_idx[i])].ref_order_hint;
            fh.order_hints[ref_frame] = hint;

            fh.ref_frame_sign_bias[ref_frame] = seq.enable_order_hint
                && helpers::get_relative_dist(
                    seq.enable_order_hint,
                    seq.order_hint_bits,
                    hint as i32,
                    fh.order_hint as i32,
                ) > 0;
        }

        Ok(())
    }

    /// Implements the set_frame_refs() process of 7.8 and returns
    /// ref_frame_idx.
    pub(crate) fn set_frame_refs(
        &self,
        r: &Reader,
        seq: &SequenceHeaderObu,
        last_frame_idx: u8,
        gold_frame_idx: u8,
        order_hint: u32,
    ) -> ParseResult<[u8; REFS_PER_FRAME]> {
        const LAST: usize = ReferenceFrameType::Last as usize;
        // Reference frames that are not LAST or GOLDEN, in the order they are
        // assigned when no backward reference was found for them.
        const REF_FRAME_LIST: [ReferenceFrameType; REFS_PER_FRAME - 2] = [
            ReferenceFrameType::Last2,
            ReferenceFrameType::Last3,
            ReferenceFrameType::BwdRef,
            ReferenceFrameType::AltRef2,
            ReferenceFrameType::AltRef,
        ];

        let last_frame_idx = usize::from(last_frame_idx);
        let gold_frame_idx = usize::from(gold_frame_idx);

        let mut ref_frame_idx: [Option<usize>; REFS_PER_FRAME] = [None; REFS_PER_FRAME];
        ref_frame_idx[0] = Some(last_frame_idx);
        ref_frame_idx[ReferenceFrameType::Golden as usize - LAST] = Some(gold_frame_idx);

        let mut used_frame = [false; NUM_REF_FRAMES];
        used_frame[last_frame_idx] = true;
        used_frame[gold_frame_idx] = true;

        let cur_frame_hint = 1 << (seq.order_hint_bits - 1);
        let mut shifted_order_hints = [0; NUM_REF_FRAMES];
        for (shifted, slot) in shifted_order_hints.iter_mut().zip(self.slots.iter()) {
            *shifted = cur_frame_hint
                + helpers::get_relative_dist(
                    seq.enable_order_hint,
                    seq.order_hint_bits,
                    slot.ref_order_hint as i32,
                    order_hint as i32,
                );
        }

        let mut latest_order_hint = shifted_order_hints[last_frame_idx];
        if latest_order_hint >= cur_frame_hint {
            return Err(r.out_of_spec("last_frame_idx", last_frame_idx as u32));
        }

        let mut earliest_order_hint = shifted_order_hints[gold_frame_idx];
        if earliest_order_hint >= cur_frame_hint {
            return Err(r.out_of_spec("gold_frame_idx", gold_frame_idx as u32));
        }

        fn assign(
            ref_frame: ReferenceFrameType,
            found: Option<usize>,
            ref_frame_idx: &mut [Option<usize>; REFS_PER_FRAME],
            used_frame: &mut [bool; NUM_REF_FRAMES],
        ) {
            if let Some(idx) = found {
                ref_frame_idx[ref_frame as usize - LAST] = Some(idx);
                used_frame[idx] = true;
            }
        }

        let found = helpers::find_latest_backward(
            &shifted_order_hints,
            &used_frame,
            cur_frame_hint,
            &mut latest_order_hint,
        );
        assign(ReferenceFrameType::AltRef, found, &mut ref_frame_idx, &mut used_frame);

        let found = helpers::find_earliest_backward(
            &shifted_order_hints,
            &used_frame,
            cur_frame_hint,
            &mut earliest_order_hint,
        );
        assign(ReferenceFrameType::BwdRef, found, &mut ref_frame_idx, &mut used_frame);

        let found = helpers::find_earliest_backward(
            &shifted_order_hints,
            &used_frame,
            cur_frame_hint,
            &mut earliest_order_hint,
        );
        assign(ReferenceFrameType::AltRef2, found, &mut ref_frame_idx, &mut used_frame);

        for ref_frame in REF_FRAME_LIST {
            if ref_frame_idx[ref_frame as usize - LAST].is_none() {
                let found = helpers::find_latest_forward(
                    &shifted_order_hints,
                    &used_frame,
                    cur_frame_hint,
                    &mut latest_order_hint,
                );
                assign(ref_frame, found, &mut ref_frame_idx, &mut used_frame);
            }
        }

        // Anything left gets the reference with the earliest output order.
        let mut earliest = 0;
        for (i, hint) in shifted_order_hints.iter().enumerate().skip(1) {
            if *hint < shifted_order_hints[earliest] {
                earliest = i;
            }
        }

        Ok(ref_frame_idx.map(|idx| idx.unwrap_or(earliest) as u8))
    }

    /// Implements frame_size_with_refs() from 5.9.7.
    fn frame_size_with_refs(
        &self,
        fh: &mut FrameHeaderObu,
        r: &mut Reader,
        seq: &SequenceHeaderObu,
    ) -> ParseResult<()> {
        let mut r = r.sub_level("frame_size_with_refs()");

        for i in 0..REFS_PER_FRAME {
            if r.read_flag("found_ref")? {
                let rf = &self.slots[usize::from(fh.ref_frame_idx[i])];
                fh.upscaled_width = rf.ref_upscaled_width;
                fh.frame_width = fh.upscaled_width;
                fh.frame_height = rf.ref_frame_height;
                fh.render_width = rf.ref_render_width;
                fh.render_height = rf.ref_render_height;

                return superres_and_image_size(fh, &mut r, seq);
            }
        }

        parse_frame_size(fh, &mut r, seq)?;
        parse_render_size(fh, &mut r)
    }

    /// Implements setup_past_independence() for the state carried in the
    /// frame header, and returns PrevGmParams.
    fn setup_past_independence(fh: &mut FrameHeaderObu) -> [WarpParams; NUM_REF_FRAMES] {
        fh.segmentation_params.feature_enabled = Default::default();
        fh.segmentation_params.feature_data = Default::default();

        fh.loop_filter_params.loop_filter_delta_enabled = true;
        fh.loop_filter_params.loop_filter_ref_deltas = DEFAULT_LOOP_FILTER_REF_DELTAS;
        fh.loop_filter_params.loop_filter_mode_deltas = Default::default();

        [global_motion::identity_params(); NUM_REF_FRAMES]
    }

    /// Implements load_previous() from 7.20 and returns PrevGmParams.
    fn load_previous(
        &self,
        fh: &mut FrameHeaderObu,
        r: &Reader,
    ) -> ParseResult<[WarpParams; NUM_REF_FRAMES]> {
        let prev_frame = usize::from(fh.ref_frame_idx[fh.primary_ref_frame as usize]);
        let rf = &self.slots[prev_frame];

        if !rf.ref_valid {
            return Err(r.missing(&format!("reference frame {}", prev_frame)));
        }

        // load_loop_filter_params()
        fh.loop_filter_params.loop_filter_ref_deltas = rf.loop_filter_params.loop_filter_ref_deltas;
        fh.loop_filter_params.loop_filter_mode_deltas =
            rf.loop_filter_params.loop_filter_mode_deltas;

        // load_segmentation_params()
        fh.segmentation_params.feature_enabled = rf.segmentation_params.feature_enabled;
        fh.segmentation_params.feature_data = rf.segmentation_params.feature_data;

        Ok(rf.global_motion_params.gm_params)
    }

    /// Derives CodedLossless, LosslessArray, SegQMLevel and AllLossless.
    fn compute_lossless(fh: &mut FrameHeaderObu, r: &mut Reader) {
        let q = &fh.quantization_params;
        fh.coded_lossless = true;

        for segment_id in 0..MAX_SEGMENTS {
            let qindex = q.qindex(&fh.segmentation_params, segment_id);
            fh.lossless_array[segment_id] = qindex == 0 && q.deltas_are_zero();
            if !fh.lossless_array[segment_id] {
                fh.coded_lossless = false;
            }

            if q.using_qmatrix {
                if fh.lossless_array[segment_id] {
                    fh.seg_qm_level[0][segment_id] = 15;
                    fh.seg_qm_level[1][segment_id] = 15;
                    fh.seg_qm_level[2][segment_id] = 15;
                } else {
                    fh.seg_qm_level[0][segment_id] = q.qm_y;
                    fh.seg_qm_level[1][segment_id] = q.qm_u;
                    fh.seg_qm_level[2][segment_id] = q.qm_v;
                }
            }
        }

        fh.all_lossless = fh.coded_lossless && fh.frame_width == fh.upscaled_width;
        r.derived("CodedLossless", fh.coded_lossless);
        r.derived("AllLossless", fh.all_lossless);
    }

    /// Implements skip_mode_params() from 5.9.22.
    fn parse_skip_mode_params(
        &self,
        fh: &mut FrameHeaderObu,
        r: &mut Reader,
        seq: &SequenceHeaderObu,
    ) -> ParseResult<()> {
        let dist = |a: u32, b: u32| {
            helpers::get_relative_dist(seq.enable_order_hint, seq.order_hint_bits, a as i32, b as i32)
        };

        let mut skip_mode_allowed = false;

        if !fh.frame_is_intra && fh.reference_select && seq.enable_order_hint {
            let mut forward: Option<(usize, u32)> = None;
            let mut backward: Option<(usize, u32)> = None;

            for i in 0..REFS_PER_FRAME {
                let ref_hint = self.slots[usize::from(fh.ref_frame_idx[i])].ref_order_hint;
                if dist(ref_hint, fh.order_hint) < 0 {
                    if forward.map_or(true, |(_, hint)| dist(ref_hint, hint) > 0) {
                        forward = Some((i, ref_hint));
                    }
                } else if dist(ref_hint, fh.order_hint) > 0
                    && backward.map_or(true, |(_, hint)| dist(ref_hint, hint) < 0)
                {
                    backward = Some((i, ref_hint));
                }
            }

            let pair = match (forward, backward) {
                (None, _) => None,
                (Some((forward_idx, _)), Some((backward_idx, _))) => Some((forward_idx, backward_idx)),
                (Some((forward_idx, forward_hint)), None) => {
                    let mut second_forward: Option<(usize, u32)> = None;
                    for i in 0..REFS_PER_FRAME {
                        let ref_hint = self.slots[usize::from(fh.ref_frame_idx[i])].ref_order_hint;
                        if dist(ref_hint, forward_hint) < 0
                            && second_forward.map_or(true, |(_, hint)| dist(ref_hint, hint) > 0)
                        {
                            second_forward = Some((i, ref_hint));
                        }
                    }

                    second_forward.map(|(second_idx, _)| (forward_idx, second_idx))
                }
            };

            if let Some((a, b)) = pair {
                skip_mode_allowed = true;
                fh.skip_mode_frame[0] = ReferenceFrameType::Last as u32 + a.min(b) as u32;
                fh.skip_mode_frame[1] = ReferenceFrameType::Last as u32 + a.max(b) as u32;
            }
        }

        fh.skip_mode_present = if skip_mode_allowed {
            r.read_flag("skip_mode_present")?
        } else {
            false
        };

        Ok(())
    }

    /// Implements the reference frame update process of 7.20. Called once a
    /// frame header has been parsed.
    pub fn ref_frame_update(&mut self, fh: &FrameHeaderObu, seq: &SequenceHeaderObu) {
        if fh.show_existing_frame && fh.frame_type != FrameType::KeyFrame {
            return;
        }

        for (i, slot) in self.slots.iter_mut().enumerate() {
            if (fh.refresh_frame_flags >> i) & 1 == 0 {
                continue;
            }

            slot.ref_valid = true;
            slot.ref_frame_id = fh.current_frame_id;
            slot.ref_frame_type = fh.frame_type;
            slot.ref_upscaled_width = fh.upscaled_width;
            slot.ref_frame_width = fh.frame_width;
            slot.ref_frame_height = fh.frame_height;
            slot.ref_render_width = fh.render_width;
            slot.ref_render_height = fh.render_height;
            slot.ref_order_hint = fh.order_hint;
            slot.ref_mi_cols = fh.mi_cols;
            slot.ref_mi_rows = fh.mi_rows;
            slot.ref_subsampling_x = seq.color_config.subsampling_x;
            slot.ref_subsampling_y = seq.color_config.subsampling_y;
            slot.ref_bit_depth = seq.bit_depth;
            slot.segmentation_params = fh.segmentation_params.clone();
            slot.global_motion_params = fh.global_motion_params.clone();
            slot.loop_filter_params = fh.loop_filter_params.clone();
            slot.display_frame_id = fh.display_frame_id;
            slot.showable_frame = fh.showable_frame;

            if seq.film_grain_params_present {
                slot.film_grain_params = fh.film_grain_params.clone();
            }
        }

        log::debug!(
            "Updated reference slots {:#010b} with a {:?} of {}x{}",
            fh.refresh_frame_flags,
            fh.frame_type,
            fh.upscaled_width,
            fh.frame_height
        );
    }
}
