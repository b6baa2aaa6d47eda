// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Sequence header OBU syntax. See 5.5.

use enumn::N;

use crate::codec::av1::error::ParseResult;
use crate::codec::av1::obu::ObuHeader;
use crate::codec::av1::reader::Reader;

pub const MAX_NUM_SPATIAL_LAYERS: usize = 4;
pub const MAX_NUM_TEMPORAL_LAYERS: usize = 8;
pub const MAX_NUM_OPERATING_POINTS: usize = MAX_NUM_SPATIAL_LAYERS * MAX_NUM_TEMPORAL_LAYERS;
pub const SELECT_SCREEN_CONTENT_TOOLS: u32 = 2;
pub const SELECT_INTEGER_MV: u32 = 2;
/// Limit on additional_frame_id_length_minus_1 + delta_frame_id_length_minus_2
/// + 3. See 6.4.1.
pub const MAX_FRAME_ID_LENGTH: u32 = 16;

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Profile {
    #[default]
    Profile0 = 0,
    Profile1 = 1,
    Profile2 = 2,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperatingPoint {
    /// The level the coded video sequence conforms to for this operating
    /// point.
    pub seq_level_idx: u32,
    /// The tier the coded video sequence conforms to for this operating
    /// point.
    pub seq_tier: u32,
    /// Which spatial (bits 8..11) and temporal (bits 0..7) layers are part of
    /// this operating point. Zero means all of them.
    pub idc: u32,
    pub decoder_model_present_for_this_op: bool,
    /// In units of 1/90000 seconds.
    pub decoder_buffer_delay: u32,
    /// In units of 1/90000 seconds.
    pub encoder_buffer_delay: u32,
    pub low_delay_mode_flag: bool,
    pub initial_display_delay_present_for_this_op: bool,
    /// Number of decoded frames that should be buffered before the first
    /// presentable frame is displayed, minus 1.
    pub initial_display_delay_minus_1: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimingInfo {
    /// Time units of a `time_scale` Hz clock per display clock tick.
    pub num_units_in_display_tick: u32,
    /// Time units per second.
    pub time_scale: u32,
    /// Set when consecutive pictures are displayed at a constant interval.
    pub equal_picture_interval: bool,
    /// Clock ticks between two consecutive pictures, minus 1.
    pub num_ticks_per_picture_minus_1: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecoderModelInfo {
    /// Length of decoder_buffer_delay and encoder_buffer_delay in bits,
    /// minus 1.
    pub buffer_delay_length_minus_1: u32,
    pub num_units_in_decoding_tick: u32,
    /// Length of buffer_removal_time in bits, minus 1.
    pub buffer_removal_time_length_minus_1: u32,
    /// Length of frame_presentation_time in bits, minus 1.
    pub frame_presentation_time_length_minus_1: u32,
}

/// Defined by the “Color primaries” section of ISO/IEC 23091-4/ITU-T H.273
/// See 6.4.2
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColorPrimaries {
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Bt470M = 4,
    Bt470bg = 5,
    Bt601 = 6,
    Smpte240 = 7,
    GenericFilm = 8,
    Bt2020 = 9,
    Xyz = 10,
    Smpte431 = 11,
    Smpte432 = 12,
    Ebu3213 = 22,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransferCharacteristics {
    Reserved0 = 0,
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Reserved3 = 3,
    Bt470m = 4,
    Bt470bg = 5,
    Bt601 = 6,
    Smpte240 = 7,
    Linear = 8,
    Log100 = 9,
    Log100Sqrt10 = 10,
    Iec61966 = 11,
    Bt1361 = 12,
    Srgb = 13,
    Bt202010Bit = 14,
    Bt202012Bit = 15,
    Smpte2084 = 16,
    Smpte428 = 17,
    Hlg = 18,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum BitDepth {
    #[default]
    Depth8,
    Depth10,
    Depth12,
}

impl BitDepth {
    pub fn bits(&self) -> u32 {
        match self {
            BitDepth::Depth8 => 8,
            BitDepth::Depth10 => 10,
            BitDepth::Depth12 => 12,
        }
    }
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatrixCoefficients {
    Identity = 0,
    Bt709 = 1,
    #[default]
    Unspecified = 2,
    Reserved3 = 3,
    Fcc = 4,
    Bt470bg = 5,
    Bt601 = 6,
    Smpte240 = 7,
    Ycgco = 8,
    Bt2020Ncl = 9,
    Bt2020Cl = 10,
    Smpte2085 = 11,
    ChromaDerivedNcl = 12,
    ChromaDerivedCl = 13,
    Ictcp = 14,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChromaSamplePosition {
    #[default]
    Unknown = 0,
    Vertical = 1,
    Colocated = 2,
    Reserved = 3,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColorConfig {
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    /// Set when there are no U and V planes.
    pub mono_chrome: bool,
    pub color_description_present_flag: bool,
    pub color_primaries: ColorPrimaries,
    pub transfer_characteristics: TransferCharacteristics,
    pub matrix_coefficients: MatrixCoefficients,
    /// Full swing when set, studio swing otherwise.
    pub color_range: bool,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
    pub chroma_sample_position: ChromaSamplePosition,
    /// Set when U and V may use different delta quantizers.
    pub separate_uv_delta_q: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceHeaderObu {
    /// The OBU header from the OBU that generated this sequence.
    pub obu_header: ObuHeader,
    pub seq_profile: Profile,
    /// Set when the coded video sequence contains a single coded frame.
    pub still_picture: bool,
    /// Set when the syntax elements a still picture does not need are
    /// omitted.
    pub reduced_still_picture_header: bool,
    pub frame_width_bits_minus_1: u32,
    pub frame_height_bits_minus_1: u32,
    pub max_frame_width_minus_1: u32,
    pub max_frame_height_minus_1: u32,
    pub frame_id_numbers_present_flag: bool,
    pub delta_frame_id_length_minus_2: u32,
    pub additional_frame_id_length_minus_1: u32,
    /// 128x128 superblocks when set, 64x64 otherwise.
    pub use_128x128_superblock: bool,
    pub enable_filter_intra: bool,
    pub enable_intra_edge_filter: bool,
    pub enable_interintra_compound: bool,
    pub enable_masked_compound: bool,
    pub enable_warped_motion: bool,
    /// Set when tools based on order hints may be used.
    pub enable_order_hint: bool,
    pub enable_dual_filter: bool,
    pub enable_jnt_comp: bool,
    pub enable_ref_frame_mvs: bool,
    pub seq_choose_screen_content_tools: bool,
    /// SELECT_SCREEN_CONTENT_TOOLS means every frame header carries
    /// allow_screen_content_tools. Any other value is that flag's value.
    pub seq_force_screen_content_tools: u32,
    pub seq_choose_integer_mv: bool,
    /// SELECT_INTEGER_MV means frame headers carry force_integer_mv. Any
    /// other value is that flag's value.
    pub seq_force_integer_mv: u32,
    /// Set when frame headers carry use_superres.
    pub enable_superres: bool,
    pub enable_cdef: bool,
    pub enable_restoration: bool,
    pub film_grain_params_present: bool,
    pub operating_points_cnt_minus_1: u32,
    pub operating_points: [OperatingPoint; MAX_NUM_OPERATING_POINTS],
    pub decoder_model_info_present_flag: bool,
    pub decoder_model_info: DecoderModelInfo,
    pub initial_display_delay_present_flag: bool,
    pub timing_info_present_flag: bool,
    pub timing_info: TimingInfo,
    pub color_config: ColorConfig,

    /* CamelCase variables in the specification */
    pub order_hint_bits: u32,
    pub bit_depth: BitDepth,
    pub num_planes: u32,
}

impl SequenceHeaderObu {
    /// Length in bits of frame ids, or 0 when they are not present.
    pub fn frame_id_length(&self) -> u32 {
        if self.frame_id_numbers_present_flag {
            self.additional_frame_id_length_minus_1 + self.delta_frame_id_length_minus_2 + 3
        } else {
            0
        }
    }

    /// Parses the sequence_header_obu() syntax, up to but excluding the
    /// trailing bits.
    pub fn parse(r: &mut Reader, obu_header: &ObuHeader) -> ParseResult<Self> {
        let mut s = SequenceHeaderObu {
            obu_header: obu_header.clone(),
            ..Default::default()
        };

        s.seq_profile = r.read_enum("seq_profile", 3, Profile::n)?;
        s.still_picture = r.read_flag("still_picture")?;
        s.reduced_still_picture_header = r.read_flag("reduced_still_picture_header")?;

        if s.reduced_still_picture_header {
            s.operating_points[0].seq_level_idx = r.read_bits("seq_level_idx[0]", 5)?;
        } else {
            s.timing_info_present_flag = r.read_flag("timing_info_present_flag")?;
            if s.timing_info_present_flag {
                s.timing_info = TimingInfo::parse(r)?;
                s.decoder_model_info_present_flag = r.read_flag("decoder_model_info_present_flag")?;
                if s.decoder_model_info_present_flag {
                    s.decoder_model_info = DecoderModelInfo::parse(r)?;
                }
            }

            s.initial_display_delay_present_flag =
                r.read_flag("initial_display_delay_present_flag")?;
            s.operating_points_cnt_minus_1 = r.read_bits("operating_points_cnt_minus_1", 5)?;

            for i in 0..=s.operating_points_cnt_minus_1 as usize {
                let mut r = r.sub_level("operating_point");
                let op = &mut s.operating_points[i];

                op.idc = r.read_bits("operating_point_idc", 12)?;
                op.seq_level_idx = r.read_bits("seq_level_idx", 5)?;
                if op.seq_level_idx > 7 {
                    op.seq_tier = r.read_bits("seq_tier", 1)?;
                }

                if s.decoder_model_info_present_flag {
                    op.decoder_model_present_for_this_op =
                        r.read_flag("decoder_model_present_for_this_op")?;
                    if op.decoder_model_present_for_this_op {
                        op.parse_operating_parameters_info(
                            &mut r,
                            s.decoder_model_info.buffer_delay_length_minus_1,
                        )?;
                    }
                }

                if s.initial_display_delay_present_flag {
                    op.initial_display_delay_present_for_this_op =
                        r.read_flag("initial_display_delay_present_for_this_op")?;
                    if op.initial_display_delay_present_for_this_op {
                        op.initial_display_delay_minus_1 =
                            r.read_bits("initial_display_delay_minus_1", 4)?;
                    }
                }
            }
        }

        s.frame_width_bits_minus_1 = r.read_bits("frame_width_bits_minus_1", 4)?;
        s.frame_height_bits_minus_1 = r.read_bits("frame_height_bits_minus_1", 4)?;
        s.max_frame_width_minus_1 = r.read_bits(
            "max_frame_width_minus_1",
            s.frame_width_bits_minus_1 as usize + 1,
        )?;
        s.max_frame_height_minus_1 = r.read_bits(
            "max_frame_height_minus_1",
            s.frame_height_bits_minus_1 as usize + 1,
        )?;

        if !s.reduced_still_picture_header {
            s.frame_id_numbers_present_flag = r.read_flag("frame_id_numbers_present_flag")?;
        }

        if s.frame_id_numbers_present_flag {
            s.delta_frame_id_length_minus_2 = r.read_bits("delta_frame_id_length_minus_2", 4)?;
            s.additional_frame_id_length_minus_1 =
                r.read_bits("additional_frame_id_length_minus_1", 3)?;

            let frame_id_length = s.frame_id_length();
            if frame_id_length > MAX_FRAME_ID_LENGTH {
                return Err(r.out_of_spec("frame_id_length", frame_id_length));
            }
        }

        s.use_128x128_superblock = r.read_flag("use_128x128_superblock")?;
        s.enable_filter_intra = r.read_flag("enable_filter_intra")?;
        s.enable_intra_edge_filter = r.read_flag("enable_intra_edge_filter")?;

        if s.reduced_still_picture_header {
            s.seq_force_screen_content_tools = SELECT_SCREEN_CONTENT_TOOLS;
            s.seq_force_integer_mv = SELECT_INTEGER_MV;
            s.order_hint_bits = 0;
        } else {
            s.enable_interintra_compound = r.read_flag("enable_interintra_compound")?;
            s.enable_masked_compound = r.read_flag("enable_masked_compound")?;
            s.enable_warped_motion = r.read_flag("enable_warped_motion")?;
            s.enable_dual_filter = r.read_flag("enable_dual_filter")?;
            s.enable_order_hint = r.read_flag("enable_order_hint")?;
            if s.enable_order_hint {
                s.enable_jnt_comp = r.read_flag("enable_jnt_comp")?;
                s.enable_ref_frame_mvs = r.read_flag("enable_ref_frame_mvs")?;
            }

            s.seq_choose_screen_content_tools = r.read_flag("seq_choose_screen_content_tools")?;
            if s.seq_choose_screen_content_tools {
                s.seq_force_screen_content_tools = SELECT_SCREEN_CONTENT_TOOLS;
            } else {
                s.seq_force_screen_content_tools =
                    r.read_bits("seq_force_screen_content_tools", 1)?;
            }

            if s.seq_force_screen_content_tools > 0 {
                s.seq_choose_integer_mv = r.read_flag("seq_choose_integer_mv")?;
                if s.seq_choose_integer_mv {
                    s.seq_force_integer_mv = SELECT_INTEGER_MV;
                } else {
                    s.seq_force_integer_mv = r.read_bits("seq_force_integer_mv", 1)?;
                }
            } else {
                s.seq_force_integer_mv = SELECT_INTEGER_MV;
            }

            if s.enable_order_hint {
                s.order_hint_bits = r.read_bits("order_hint_bits_minus_1", 3)? + 1;
            }
        }
        r.derived("OrderHintBits", s.order_hint_bits);

        s.enable_superres = r.read_flag("enable_superres")?;
        s.enable_cdef = r.read_flag("enable_cdef")?;
        s.enable_restoration = r.read_flag("enable_restoration")?;

        s.parse_color_config(r)?;

        s.film_grain_params_present = r.read_flag("film_grain_params_present")?;

        Ok(s)
    }

    fn parse_color_config(&mut self, r: &mut Reader) -> ParseResult<()> {
        let mut r = r.sub_level("color_config()");
        let profile = self.seq_profile;
        let cc = &mut self.color_config;

        cc.high_bitdepth = r.read_flag("high_bitdepth")?;
        if profile == Profile::Profile2 && cc.high_bitdepth {
            cc.twelve_bit = r.read_flag("twelve_bit")?;
            self.bit_depth = if cc.twelve_bit {
                BitDepth::Depth12
            } else {
                BitDepth::Depth10
            };
        } else {
            self.bit_depth = if cc.high_bitdepth {
                BitDepth::Depth10
            } else {
                BitDepth::Depth8
            };
        }
        r.derived("BitDepth", self.bit_depth.bits());

        if profile != Profile::Profile1 {
            cc.mono_chrome = r.read_flag("mono_chrome")?;
        }

        self.num_planes = if cc.mono_chrome { 1 } else { 3 };
        r.derived("NumPlanes", self.num_planes);

        cc.color_description_present_flag = r.read_flag("color_description_present_flag")?;
        if cc.color_description_present_flag {
            cc.color_primaries = r.read_enum("color_primaries", 8, ColorPrimaries::n)?;
            cc.transfer_characteristics =
                r.read_enum("transfer_characteristics", 8, TransferCharacteristics::n)?;
            cc.matrix_coefficients =
                r.read_enum("matrix_coefficients", 8, MatrixCoefficients::n)?;
        } else {
            cc.color_primaries = ColorPrimaries::Unspecified;
            cc.transfer_characteristics = TransferCharacteristics::Unspecified;
            cc.matrix_coefficients = MatrixCoefficients::Unspecified;
        }

        if cc.mono_chrome {
            cc.color_range = r.read_flag("color_range")?;
            cc.subsampling_x = true;
            cc.subsampling_y = true;
            cc.chroma_sample_position = ChromaSamplePosition::Unknown;
            cc.separate_uv_delta_q = false;
            return Ok(());
        } else if cc.color_primaries == ColorPrimaries::Bt709
            && cc.transfer_characteristics == TransferCharacteristics::Srgb
            && cc.matrix_coefficients == MatrixCoefficients::Identity
        {
            cc.color_range = true;
            cc.subsampling_x = false;
            cc.subsampling_y = false;
        } else {
            cc.color_range = r.read_flag("color_range")?;
            match profile {
                Profile::Profile0 => {
                    cc.subsampling_x = true;
                    cc.subsampling_y = true;
                }
                Profile::Profile1 => {
                    cc.subsampling_x = false;
                    cc.subsampling_y = false;
                }
                Profile::Profile2 if self.bit_depth == BitDepth::Depth12 => {
                    cc.subsampling_x = r.read_flag("subsampling_x")?;
                    cc.subsampling_y = if cc.subsampling_x {
                        r.read_flag("subsampling_y")?
                    } else {
                        false
                    };
                }
                Profile::Profile2 => {
                    cc.subsampling_x = true;
                    cc.subsampling_y = false;
                }
            }

            if cc.subsampling_x && cc.subsampling_y {
                cc.chroma_sample_position =
                    r.read_enum("chroma_sample_position", 2, ChromaSamplePosition::n)?;
            }
        }

        cc.separate_uv_delta_q = r.read_flag("separate_uv_delta_q")?;

        Ok(())
    }
}

impl TimingInfo {
    fn parse(r: &mut Reader) -> ParseResult<Self> {
        let mut r = r.sub_level("timing_info()");
        let mut ti = TimingInfo {
            num_units_in_display_tick: r.read_bits("num_units_in_display_tick", 32)?,
            time_scale: r.read_bits("time_scale", 32)?,
            equal_picture_interval: r.read_flag("equal_picture_interval")?,
            ..Default::default()
        };

        if ti.num_units_in_display_tick == 0 {
            return Err(r.out_of_spec("num_units_in_display_tick", 0));
        }
        if ti.time_scale == 0 {
            return Err(r.out_of_spec("time_scale", 0));
        }

        if ti.equal_picture_interval {
            ti.num_ticks_per_picture_minus_1 = r.read_uvlc("num_ticks_per_picture_minus_1")?;
            if ti.num_ticks_per_picture_minus_1 == u32::MAX {
                return Err(r.out_of_spec("num_ticks_per_picture_minus_1", u32::MAX));
            }
        }

        Ok(ti)
    }
}

impl DecoderModelInfo {
    fn parse(r: &mut Reader) -> ParseResult<Self> {
        let mut r = r.sub_level("decoder_model_info()");
        Ok(DecoderModelInfo {
            buffer_delay_length_minus_1: r.read_bits("buffer_delay_length_minus_1", 5)?,
            num_units_in_decoding_tick: r.read_bits("num_units_in_decoding_tick", 32)?,
            buffer_removal_time_length_minus_1: r
                .read_bits("buffer_removal_time_length_minus_1", 5)?,
            frame_presentation_time_length_minus_1: r
                .read_bits("frame_presentation_time_length_minus_1", 5)?,
        })
    }
}

impl OperatingPoint {
    fn parse_operating_parameters_info(
        &mut self,
        r: &mut Reader,
        buffer_delay_length_minus_1: u32,
    ) -> ParseResult<()> {
        let mut r = r.sub_level("operating_parameters_info()");
        let n = buffer_delay_length_minus_1 as usize + 1;
        self.decoder_buffer_delay = r.read_bits("decoder_buffer_delay", n)?;
        self.encoder_buffer_delay = r.read_bits("encoder_buffer_delay", n)?;
        self.low_delay_mode_flag = r.read_flag("low_delay_mode_flag")?;
        Ok(())
    }
}
