// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! metadata_obu() from 5.8.

use enumn::N;

use crate::codec::av1::error::ParseResult;
use crate::codec::av1::reader::Reader;

/// Last metadata type reserved for private use. Larger values are reserved
/// for future use by AOMedia.
pub const METADATA_TYPE_UNREGISTERED_MAX: u32 = 31;
/// scalability_mode_idc value for which a scalability_structure() follows.
pub const SCALABILITY_SS: u32 = 14;
pub const ITU_T_T35_COUNTRY_CODE_EXTENSION: u32 = 0xff;

#[derive(N, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MetadataType {
    HdrCll = 1,
    HdrMdcv = 2,
    Scalability = 3,
    ItutT35 = 4,
    Timecode = 5,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScalabilityMode {
    #[default]
    L1T2 = 0,
    L1T3 = 1,
    L2T1 = 2,
    L2T2 = 3,
    L2T3 = 4,
    S2T1 = 5,
    S2T2 = 6,
    S2T3 = 7,
    L2T1h = 8,
    L2T2h = 9,
    L2T3h = 10,
    S2T1h = 11,
    S2T2h = 12,
    S2T3h = 13,
    Ss = 14,
}

/// metadata_hdr_cll(), in cd/m2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HdrCll {
    pub max_cll: u32,
    pub max_fall: u32,
}

/// metadata_hdr_mdcv(). Chromaticities are 0.16 fixed point, luminance_max is
/// 24.8 and luminance_min 18.14.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HdrMdcv {
    pub primary_chromaticity_x: [u32; 3],
    pub primary_chromaticity_y: [u32; 3],
    pub white_point_chromaticity_x: u32,
    pub white_point_chromaticity_y: u32,
    pub luminance_max: u32,
    pub luminance_min: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemporalGroupEntry {
    pub temporal_id: u32,
    pub temporal_switching_up_point_flag: bool,
    pub spatial_switching_up_point_flag: bool,
    pub ref_pic_diff: Vec<u32>,
}

/// scalability_structure().
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScalabilityStructure {
    pub spatial_layers_cnt_minus_1: u32,
    pub spatial_layer_dimensions_present_flag: bool,
    pub spatial_layer_description_present_flag: bool,
    pub temporal_group_description_present_flag: bool,
    /// (spatial_layer_max_width, spatial_layer_max_height) per layer.
    pub spatial_layer_max_size: Vec<(u32, u32)>,
    pub spatial_layer_ref_id: Vec<u32>,
    pub temporal_group: Vec<TemporalGroupEntry>,
}

/// metadata_scalability().
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scalability {
    pub scalability_mode_idc: ScalabilityMode,
    /// Only present for `ScalabilityMode::Ss`.
    pub structure: Option<ScalabilityStructure>,
}

/// metadata_itut_t35(). The payload is kept as is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItutT35 {
    pub itu_t_t35_country_code: u32,
    pub itu_t_t35_country_code_extension_byte: Option<u32>,
    pub itu_t_t35_payload_bytes: Vec<u8>,
}

/// metadata_timecode(). Absent fields are `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timecode {
    pub counting_type: u32,
    pub full_timestamp_flag: bool,
    pub discontinuity_flag: bool,
    pub cnt_dropped_flag: bool,
    pub n_frames: u32,
    pub seconds_value: Option<u32>,
    pub minutes_value: Option<u32>,
    pub hours_value: Option<u32>,
    pub time_offset_length: u32,
    pub time_offset_value: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataObu {
    HdrCll(HdrCll),
    HdrMdcv(HdrMdcv),
    Scalability(Scalability),
    ItutT35(ItutT35),
    Timecode(Timecode),
    /// Types 6 to 31, for private use. Their payload is not interpreted.
    Unregistered { metadata_type: u32, payload: Vec<u8> },
}

impl MetadataObu {
    /// Parses a metadata OBU payload, stopping before its trailing bits.
    pub fn parse(r: &mut Reader) -> ParseResult<Self> {
        let mut r = r.sub_level("metadata_obu()");

        let metadata_type = r.read_leb128("metadata_type")?;
        let Some(known) = MetadataType::n(metadata_type) else {
            if metadata_type == 0 || metadata_type > METADATA_TYPE_UNREGISTERED_MAX {
                return Err(r.out_of_spec("metadata_type", metadata_type));
            }

            r.annotate("unregistered");
            let payload = payload_before_trailing_bits(&r).to_vec();
            r.skip_bytes("metadata_payload", payload.len() as u64)?;
            return Ok(MetadataObu::Unregistered {
                metadata_type,
                payload,
            });
        };
        r.annotate(format_args!("{:?}", known));

        let metadata = match known {
            MetadataType::HdrCll => MetadataObu::HdrCll(parse_hdr_cll(&mut r)?),
            MetadataType::HdrMdcv => MetadataObu::HdrMdcv(parse_hdr_mdcv(&mut r)?),
            MetadataType::Scalability => MetadataObu::Scalability(parse_scalability(&mut r)?),
            MetadataType::ItutT35 => MetadataObu::ItutT35(parse_itut_t35(&mut r)?),
            MetadataType::Timecode => MetadataObu::Timecode(parse_timecode(&mut r)?),
        };

        Ok(metadata)
    }

    pub fn metadata_type(&self) -> u32 {
        match self {
            MetadataObu::HdrCll(_) => MetadataType::HdrCll as u32,
            MetadataObu::HdrMdcv(_) => MetadataType::HdrMdcv as u32,
            MetadataObu::Scalability(_) => MetadataType::Scalability as u32,
            MetadataObu::ItutT35(_) => MetadataType::ItutT35 as u32,
            MetadataObu::Timecode(_) => MetadataType::Timecode as u32,
            MetadataObu::Unregistered { metadata_type, .. } => *metadata_type,
        }
    }
}

/// The bytes left in the payload, minus the byte aligned trailing_bits(),
/// i.e. up to the last non zero byte.
fn payload_before_trailing_bits<'a>(r: &Reader<'a>) -> &'a [u8] {
    let data = r.remaining_data();
    let end = data.iter().rposition(|b| *b != 0).unwrap_or(0);
    &data[..end]
}

fn parse_hdr_cll(r: &mut Reader) -> ParseResult<HdrCll> {
    let mut r = r.sub_level("metadata_hdr_cll()");

    Ok(HdrCll {
        max_cll: r.read_bits("max_cll", 16)?,
        max_fall: r.read_bits("max_fall", 16)?,
    })
}

fn parse_hdr_mdcv(r: &mut Reader) -> ParseResult<HdrMdcv> {
    let mut r = r.sub_level("metadata_hdr_mdcv()");
    let mut mdcv = HdrMdcv::default();

    for i in 0..3 {
        mdcv.primary_chromaticity_x[i] = r.read_bits("primary_chromaticity_x", 16)?;
        mdcv.primary_chromaticity_y[i] = r.read_bits("primary_chromaticity_y", 16)?;
    }

    mdcv.white_point_chromaticity_x = r.read_bits("white_point_chromaticity_x", 16)?;
    mdcv.white_point_chromaticity_y = r.read_bits("white_point_chromaticity_y", 16)?;
    mdcv.luminance_max = r.read_bits("luminance_max", 32)?;
    mdcv.luminance_min = r.read_bits("luminance_min", 32)?;

    Ok(mdcv)
}

fn parse_scalability(r: &mut Reader) -> ParseResult<Scalability> {
    let mut r = r.sub_level("metadata_scalability()");

    let scalability_mode_idc = r.read_enum("scalability_mode_idc", 8, ScalabilityMode::n)?;
    let structure = if scalability_mode_idc == ScalabilityMode::Ss {
        Some(parse_scalability_structure(&mut r)?)
    } else {
        None
    };

    Ok(Scalability {
        scalability_mode_idc,
        structure,
    })
}

fn parse_scalability_structure(r: &mut Reader) -> ParseResult<ScalabilityStructure> {
    let mut r = r.sub_level("scalability_structure()");
    let mut ss = ScalabilityStructure {
        spatial_layers_cnt_minus_1: r.read_bits("spatial_layers_cnt_minus_1", 2)?,
        spatial_layer_dimensions_present_flag: r
            .read_flag("spatial_layer_dimensions_present_flag")?,
        spatial_layer_description_present_flag: r
            .read_flag("spatial_layer_description_present_flag")?,
        temporal_group_description_present_flag: r
            .read_flag("temporal_group_description_present_flag")?,
        ..Default::default()
    };
    r.read_bits("scalability_structure_reserved_3bits", 3)?;

    let num_layers = ss.spatial_layers_cnt_minus_1 as usize + 1;
    if ss.spatial_layer_dimensions_present_flag {
        for _ in 0..num_layers {
            let width = r.read_bits("spatial_layer_max_width", 16)?;
            let height = r.read_bits("spatial_layer_max_height", 16)?;
            ss.spatial_layer_max_size.push((width, height));
        }
    }

    if ss.spatial_layer_description_present_flag {
        for _ in 0..num_layers {
            ss.spatial_layer_ref_id.push(r.read_bits("spatial_layer_ref_id", 8)?);
        }
    }

    if ss.temporal_group_description_present_flag {
        let temporal_group_size = r.read_bits("temporal_group_size", 8)?;
        for _ in 0..temporal_group_size {
            let mut entry = TemporalGroupEntry {
                temporal_id: r.read_bits("temporal_group_temporal_id", 3)?,
                temporal_switching_up_point_flag: r
                    .read_flag("temporal_group_temporal_switching_up_point_flag")?,
                spatial_switching_up_point_flag: r
                    .read_flag("temporal_group_spatial_switching_up_point_flag")?,
                ..Default::default()
            };

            let ref_cnt = r.read_bits("temporal_group_ref_cnt", 3)?;
            for _ in 0..ref_cnt {
                entry
                    .ref_pic_diff
                    .push(r.read_bits("temporal_group_ref_pic_diff", 8)?);
            }

            ss.temporal_group.push(entry);
        }
    }

    Ok(ss)
}

fn parse_itut_t35(r: &mut Reader) -> ParseResult<ItutT35> {
    let mut r = r.sub_level("metadata_itut_t35()");

    let itu_t_t35_country_code = r.read_bits("itu_t_t35_country_code", 8)?;
    let itu_t_t35_country_code_extension_byte =
        if itu_t_t35_country_code == ITU_T_T35_COUNTRY_CODE_EXTENSION {
            Some(r.read_bits("itu_t_t35_country_code_extension_byte", 8)?)
        } else {
            None
        };

    let payload = payload_before_trailing_bits(&r).to_vec();
    r.skip_bytes("itu_t_t35_payload_bytes", payload.len() as u64)?;

    Ok(ItutT35 {
        itu_t_t35_country_code,
        itu_t_t35_country_code_extension_byte,
        itu_t_t35_payload_bytes: payload,
    })
}

fn parse_timecode(r: &mut Reader) -> ParseResult<Timecode> {
    let mut r = r.sub_level("metadata_timecode()");
    let mut tc = Timecode {
        counting_type: r.read_bits("counting_type", 5)?,
        full_timestamp_flag: r.read_flag("full_timestamp_flag")?,
        discontinuity_flag: r.read_flag("discontinuity_flag")?,
        cnt_dropped_flag: r.read_flag("cnt_dropped_flag")?,
        n_frames: r.read_bits("n_frames", 9)?,
        ..Default::default()
    };

    fn read_value(
        r: &mut Reader,
        name: &str,
        bits: usize,
        max: u32,
    ) -> ParseResult<Option<u32>> {
        let value = r.read_bits(name, bits)?;
        if value > max {
            return Err(r.out_of_spec(name, value));
        }
        Ok(Some(value))
    }

    if tc.full_timestamp_flag {
        tc.seconds_value = read_value(&mut r, "seconds_value", 6, 59)?;
        tc.minutes_value = read_value(&mut r, "minutes_value", 6, 59)?;
        tc.hours_value = read_value(&mut r, "hours_value", 5, 23)?;
    } else if r.read_flag("seconds_flag")? {
        tc.seconds_value = read_value(&mut r, "seconds_value", 6, 59)?;
        if r.read_flag("minutes_flag")? {
            tc.minutes_value = read_value(&mut r, "minutes_value", 6, 59)?;
            if r.read_flag("hours_flag")? {
                tc.hours_value = read_value(&mut r, "hours_value", 5, 23)?;
            }
        }
    }

    tc.time_offset_length = r.read_bits("time_offset_length", 5)?;
    if tc.time_offset_length > 0 {
        tc.time_offset_value = r.read_bits("time_offset_value", tc.time_offset_length as usize)?;
    }

    Ok(tc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream_utils::BitWriter;
    use crate::codec::av1::error::ParseError;
    use crate::trace::SyntaxTrace;

    fn parse(data: &[u8]) -> ParseResult<(MetadataObu, u64)> {
        let mut r = Reader::untraced(data);
        let metadata = MetadataObu::parse(&mut r)?;
        Ok((metadata, r.position()))
    }

    #[test]
    fn hdr_cll() {
        let _ = env_logger::try_init();

        let mut w = BitWriter::new();
        w.write_leb128(1).write_f(16, 1000).write_f(16, 400);
        w.write_trailing_bits();
        let data = w.into_bytes();

        let mut r = Reader::new(&data, SyntaxTrace::default());
        let metadata = MetadataObu::parse(&mut r).unwrap();
        assert_eq!(
            metadata,
            MetadataObu::HdrCll(HdrCll {
                max_cll: 1000,
                max_fall: 400
            })
        );
        assert_eq!(r.position(), 40);

        let trace = r.into_trace();
        let metadata_type = trace.field("metadata_type").unwrap();
        assert!(matches!(
            metadata_type,
            crate::trace::TraceEntry::Field { meaning: Some(m), .. } if m == "HdrCll"
        ));
    }

    #[test]
    fn hdr_mdcv() {
        let mut w = BitWriter::new();
        w.write_leb128(2);
        for (x, y) in [(34000, 16000), (13250, 34500), (7500, 3000)] {
            w.write_f(16, x).write_f(16, y);
        }
        w.write_f(16, 15635)
            .write_f(16, 16450)
            .write_f(32, 1000 << 8)
            .write_f(32, 50);
        let data = w.into_bytes();

        let (metadata, position) = parse(&data).unwrap();
        let MetadataObu::HdrMdcv(mdcv) = metadata else {
            panic!("unexpected metadata {:?}", metadata);
        };
        assert_eq!(mdcv.primary_chromaticity_x, [34000, 13250, 7500]);
        assert_eq!(mdcv.primary_chromaticity_y, [16000, 34500, 3000]);
        assert_eq!(mdcv.white_point_chromaticity_y, 16450);
        assert_eq!(mdcv.luminance_max, 256000);
        assert_eq!(mdcv.luminance_min, 50);
        assert_eq!(position, 8 + 8 * 16 + 64);
    }

    #[test]
    fn scalability_structure() {
        let mut w = BitWriter::new();
        w.write_leb128(3).write_f(8, SCALABILITY_SS);
        // Two spatial layers with dimensions, no descriptions, a temporal
        // group of one entry with one reference.
        w.write_f(2, 1)
            .write_bit(true)
            .write_bit(false)
            .write_bit(true)
            .write_f(3, 0);
        w.write_f(16, 320).write_f(16, 180).write_f(16, 640).write_f(16, 360);
        w.write_f(8, 1)
            .write_f(3, 0)
            .write_bit(true)
            .write_bit(false)
            .write_f(3, 1)
            .write_f(8, 1);
        let data = w.into_bytes();

        let (metadata, _) = parse(&data).unwrap();
        let MetadataObu::Scalability(scalability) = metadata else {
            panic!("unexpected metadata {:?}", metadata);
        };
        assert_eq!(scalability.scalability_mode_idc, ScalabilityMode::Ss);
        let ss = scalability.structure.unwrap();
        assert_eq!(ss.spatial_layer_max_size, vec![(320, 180), (640, 360)]);
        assert!(ss.spatial_layer_ref_id.is_empty());
        assert_eq!(
            ss.temporal_group,
            vec![TemporalGroupEntry {
                temporal_id: 0,
                temporal_switching_up_point_flag: true,
                spatial_switching_up_point_flag: false,
                ref_pic_diff: vec![1],
            }]
        );

        // Other modes have no structure, and unknown modes are rejected.
        let (metadata, position) = parse(&[3, 2]).unwrap();
        assert_eq!(
            metadata,
            MetadataObu::Scalability(Scalability {
                scalability_mode_idc: ScalabilityMode::L2T1,
                structure: None,
            })
        );
        assert_eq!(position, 16);
        assert!(matches!(
            parse(&[3, 15]),
            Err(ParseError::ValueOutOfSpecRange { value: 15, .. })
        ));
    }

    #[test]
    fn itut_t35_payload_excludes_trailing_bits() {
        // United States, then a payload ending in a zero byte.
        let data = [4, 0xb5, 0x00, 0x3c, 0x00, 0x01, 0x04, 0x00, 0x80];
        let (metadata, position) = parse(&data).unwrap();
        assert_eq!(
            metadata,
            MetadataObu::ItutT35(ItutT35 {
                itu_t_t35_country_code: 0xb5,
                itu_t_t35_country_code_extension_byte: None,
                itu_t_t35_payload_bytes: vec![0x00, 0x3c, 0x00, 0x01, 0x04, 0x00],
            })
        );
        assert_eq!(position, 64);

        let data = [4, 0xff, 0x01, 0xaa, 0x80];
        let (metadata, _) = parse(&data).unwrap();
        let MetadataObu::ItutT35(t35) = metadata else {
            panic!("unexpected metadata {:?}", metadata);
        };
        assert_eq!(t35.itu_t_t35_country_code_extension_byte, Some(1));
        assert_eq!(t35.itu_t_t35_payload_bytes, vec![0xaa]);
    }

    #[test]
    fn timecode() {
        let mut w = BitWriter::new();
        w.write_leb128(5)
            .write_f(5, 0)
            .write_bit(false) // full_timestamp_flag
            .write_bit(false)
            .write_bit(false)
            .write_f(9, 24)
            .write_bit(true) // seconds_flag
            .write_f(6, 30)
            .write_bit(true) // minutes_flag
            .write_f(6, 2)
            .write_bit(false) // hours_flag
            .write_f(5, 4)
            .write_f(4, 9);
        let data = w.into_bytes();

        let (metadata, position) = parse(&data).unwrap();
        assert_eq!(
            metadata,
            MetadataObu::Timecode(Timecode {
                n_frames: 24,
                seconds_value: Some(30),
                minutes_value: Some(2),
                hours_value: None,
                time_offset_length: 4,
                time_offset_value: 9,
                ..Default::default()
            })
        );
        assert_eq!(position, 8 + 17 + 1 + 6 + 1 + 6 + 1 + 5 + 4);

        let mut w = BitWriter::new();
        w.write_leb128(5)
            .write_f(5, 0)
            .write_bit(true)
            .write_bit(false)
            .write_bit(false)
            .write_f(9, 0)
            .write_f(6, 61);
        let data = w.into_bytes();
        let err = parse(&data).unwrap_err();
        assert_eq!(err.scope(), "metadata_obu()/metadata_timecode()");
    }

    #[test]
    fn unregistered_and_reserved_types() {
        let (metadata, position) = parse(&[6, 1, 2, 3, 0x80]).unwrap();
        assert_eq!(
            metadata,
            MetadataObu::Unregistered {
                metadata_type: 6,
                payload: vec![1, 2, 3],
            }
        );
        assert_eq!(metadata.metadata_type(), 6);
        assert_eq!(position, 32);

        for reserved in [0u8, 32] {
            let err = parse(&[reserved, 0x80]).unwrap_err();
            assert_eq!(
                err,
                ParseError::ValueOutOfSpecRange {
                    scope: "metadata_obu()".into(),
                    element: "metadata_type".into(),
                    value: i64::from(reserved),
                }
            );
        }
    }
}
