// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod coding_tools;
pub mod dispatcher;
pub mod error;
pub mod film_grain;
pub mod frame_header;
pub mod global_motion;
mod helpers;
pub mod metadata;
pub mod obu;
pub mod parser;
pub mod reader;
pub mod sequence;
pub mod superres;
pub mod tile_group;
pub mod tile_info;
