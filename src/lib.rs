// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-level parsing of AV1 OBU streams, with a trace of every syntax element
//! read.
//!
//! [`codec::av1::dispatcher::ObuDispatcher`] is the entry point for whole
//! streams. The per-OBU parsers in [`codec::av1::parser`] can also be driven
//! directly.

pub mod bitstream_utils;
pub mod codec;
pub mod trace;
