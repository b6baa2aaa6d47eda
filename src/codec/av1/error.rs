// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

/// Errors raised while parsing AV1 syntax. Every variant carries the path of
/// syntax structures that were open when the failure happened, e.g.
/// `frame_header_obu()/uncompressed_header()/frame_size()/superres_params()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{scope}: {element} needs {requested} bits but only {remaining} are left")]
    OutOfRange {
        scope: String,
        element: String,
        requested: usize,
        remaining: u64,
    },
    #[error("{scope}: {element} is not a valid variable length code")]
    MalformedVarint { scope: String, element: String },
    #[error("{scope}: {what} has not been seen yet")]
    MissingContext { scope: String, what: String },
    #[error("{scope}: {element} = {value} is outside of the range allowed by AV1")]
    ValueOutOfSpecRange {
        scope: String,
        element: String,
        value: i64,
    },
    #[error("{scope}: OBU declares {declared} bytes but only {available} are available")]
    BitstreamTruncated {
        scope: String,
        declared: u64,
        available: u64,
    },
    #[error("{scope}: {element} must start on a byte boundary (bit {position})")]
    Unaligned {
        scope: String,
        element: String,
        position: u64,
    },
}

impl ParseError {
    /// The syntax structure path where the error was raised.
    pub fn scope(&self) -> &str {
        match self {
            ParseError::OutOfRange { scope, .. }
            | ParseError::MalformedVarint { scope, .. }
            | ParseError::MissingContext { scope, .. }
            | ParseError::ValueOutOfSpecRange { scope, .. }
            | ParseError::BitstreamTruncated { scope, .. }
            | ParseError::Unaligned { scope, .. } => scope,
        }
    }
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;
