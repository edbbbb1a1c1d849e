// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors returned while parsing keyword expressions.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// An error that occurred while parsing a keyword expression.
///
/// Implements [`miette::Diagnostic`], so the offending part of the input is
/// underlined when rendered through a miette handler.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("failed to parse keyword expression")]
#[non_exhaustive]
pub struct KeywordParseError {
    /// The input that failed to parse.
    #[source_code]
    pub input: String,

    /// The location at which parsing stopped.
    #[label("{}", message)]
    pub span: SourceSpan,

    /// A description of what went wrong.
    pub message: String,
}

impl KeywordParseError {
    pub(crate) fn new(input: impl Into<String>, offset: usize, message: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            span: (offset, 0).into(),
            message: message.into(),
        }
    }
}
