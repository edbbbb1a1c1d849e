// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Logic for parsing the keyword expressions accepted by `senv -k`.
//!
//! A keyword expression is a small boolean language over bare tokens, in the
//! style of `pytest -k`:
//!
//! ```text
//! lint or (tests and not slow)
//! ```
//!
//! A bare token matches a session instance if it is a substring of the
//! instance's canonical name or an exact match for one of its tags.

pub mod errors;
mod expression;
mod parsing;

pub use expression::{KeywordExpr, KeywordQuery};
