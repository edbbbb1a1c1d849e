// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Args;
use std::str::FromStr;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

/// Output-related flags, shared by every invocation.
#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Show all command output, not just failures
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,

    /// Force color output
    #[arg(long = "forcecolor", global = true, conflicts_with = "no_color")]
    pub(crate) force_color: bool,

    /// Disable color output
    #[arg(long = "nocolor", global = true)]
    pub(crate) no_color: bool,

    /// Prefix log lines with a timestamp
    #[arg(long = "add-timestamp", global = true)]
    pub(crate) add_timestamp: bool,
}

impl OutputOpts {
    pub(crate) fn init(self) -> OutputContext {
        let color = if self.force_color {
            Color::Always
        } else if self.no_color {
            Color::Never
        } else {
            Color::Auto
        };
        color.init();

        let filter = EnvFilter::try_from_env("SENV_LOG").unwrap_or_else(|_| {
            EnvFilter::new(if self.verbose { "debug" } else { "info" })
        });
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(color.should_colorize(Stream::Stderr))
            .with_writer(std::io::stderr);
        if self.add_timestamp {
            builder.init();
        } else {
            builder.without_time().init();
        }

        OutputContext {
            verbose: self.verbose,
            color,
        }
    }
}

#[derive(Copy, Clone, Debug)]
#[must_use]
pub(crate) struct OutputContext {
    #[expect(dead_code)]
    pub(crate) verbose: bool,
    pub(crate) color: Color,
}

/// Produce color output: auto, always, never.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

impl Color {
    fn init(self) {
        match self {
            Color::Auto => owo_colors::unset_override(),
            Color::Always => owo_colors::set_override(true),
            Color::Never => owo_colors::set_override(false),
        }
    }

    pub(crate) fn should_colorize(self, stream: Stream) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(stream).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Color::Auto),
            "always" => Ok(Color::Always),
            "never" => Ok(Color::Never),
            s => Err(format!(
                "{s} is not a valid option, expected `auto`, `always` or `never`"
            )),
        }
    }
}
