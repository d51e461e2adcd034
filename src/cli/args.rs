// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli::{copy, create};

#[derive(Debug, Subcommand)]
pub enum Command {
    Create(create::CreateCli),
    Copy(copy::CopyCli),
}

#[derive(Debug, Parser)]
#[command(version, about = "Create and apply block maps for sparse image files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Lowest log message severity to output.
    #[arg(long, global = true, value_name = "LEVEL", default_value_t = LevelFilter::INFO)]
    pub log_level: LevelFilter,
}

pub fn init_logging(logging_initialized: &AtomicBool, log_level: LevelFilter) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    logging_initialized.store(true, Ordering::SeqCst);
}

pub fn main(logging_initialized: &AtomicBool) -> Result<()> {
    let cli = Cli::parse();

    init_logging(logging_initialized, cli.log_level);

    match cli.command {
        Command::Create(c) => create::create_main(&c),
        Command::Copy(c) => copy::copy_main(&c),
    }
}
