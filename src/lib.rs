// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

//! bmapcopy creates and consumes block maps (bmaps) for sparse image files
//! and uses them to copy or flash images while transferring only the blocks
//! that hold real data.
//!
//! Since bmapcopy is primarily an application and not a library, the Rust
//! APIs can change at any time, even in patch releases. The CLI source files
//! use concrete types wherever possible for simplicity, while the
//! "library"-style source files aim to be generic.

pub mod cli;
pub mod copy;
pub mod create;
pub mod extents;
pub mod format;
pub mod source;
pub mod stream;
