// SPDX-FileCopyrightText: 2025-2026 The bmapcopy developers
// SPDX-License-Identifier: GPL-3.0-only

pub mod args;
pub mod copy;
pub mod create;
