// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).
//!
//! Visualization module
//!
//! This module exposes the live controller states and the configuration in
//! effect through a read-only HTTP API served by Rocket.

pub mod api;
pub mod server;

pub use api::ConfigView;
pub use server::{build_rocket, figment_from_config};
