// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Chamber thermostat library
//!
//! Hysteresis temperature control for fermentation chambers and similar
//! enclosures: each configured sensor drives a heating and a cooling
//! actuator to keep its reading inside a band.

pub mod config;
pub mod daemon;
pub mod metrics;
pub mod thermal_regulation;
pub mod visualization;
