// SnapStep - Step-by-step program state recorder
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! SnapStep Common - Shared types for SnapStep components
//!
//! This crate provides the language-neutral value model (values, heap table, step
//! records and the output envelope) used by the engine and the binary.

/// Value model and step record types written to the output channel
pub mod types;

/// Environment variable names for configuration
pub mod env;

pub use types::*;
