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

//! JDWP backend of the [`DebugTarget`](crate::DebugTarget) interface.
//!
//! - [`codec`] - Packet framing and payload encoding
//! - [`connection`] - Handshake, request/reply correlation and event queueing
//! - [`launcher`] - Starting a suspended JVM that connects back
//! - [`target`] - The interface implementation with its caches

pub mod codec;
pub mod connection;

pub mod launcher;
pub use launcher::*;

pub mod target;
pub use target::*;
