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

//! SnapStep engine: steps a target program line by line and records its state.
//!
//! A [`DebugSession`] drives a [`DebugTarget`] backend (JDWP for real programs,
//! a scripted one for tests), builds one [`StepRecord`](snapstep_common::types::StepRecord)
//! per step with the [`SnapshotBuilder`], and hands records to a [`RecordSink`].

pub mod compiler;
pub use compiler::*;

pub mod jdwp;

pub mod output;
pub use output::*;

#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub mod session;
pub use session::*;

pub mod sink;
pub use sink::*;

pub mod snapshot;
pub use snapshot::*;

pub mod target;
pub use target::*;
