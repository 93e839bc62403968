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

//! Environment variable name constants for SnapStep configuration.
//!
//! # Environment Variables
//!
//! ## Session Bounds
//! - [`SNAPSTEP_MAX_STEPS`] - Step ceiling of a session
//! - [`SNAPSTEP_EVENT_TIMEOUT`] - Per-wait event timeout in seconds
//!
//! ## Toolchain
//! - [`SNAPSTEP_JAVA`] - Java launcher used to start the target
//! - [`SNAPSTEP_JAVAC`] - Compiler used to build the target
//! - [`JAVA_HOME`] - Fallback location of both

/// Environment variable overriding the step ceiling.
///
/// # Default
///
/// 500 steps. The step after the ceiling produces a single error record and the target
/// is terminated.
///
/// # Examples
///
/// ```bash
/// SNAPSTEP_MAX_STEPS=100 snapstep Main.java
/// ```
pub const SNAPSTEP_MAX_STEPS: &str = "SNAPSTEP_MAX_STEPS";

/// Environment variable overriding the per-wait event timeout, in seconds.
///
/// A wait that times out ends the session silently, so this bounds how long a stuck
/// target can hold the session open.
///
/// # Default
///
/// 5 seconds.
pub const SNAPSTEP_EVENT_TIMEOUT: &str = "SNAPSTEP_EVENT_TIMEOUT";

/// Environment variable naming the `java` launcher.
///
/// When not set, `$JAVA_HOME/bin/java` is tried first, then `java` on `PATH`.
pub const SNAPSTEP_JAVA: &str = "SNAPSTEP_JAVA";

/// Environment variable naming the `javac` compiler.
///
/// When not set, `$JAVA_HOME/bin/javac` is tried first, then `javac` on `PATH`.
pub const SNAPSTEP_JAVAC: &str = "SNAPSTEP_JAVAC";

/// Standard JDK location variable, used as a fallback for both tools.
pub const JAVA_HOME: &str = "JAVA_HOME";
