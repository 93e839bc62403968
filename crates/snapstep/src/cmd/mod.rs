//! Command modules for the SnapStep CLI

pub mod record;

pub use record::record_program;
