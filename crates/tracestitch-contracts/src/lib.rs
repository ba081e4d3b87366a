//! Shared, version-pinned identifiers.
//!
//! These constants are the single source of truth for names and schema strings
//! that appear in machine-readable I/O or that the reference interpreter relies on.

pub const STITCH_REPORT_SCHEMA_VERSION: &str = "tracestitch.report@0.1.0";

/// Name of the function whose arguments drive trace acquisition and which receives the patch.
pub const ENTRY_FUNCTION_NAME: &str = "main";

/// Landing label inserted at the trace position; target of the post-commit jump.
pub const SPECULATE_SUCCESS_LABEL: &str = "speculate-success";

/// Label that opens the fallback handler. Recorded `guard` instructions branch here.
pub const SPECULATE_FAIL_LABEL: &str = "speculate-fail";

pub const EXIT_OK: u8 = 0;
pub const EXIT_ACQUISITION_ERROR: u8 = 1;
pub const EXIT_STRUCTURAL_ERROR: u8 = 2;
