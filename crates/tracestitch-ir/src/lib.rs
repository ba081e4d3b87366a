pub mod diagnostics;
pub mod entry_args;
pub mod program;
pub mod stitch;
pub mod validate;
