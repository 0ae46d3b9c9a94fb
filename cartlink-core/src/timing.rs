//! Frame-derived timing constants.
//!
//! Deadlines in the detection and NMI-EXE paths are expressed in NTSC SNES
//! frames rather than round wall-clock numbers.

use std::time::Duration;

/// One NTSC SNES frame: 357366 master cycles at 21.477 MHz.
pub const FRAME: Duration = Duration::from_nanos(16_639_265);

/// Per-probe budget for a detection pass.
pub const DETECT_TIMEOUT: Duration = Duration::from_nanos(16_639_265 * 4);

/// Default deadline for short control exchanges.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default deadline for bulk data transfers.
pub const BULK_TIMEOUT: Duration = Duration::from_secs(15);
