//! Cassette tape (CMT) decoder library
//!
//! Turns a demodulated audio capture or a firmware execution trace into a bit
//! stream, then parses that stream as framed Info/Data tape blocks.

pub mod error;
pub mod cell;
pub mod audio;
pub mod trace;
pub mod frame;
pub mod render;
pub mod pipeline;

pub use audio::{AudioConfig, AudioDemodulator, AudioFormat, AudioThresholds, SampleFormat};
pub use error::{Result, TapeError};
pub use frame::{BlockParser, DataBlock, InfoBlock, TapeBlock};
pub use pipeline::{decode_audio, decode_stream, decode_trace, DecodeSummary, DecoderConfig};
pub use render::{render_payload, Payload, ProgramLine};
pub use trace::{TraceConfig, TraceDemodulator};

/// A single demodulated bit, valued 0 or 1.
pub type Bit = u8;

// Cell configuration
pub const CELL_BITS: usize = 9; // start bit + 8 data bits
pub const NAME_CELLS: usize = 16;

// Block framing
pub const SYNC_BITS: usize = 20;
pub const MARKER_BITS: usize = 20;
pub const INFO_SEPARATOR_BITS: usize = 40;
pub const INFO_CELLS: usize = 128;
pub const CHECKSUM_CELLS: usize = 2;
pub const INFO_BODY_BITS: usize = 1 + INFO_CELLS * CELL_BITS + CHECKSUM_CELLS * CELL_BITS + 1; // 1172
pub const INFO_PADDING_CELLS: usize = 104;

/// Attribute tag of a tokenized BASIC program payload
pub const ATTRIB_BASIC: u8 = 0x02;

// Carrier frequencies (Hz)
pub const ZERO_FREQUENCY: u32 = 1917;
pub const ONE_FREQUENCY: u32 = 958;
pub const RUN_MARGIN_SAMPLES: u32 = 2;

// Calibrated firmware delay loop counts
pub const TRACE_ZERO_COUNT: u32 = 52;
pub const TRACE_ONE_COUNT: u32 = 106;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
