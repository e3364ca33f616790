use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapeError {
    #[error("Malformed cell: {0}")]
    MalformedCell(String),

    #[error("Invalid sync mark at bit {index}")]
    InvalidSync { index: usize },

    #[error("Invalid block marker at bit {index} (expected {expected})")]
    InvalidBlockMarker { index: usize, expected: u8 },

    #[error("Invalid {which} delimiter bit: {bit}")]
    InvalidDelimiter { which: &'static str, bit: u8 },

    #[error("Data block without a preceding info block")]
    MissingInfoContext,

    #[error("Malformed program line at offset {offset} (declared length {declared})")]
    MalformedProgramLine { offset: usize, declared: u8 },

    #[error("Invalid trace log at line {line}: {count} decrements")]
    MalformedTrace { line: usize, count: u32 },

    #[error("Unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),

    #[error("Bit stream ended inside a block")]
    TruncatedStream,

    #[error("Sample source error: {0}")]
    SampleSource(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Demodulator thread panicked")]
    Producer,
}

pub type Result<T> = std::result::Result<T, TapeError>;
