use crate::audio::{AudioConfig, AudioDemodulator, AudioFormat};
use crate::error::{Result, TapeError};
use crate::frame::{BlockParser, TapeBlock};
use crate::trace::{TraceConfig, TraceDemodulator};
use crate::{Bit, DEFAULT_CHANNEL_CAPACITY};
use crossbeam_channel::{bounded, Sender};
use log::{debug, info};
use std::io;
use std::thread;

/// Configuration for a full decode run
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Bits buffered between the demodulator thread and the parser
    pub channel_capacity: usize,
    pub audio: AudioConfig,
    pub trace: TraceConfig,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            audio: AudioConfig::default(),
            trace: TraceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub info_blocks: usize,
    pub data_blocks: usize,
    /// Bits consumed by the parser
    pub bits: usize,
}

/// Drain the demodulator into the channel until it ends, fails, or the
/// parser hangs up. Dropping `tx` on return closes the stream.
fn produce<D>(demod: D, tx: Sender<Bit>) -> Result<u64>
where
    D: Iterator<Item = Result<Bit>>,
{
    let mut sent = 0u64;
    for bit in demod {
        let bit = bit?;
        if tx.send(bit).is_err() {
            debug!("Parser hung up after {} bits", sent);
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

/// Run a demodulator on its own thread and parse its bits on this one.
///
/// `on_block` is called for every block as soon as it is decoded, so output
/// up to a failure is never lost. The first error from either side stops
/// both. A demodulator error is returned only when the parser ended cleanly
/// or on a truncated block, since the cut-off stream is its symptom; any
/// other parser error is the root cause and is returned without waiting for
/// the demodulator thread.
pub fn decode_stream<D, F>(demod: D, config: &DecoderConfig, mut on_block: F) -> Result<DecodeSummary>
where
    D: Iterator<Item = Result<Bit>> + Send + 'static,
    F: FnMut(&TapeBlock) -> Result<()>,
{
    let (tx, rx) = bounded(config.channel_capacity.max(1));
    let producer = thread::Builder::new()
        .name("cmt-demod".to_string())
        .spawn(move || produce(demod, tx))?;

    let mut parser = BlockParser::new(rx.into_iter());
    let mut summary = DecodeSummary::default();
    let consumed = loop {
        match parser.next_block() {
            Ok(Some(block)) => {
                match &block {
                    TapeBlock::Info(_) => summary.info_blocks += 1,
                    TapeBlock::Data(_) => summary.data_blocks += 1,
                }
                if let Err(e) = on_block(&block) {
                    break Err(e);
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    summary.bits = parser.position();
    // Releases the receiver so a blocked producer sees the hang-up
    drop(parser);

    match consumed {
        // The parser saw the channel close, so the producer has already returned
        Ok(()) | Err(TapeError::TruncatedStream) => {
            let produced = producer.join().map_err(|_| TapeError::Producer)?;
            let sent = produced?;
            consumed?;
            info!(
                "Decoded {} info and {} data blocks from {} bits",
                summary.info_blocks, summary.data_blocks, sent
            );
            Ok(summary)
        }
        // The producer may be parked on a source read (a live stdin trace);
        // it stops at its next send, so don't wait for it.
        Err(e) => {
            debug!("Detaching demodulator thread after parser error");
            drop(producer);
            Err(e)
        }
    }
}

/// Decode a channel-0 PCM sample stream.
pub fn decode_audio<S, F>(
    samples: S,
    format: &AudioFormat,
    config: &DecoderConfig,
    on_block: F,
) -> Result<DecodeSummary>
where
    S: Iterator<Item = Result<i32>> + Send + 'static,
    F: FnMut(&TapeBlock) -> Result<()>,
{
    let demod = AudioDemodulator::new(samples, format, &config.audio)?;
    decode_stream(demod, config, on_block)
}

/// Decode an emulator execution trace.
pub fn decode_trace<L, F>(lines: L, config: &DecoderConfig, on_block: F) -> Result<DecodeSummary>
where
    L: Iterator<Item = io::Result<String>> + Send + 'static,
    F: FnMut(&TapeBlock) -> Result<()>,
{
    let demod = TraceDemodulator::new(lines, config.trace.clone());
    decode_stream(demod, config, on_block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_only_is_clean() {
        let bits = std::iter::repeat_with(|| Ok(0u8)).take(64);
        let summary = decode_stream(bits, &DecoderConfig::default(), |_| Ok(())).unwrap();
        assert_eq!(summary, DecodeSummary { info_blocks: 0, data_blocks: 0, bits: 64 });
    }

    #[test]
    fn test_producer_error_wins_over_truncation() {
        let bits = std::iter::repeat_with(|| Ok(1u8))
            .take(10)
            .chain(std::iter::once(Err(TapeError::MalformedTrace { line: 7, count: 3 })));
        let config = DecoderConfig {
            channel_capacity: 1,
            ..DecoderConfig::default()
        };
        match decode_stream(bits, &config, |_| Ok(())) {
            Err(TapeError::MalformedTrace { line, count }) => {
                assert_eq!(line, 7);
                assert_eq!(count, 3);
            }
            other => panic!("Expected MalformedTrace, got {:?}", other),
        }
    }

    #[test]
    fn test_parser_error_stops_endless_producer() {
        // A zero inside the sync mark, then an infinite tail of ones
        let bits = [1u8, 1, 0]
            .into_iter()
            .chain(std::iter::repeat(1u8))
            .map(Ok);
        let config = DecoderConfig {
            channel_capacity: 4,
            ..DecoderConfig::default()
        };
        assert!(matches!(
            decode_stream(bits, &config, |_| Ok(())),
            Err(TapeError::InvalidSync { index: 2 })
        ));
    }

    #[test]
    fn test_parser_error_wins_over_later_producer_error() {
        let bits = [1u8, 1, 0, 1, 1]
            .into_iter()
            .map(Ok)
            .chain(std::iter::once(Err(TapeError::MalformedTrace { line: 999, count: 7 })));
        let config = DecoderConfig {
            channel_capacity: 8,
            ..DecoderConfig::default()
        };
        match decode_stream(bits, &config, |_| Ok(())) {
            Err(TapeError::InvalidSync { index }) => assert_eq!(index, 2),
            other => panic!("Expected InvalidSync, got {:?}", other),
        }
    }

    #[test]
    fn test_parser_error_returns_while_source_is_blocked() {
        // The source stalls like an open stdin that never sends more lines
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let bits = [1u8, 1, 0]
            .into_iter()
            .map(Ok)
            .chain(std::iter::from_fn(move || {
                let _ = gate_rx.recv();
                None
            }));
        let result = decode_stream(bits, &DecoderConfig::default(), |_| Ok(()));
        assert!(matches!(result, Err(TapeError::InvalidSync { index: 2 })));
        drop(gate_tx);
    }
}
