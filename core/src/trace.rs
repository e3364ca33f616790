use crate::error::{Result, TapeError};
use crate::{Bit, TRACE_ONE_COUNT, TRACE_ZERO_COUNT};
use log::debug;
use std::io;

/// Instruction patterns of the firmware's bit-banging delay loops
///
/// The firmware enters a delay loop by loading a sentinel immediate, then
/// decrements a counter until it runs out. Only loops entered on the "one"
/// sentinel carry a bit; their length tells the two bit values apart.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub entry_mnemonic: String,
    pub decrement_mnemonic: String,
    pub zero_sentinel: String,
    pub one_sentinel: String,
    /// Decrements of a loop encoding a 0 bit
    pub zero_count: u32,
    /// Decrements of a loop encoding a 1 bit
    pub one_count: u32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            entry_mnemonic: "LDA".to_string(),
            decrement_mnemonic: "DEC".to_string(),
            zero_sentinel: "#$04".to_string(),
            one_sentinel: "#$FF".to_string(),
            zero_count: TRACE_ZERO_COUNT,
            one_count: TRACE_ONE_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    CountingZero(u32),
    CountingOne(u32),
}

/// Demodulates emulator trace lines into bits by counting delay-loop iterations
pub struct TraceDemodulator<L> {
    lines: L,
    config: TraceConfig,
    state: LoopState,
    line_no: usize,
    bits_emitted: u64,
    done: bool,
}

impl<L> TraceDemodulator<L>
where
    L: Iterator<Item = io::Result<String>>,
{
    pub fn new(lines: L, config: TraceConfig) -> Self {
        Self {
            lines,
            config,
            state: LoopState::Idle,
            line_no: 0,
            bits_emitted: 0,
            done: false,
        }
    }

    /// Close the current loop. Only loops entered on the one sentinel emit.
    fn close_loop(&self) -> Result<Option<Bit>> {
        match self.state {
            LoopState::CountingOne(count) if count == self.config.zero_count => Ok(Some(0)),
            LoopState::CountingOne(count) if count == self.config.one_count => Ok(Some(1)),
            LoopState::CountingOne(count) => Err(TapeError::MalformedTrace {
                line: self.line_no,
                count,
            }),
            LoopState::Idle | LoopState::CountingZero(_) => Ok(None),
        }
    }

    fn push_line(&mut self, line: &str) -> Result<Option<Bit>> {
        let mut bit = None;
        if line.contains(self.config.entry_mnemonic.as_str()) {
            bit = self.close_loop()?;
            self.state = if line.contains(self.config.zero_sentinel.as_str()) {
                LoopState::CountingZero(0)
            } else if line.contains(self.config.one_sentinel.as_str()) {
                LoopState::CountingOne(0)
            } else {
                LoopState::Idle
            };
        }
        if line.contains(self.config.decrement_mnemonic.as_str()) {
            self.state = match self.state {
                LoopState::Idle => LoopState::Idle,
                LoopState::CountingZero(n) => LoopState::CountingZero(n + 1),
                LoopState::CountingOne(n) => LoopState::CountingOne(n + 1),
            };
        }
        Ok(bit)
    }
}

impl<L> Iterator for TraceDemodulator<L>
where
    L: Iterator<Item = io::Result<String>>,
{
    type Item = Result<Bit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    self.line_no += 1;
                    match self.push_line(&line) {
                        Ok(Some(bit)) => {
                            self.bits_emitted += 1;
                            return Some(Ok(bit));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(TapeError::Io(e)));
                }
                None => {
                    self.done = true;
                    let last = self.close_loop();
                    self.state = LoopState::Idle;
                    debug!(
                        "Trace exhausted after {} lines, {} bits",
                        self.line_no, self.bits_emitted
                    );
                    return last.transpose();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> impl Iterator<Item = io::Result<String>> + '_ {
        text.lines().map(|l| Ok(l.to_string()))
    }

    fn one_loop(decrements: usize) -> String {
        let mut out = String::from("F8A0  A9 FF     LDA #$FF\n");
        for _ in 0..decrements {
            out.push_str("F8A4  C6 00     DEC $00\n");
        }
        out
    }

    fn demodulate(text: &str) -> Result<Vec<Bit>> {
        TraceDemodulator::new(lines(text), TraceConfig::default()).collect()
    }

    #[test]
    fn test_calibrated_counts_emit_bits() {
        assert_eq!(demodulate(&one_loop(106)).unwrap(), vec![1]);
        assert_eq!(demodulate(&one_loop(52)).unwrap(), vec![0]);
    }

    #[test]
    fn test_consecutive_loops_keep_order() {
        let text = [one_loop(106), one_loop(52), one_loop(52), one_loop(106)].concat();
        assert_eq!(demodulate(&text).unwrap(), vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_off_by_one_count_is_fatal() {
        for count in [0, 51, 53, 105, 107] {
            match demodulate(&one_loop(count)) {
                Err(TapeError::MalformedTrace { count: c, .. }) => assert_eq!(c, count as u32),
                other => panic!("Expected MalformedTrace for {}, got {:?}", count, other),
            }
        }
    }

    fn decrements(text: &mut String, count: usize) {
        for _ in 0..count {
            text.push_str("F894  C6 00     DEC $00\n");
        }
    }

    #[test]
    fn test_zero_sentinel_loop_never_emits() {
        for count in [52, 106] {
            let mut text = String::from("F890  A9 04     LDA #$04\n");
            decrements(&mut text, count);
            assert!(demodulate(&text).unwrap().is_empty(), "{} decrements", count);

            text.push_str(&one_loop(106));
            assert_eq!(demodulate(&text).unwrap(), vec![1]);
        }
    }

    #[test]
    fn test_unrelated_load_returns_to_idle() {
        let mut text = one_loop(52);
        text.push_str("F900  A9 10     LDA #$10\n");
        text.push_str("F902  C6 00     DEC $00\n");
        text.push_str("F904  A9 10     LDA #$10\n");
        assert_eq!(demodulate(&text).unwrap(), vec![0]);
    }

    #[test]
    fn test_unrelated_load_does_not_reemit_previous_bit() {
        // Calibrated decrements after an unrelated load belong to no loop
        let mut text = one_loop(52);
        text.push_str("F900  A9 10     LDA #$10\n");
        decrements(&mut text, 52);
        text.push_str("F904  A9 10     LDA #$10\n");
        assert_eq!(demodulate(&text).unwrap(), vec![0]);

        let mut text = one_loop(106);
        text.push_str("F900  A9 10     LDA #$10\n");
        decrements(&mut text, 106);
        assert_eq!(demodulate(&text).unwrap(), vec![1]);
    }

    #[test]
    fn test_decrements_before_any_loop_are_ignored() {
        let text = ["F000  C6 00     DEC $00\n".to_string(), one_loop(106)].concat();
        assert_eq!(demodulate(&text).unwrap(), vec![1]);
    }

    #[test]
    fn test_io_error_is_reported() {
        let source = vec![
            Ok("LDA #$FF".to_string()),
            Err(io::Error::new(io::ErrorKind::InvalidData, "bad utf-8")),
        ];
        let result: Result<Vec<Bit>> =
            TraceDemodulator::new(source.into_iter(), TraceConfig::default()).collect();
        assert!(matches!(result, Err(TapeError::Io(_))));
    }
}
