use crate::error::{Result, TapeError};
use crate::ATTRIB_BASIC;
use log::warn;
use std::fmt;

const HEX_ROW_BYTES: usize = 16;

/// One tokenized program line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramLine {
    pub number: u16,
    /// Token and text bytes, not detokenized
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Program {
        lines: Vec<ProgramLine>,
        /// Offset just past the end mark, if one was present
        end_mark: Option<usize>,
        /// Bytes left after the end mark
        trailing: usize,
    },
    Raw(Vec<u8>),
}

/// Interpret a data block payload according to its attribute tag.
pub fn render_payload(attrib: u8, payload: &[u8]) -> Result<Payload> {
    if attrib == ATTRIB_BASIC {
        parse_program(payload)
    } else {
        Ok(Payload::Raw(payload.to_vec()))
    }
}

/// Split a tokenized program into lines.
///
/// Each line is `len, number_lo, number_hi, body...` where `len` counts the
/// whole line including its 3-byte header. A zero length ends the program.
fn parse_program(payload: &[u8]) -> Result<Payload> {
    let mut lines = Vec::new();
    let mut cur = 0usize;
    let mut end_mark = None;

    while cur < payload.len() {
        let declared = payload[cur];
        if declared == 0 {
            cur += 1;
            end_mark = Some(cur);
            break;
        }
        let line_len = declared as usize;
        if line_len < 3 || cur + line_len > payload.len() {
            return Err(TapeError::MalformedProgramLine {
                offset: cur,
                declared,
            });
        }
        let number = u16::from_le_bytes([payload[cur + 1], payload[cur + 2]]);
        lines.push(ProgramLine {
            number,
            body: payload[cur + 3..cur + line_len].to_vec(),
        });
        cur += line_len;
    }

    let trailing = payload.len() - cur;
    if trailing > 0 {
        warn!("{} bytes after the program end mark", trailing);
    }

    Ok(Payload::Program {
        lines,
        end_mark,
        trailing,
    })
}

impl fmt::Display for ProgramLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:4} {:3},", self.number, self.body.len())?;
        for b in &self.body {
            write!(f, " {:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Program {
                lines,
                end_mark,
                trailing,
            } => {
                for line in lines {
                    writeln!(f, "{}", line)?;
                }
                if let Some(offset) = end_mark {
                    writeln!(f, "end of data: {}", offset)?;
                }
                if *trailing > 0 {
                    writeln!(f, "trailing bytes: {}", trailing)?;
                }
            }
            Payload::Raw(bytes) => {
                for row in bytes.chunks(HEX_ROW_BYTES) {
                    for b in row {
                        write!(f, " {:02x}", b)?;
                    }
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}
