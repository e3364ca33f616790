use crate::cell::{decode_byte, decode_bytes, decode_name_field, decode_word};
use crate::error::{Result, TapeError};
use crate::{
    Bit, CELL_BITS, CHECKSUM_CELLS, INFO_BODY_BITS, INFO_PADDING_CELLS, INFO_SEPARATOR_BITS,
    MARKER_BITS, NAME_CELLS, SYNC_BITS,
};
use log::debug;

/// Metadata block announcing the following data block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoBlock {
    /// Silence bits seen before the sync mark
    pub leading_zeros: usize,
    pub attrib: u8,
    pub name: Vec<u8>,
    pub reserved: u8,
    pub data_len: u16,
    pub load_addr: u16,
    pub call_addr: u16,
    /// Encoded checksum, reported as read and never verified
    pub checksum: u16,
}

impl InfoBlock {
    pub const BODY_BITS: usize = INFO_BODY_BITS;

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Payload block; its size comes from the preceding info block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    pub leading_zeros: usize,
    /// Attribute carried over from the preceding info block
    pub attrib: u8,
    pub payload: Vec<u8>,
    /// Encoded checksum, reported as read and never verified
    pub checksum: u16,
}

impl DataBlock {
    pub fn body_bits(&self) -> usize {
        1 + self.payload.len() * CELL_BITS + CHECKSUM_CELLS * CELL_BITS + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapeBlock {
    Info(InfoBlock),
    Data(DataBlock),
}

/// State handed from an info block to the data block that follows it
#[derive(Debug, Clone, Copy)]
struct InfoContext {
    attrib: u8,
    data_len: u16,
}

/// Sequential reader over a decoded body
struct FieldCursor<'a> {
    bits: &'a [Bit],
    at: usize,
}

impl<'a> FieldCursor<'a> {
    fn new(bits: &'a [Bit], at: usize) -> Self {
        Self { bits, at }
    }

    fn cells(&mut self, count: usize) -> &'a [Bit] {
        let start = self.at;
        self.at += count * CELL_BITS;
        &self.bits[start..self.at]
    }
}

/// Parses a bit stream into tape blocks
///
/// Holds the attribute and data length of the last info block so the next
/// data block can be sized. That context stays until another info block
/// replaces it.
pub struct BlockParser<I> {
    bits: I,
    position: usize,
    context: Option<InfoContext>,
    failed: bool,
}

impl<I> BlockParser<I>
where
    I: Iterator<Item = Bit>,
{
    pub fn new(bits: I) -> Self {
        Self {
            bits,
            position: 0,
            context: None,
            failed: false,
        }
    }

    /// Number of bits consumed so far
    pub fn position(&self) -> usize {
        self.position
    }

    fn next_bit(&mut self) -> Option<Bit> {
        let bit = self.bits.next()?;
        self.position += 1;
        Some(bit)
    }

    fn take_bits(&mut self, count: usize) -> Result<Vec<Bit>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.next_bit().ok_or(TapeError::TruncatedStream)?);
        }
        Ok(out)
    }

    fn expect_delimiter(which: &'static str, bit: Bit) -> Result<()> {
        if bit != 1 {
            return Err(TapeError::InvalidDelimiter { which, bit });
        }
        Ok(())
    }

    /// Decode the next block, or `Ok(None)` on a clean end of stream.
    pub fn next_block(&mut self) -> Result<Option<TapeBlock>> {
        // Skip leading silence
        let mut leading_zeros = 0usize;
        loop {
            match self.next_bit() {
                None => return Ok(None),
                Some(0) => leading_zeros += 1,
                Some(_) => break,
            }
        }
        let block_start = self.position - 1;
        debug!("Block start at bit {} after {} zeros", block_start, leading_zeros);

        // Tape mark: the bit that ended the silence plus 19 more ones
        let sync = self.take_bits(SYNC_BITS - 1)?;
        if let Some(i) = sync.iter().position(|&b| b != 1) {
            return Err(TapeError::InvalidSync {
                index: block_start + 1 + i,
            });
        }

        let marker_start = self.position;
        let marker = self.take_bits(MARKER_BITS)?;
        let expected = if marker[0] == 1 { 1 } else { 0 };
        if let Some(i) = marker.iter().position(|&b| b != expected) {
            return Err(TapeError::InvalidBlockMarker {
                index: marker_start + i,
                expected,
            });
        }

        let block = if expected == 1 {
            let separator_start = self.position;
            let separator = self.take_bits(INFO_SEPARATOR_BITS)?;
            if let Some(i) = separator.iter().position(|&b| b != 0) {
                return Err(TapeError::InvalidBlockMarker {
                    index: separator_start + i,
                    expected: 0,
                });
            }
            TapeBlock::Info(self.read_info_body(leading_zeros)?)
        } else {
            TapeBlock::Data(self.read_data_body(leading_zeros)?)
        };

        Ok(Some(block))
    }

    fn read_info_body(&mut self, leading_zeros: usize) -> Result<InfoBlock> {
        let body = self.take_bits(INFO_BODY_BITS)?;
        Self::expect_delimiter("start", body[0])?;
        Self::expect_delimiter("end", body[INFO_BODY_BITS - 1])?;

        let mut fields = FieldCursor::new(&body, 1);
        let attrib = decode_byte(fields.cells(1))?;
        let name = decode_name_field(fields.cells(NAME_CELLS))?;
        let reserved = decode_byte(fields.cells(1))?;
        let data_len = decode_word(fields.cells(2))?;
        let load_addr = decode_word(fields.cells(2))?;
        let call_addr = decode_word(fields.cells(2))?;
        fields.cells(INFO_PADDING_CELLS);
        let checksum = decode_word(fields.cells(CHECKSUM_CELLS))?;
        debug_assert_eq!(fields.at, INFO_BODY_BITS - 1);

        self.context = Some(InfoContext { attrib, data_len });

        let info = InfoBlock {
            leading_zeros,
            attrib,
            name,
            reserved,
            data_len,
            load_addr,
            call_addr,
            checksum,
        };
        debug!(
            "Info block '{}': attrib={:02x} len={} load={:04x} call={:04x}",
            info.name_lossy(),
            info.attrib,
            info.data_len,
            info.load_addr,
            info.call_addr
        );
        Ok(info)
    }

    fn read_data_body(&mut self, leading_zeros: usize) -> Result<DataBlock> {
        let context = self.context.ok_or(TapeError::MissingInfoContext)?;

        let start = self.next_bit().ok_or(TapeError::TruncatedStream)?;
        Self::expect_delimiter("start", start)?;

        let payload_bits = self.take_bits(context.data_len as usize * CELL_BITS)?;
        let payload = decode_bytes(&payload_bits)?;

        let checksum = decode_word(&self.take_bits(CHECKSUM_CELLS * CELL_BITS)?)?;

        let end = self.next_bit().ok_or(TapeError::TruncatedStream)?;
        Self::expect_delimiter("end", end)?;

        debug!(
            "Data block: {} bytes, attrib={:02x}, checksum={:04x}",
            payload.len(),
            context.attrib,
            checksum
        );
        Ok(DataBlock {
            leading_zeros,
            attrib: context.attrib,
            payload,
            checksum,
        })
    }
}

impl<I> Iterator for BlockParser<I>
where
    I: Iterator<Item = Bit>,
{
    type Item = Result<TapeBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_block() {
            Ok(block) => block.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
