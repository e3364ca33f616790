use crate::error::{Result, TapeError};
use crate::{CELL_BITS, NAME_CELLS};

/// Decode `count` consecutive cells into an unsigned integer.
///
/// Each cell is one start bit (always 1) followed by 8 data bits sent MSB
/// first. Multi-cell fields are little-endian: cell `i` supplies bits
/// `8*i..8*i+8` of the result.
pub fn decode_cells(count: usize, bits: &[u8]) -> Result<u32> {
    if count == 0 || count > 4 {
        return Err(TapeError::MalformedCell(format!(
            "cannot decode {} cells into a 32-bit value",
            count
        )));
    }
    if bits.len() != count * CELL_BITS {
        return Err(TapeError::MalformedCell(format!(
            "expected {} bits for {} cells, got {}",
            count * CELL_BITS,
            count,
            bits.len()
        )));
    }

    let mut value = 0u32;
    for (i, cell) in bits.chunks_exact(CELL_BITS).enumerate() {
        value |= (cell_value(i, cell)? as u32) << (i * 8);
    }
    Ok(value)
}

pub fn decode_byte(bits: &[u8]) -> Result<u8> {
    decode_cells(1, bits).map(|v| v as u8)
}

pub fn decode_word(bits: &[u8]) -> Result<u16> {
    decode_cells(2, bits).map(|v| v as u16)
}

/// Decode a whole number of cells into a byte vector.
pub fn decode_bytes(bits: &[u8]) -> Result<Vec<u8>> {
    if bits.len() % CELL_BITS != 0 {
        return Err(TapeError::MalformedCell(format!(
            "{} bits is not a whole number of cells",
            bits.len()
        )));
    }
    bits.chunks_exact(CELL_BITS)
        .enumerate()
        .map(|(i, cell)| cell_value(i, cell))
        .collect()
}

/// Decode the 16-cell name field, truncating at the first NUL byte.
///
/// Cells after the terminator are not examined.
pub fn decode_name_field(bits: &[u8]) -> Result<Vec<u8>> {
    if bits.len() != NAME_CELLS * CELL_BITS {
        return Err(TapeError::MalformedCell(format!(
            "name field must be {} bits, got {}",
            NAME_CELLS * CELL_BITS,
            bits.len()
        )));
    }

    let mut name = Vec::with_capacity(NAME_CELLS);
    for (i, cell) in bits.chunks_exact(CELL_BITS).enumerate() {
        let byte = cell_value(i, cell)?;
        if byte == 0 {
            break;
        }
        name.push(byte);
    }
    Ok(name)
}

fn cell_value(index: usize, cell: &[u8]) -> Result<u8> {
    if cell[0] != 1 {
        return Err(TapeError::MalformedCell(format!(
            "start bit of cell {} is {}",
            index, cell[0]
        )));
    }
    // MSB first
    Ok(cell[1..]
        .iter()
        .fold(0u8, |acc, &bit| (acc << 1) | (bit & 1)))
}
