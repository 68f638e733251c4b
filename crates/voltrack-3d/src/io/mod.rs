use crate::volume::VolumeError;

/// Point index list reader and writer.
pub mod indices;

/// Dense square matrix reader and writer.
pub mod matrix;

/// Point cloud readers and writers.
pub mod points;

/// Rigid transform list reader and writer.
pub mod transforms;

/// Occupancy volume reader and writer.
pub mod volume;

/// Error types for the io module.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IoError {
    /// Failed to read or write a file.
    #[error("Failed to read or write file")]
    Io(#[from] std::io::Error),

    /// A binary header holds an impossible value.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// A run-length pair extends past the last cell of the volume.
    #[error("Run of {count} cells at cell {offset} overflows a volume of {total} cells")]
    RunLengthOverflow {
        /// First cell of the run.
        offset: usize,
        /// Length of the run.
        count: usize,
        /// Number of cells of the volume.
        total: usize,
    },

    /// A text line holds the wrong number of values.
    #[error("Line {line}: expected {expected} values, found {found}")]
    TokenCount {
        /// One-based line number.
        line: usize,
        /// Number of values a line must hold.
        expected: usize,
        /// Number of values found.
        found: usize,
    },

    /// A token is not a number.
    #[error("Line {line}: cannot parse '{token}' as a number")]
    ParseNumber {
        /// One-based line number.
        line: usize,
        /// The offending token.
        token: String,
    },

    /// The decoded volume is invalid.
    #[error(transparent)]
    Volume(#[from] VolumeError),
}

/// Read a little-endian i32 as a non-negative size.
pub(crate) fn read_len<R: std::io::Read>(reader: &mut R, what: &str) -> Result<usize, IoError> {
    let value = read_i32(reader)?;
    usize::try_from(value).map_err(|_| IoError::MalformedHeader(format!("negative {what}: {value}")))
}

pub(crate) fn read_i32<R: std::io::Read>(reader: &mut R) -> Result<i32, IoError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

pub(crate) fn read_f32<R: std::io::Read>(reader: &mut R) -> Result<f32, IoError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(f32::from_le_bytes(bytes))
}

/// Write a size as a little-endian i32.
pub(crate) fn write_len<W: std::io::Write>(writer: &mut W, len: usize) -> Result<(), IoError> {
    let value = i32::try_from(len)
        .map_err(|_| IoError::MalformedHeader(format!("{len} does not fit in a 32 bit header")))?;
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Parse a whitespace separated line of exactly `N` numbers.
pub(crate) fn parse_line<const N: usize>(line: &str, line_no: usize) -> Result<[f64; N], IoError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != N {
        return Err(IoError::TokenCount {
            line: line_no,
            expected: N,
            found: tokens.len(),
        });
    }
    let mut values = [0.0; N];
    for (v, token) in values.iter_mut().zip(tokens) {
        *v = token.parse().map_err(|_| IoError::ParseNumber {
            line: line_no,
            token: token.to_string(),
        })?;
    }
    Ok(values)
}
