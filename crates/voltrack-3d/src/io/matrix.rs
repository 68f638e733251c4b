use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::{read_f32, read_len, write_len, IoError};

/// Write an `n x n` row-major matrix: `i32 n` followed by `n * n` little-endian `f32`.
pub fn write_square_matrix(path: impl AsRef<Path>, n: usize, values: &[f32]) -> Result<(), IoError> {
    if values.len() != n * n {
        return Err(IoError::MalformedHeader(format!(
            "{} values do not form a {n} x {n} matrix",
            values.len()
        )));
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write_len(&mut writer, n)?;
    for v in values {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a matrix written by [`write_square_matrix`].
///
/// # Returns
///
/// The dimension and the row-major values.
pub fn read_square_matrix(path: impl AsRef<Path>) -> Result<(usize, Vec<f32>), IoError> {
    let mut reader = BufReader::new(File::open(path)?);
    let n = read_len(&mut reader, "matrix size")?;
    let len = n
        .checked_mul(n)
        .ok_or_else(|| IoError::MalformedHeader(format!("matrix size {n} overflows")))?;
    let values = (0..len)
        .map(|_| read_f32(&mut reader))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((n, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("weights.bin");
        let values = vec![1.0, 0.25, 0.25, 1.0];
        write_square_matrix(&path, 2, &values)?;
        assert_eq!(std::fs::metadata(&path)?.len(), 4 + 4 * 4);
        assert_eq!(read_square_matrix(&path)?, (2, values));

        assert!(write_square_matrix(&path, 3, &[1.0]).is_err());
        Ok(())
    }

    #[test]
    fn test_truncated_matrix() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("short.bin");
        let mut bytes = 3i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        std::fs::write(&path, bytes)?;
        assert!(matches!(read_square_matrix(&path), Err(IoError::Io(_))));
        Ok(())
    }
}
