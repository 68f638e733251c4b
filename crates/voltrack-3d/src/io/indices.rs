use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::IoError;

/// Write one point index per line.
pub fn write_indices(path: impl AsRef<Path>, indices: &[usize]) -> Result<(), IoError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for index in indices {
        writeln!(writer, "{index}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read indices written by [`write_indices`]. Blank lines are skipped.
pub fn read_indices(path: impl AsRef<Path>) -> Result<Vec<usize>, IoError> {
    let reader = BufReader::new(File::open(path)?);
    let mut indices = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        let index = token.parse::<usize>().map_err(|_| IoError::ParseNumber {
            line: i + 1,
            token: token.to_string(),
        })?;
        indices.push(index);
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("removed.txt");
        write_indices(&path, &[4, 0, 17])?;
        assert_eq!(std::fs::read_to_string(&path)?, "4\n0\n17\n");
        assert_eq!(read_indices(&path)?, vec![4, 0, 17]);

        std::fs::write(&path, "3\n\n  8 \n-1\n")?;
        assert!(matches!(
            read_indices(&path),
            Err(IoError::ParseNumber { line: 4, .. })
        ));
        Ok(())
    }
}
