use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use glam::DVec3;

use super::{parse_line, read_f32, read_len, write_len, IoError};

/// Write points as `i32 count` followed by little-endian `f32` x, y, z triples.
pub fn write_points_bin(path: impl AsRef<Path>, points: &[DVec3]) -> Result<(), IoError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_len(&mut writer, points.len())?;
    for p in points {
        for v in p.to_array() {
            writer.write_all(&(v as f32).to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Read points written by [`write_points_bin`].
pub fn read_points_bin(path: impl AsRef<Path>) -> Result<Vec<DVec3>, IoError> {
    let mut reader = BufReader::new(File::open(path)?);
    let count = read_len(&mut reader, "point count")?;
    let mut points = Vec::with_capacity(count.min(1 << 24));
    for _ in 0..count {
        let x = read_f32(&mut reader)?;
        let y = read_f32(&mut reader)?;
        let z = read_f32(&mut reader)?;
        points.push(DVec3::new(x as f64, y as f64, z as f64));
    }
    Ok(points)
}

/// Write points as `x y z` text lines.
pub fn write_points_xyz(path: impl AsRef<Path>, points: &[DVec3]) -> Result<(), IoError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for p in points {
        writeln!(writer, "{} {} {}", p.x, p.y, p.z)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read `x y z` text lines. Blank lines are skipped.
pub fn read_points_xyz(path: impl AsRef<Path>) -> Result<Vec<DVec3>, IoError> {
    let reader = BufReader::new(File::open(path)?);
    let mut points = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        points.push(DVec3::from_array(parse_line::<3>(&line, i + 1)?));
    }
    Ok(points)
}
