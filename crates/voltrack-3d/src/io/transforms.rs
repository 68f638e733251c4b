use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::{parse_line, IoError};
use crate::transforms::RigidTransform;

/// Write one transform per line: the row-major rotation followed by the translation.
pub fn write_transforms(path: impl AsRef<Path>, transforms: &[RigidTransform]) -> Result<(), IoError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for t in transforms {
        let r = t.rotation_rows();
        let tr = t.translation();
        writeln!(
            writer,
            "{} {} {} {} {} {} {} {} {} {} {} {}",
            r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2], tr.x, tr.y, tr.z
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Read transforms written by [`write_transforms`].
///
/// Every non-blank line must hold exactly 12 numbers.
pub fn read_transforms(path: impl AsRef<Path>) -> Result<Vec<RigidTransform>, IoError> {
    let reader = BufReader::new(File::open(path)?);
    let mut transforms = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let v = parse_line::<12>(&line, i + 1)?;
        transforms.push(RigidTransform::from_rows(
            [[v[0], v[1], v[2]], [v[3], v[4], v[5]], [v[6], v[7], v[8]]],
            [v[9], v[10], v[11]],
        ));
    }
    Ok(transforms)
}
