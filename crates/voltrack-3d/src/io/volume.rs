use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use glam::DVec3;

use super::{read_f32, read_i32, read_len, write_len, IoError};
use crate::volume::OccupancyVolume;

/// Write a volume in the run-length encoded binary format.
///
/// Layout, little-endian: `i32` resolution x, y, z; `f32` origin x, y, z; `f32` cell size; then
/// `(u8 value, i32 count)` runs over the cells in storage order. The first run is always of
/// value `false` and may be empty.
pub fn write_volume(path: impl AsRef<Path>, volume: &OccupancyVolume) -> Result<(), IoError> {
    let mut writer = BufWriter::new(File::create(path)?);
    encode_volume(&mut writer, volume)?;
    writer.flush()?;
    Ok(())
}

/// Read a volume written by [`write_volume`].
pub fn read_volume(path: impl AsRef<Path>) -> Result<OccupancyVolume, IoError> {
    let mut reader = BufReader::new(File::open(path)?);
    decode_volume(&mut reader)
}

pub(crate) fn encode_volume<W: Write>(writer: &mut W, volume: &OccupancyVolume) -> Result<(), IoError> {
    for n in volume.resolution() {
        write_len(writer, n)?;
    }
    let origin = volume.origin();
    for v in [origin.x, origin.y, origin.z, volume.cell_size()] {
        writer.write_all(&(v as f32).to_le_bytes())?;
    }

    let mut write_run = |value: bool, count: usize| -> Result<(), IoError> {
        writer.write_all(&[value as u8])?;
        write_len(writer, count)
    };

    let mut current = false;
    let mut count = 0usize;
    for i in 0..volume.cell_count() {
        let value = volume.bit(i);
        if value == current {
            count += 1;
        } else {
            write_run(current, count)?;
            current = value;
            count = 1;
        }
    }
    write_run(current, count)
}

pub(crate) fn decode_volume<R: Read>(reader: &mut R) -> Result<OccupancyVolume, IoError> {
    let mut resolution = [0usize; 3];
    for n in resolution.iter_mut() {
        *n = read_len(reader, "resolution")?;
    }
    let mut header = [0f32; 4];
    for v in header.iter_mut() {
        *v = read_f32(reader)?;
    }
    let origin = DVec3::new(header[0] as f64, header[1] as f64, header[2] as f64);
    let cell_size = header[3] as f64;
    crate::volume::validate(cell_size, resolution)?;

    let total = resolution
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(|| IoError::MalformedHeader(format!("resolution {resolution:?} overflows")))?;

    // the grid is only allocated once the stream has described every cell
    let mut occupied = Vec::new();
    let mut filled = 0usize;
    while filled < total {
        let mut value = [0u8; 1];
        reader.read_exact(&mut value)?;
        let count = read_i32(reader)?;
        let count = usize::try_from(count).map_err(|_| {
            IoError::MalformedHeader(format!("negative run length {count} at cell {filled}"))
        })?;
        if count > total - filled {
            return Err(IoError::RunLengthOverflow {
                offset: filled,
                count,
                total,
            });
        }
        if value[0] != 0 && count > 0 {
            occupied.push(filled..filled + count);
        }
        filled += count;
    }

    let words = total.div_ceil(64);
    let mut bits = Vec::new();
    bits.try_reserve_exact(words).map_err(|_| {
        IoError::MalformedHeader(format!("cannot allocate a grid of {total} cells"))
    })?;
    bits.resize(words, 0u64);
    for run in occupied {
        for i in run {
            bits[i / 64] |= 1 << (i % 64);
        }
    }

    Ok(OccupancyVolume::from_raw_parts(
        origin, cell_size, resolution, bits,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::tests::sphere_volume;

    #[test]
    fn test_volume_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let vol = sphere_volume(20, 7.5);
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sphere.bin");
        write_volume(&path, &vol)?;
        let loaded = read_volume(&path)?;

        assert_eq!(loaded.resolution(), vol.resolution());
        assert_eq!(loaded.occupied_count(), vol.occupied_count());
        let [nx, ny, nz] = vol.resolution();
        for x in 0..nx {
            for y in 0..ny {
                for z in 0..nz {
                    assert_eq!(loaded.is_occupied([x, y, z]), vol.is_occupied([x, y, z]));
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_leading_occupied_run() -> Result<(), IoError> {
        let vol = OccupancyVolume::from_fn(DVec3::ZERO, 0.5, [2, 2, 2], |[x, _, _]| x == 0)?;
        let mut buf = Vec::new();
        encode_volume(&mut buf, &vol)?;
        // header + (false, 0) + (true, 4) + (false, 4)
        assert_eq!(buf.len(), 28 + 3 * 5);
        assert_eq!(&buf[28..33], &[0, 0, 0, 0, 0]);

        let loaded = decode_volume(&mut buf.as_slice())?;
        assert_eq!(loaded, vol);
        Ok(())
    }

    #[test]
    fn test_malformed_streams() -> Result<(), IoError> {
        let vol = OccupancyVolume::from_fn(DVec3::ZERO, 1.0, [2, 1, 1], |_| true)?;
        let mut buf = Vec::new();
        encode_volume(&mut buf, &vol)?;

        let truncated = &buf[..buf.len() - 2];
        assert!(matches!(
            decode_volume(&mut &truncated[..]),
            Err(IoError::Io(_))
        ));

        // grow the last run past the end of the grid
        let mut overflow = buf.clone();
        let n = overflow.len();
        overflow[n - 4..].copy_from_slice(&5i32.to_le_bytes());
        assert!(matches!(
            decode_volume(&mut overflow.as_slice()),
            Err(IoError::RunLengthOverflow { .. })
        ));

        // a header claiming 2^60 cells followed by a single short run
        let mut oversized = Vec::new();
        for _ in 0..3 {
            oversized.extend_from_slice(&(1i32 << 20).to_le_bytes());
        }
        for v in [0.0f32, 0.0, 0.0, 1.0] {
            oversized.extend_from_slice(&v.to_le_bytes());
        }
        oversized.push(1);
        oversized.extend_from_slice(&8i32.to_le_bytes());
        assert!(matches!(
            decode_volume(&mut oversized.as_slice()),
            Err(IoError::Io(_))
        ));

        let mut negative = buf;
        negative[..4].copy_from_slice(&(-2i32).to_le_bytes());
        assert!(matches!(
            decode_volume(&mut negative.as_slice()),
            Err(IoError::MalformedHeader(_))
        ));
        Ok(())
    }
}
