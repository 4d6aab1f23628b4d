/// Atomic output writing: every file is assembled in a temporary file in the
/// destination directory and renamed into place only once complete.
use crate::error::{ConvertError, Result};
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `path` through `fill`; on any error the destination is left untouched.
pub fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let temp = NamedTempFile::new_in(dir).map_err(|e| ConvertError::io(dir, e))?;
    let mut writer = BufWriter::new(temp);
    fill(&mut writer).map_err(|e| ConvertError::io(path, e))?;
    writer.flush().map_err(|e| ConvertError::io(path, e))?;

    let temp = writer
        .into_inner()
        .map_err(|e| ConvertError::io(path, e.into_error()))?;
    temp.persist(path)
        .map_err(|e| ConvertError::io(path, e.error))?;
    Ok(())
}

/// Raw little-endian f32 values, no header or length prefix.
pub fn write_f32_bin(path: &Path, data: &[f32]) -> Result<()> {
    write_atomic(path, |writer| {
        let mut bytes = Vec::with_capacity(data.len() * 4);
        for &value in data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        writer.write_all(&bytes)
    })
}

/// Read back a raw f32 file.
pub fn read_f32_bin(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path).map_err(|e| ConvertError::io(path, e))?;
    if bytes.len() % 4 != 0 {
        return Err(ConvertError::format(
            path.display().to_string(),
            format!("length {} is not a multiple of 4", bytes.len()),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
