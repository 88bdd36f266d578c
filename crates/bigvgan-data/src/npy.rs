//! Minimal `.npy` support for precomputed mel spectrograms.
//!
//! Reads little-endian `f4`/`f8` arrays in C order; writes `f4`.

use std::io::Write;
use std::path::Path;

use bigvgan_vocoder::{Result, VocoderError};

const MAGIC: &[u8] = b"\x93NUMPY";

/// Host-side array read from a `.npy` file.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    /// Dimensions, outermost first.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: Vec<f32>,
}

impl NpyArray {
    /// View a `[C, T]` or `[1, C, T]` array as `(C, T)`.
    pub fn as_matrix(&self) -> Option<(usize, usize)> {
        match self.shape.as_slice() {
            [c, t] | [1, c, t] => Some((*c, *t)),
            _ => None,
        }
    }
}

/// Read a `.npy` file.
pub fn read_npy(path: impl AsRef<Path>) -> Result<NpyArray> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| VocoderError::decode(path, e))?;
    parse_npy(&bytes).map_err(|message| VocoderError::decode(path, message))
}

/// Write a C-order `f4` `.npy` file.
pub fn write_npy(path: impl AsRef<Path>, shape: &[usize], data: &[f32]) -> Result<()> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        return Err(VocoderError::ShapeMismatch {
            expected: shape.iter().map(|&d| d as i32).collect(),
            actual: vec![data.len() as i32],
        });
    }

    let dims = match shape {
        [d] => format!("({d},)"),
        _ => format!(
            "({})",
            shape
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': {dims}, }}");
    // Magic, version and length prefix take 10 bytes; pad to 64 with a newline.
    let total = (10 + header.len() + 1).div_ceil(64) * 64;
    header.push_str(&" ".repeat(total - 10 - header.len() - 1));
    header.push('\n');

    let mut file = std::fs::File::create(path)?;
    file.write_all(MAGIC)?;
    file.write_all(&[1, 0])?;
    file.write_all(&(header.len() as u16).to_le_bytes())?;
    file.write_all(header.as_bytes())?;
    for v in data {
        file.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

fn parse_npy(bytes: &[u8]) -> std::result::Result<NpyArray, String> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err("not an npy file".into());
    }
    let (header_len, offset) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated header".into());
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => return Err(format!("unsupported npy version {v}")),
    };
    let header = bytes
        .get(offset..offset + header_len)
        .ok_or("truncated header")?;
    let header = std::str::from_utf8(header).map_err(|e| e.to_string())?;

    let descr = header_value(header, "descr")
        .ok_or("missing descr")?
        .trim_matches(|c| c == '\'' || c == '"');
    if header_value(header, "fortran_order").is_some_and(|v| v.starts_with("True")) {
        return Err("fortran-ordered arrays are not supported".into());
    }
    let shape = parse_shape(header)?;

    let body = &bytes[offset + header_len..];
    let count: usize = shape.iter().product();
    let data = match descr {
        "<f4" => decode_body::<4>(body, count, |b| f32::from_le_bytes(b))?,
        "<f8" => decode_body::<8>(body, count, |b| f64::from_le_bytes(b) as f32)?,
        other => return Err(format!("unsupported dtype {other}")),
    };

    Ok(NpyArray { shape, data })
}

fn decode_body<const N: usize>(
    body: &[u8],
    count: usize,
    convert: impl Fn([u8; N]) -> f32,
) -> std::result::Result<Vec<f32>, String> {
    if body.len() < count * N {
        return Err(format!(
            "expected {} bytes of data, found {}",
            count * N,
            body.len()
        ));
    }
    Ok(body
        .chunks_exact(N)
        .take(count)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            convert(buf)
        })
        .collect())
}

/// Raw text following `'key':` up to the next top-level comma.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = header.find(&format!("'{key}'"))? + key.len() + 2;
    let rest = header[start..].trim_start().strip_prefix(':')?.trim_start();
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn parse_shape(header: &str) -> std::result::Result<Vec<usize>, String> {
    let start = header.find("'shape'").ok_or("missing shape")?;
    let open = header[start..].find('(').ok_or("malformed shape")? + start;
    let close = header[open..].find(')').ok_or("malformed shape")? + open;
    header[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| format!("bad dimension {s:?}: {e}")))
        .collect()
}
