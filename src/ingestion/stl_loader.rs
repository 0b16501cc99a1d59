//! STL in both encodings.
//!
//! Binary: 80-byte header, u32 triangle count, then 50 bytes per triangle
//! (normal, three vertices, u16 attribute), all little-endian.

use std::path::Path;

use tracing::debug;

use crate::error::{Result, TilerError};
use crate::types::{Triangle, Vertex};

const HEADER_LEN: usize = 80;
const RECORD_LEN: usize = 50;

pub fn load_stl(path: &Path) -> Result<Vec<Triangle>> {
    let bytes = std::fs::read(path).map_err(|e| TilerError::io(path.display().to_string(), e))?;
    let triangles = parse_stl(&bytes)?;
    debug!(triangles = triangles.len(), path = %path.display(), "Parsed STL");
    Ok(triangles)
}

pub fn parse_stl(bytes: &[u8]) -> Result<Vec<Triangle>> {
    if is_binary(bytes) {
        parse_binary(bytes)
    } else {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| TilerError::Parse("STL is neither binary nor ASCII".into()))?;
        parse_ascii(text)
    }
}

/// ASCII files start with `solid`, but so do some binary headers; the
/// declared count settles it.
fn is_binary(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_LEN + 4 {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    let expected = count
        .checked_mul(RECORD_LEN)
        .and_then(|n| n.checked_add(HEADER_LEN + 4));
    expected == Some(bytes.len()) || !bytes.trim_ascii_start().starts_with(b"solid")
}

fn parse_binary(bytes: &[u8]) -> Result<Vec<Triangle>> {
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    let body = &bytes[HEADER_LEN + 4..];
    if body.len() < count.saturating_mul(RECORD_LEN) {
        return Err(TilerError::Parse(format!(
            "binary STL declares {count} triangles but holds {} bytes",
            body.len()
        )));
    }
    let read_vec = |rec: &[u8], at: usize| -> [f32; 3] {
        let f = |o: usize| f32::from_le_bytes([rec[o], rec[o + 1], rec[o + 2], rec[o + 3]]);
        [f(at), f(at + 4), f(at + 8)]
    };
    let mut out = Vec::with_capacity(count);
    for rec in body.chunks_exact(RECORD_LEN).take(count) {
        let normal = read_vec(rec, 0);
        out.push(facet(
            normal,
            [read_vec(rec, 12), read_vec(rec, 24), read_vec(rec, 36)],
        )?);
    }
    Ok(out)
}

fn parse_ascii(text: &str) -> Result<Vec<Triangle>> {
    let mut out = Vec::new();
    let mut normal = [0.0f32; 3];
    let mut corners: Vec<[f32; 3]> = Vec::with_capacity(3);

    for (line_no, line) in text.lines().enumerate() {
        let mut tokens = line.split_whitespace();
        let parse3 = |tokens: &mut std::str::SplitWhitespace<'_>| -> Result<[f32; 3]> {
            let mut v = [0.0f32; 3];
            for c in &mut v {
                *c = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| TilerError::Parse(format!("bad number on STL line {}", line_no + 1)))?;
            }
            Ok(v)
        };
        match tokens.next() {
            Some("facet") => {
                if tokens.next() != Some("normal") {
                    return Err(TilerError::Parse(format!("expected 'facet normal' on line {}", line_no + 1)));
                }
                normal = parse3(&mut tokens)?;
                corners.clear();
            }
            Some("vertex") => corners.push(parse3(&mut tokens)?),
            Some("endfacet") => {
                let [a, b, c] = corners[..] else {
                    return Err(TilerError::Parse(format!(
                        "facet ending on line {} has {} vertices",
                        line_no + 1,
                        corners.len()
                    )));
                };
                out.push(facet(normal, [a, b, c])?);
                corners.clear();
            }
            _ => {}
        }
    }
    Ok(out)
}

fn facet(normal: [f32; 3], corners: [[f32; 3]; 3]) -> Result<Triangle> {
    if corners.iter().flatten().any(|c| !c.is_finite()) {
        return Err(TilerError::Parse("non-finite STL vertex".into()));
    }
    // A zero normal means "compute it"; leave it unset.
    let normal = (normal.iter().any(|&c| c != 0.0) && normal.iter().all(|c| c.is_finite()))
        .then_some(normal);
    Ok(Triangle {
        vertices: corners.map(|position| Vertex {
            position,
            normal,
            uv: None,
        }),
        material: None,
    })
}
