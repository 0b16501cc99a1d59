//! Deterministic mock geometry for demos, tests and benchmarks.
//!
//! `synthetic:terrain?size=100&resolution=64&height=10&seed=0` is a noise
//! height field; `synthetic:sphere?radius=50&segments=32` a UV sphere.

use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::LazyLock;

use crate::error::{Result, TilerError};
use crate::types::{Triangle, Vertex};

pub const SCHEME: &str = "synthetic:";

const MAX_RESOLUTION: u32 = 4096;

/// Permutation and gradient lookup shared by every noise query.
struct NoiseTable {
    perm: [u8; 512],
    gradients: [[f32; 2]; 8],
}

static NOISE: LazyLock<NoiseTable> = LazyLock::new(|| {
    let mut p: [u8; 256] = std::array::from_fn(|i| i as u8);
    // Fixed-seed LCG shuffle keeps the table identical across runs.
    let mut state: u32 = 0x2545_F491;
    for i in (1..256).rev() {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let j = (state >> 8) as usize % (i + 1);
        p.swap(i, j);
    }
    let gradients = std::array::from_fn(|k| {
        let a = k as f32 * PI / 4.0;
        [a.cos(), a.sin()]
    });
    NoiseTable {
        perm: std::array::from_fn(|i| p[i & 255]),
        gradients,
    }
});

fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

/// 2-D gradient noise in roughly [-1, 1].
pub fn gradient_noise(x: f32, y: f32) -> f32 {
    let table = &*NOISE;
    let xi = x.floor();
    let yi = y.floor();
    let (xf, yf) = (x - xi, y - yi);
    let (xi, yi) = ((xi as i32 & 255) as usize, (yi as i32 & 255) as usize);

    let grad = |ix: usize, iy: usize, dx: f32, dy: f32| {
        let h = table.perm[table.perm[ix] as usize + iy] as usize & 7;
        let g = table.gradients[h];
        g[0] * dx + g[1] * dy
    };
    let n00 = grad(xi, yi, xf, yf);
    let n10 = grad(xi + 1, yi, xf - 1.0, yf);
    let n01 = grad(xi, yi + 1, xf, yf - 1.0);
    let n11 = grad(xi + 1, yi + 1, xf - 1.0, yf - 1.0);

    let (u, v) = (fade(xf), fade(yf));
    let a = n00 + u * (n10 - n00);
    let b = n01 + u * (n11 - n01);
    (a + v * (b - a)) * std::f32::consts::SQRT_2
}

/// Geometry for the part of a source after `synthetic:`.
pub fn generate(spec: &str) -> Result<Vec<Triangle>> {
    let (kind, query) = spec.split_once('?').unwrap_or((spec, ""));
    let params = parse_query(query)?;
    let get = |key: &str, default: f32| -> Result<f32> {
        match params.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse::<f32>()
                .ok()
                .filter(|f| f.is_finite())
                .ok_or_else(|| TilerError::Validation(format!("invalid synthetic parameter {key}={v}"))),
        }
    };
    let get_count = |key: &str, default: u32| -> Result<u32> {
        match params.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|n| (1..=MAX_RESOLUTION).contains(n))
                .ok_or_else(|| TilerError::Validation(format!("invalid synthetic parameter {key}={v}"))),
        }
    };

    match kind {
        "terrain" => {
            let size = get("size", 100.0)?;
            Ok(terrain(
                size,
                get_count("resolution", 64)?,
                get("height", size * 0.1)?,
                get("seed", 0.0)?,
            ))
        }
        "sphere" => Ok(sphere(get("radius", 50.0)?, get_count("segments", 32)?.max(3))),
        other => Err(TilerError::Validation(format!(
            "unknown synthetic source '{other}'"
        ))),
    }
}

fn parse_query(query: &str) -> Result<HashMap<&str, &str>> {
    query
        .split('&')
        .filter(|kv| !kv.is_empty())
        .map(|kv| {
            kv.split_once('=')
                .ok_or_else(|| TilerError::Validation(format!("malformed synthetic parameter '{kv}'")))
        })
        .collect()
}

/// Height field over `[0, size]²` with `resolution²` quads.
pub fn terrain(size: f32, resolution: u32, height: f32, seed: f32) -> Vec<Triangle> {
    let n = resolution as usize;
    let step = size / resolution as f32;
    let freq = 4.0 / size.max(f32::EPSILON);
    let point = |i: usize, j: usize| -> [f32; 3] {
        let x = i as f32 * step;
        let y = j as f32 * step;
        let h = gradient_noise(x * freq + seed, y * freq + seed * 0.5)
            + 0.5 * gradient_noise(x * freq * 2.0 + 17.0, y * freq * 2.0 + 31.0);
        [x, y, (h * 0.5 + 0.5) * height]
    };

    let mut out = Vec::with_capacity(n * n * 2);
    for j in 0..n {
        for i in 0..n {
            let (a, b, c, d) = (point(i, j), point(i + 1, j), point(i + 1, j + 1), point(i, j + 1));
            out.push(Triangle::from_positions(a, b, c));
            out.push(Triangle::from_positions(a, c, d));
        }
    }
    out
}

/// UV sphere centred on the origin with smooth normals.
pub fn sphere(radius: f32, segments: u32) -> Vec<Triangle> {
    let sectors = segments as usize;
    let rings = (segments as usize / 2).max(2);
    let vertex = |ring: usize, sector: usize| -> Vertex {
        let theta = PI * ring as f32 / rings as f32;
        let phi = 2.0 * PI * sector as f32 / sectors as f32;
        let n = [theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos()];
        Vertex {
            position: [n[0] * radius, n[1] * radius, n[2] * radius],
            normal: Some(n),
            uv: Some([sector as f32 / sectors as f32, ring as f32 / rings as f32]),
        }
    };

    let mut out = Vec::with_capacity(sectors * (rings - 1) * 2);
    for r in 0..rings {
        for s in 0..sectors {
            let (a, b) = (vertex(r, s), vertex(r, s + 1));
            let (c, d) = (vertex(r + 1, s + 1), vertex(r + 1, s));
            if r != 0 {
                out.push(Triangle { vertices: [a, d, b], material: None });
            }
            if r != rings - 1 {
                out.push(Triangle { vertices: [b, d, c], material: None });
            }
        }
    }
    out
}
