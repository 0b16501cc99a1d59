//! Sutherland–Hodgman clipping of triangle lists against a tile box.

use crate::types::{BoundingBox, Triangle, Vertex};

/// Triangles with a smaller area after clipping are dropped.
const MIN_CLIPPED_AREA: f64 = 1e-12;

/// Working vertex for clipping (f64 precision for math, cast to f32 at output).
#[derive(Debug, Clone)]
struct ClipVertex {
    pos: [f64; 3],
    normal: Option<[f64; 3]>,
    uv: Option<[f64; 2]>,
}

impl From<&Vertex> for ClipVertex {
    fn from(v: &Vertex) -> Self {
        Self {
            pos: v.position_f64(),
            normal: v.normal.map(|n| n.map(f64::from)),
            uv: v.uv.map(|t| t.map(f64::from)),
        }
    }
}

impl From<&ClipVertex> for Vertex {
    fn from(v: &ClipVertex) -> Self {
        Vertex {
            position: v.pos.map(|c| c as f32),
            normal: v.normal.map(|n| n.map(|c| c as f32)),
            uv: v.uv.map(|t| t.map(|c| c as f32)),
        }
    }
}

/// Axis-aligned clipping half-plane.
struct ClipPlane {
    axis: usize,
    value: f64,
    /// Keep where `pos[axis] >= value`; otherwise keep where `<=`.
    positive: bool,
}

impl ClipPlane {
    fn box_planes(bounds: &BoundingBox) -> [ClipPlane; 6] {
        std::array::from_fn(|i| {
            let axis = i / 2;
            let positive = i % 2 == 0;
            ClipPlane {
                axis,
                value: if positive { bounds.min[axis] } else { bounds.max[axis] },
                positive,
            }
        })
    }

    fn keeps(&self, v: &ClipVertex) -> bool {
        if self.positive {
            v.pos[self.axis] >= self.value - 1e-10
        } else {
            v.pos[self.axis] <= self.value + 1e-10
        }
    }
}

/// Parametric intersection of edge `a -> b` with `plane`; attributes are
/// interpolated, normals renormalized.
fn intersect_edge(a: &ClipVertex, b: &ClipVertex, plane: &ClipPlane) -> ClipVertex {
    let da = a.pos[plane.axis] - plane.value;
    let db = b.pos[plane.axis] - plane.value;
    let denom = da - db;
    let t = if denom.abs() < 1e-15 { 0.5 } else { da / denom };

    let lerp = |x: f64, y: f64| x + t * (y - x);

    let mut pos: [f64; 3] = std::array::from_fn(|i| lerp(a.pos[i], b.pos[i]));
    // Snap onto the plane so neighbouring tiles share the seam exactly.
    pos[plane.axis] = plane.value;

    let normal = match (a.normal, b.normal) {
        (Some(na), Some(nb)) => {
            let n: [f64; 3] = std::array::from_fn(|i| lerp(na[i], nb[i]));
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            Some(if len > 1e-12 { n.map(|c| c / len) } else { n })
        }
        _ => None,
    };
    let uv = match (a.uv, b.uv) {
        (Some(ua), Some(ub)) => Some([lerp(ua[0], ub[0]), lerp(ua[1], ub[1])]),
        _ => None,
    };

    ClipVertex { pos, normal, uv }
}

/// Sutherland-Hodgman: clip a polygon by a single half-plane.
fn clip_polygon_by_plane(polygon: &[ClipVertex], plane: &ClipPlane) -> Vec<ClipVertex> {
    let n = polygon.len();
    let mut output = Vec::with_capacity(n + 1);
    for i in 0..n {
        let current = &polygon[i];
        let next = &polygon[(i + 1) % n];
        match (plane.keeps(current), plane.keeps(next)) {
            (true, true) => output.push(next.clone()),
            (true, false) => output.push(intersect_edge(current, next, plane)),
            (false, true) => {
                output.push(intersect_edge(current, next, plane));
                output.push(next.clone());
            }
            (false, false) => {}
        }
    }
    output
}

/// Fan-triangulate a convex polygon from vertex 0.
fn fan_triangulate(polygon: &[ClipVertex], material: Option<u32>) -> impl Iterator<Item = Triangle> + '_ {
    (1..polygon.len().saturating_sub(1)).map(move |i| Triangle {
        vertices: [
            Vertex::from(&polygon[0]),
            Vertex::from(&polygon[i]),
            Vertex::from(&polygon[i + 1]),
        ],
        material,
    })
}

fn contains_box(outer: &BoundingBox, inner: &BoundingBox) -> bool {
    (0..3).all(|i| inner.min[i] >= outer.min[i] && inner.max[i] <= outer.max[i])
}

/// Clip one triangle to `bounds`, appending the pieces to `out`.
pub fn clip_triangle(tri: &Triangle, bounds: &BoundingBox, out: &mut Vec<Triangle>) {
    let tb = tri.bounds();
    if !tb.intersects(bounds) {
        return;
    }
    if contains_box(bounds, &tb) {
        out.push(*tri);
        return;
    }

    let mut polygon: Vec<ClipVertex> = tri.vertices.iter().map(ClipVertex::from).collect();
    for plane in &ClipPlane::box_planes(bounds) {
        polygon = clip_polygon_by_plane(&polygon, plane);
        if polygon.len() < 3 {
            return;
        }
    }
    out.extend(fan_triangulate(&polygon, tri.material).filter(|t| t.area() > MIN_CLIPPED_AREA));
}

/// Pieces of `triangles` that fall inside `bounds`.
///
/// Triangles entirely inside are passed through untouched; straddling ones
/// are clipped against the six box planes and fan-triangulated.
pub fn clip_to_box<'a>(
    triangles: impl IntoIterator<Item = &'a Triangle>,
    bounds: &BoundingBox,
) -> Vec<Triangle> {
    let mut out = Vec::new();
    for tri in triangles {
        clip_triangle(tri, bounds, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> BoundingBox {
        BoundingBox::new([0.0; 3], [1.0; 3])
    }

    #[test]
    fn interior_triangle_fast_path() {
        let tri = Triangle::from_positions([0.1, 0.1, 0.1], [0.3, 0.1, 0.1], [0.1, 0.3, 0.1]);
        let out = clip_to_box([&tri], &unit());
        assert_eq!(out, vec![tri]);
    }

    #[test]
    fn outside_triangle_dropped() {
        let tri = Triangle::from_positions([2.0, 2.0, 2.0], [3.0, 2.0, 2.0], [2.0, 3.0, 2.0]);
        assert!(clip_to_box([&tri], &unit()).is_empty());
    }

    #[test]
    fn straddling_triangle_is_cut_at_the_plane() {
        let tri = Triangle::from_positions([0.0, 0.0, 0.5], [2.0, 0.0, 0.5], [0.0, 1.0, 0.5]);
        let out = clip_to_box([&tri], &unit());
        assert!(!out.is_empty());
        for t in &out {
            for v in &t.vertices {
                assert!(v.position[0] <= 1.0 + 1e-6);
            }
        }
        // Area inside x <= 1: full triangle (1.0) minus the tip beyond x = 1 (0.25)
        let area: f64 = out.iter().map(|t| t.area()).sum();
        assert!((area - 0.75).abs() < 1e-5, "area {area}");
    }

    #[test]
    fn halves_cover_the_original() {
        let tri = Triangle::from_positions([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let left = BoundingBox::new([0.0, 0.0, -1.0], [0.5, 1.0, 1.0]);
        let right = BoundingBox::new([0.5, 0.0, -1.0], [1.0, 1.0, 1.0]);
        let total: f64 = clip_to_box([&tri], &left)
            .iter()
            .chain(clip_to_box([&tri], &right).iter())
            .map(|t| t.area())
            .sum();
        assert!((total - tri.area()).abs() < 1e-6);
    }

    #[test]
    fn attributes_interpolated() {
        let mut tri = Triangle::from_positions([0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 2.0, 0.0]);
        for v in &mut tri.vertices {
            v.normal = Some([0.0, 0.0, 1.0]);
            v.uv = Some([v.position[0] / 2.0, v.position[1] / 2.0]);
        }
        tri.material = Some(3);
        let out = clip_to_box([&tri], &unit());
        for t in &out {
            assert_eq!(t.material, Some(3));
            for v in &t.vertices {
                let n = v.normal.unwrap();
                assert!((n[2] - 1.0).abs() < 1e-6);
                let uv = v.uv.unwrap();
                assert!((uv[0] - v.position[0] / 2.0).abs() < 1e-6);
            }
        }
    }
}
