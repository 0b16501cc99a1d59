use criterion::{Criterion, criterion_group, criterion_main};
use lod_tiler::codec::{TileMetadata, decode_tile, encode_tile};
use lod_tiler::config::OutputFormat;
use lod_tiler::incremental::fingerprint;
use lod_tiler::ingestion::synthetic;
use lod_tiler::types::{TileCoord, triangles_bounds};

fn bench_encode(c: &mut Criterion) {
    // 64x64 quads = 8192 triangles, one tile's worth of geometry
    let tris = synthetic::terrain(64.0, 64, 8.0, 0.0);
    let meta = TileMetadata {
        coord: TileCoord::new(3, 2, 5, 0),
        bounds: triangles_bounds(&tris),
        geometric_error: 4.0,
    };

    c.bench_function("encode_b3dm_8k", |b| {
        b.iter(|| encode_tile(OutputFormat::B3dm, &tris, &meta, 0).unwrap());
    });
    c.bench_function("encode_b3dm_8k_compressed", |b| {
        b.iter(|| encode_tile(OutputFormat::B3dm, &tris, &meta, 7).unwrap());
    });
    c.bench_function("encode_glb_8k", |b| {
        b.iter(|| encode_tile(OutputFormat::Glb, &tris, &meta, 0).unwrap());
    });
}

fn bench_decode(c: &mut Criterion) {
    let tris = synthetic::terrain(64.0, 64, 8.0, 0.0);
    let meta = TileMetadata {
        coord: TileCoord::new(3, 2, 5, 0),
        bounds: triangles_bounds(&tris),
        geometric_error: 4.0,
    };
    let bytes = encode_tile(OutputFormat::B3dm, &tris, &meta, 0).unwrap();

    c.bench_function("decode_b3dm_8k", |b| {
        b.iter(|| decode_tile(&bytes).unwrap());
    });
}

fn bench_fingerprint(c: &mut Criterion) {
    let tris = synthetic::terrain(64.0, 64, 8.0, 0.0);
    let bounds = triangles_bounds(&tris);
    let meta = TileMetadata {
        coord: TileCoord::new(3, 2, 5, 0),
        bounds,
        geometric_error: 4.0,
    };
    let bytes = encode_tile(OutputFormat::B3dm, &tris, &meta, 0).unwrap();

    c.bench_function("fingerprint_b3dm_8k", |b| {
        b.iter(|| {
            fingerprint(meta.coord, &bounds, "out/tiles/3/2_5_0.b3dm", Some(&bytes)).unwrap()
        });
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_fingerprint);
criterion_main!(benches);
