use base64::Engine;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use grayordinates::{sniff_format, GiftiImage, Structure, SurfaceVertexMap, VolumeVoxelMap};

const NUM_VERTICES: usize = 32492;

fn gifti_doc(encoding: &str) -> String {
    let mut raw: Vec<u8> = Vec::with_capacity(NUM_VERTICES * 4);
    for v in 0..NUM_VERTICES {
        raw.extend_from_slice(&(v as f32 * 0.01).to_le_bytes());
    }
    let data = if encoding == "GZipBase64Binary" {
        use flate2::write::ZlibEncoder;
        use std::io::Write;
        let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&raw).unwrap();
        enc.finish().unwrap()
    } else {
        raw
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<GIFTI Version="1.0" NumberOfDataArrays="1">
<DataArray Intent="NIFTI_INTENT_SHAPE" DataType="NIFTI_TYPE_FLOAT32" ArrayIndexingOrder="RowMajorOrder" Dimensionality="1" Dim0="{}" Encoding="{}" Endian="LittleEndian" ExternalFileName="" ExternalFileOffset="">
<Data>{}</Data>
</DataArray>
</GIFTI>
"#,
        NUM_VERTICES,
        encoding,
        base64::engine::general_purpose::STANDARD.encode(&data)
    )
}

fn surface_table() -> String {
    (0..29696).map(|i| format!("{} {}\n", i, i + (i / 100) * 3)).collect()
}

fn volume_table() -> String {
    (0..31870)
        .map(|i| format!("{} CIFTI_STRUCTURE_THALAMUS_LEFT {} {} {}\n", 59412 + i, i % 91, (i / 91) % 109, i / (91 * 109)))
        .collect()
}

fn bench_gifti(c: &mut Criterion) {
    let plain = gifti_doc("Base64Binary");
    let zipped = gifti_doc("GZipBase64Binary");
    c.bench_function("gifti_base64", |b| b.iter(|| black_box(&plain).parse::<GiftiImage>().unwrap()));
    c.bench_function("gifti_gzip_base64", |b| b.iter(|| black_box(&zipped).parse::<GiftiImage>().unwrap()));
    c.bench_function("sniff_format", |b| b.iter(|| sniff_format(black_box(plain.as_bytes()))));
}

fn bench_dense_mapping(c: &mut Criterion) {
    let surface = surface_table();
    let volume = volume_table();
    c.bench_function("parse_surface_table", |b| {
        b.iter(|| SurfaceVertexMap::parse(Structure::CortexLeft, black_box(&surface)).unwrap())
    });
    c.bench_function("parse_volume_table", |b| b.iter(|| VolumeVoxelMap::parse(black_box(&volume)).unwrap()));
}

criterion_group!(benches, bench_gifti, bench_dense_mapping);
criterion_main!(benches);
