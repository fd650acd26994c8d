use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use serde_json::json;
use zarrs::array_subset::ArraySubset;
use zarrs_dechunk::{
    compressor::compressor_from_metadata,
    metadata::{ArrayMetadata, ARRAY_METADATA_KEY},
    progress::{ProgressCallback, ProgressStats},
    DechunkError, DechunkOptions, Dechunker,
};
use zarrs_filesystem::FilesystemStore;

fn blosc() -> serde_json::Value {
    json!({"blocksize": 0, "clevel": 5, "cname": "lz4", "id": "blosc", "shuffle": 1})
}

/// Write a Zarr V2 array, padding the final chunk to a full chunk like `zarr-python`.
fn write_array(
    path: &Path,
    shape: &[u64],
    chunks: &[u64],
    dtype: &str,
    compressor: serde_json::Value,
    dimension_separator: Option<&str>,
    bytes: &[u8],
) -> ArrayMetadata {
    let mut json = json!({
        "chunks": chunks,
        "compressor": compressor,
        "dtype": dtype,
        "fill_value": 0,
        "filters": null,
        "order": "C",
        "shape": shape,
        "zarr_format": 2
    });
    if let Some(dimension_separator) = dimension_separator {
        json["dimension_separator"] = json!(dimension_separator);
    }
    let metadata = ArrayMetadata::from_json(&json.to_string()).unwrap();
    std::fs::create_dir_all(path).unwrap();
    std::fs::write(
        path.join(ARRAY_METADATA_KEY),
        metadata.to_json_pretty().unwrap(),
    )
    .unwrap();

    let compressor = compressor_from_metadata(metadata.compressor(), metadata.data_type()).unwrap();
    let chunk_size = metadata.chunk_rows() as usize * metadata.row_size();
    for (index, chunk) in bytes.chunks(chunk_size).enumerate() {
        let mut chunk = chunk.to_vec();
        chunk.resize(chunk_size, 0);
        let chunk_path = path.join(metadata.chunk_key(index as u64));
        std::fs::create_dir_all(chunk_path.parent().unwrap()).unwrap();
        std::fs::write(chunk_path, compressor.encode(&chunk).unwrap()).unwrap();
    }
    metadata
}

fn write_array_u16(path: &Path, num_elements: u16, chunk_length: u64) -> Vec<u16> {
    let elements: Vec<u16> = (0..num_elements).collect();
    write_array(
        path,
        &[u64::from(num_elements)],
        &[chunk_length],
        "<u2",
        blosc(),
        None,
        bytemuck::cast_slice(&elements),
    );
    elements
}

/// The relative path and content of every file under `path`.
fn snapshot(path: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn visit(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                visit(root, &path, files);
            } else {
                let content = std::fs::read(&path).unwrap();
                files.insert(path.strip_prefix(root).unwrap().to_path_buf(), content);
            }
        }
    }
    let mut files = BTreeMap::new();
    visit(path, path, &mut files);
    files
}

fn num_entries(path: &Path) -> usize {
    std::fs::read_dir(path).unwrap().count()
}

/// The concatenated decoded chunks of the array at `path`.
fn decoded_bytes(path: &Path) -> Vec<u8> {
    let dechunker = Dechunker::open(path).unwrap();
    dechunker
        .decoded_chunks()
        .flat_map(|chunk| chunk.unwrap().into_bytes())
        .collect()
}

/// Read the array at `path` with `zarrs`.
fn retrieve_u16(path: &Path, shape: Vec<u64>) -> Vec<u16> {
    let store = Arc::new(FilesystemStore::new(path).unwrap());
    let array = zarrs::array::Array::open(store, "/").unwrap();
    assert_eq!(array.shape(), shape.as_slice());
    array
        .retrieve_array_subset_elements::<u16>(&ArraySubset::new_with_shape(shape))
        .unwrap()
}

fn options(replace: bool) -> DechunkOptions {
    DechunkOptions {
        replace,
        concurrent_chunks: None,
    }
}

#[test]
fn dechunk_u16_chunk_1() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    let elements = write_array_u16(&path, 10, 1);
    assert_eq!(num_entries(&path), 11);

    let summary = Dechunker::open(&path)
        .unwrap()
        .dechunk(&options(true), &ProgressCallback::none())
        .unwrap();
    assert!(summary.replaced);
    assert_eq!(summary.output_path, path);
    assert_eq!(summary.num_chunks, 10);
    assert_eq!(summary.bytes_decoded, 20);

    assert_eq!(num_entries(&path), 2);
    assert!(path.join("0").is_file());
    assert!(!dir.path().join("array.zarr.new").exists());
    assert!(!dir.path().join("array.zarr.temp").exists());

    let dechunker = Dechunker::open(&path).unwrap();
    assert_eq!(dechunker.metadata().chunks(), &[10]);
    assert_eq!(dechunker.metadata().num_chunks(), 1);
    assert_eq!(decoded_bytes(&path), bytemuck::cast_slice::<u16, u8>(&elements));
    assert_eq!(retrieve_u16(&path, vec![10]), elements);
}

#[test]
fn dechunk_u16_chunk_3() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    let elements = write_array_u16(&path, 10, 3);
    assert_eq!(num_entries(&path), 5);

    let summary = zarrs_dechunk::dechunk(&path, &options(true), &ProgressCallback::none()).unwrap();
    assert_eq!(summary.num_chunks, 4);

    assert_eq!(num_entries(&path), 2);
    assert_eq!(
        Dechunker::open(&path).unwrap().metadata().chunks(),
        &[10]
    );
    assert_eq!(retrieve_u16(&path, vec![10]), elements);
}

#[test]
fn dechunk_datetime_chunk_3() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dates.zarr");
    // Days since the epoch
    let elements: Vec<i64> = (0..10).map(|i| 19_000 + i * 7).collect();
    let bytes: &[u8] = bytemuck::cast_slice(&elements);
    write_array(&path, &[10], &[3], "<M8[D]", blosc(), None, bytes);

    Dechunker::open(&path)
        .unwrap()
        .dechunk(&options(true), &ProgressCallback::none())
        .unwrap();

    assert_eq!(num_entries(&path), 2);
    let dechunker = Dechunker::open(&path).unwrap();
    assert_eq!(dechunker.metadata().chunks(), &[10]);
    assert_eq!(dechunker.metadata().data_type().as_str(), "<M8[D]");
    assert_eq!(decoded_bytes(&path), bytes);
}

#[test]
fn dechunk_without_replace_preserves_original() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    let elements = write_array_u16(&path, 10, 3);
    let before = snapshot(&path);

    let dechunker = Dechunker::open(&path).unwrap();
    let summary = dechunker
        .dechunk(&options(false), &ProgressCallback::none())
        .unwrap();
    assert!(!summary.replaced);
    assert_eq!(summary.output_path, dir.path().join("array.zarr.new"));
    assert_eq!(summary.output_path, dechunker.staging_path());

    assert_eq!(snapshot(&path), before);
    assert_eq!(num_entries(&summary.output_path), 2);
    assert_eq!(retrieve_u16(&summary.output_path, vec![10]), elements);
}

#[test]
fn dechunk_missing_chunk_leaves_no_trace() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    write_array_u16(&path, 10, 3);
    std::fs::remove_file(path.join("2")).unwrap();
    let before = snapshot(&path);

    let result = Dechunker::open(&path)
        .unwrap()
        .dechunk(&options(true), &ProgressCallback::none());
    assert!(matches!(result, Err(DechunkError::ChunkRead { index: 2, .. })));

    assert_eq!(snapshot(&path), before);
    assert!(!dir.path().join("array.zarr.new").exists());
    assert!(!dir.path().join("array.zarr.temp").exists());
}

#[test]
fn dechunk_truncated_chunk_leaves_no_trace() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    write_array_u16(&path, 100, 30);
    let encoded = std::fs::read(path.join("1")).unwrap();
    std::fs::write(path.join("1"), &encoded[..encoded.len() / 2]).unwrap();
    let before = snapshot(&path);

    for concurrent_chunks in [None, Some(4)] {
        let options = DechunkOptions {
            replace: true,
            concurrent_chunks,
        };
        let result = Dechunker::open(&path)
            .unwrap()
            .dechunk(&options, &ProgressCallback::none());
        assert!(matches!(result, Err(DechunkError::ChunkRead { index: 1, .. })));
        assert_eq!(snapshot(&path), before);
        assert!(!dir.path().join("array.zarr.new").exists());
    }
}

#[test]
fn dechunk_short_chunk() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    let elements: Vec<u16> = (0..10).collect();
    write_array(
        &path,
        &[10],
        &[4],
        "<u2",
        serde_json::Value::Null,
        None,
        bytemuck::cast_slice(&elements),
    );
    // The second chunk holds 3 of its 4 elements
    std::fs::write(path.join("1"), bytemuck::cast_slice::<u16, u8>(&[4, 5, 6])).unwrap();
    let before = snapshot(&path);

    for concurrent_chunks in [None, Some(4)] {
        let options = DechunkOptions {
            replace: true,
            concurrent_chunks,
        };
        let result = Dechunker::open(&path)
            .unwrap()
            .dechunk(&options, &ProgressCallback::none());
        assert!(matches!(
            result,
            Err(DechunkError::ChunkShapeMismatch {
                index: 1,
                expected: 4,
                actual: 3
            })
        ));
        assert_eq!(snapshot(&path), before);
        assert!(!dir.path().join("array.zarr.new").exists());
    }
}

#[test]
fn dechunk_odd_length_chunk() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    let elements: Vec<u16> = (0..4).collect();
    write_array(
        &path,
        &[4],
        &[2],
        "<u2",
        serde_json::Value::Null,
        None,
        bytemuck::cast_slice(&elements),
    );
    std::fs::write(path.join("1"), [1u8, 2, 3]).unwrap();

    let dechunker = Dechunker::open(&path).unwrap();
    let mut chunks = dechunker.decoded_chunks();
    assert_eq!(chunks.rows_remaining(), 4);
    let chunk = chunks.next().unwrap().unwrap();
    assert_eq!(chunk.index(), 0);
    assert_eq!(chunk.rows(), 2);
    assert_eq!(chunks.rows_remaining(), 2);
    assert!(matches!(
        chunks.next(),
        Some(Err(DechunkError::ChunkRead { index: 1, .. }))
    ));
    assert!(chunks.next().is_none());
}

#[test]
fn dechunk_idempotent() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    let elements = write_array_u16(&path, 10, 3);

    for _ in 0..2 {
        Dechunker::open(&path)
            .unwrap()
            .dechunk(&options(true), &ProgressCallback::none())
            .unwrap();
        assert_eq!(num_entries(&path), 2);
        assert_eq!(
            Dechunker::open(&path).unwrap().metadata().chunks(),
            &[10]
        );
        assert_eq!(retrieve_u16(&path, vec![10]), elements);
    }
}

#[test]
fn dechunk_empty_array() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    for (name, compressor) in [("raw", serde_json::Value::Null), ("blosc", blosc())] {
        let path = dir.path().join(name);
        write_array(&path, &[0], &[4], "<f8", compressor, None, &[]);
        assert_eq!(num_entries(&path), 1);

        let summary = Dechunker::open(&path)
            .unwrap()
            .dechunk(&options(true), &ProgressCallback::none())
            .unwrap();
        assert_eq!(summary.num_chunks, 0);
        assert_eq!(summary.bytes_decoded, 0);

        let dechunker = Dechunker::open(&path).unwrap();
        assert_eq!(dechunker.metadata().shape(), &[0]);
        assert_eq!(dechunker.metadata().chunks(), &[1]);
        let encoded = std::fs::read(path.join("0")).unwrap();
        assert_eq!(encoded.len(), summary.bytes_written, "{name}");
        // blosc writes a header even for empty input
        assert_eq!(encoded.is_empty(), name == "raw", "{name}");
    }
}

#[test]
fn dechunk_concurrent() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    let elements = write_array_u16(&path, 1000, 7);

    let options = DechunkOptions {
        replace: true,
        concurrent_chunks: Some(4),
    };
    let summary = Dechunker::open(&path)
        .unwrap()
        .dechunk(&options, &ProgressCallback::none())
        .unwrap();
    assert_eq!(summary.num_chunks, 143);
    assert_eq!(num_entries(&path), 2);
    assert_eq!(retrieve_u16(&path, vec![1000]), elements);
}

#[test]
fn dechunk_compressors() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let elements: Vec<u16> = (0..500).map(|i| i % 17).collect();
    for (name, compressor) in [
        ("zlib", json!({"id": "zlib", "level": 1})),
        ("gzip", json!({"id": "gzip", "level": 5})),
        ("zstd", json!({"id": "zstd", "level": 3})),
        ("raw", serde_json::Value::Null),
    ] {
        let path = dir.path().join(name);
        write_array(
            &path,
            &[500],
            &[64],
            "<u2",
            compressor.clone(),
            None,
            bytemuck::cast_slice(&elements),
        );
        Dechunker::open(&path)
            .unwrap()
            .dechunk(&options(true), &ProgressCallback::none())
            .unwrap();
        assert_eq!(num_entries(&path), 2, "{name}");
        let dechunker = Dechunker::open(&path).unwrap();
        assert_eq!(
            serde_json::to_value(dechunker.metadata().compressor()).unwrap(),
            compressor,
            "{name}"
        );
        assert_eq!(
            decoded_bytes(&path),
            bytemuck::cast_slice::<u16, u8>(&elements),
            "{name}"
        );
    }
}

#[test]
fn dechunk_2d_nested_keys() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    let elements: Vec<u16> = (0..15).collect();
    write_array(
        &path,
        &[5, 3],
        &[2, 3],
        "<u2",
        blosc(),
        Some("/"),
        bytemuck::cast_slice(&elements),
    );
    assert!(path.join("2").join("0").is_file());

    Dechunker::open(&path)
        .unwrap()
        .dechunk(&options(true), &ProgressCallback::none())
        .unwrap();

    assert_eq!(num_entries(&path), 2);
    assert!(path.join("0").join("0").is_file());
    assert_eq!(
        Dechunker::open(&path).unwrap().metadata().chunks(),
        &[5, 3]
    );
    assert_eq!(retrieve_u16(&path, vec![5, 3]), elements);
}

#[test]
fn dechunk_stale_staging_directory() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    let elements = write_array_u16(&path, 10, 3);
    let staging = dir.path().join("array.zarr.new");
    std::fs::create_dir(&staging).unwrap();
    std::fs::write(staging.join("stale"), b"stale").unwrap();

    Dechunker::open(&path)
        .unwrap()
        .dechunk(&options(false), &ProgressCallback::none())
        .unwrap();
    assert!(!staging.join("stale").exists());
    assert_eq!(num_entries(&staging), 2);
    assert_eq!(retrieve_u16(&staging, vec![10]), elements);
}

#[test]
fn dechunk_existing_backup_refused() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    write_array_u16(&path, 10, 3);
    let backup = dir.path().join("array.zarr.temp");
    std::fs::create_dir(&backup).unwrap();
    let before = snapshot(&path);

    // Refused before any chunk is decoded
    let updates = AtomicUsize::new(0);
    let callback = |_stats: ProgressStats| {
        updates.fetch_add(1, Ordering::SeqCst);
    };
    let callback = ProgressCallback::new(&callback);
    let result = Dechunker::open(&path)
        .unwrap()
        .dechunk(&options(true), &callback);
    assert!(matches!(
        result,
        Err(DechunkError::IOError(err)) if err.kind() == std::io::ErrorKind::AlreadyExists
    ));
    assert_eq!(updates.load(Ordering::SeqCst), 0);
    assert_eq!(snapshot(&path), before);
    assert!(backup.is_dir());
    assert!(!dir.path().join("array.zarr.new").exists());
}

#[test]
fn dechunk_progress() {
    env_logger::try_init().ok();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    write_array_u16(&path, 10, 3);

    let updates = AtomicUsize::new(0);
    let last_step = AtomicUsize::new(0);
    let callback = |stats: ProgressStats| {
        assert_eq!(stats.num_steps, 5);
        updates.fetch_add(1, Ordering::SeqCst);
        last_step.fetch_max(stats.step, Ordering::SeqCst);
    };
    let callback = ProgressCallback::new(&callback);
    Dechunker::open(&path)
        .unwrap()
        .dechunk(&options(true), &callback)
        .unwrap();

    // The initial update, one per chunk, and one for the encode and write
    assert_eq!(updates.load(Ordering::SeqCst), 6);
    assert_eq!(last_step.load(Ordering::SeqCst), 5);
}

#[test]
fn dechunk_invalid_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("array.zarr");
    std::fs::create_dir(&path).unwrap();
    std::fs::write(
        path.join(ARRAY_METADATA_KEY),
        r#"{"chunks": [2, 2], "compressor": null, "dtype": "<u2", "fill_value": 0, "filters": null, "order": "C", "shape": [4, 4], "zarr_format": 2}"#,
    )
    .unwrap();
    assert!(matches!(
        Dechunker::open(&path),
        Err(DechunkError::MetadataError(_))
    ));
}
