use hdaq_format::attribute::AttributeMessage;
use hdaq_format::dataspace::UNLIMITED;
use hdaq_format::datatype::Datatype;
use hdaq_format::selection::Selection;
use hdaq_format::superblock::{find_signature, Superblock, HDF5_SIGNATURE};
use hdaq_format::{FileImage, FormatError};

fn f64_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn to_f64(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

/// Append one column of `rows` values to a `[rows, k]` dataset.
fn append_column(image: &mut FileImage, path: &str, values: &[f64]) {
    let ds = image.dataset_mut(path).unwrap();
    let rows = ds.dims()[0];
    let k = ds.dims()[1];
    ds.set_extent(&[rows, k + 1]).unwrap();
    ds.write_selection(&Selection::hyperslab(&[0, k], &[rows, 1]), &f64_bytes(values))
        .unwrap();
}

fn column_dataset(image: &mut FileImage, path: &str, rows: u64) {
    image
        .create_dataset(path, Datatype::float64(), &[rows, 0], &[rows, UNLIMITED], &[rows, 1])
        .unwrap();
}

#[test]
fn file_starts_with_v3_superblock() {
    let bytes = FileImage::new().to_bytes().unwrap();
    assert_eq!(&bytes[..8], &HDF5_SIGNATURE);
    let offset = find_signature(&bytes).unwrap();
    assert_eq!(offset, 0);
    let sb = Superblock::parse(&bytes, offset).unwrap();
    assert_eq!(sb.version, 3);
    assert_eq!(sb.offset_size, 8);
    assert_eq!(sb.length_size, 8);
    assert_eq!(sb.eof_address, bytes.len() as u64);
}

#[test]
fn columns_survive_reload() {
    let mut image = FileImage::new();
    image.create_group_all("/daq").unwrap();
    column_dataset(&mut image, "/daq/temp", 3);
    append_column(&mut image, "/daq/temp", &[0.0, 0.25, 1.0]);
    append_column(&mut image, "/daq/temp", &[0.1, 0.35, 1.1]);

    let loaded = FileImage::from_bytes(&image.to_bytes().unwrap()).unwrap();
    let ds = loaded.dataset("/daq/temp").unwrap();
    assert_eq!(ds.dims(), &[3, 2]);
    assert_eq!(ds.max_dims(), &[3, UNLIMITED]);
    assert_eq!(ds.chunk_dims(), &[3, 1]);
    let first = ds.read_selection(&Selection::hyperslab(&[0, 0], &[3, 1])).unwrap();
    assert_eq!(to_f64(&first), vec![0.0, 0.25, 1.0]);
    let second = ds.read_selection(&Selection::hyperslab(&[0, 1], &[3, 1])).unwrap();
    assert_eq!(to_f64(&second), vec![0.1, 0.35, 1.1]);
}

#[test]
fn growth_continues_after_reload() {
    let mut image = FileImage::new();
    column_dataset(&mut image, "/x", 2);
    for k in 0..100 {
        append_column(&mut image, "/x", &[k as f64, -(k as f64)]);
    }
    let mut image = FileImage::from_bytes(&image.to_bytes().unwrap()).unwrap();
    for k in 100..1000 {
        append_column(&mut image, "/x", &[k as f64, -(k as f64)]);
    }
    let loaded = FileImage::from_bytes(&image.to_bytes().unwrap()).unwrap();
    let ds = loaded.dataset("/x").unwrap();
    assert_eq!(ds.dims(), &[2, 1000]);
    let all = to_f64(&ds.read_selection(&Selection::All).unwrap());
    // row-major: first row holds k, second row holds -k
    assert_eq!(all[999], 999.0);
    assert_eq!(all[1000 + 500], -500.0);
}

#[test]
fn several_datasets_and_attributes() {
    let mut image = FileImage::new();
    image.create_group_all("/a/b").unwrap();
    column_dataset(&mut image, "/a/b/one", 1);
    column_dataset(&mut image, "/a/two", 4);
    column_dataset(&mut image, "/three", 2);
    append_column(&mut image, "/a/two", &[1.0, 2.0, 3.0, 4.0]);
    image
        .create_attribute(
            "/a/two",
            AttributeMessage::new("scale", Datatype::float64(), f64_bytes(&[0.5, 2.0])),
        )
        .unwrap();

    let loaded = FileImage::from_bytes(&image.to_bytes().unwrap()).unwrap();
    assert_eq!(loaded.dataset_paths(), vec!["/a/b/one", "/a/two", "/three"]);
    let attr = loaded.attribute("/a/two", "scale").unwrap();
    assert_eq!(to_f64(&attr.raw_data), vec![0.5, 2.0]);
    assert_eq!(attr.dataspace.dimensions, vec![2]);
    assert_eq!(loaded.dataset("/a/b/one").unwrap().dims(), &[1, 0]);
}

#[test]
fn truncated_file_fails() {
    let mut image = FileImage::new();
    column_dataset(&mut image, "/x", 8);
    append_column(&mut image, "/x", &[1.0; 8]);
    let bytes = image.to_bytes().unwrap();
    let err = FileImage::from_bytes(&bytes[..bytes.len() - 10]).unwrap_err();
    assert!(matches!(err, FormatError::UnexpectedEof { .. }));
}

#[test]
fn patched_file_reads_like_a_rewritten_one() {
    let mut image = FileImage::new();
    image.create_group_all("/daq").unwrap();
    column_dataset(&mut image, "/daq/temp", 3);
    append_column(&mut image, "/daq/temp", &[0.0, 0.0, 0.0]);
    let (mut file, mut layout) = image.to_bytes_with_layout().unwrap();

    for k in 1..600u64 {
        let ds = image.dataset_mut("/daq/temp").unwrap();
        ds.set_extent(&[3, k + 1]).unwrap();
        let selection = Selection::hyperslab(&[0, k], &[3, 1]);
        let chunks = ds.chunk_indices(&selection).unwrap();
        let v = k as f64;
        ds.write_selection(&selection, &f64_bytes(&[v, v * 2.0, v * 3.0]))
            .unwrap();

        let touched = std::collections::BTreeMap::from([("/daq/temp".to_string(), chunks)]);
        let patches = image.append_patches(&mut layout, &touched).unwrap().unwrap();
        for patch in patches {
            let start = patch.offset as usize;
            let end = start + patch.bytes.len();
            if file.len() < end {
                file.resize(end, 0);
            }
            file[start..end].copy_from_slice(&patch.bytes);
        }
    }

    let sb = Superblock::parse(&file, 0).unwrap();
    assert_eq!(sb.eof_address, file.len() as u64);
    let loaded = FileImage::from_bytes(&file).unwrap();
    assert_eq!(loaded, image);
    let last = loaded
        .dataset("/daq/temp")
        .unwrap()
        .read_selection(&Selection::hyperslab(&[0, 599], &[3, 1]))
        .unwrap();
    assert_eq!(to_f64(&last), vec![599.0, 1198.0, 1797.0]);
}
