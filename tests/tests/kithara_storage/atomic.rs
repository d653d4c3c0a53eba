use std::time::Duration;

use kithara_storage::AtomicFile;
use rstest::*;
use tempfile::TempDir;

use crate::common::fixtures::temp_dir;

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn atomic_file_path_method(temp_dir: TempDir) {
    let file_path = temp_dir.path().join("test.dat");
    let atomic = AtomicFile::new(&file_path);

    assert_eq!(atomic.path(), file_path.as_path());
    atomic.write_all(b"test data").expect("write should succeed");
    assert_eq!(atomic.path(), file_path.as_path());
    assert!(atomic.exists());
}

#[rstest]
#[case("simple data", b"Hello, World!")]
#[case("binary data", &[0x00, 0xFF, 0x80, 0x7F])]
#[case("large data", &[0x42; 1024 * 1024])] // 1MB
#[timeout(Duration::from_secs(10))]
#[test]
fn atomic_file_write_read_success(
    temp_dir: TempDir,
    #[case] test_name: &str,
    #[case] test_data: &[u8],
) {
    let atomic = AtomicFile::new(temp_dir.path().join(format!("{test_name}.dat")));

    atomic.write_all(test_data).expect("write should succeed");

    let mut buf = Vec::new();
    let n = atomic.read_into(&mut buf).expect("read should succeed");
    assert_eq!(n, test_data.len());
    assert_eq!(buf, test_data);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn atomic_file_replacement_leaves_no_temp_files(temp_dir: TempDir) {
    let atomic = AtomicFile::new(temp_dir.path().join("index.bin"));
    for i in 0..20u8 {
        atomic.write_all(&vec![i; usize::from(i) + 1]).unwrap();
    }

    let names: Vec<_> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names.len(), 1);

    let mut buf = Vec::new();
    atomic.read_into(&mut buf).unwrap();
    assert_eq!(buf, vec![19u8; 20]);
}

#[rstest]
#[timeout(Duration::from_secs(5))]
#[test]
fn atomic_file_concurrent_writers_never_tear(temp_dir: TempDir) {
    let path = temp_dir.path().join("shared.bin");
    let payloads: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 64 * 1024]).collect();

    std::thread::scope(|s| {
        for payload in &payloads {
            let atomic = AtomicFile::new(&path);
            s.spawn(move || {
                for _ in 0..10 {
                    atomic.write_all(payload).unwrap();
                }
            });
        }
    });

    let mut buf = Vec::new();
    AtomicFile::new(&path).read_into(&mut buf).unwrap();
    assert!(payloads.contains(&buf));
}
