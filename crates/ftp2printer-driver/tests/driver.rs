//! End-to-end driver behaviour over both backends.

use async_trait::async_trait;
use ftp2printer_driver::{
    ByteStream, DriverConfig, DriverError, FileAttr, LocalBackend, MemoryBackend, StorageDriver,
    TeeDriver, UploadSink, VfsError,
};
use parking_lot::Mutex;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Sink that keeps every upload it sees.
#[derive(Default)]
struct RecordingSink {
    uploads: Mutex<Vec<(PathBuf, Vec<u8>)>>,
}

impl RecordingSink {
    fn received(&self, path: &str) -> Vec<Vec<u8>> {
        self.uploads
            .lock()
            .iter()
            .filter(|(p, _)| p == Path::new(path))
            .map(|(_, data)| data.clone())
            .collect()
    }

    fn count(&self) -> usize {
        self.uploads.lock().len()
    }
}

#[async_trait]
impl UploadSink for RecordingSink {
    async fn consume(
        &self,
        path: &Path,
        stream: &mut (dyn AsyncRead + Send + Unpin),
    ) -> std::io::Result<u64> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await?;
        let n = data.len() as u64;
        self.uploads.lock().push((path.to_path_buf(), data));
        Ok(n)
    }
}

struct Harness {
    driver: Arc<TeeDriver>,
    sink: Arc<RecordingSink>,
    _tmp: Option<TempDir>,
}

impl Harness {
    fn memory(config: DriverConfig) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let driver = TeeDriver::new(Arc::new(MemoryBackend::new()), "/", sink.clone(), config);
        Self {
            driver: Arc::new(driver),
            sink,
            _tmp: None,
        }
    }

    fn local(config: DriverConfig) -> Self {
        let tmp = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let fs = Arc::new(LocalBackend::new(tmp.path()));
        let driver = TeeDriver::new(fs, "/", sink.clone(), config);
        Self {
            driver: Arc::new(driver),
            sink,
            _tmp: Some(tmp),
        }
    }

    async fn put(&self, path: &str, data: &[u8], offset: i64) -> Result<u64, DriverError> {
        self.driver.put(path, Cursor::new(data.to_vec()), offset).await
    }

    async fn read(&self, path: &str) -> Vec<u8> {
        let (_, mut file) = self.driver.get(path, 0).await.unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).await.unwrap();
        out
    }

    async fn settle(&self) {
        assert_eq!(self.driver.shutdown(Duration::from_secs(10)).await, 0);
    }
}

fn keep() -> DriverConfig {
    DriverConfig::default().with_keep_files(true)
}

/// Run one scenario against the memory and the local backend.
macro_rules! on_both_backends {
    ($name:ident, $config:expr) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn memory() {
                super::$name(&Harness::memory($config)).await;
            }

            #[tokio::test]
            async fn local() {
                super::$name(&Harness::local($config)).await;
            }
        }
    };
}

async fn list_shows_direct_children(h: &Harness) {
    h.driver.make_dir("/docs/2024/q1").await.unwrap();
    h.put("/readme.txt", b"hi", -1).await.unwrap();
    h.put("/docs/a.ps", b"a", -1).await.unwrap();
    h.put("/docs/2024/b.ps", b"b", -1).await.unwrap();
    h.put("/docs/2024/q1/c.ps", b"c", -1).await.unwrap();

    let mut names = Vec::new();
    h.driver
        .list_dir("/docs", &mut |attr: FileAttr| {
            let is_dir = attr.is_dir();
            names.push((attr.name, is_dir));
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(
        names,
        vec![("2024".to_string(), true), ("a.ps".to_string(), false)]
    );

    let mut names = Vec::new();
    h.driver
        .list_dir("", &mut |attr: FileAttr| {
            names.push(attr.name);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(names, vec!["docs", "readme.txt"]);
}
on_both_backends!(list_shows_direct_children, keep());

async fn delete_checks_kind(h: &Harness) {
    h.driver.make_dir("/dir/sub").await.unwrap();
    h.put("/dir/sub/f", b"x", -1).await.unwrap();

    assert!(matches!(
        h.driver.delete_file("/dir").await,
        Err(DriverError::NotAFile(_))
    ));
    assert!(matches!(
        h.driver.delete_dir("/dir/sub/f").await,
        Err(DriverError::NotADirectory(_))
    ));

    h.driver.delete_dir("/dir").await.unwrap();
    assert!(h.driver.stat("/dir/sub/f").await.unwrap_err().is_not_found());
}
on_both_backends!(delete_checks_kind, keep());

async fn put_then_get(h: &Harness) {
    let body: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
    assert_eq!(h.put("/big.bin", &body, -1).await.unwrap(), body.len() as u64);
    assert_eq!(h.read("/big.bin").await, body);
    assert_eq!(h.driver.stat("/big.bin").await.unwrap().size, body.len() as u64);

    h.settle().await;
    assert_eq!(h.sink.received("/big.bin"), vec![body]);
}
on_both_backends!(put_then_get, keep().with_tee_buffer(1024));

async fn append_policy(h: &Harness) {
    h.put("/log", b"hello ", -1).await.unwrap();
    assert_eq!(h.put("/log", b"world", 6).await.unwrap(), 5);
    assert_eq!(h.read("/log").await, b"hello world");

    // The offset only has to be within the current size.
    h.put("/log", b"!", 3).await.unwrap();
    assert_eq!(h.read("/log").await, b"hello world!");

    let err = h.put("/log", b"?", 13).await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::OffsetBeyondFileSize { offset: 13, size: 12 }
    ));
    assert_eq!(h.read("/log").await, b"hello world!");

    // -1 always starts over.
    h.put("/log", b"reset", -1).await.unwrap();
    assert_eq!(h.read("/log").await, b"reset");
}
on_both_backends!(append_policy, keep());

async fn append_to_missing_overwrites(h: &Harness) {
    assert_eq!(h.put("/new", b"fresh", 5).await.unwrap(), 5);
    assert_eq!(h.read("/new").await, b"fresh");
}
on_both_backends!(append_to_missing_overwrites, keep());

async fn sink_only_when_not_keeping(h: &Harness) {
    assert_eq!(h.put("/job.ps", b"%!PS-Adobe", -1).await.unwrap(), 0);
    h.settle().await;

    assert_eq!(h.sink.received("/job.ps"), vec![b"%!PS-Adobe".to_vec()]);
    assert!(h.driver.stat("/job.ps").await.unwrap_err().is_not_found());
}
on_both_backends!(sink_only_when_not_keeping, DriverConfig::default());

async fn sink_gets_everything_when_persist_fails(h: &Harness) {
    h.driver.make_dir("/taken").await.unwrap();
    let err = h.put("/taken", b"payload", -1).await.unwrap_err();
    assert!(matches!(err, DriverError::DestinationIsDirectory(_)));

    h.put("/exists", b"abc", -1).await.unwrap();
    assert!(h.put("/exists", b"more", 99).await.is_err());

    h.settle().await;
    assert_eq!(h.sink.received("/taken"), vec![b"payload".to_vec()]);
    let mut exists = h.sink.received("/exists");
    exists.sort();
    assert_eq!(exists, vec![b"abc".to_vec(), b"more".to_vec()]);
}
on_both_backends!(sink_gets_everything_when_persist_fails, keep());

async fn escaping_put_never_reaches_sink(h: &Harness) {
    let err = h.put("/../../etc/cron.d/evil", b"x", -1).await.unwrap_err();
    assert!(matches!(err, DriverError::PathEscapesRoot(_)));
    h.settle().await;
    assert_eq!(h.sink.count(), 0);
}
on_both_backends!(escaping_put_never_reaches_sink, keep());

async fn concurrent_distinct_paths(h: &Harness) {
    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let driver = Arc::clone(&h.driver);
        tasks.push(tokio::spawn(async move {
            let body = vec![i; 20_000];
            driver
                .put(format!("/f{i}"), Cursor::new(body), -1)
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 20_000);
    }

    for i in 0..8u8 {
        assert_eq!(h.read(&format!("/f{i}")).await, vec![i; 20_000]);
    }
    h.settle().await;
    assert_eq!(h.sink.count(), 8);
}
on_both_backends!(concurrent_distinct_paths, keep().with_tee_buffer(4096));

async fn concurrent_overwrites_leave_one_writer(h: &Harness) {
    let mut tasks = Vec::new();
    for i in 1..=4u8 {
        let driver = Arc::clone(&h.driver);
        tasks.push(tokio::spawn(async move {
            driver.put("/same", Cursor::new(vec![i; 50_000]), -1).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let content = h.read("/same").await;
    assert_eq!(content.len(), 50_000);
    let first = content[0];
    assert!((1..=4).contains(&first));
    assert!(content.iter().all(|&b| b == first));
}
on_both_backends!(concurrent_overwrites_leave_one_writer, keep().with_tee_buffer(2048));

async fn trait_object_surface(h: &Harness) {
    let driver: Arc<dyn StorageDriver> = h.driver.clone();

    driver.make_dir(Path::new("/spool")).await.unwrap();
    driver.change_dir(Path::new("/spool")).await.unwrap();

    let stream: ByteStream = Box::new(Cursor::new(b"via trait".to_vec()));
    assert_eq!(
        driver.put(Path::new("/spool/t.txt"), stream, -1).await.unwrap(),
        9
    );

    let (left, mut reader) = driver.get(Path::new("/spool/t.txt"), 4).await.unwrap();
    assert_eq!(left, 5);
    let mut out = String::new();
    reader.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "trait");

    driver
        .rename(Path::new("/spool/t.txt"), Path::new("/spool/u.txt"))
        .await
        .unwrap();
    driver.delete_file(Path::new("/spool/u.txt")).await.unwrap();
    driver.delete_dir(Path::new("/spool")).await.unwrap();
}
on_both_backends!(trait_object_surface, keep());

async fn rename_respects_destination_kind(h: &Harness) {
    h.driver.make_dir("/docs").await.unwrap();
    h.driver.make_dir("/full").await.unwrap();
    h.put("/docs/b.txt", b"b", -1).await.unwrap();
    h.put("/full/c.txt", b"c", -1).await.unwrap();
    h.put("/a.txt", b"a", -1).await.unwrap();

    assert!(matches!(
        h.driver.rename("/a.txt", "/docs").await,
        Err(DriverError::BackingStore(VfsError::IsADirectory(_)))
    ));
    assert!(matches!(
        h.driver.rename("/docs", "/a.txt").await,
        Err(DriverError::BackingStore(VfsError::NotADirectory(_)))
    ));
    assert!(h.driver.rename("/docs", "/full").await.is_err());

    assert!(h.driver.stat("/docs").await.unwrap().is_dir());
    assert_eq!(h.read("/docs/b.txt").await, b"b");
    assert_eq!(h.read("/full/c.txt").await, b"c");
    assert_eq!(h.read("/a.txt").await, b"a");
}
on_both_backends!(rename_respects_destination_kind, keep());

#[tokio::test]
async fn list_follows_symlinked_directory() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir(tmp.path().join("real")).unwrap();
    std::fs::write(tmp.path().join("real/job.ps"), b"%!PS").unwrap();
    std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link")).unwrap();

    let fs = Arc::new(LocalBackend::new(tmp.path()));
    let driver = TeeDriver::new(fs, "/", Arc::new(RecordingSink::default()), keep());

    let mut names = Vec::new();
    driver
        .list_dir("/link", &mut |attr: FileAttr| {
            names.push(attr.name);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(names, vec!["job.ps"]);

    // The link itself still shows up as a link in its parent.
    let attr = driver.stat("/link").await.unwrap();
    assert!(attr.is_symlink());
}
