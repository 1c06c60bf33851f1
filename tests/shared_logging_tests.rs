use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sharedlog::channel::{canonical_target, socket_path};
use sharedlog::codec::Packet;
use sharedlog::rotation::archive_dir;
use sharedlog::{ChannelSink, Level, LogConfig, LogRecord, Logger};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

const MILLIS_FORMAT: &str = "[unix_timestamp precision:millisecond]";

fn config(dir: &Path) -> LogConfig {
    LogConfig::new(dir.join("app.log"))
        .with_socket_dir(dir.join("sockets"))
        .with_date_format(MILLIS_FORMAT)
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).expect("read log file")
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut bytes = (payload.len() as u32).to_be_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

fn record_frame(timestamp: u64, line: &str) -> Vec<u8> {
    let payload = Packet::Record(LogRecord::new(timestamp, Level::Info, line))
        .encode()
        .expect("encode record");
    frame(&payload)
}

/// Flush until `needle` shows up in the file.
async fn wait_for(logger: &Logger, needle: &str) -> bool {
    for _ in 0..50 {
        logger.flush().await;
        if std::fs::read_to_string(logger.path())
            .unwrap_or_default()
            .contains(needle)
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_single_error_line() {
    let dir = tempfile::tempdir().expect("temp dir");
    let logger = Logger::from_config(config(dir.path()).with_size(4096))
        .await
        .expect("open logger");

    logger.error("hello");
    logger.close().await;

    let written = read(logger.path());
    let line = written.strip_suffix('\n').expect("terminated line");
    assert!(!line.contains('\n'), "{}", written);
    assert!(line.starts_with('['));
    assert!(line.ends_with("][ERROR] - hello"));
    let timestamp = &line[1..line.find(']').unwrap()];
    assert!(timestamp.parse::<u64>().is_ok(), "{}", timestamp);
}

#[tokio::test]
async fn test_rotation_archives_and_keeps_file_small() {
    let dir = tempfile::tempdir().expect("temp dir");
    let logger = Logger::from_config(
        config(dir.path())
            .with_size(1 << 20)
            .with_file_size(4096),
    )
    .await
    .expect("open logger");

    for batch in 0..20 {
        for i in 0..10 {
            logger.info(format_args!("record {:03}", batch * 10 + i));
        }
        logger.flush().await;
    }
    logger.close().await;

    let archive = archive_dir(logger.path()).unwrap().join("app.log.gz");
    assert!(archive.exists(), "missing {}", archive.display());
    let live = std::fs::metadata(logger.path()).unwrap().len();
    assert!(live < 4096, "live file is {} bytes", live);
    assert!(read(logger.path()).contains("record 199"));
}

#[tokio::test]
async fn test_owner_and_follower_interleave_by_timestamp() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = config(dir.path()).with_size(1 << 20);
    let owner = Logger::from_config(cfg.clone()).await.expect("open owner");
    let follower = Logger::from_config(cfg).await.expect("open follower");
    assert!(owner.is_owner());
    assert!(!follower.is_owner());

    owner.push(LogRecord::new(10, Level::Info, "[10][INFO] - owner first"));
    owner.push(LogRecord::new(30, Level::Info, "[30][INFO] - owner second"));
    follower.push(LogRecord::new(20, Level::Info, "[20][INFO] - follower"));

    follower.close().await;
    owner.close().await;

    assert_eq!(
        read(owner.path()),
        "[10][INFO] - owner first\n[20][INFO] - follower\n[30][INFO] - owner second\n"
    );
}

#[tokio::test]
async fn test_follower_logs_through_owner() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = config(dir.path()).with_size(1 << 20).with_action("worker");
    let owner = Logger::from_config(cfg.clone()).await.expect("open owner");
    let follower = Logger::from_config(cfg).await.expect("open follower");

    follower.warn("from the follower");
    follower.flush().await;
    follower.close().await;
    owner.close().await;

    let written = read(owner.path());
    assert!(written.ends_with("][WARN][worker] - from the follower\n"), "{}", written);
}

#[tokio::test]
async fn test_close_twice_is_safe() {
    let dir = tempfile::tempdir().expect("temp dir");
    let logger = Logger::from_config(config(dir.path())).await.expect("open logger");
    logger.info("once");
    let clone = logger.clone();

    logger.close().await;
    clone.close().await;

    assert_eq!(read(logger.path()).lines().count(), 1);
}

#[tokio::test]
async fn test_output_level_filters_records() {
    let dir = tempfile::tempdir().expect("temp dir");
    let logger = Logger::from_config(config(dir.path()).with_output_level(Level::Warn))
        .await
        .expect("open logger");

    logger.debug("d");
    logger.log("l");
    logger.info("i");
    logger.warn("w");
    logger.error("e");
    logger.close().await;

    let written = read(logger.path());
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 2, "{}", written);
    assert!(lines[0].ends_with("[WARN] - w"));
    assert!(lines[1].ends_with("[ERROR] - e"));
}

#[tokio::test]
async fn test_timer_flushes_without_explicit_flush() {
    let dir = tempfile::tempdir().expect("temp dir");
    let logger = Logger::from_config(config(dir.path()).with_ttl(50))
        .await
        .expect("open logger");

    logger.info("ticked");
    let mut flushed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if logger.path().exists() {
            flushed = true;
            break;
        }
    }
    assert!(flushed);
    logger.close().await;
}

#[tokio::test]
async fn test_rotation_exports_through_sink() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (sink, mut receiver) = ChannelSink::new(4);
    let logger = sharedlog::builder(dir.path().join("app.log"))
        .with_socket_dir(dir.path().join("sockets"))
        .with_date_format(MILLIS_FORMAT)
        .with_size(1 << 20)
        .with_file_size(64)
        .with_sink(Arc::new(sink))
        .build()
        .await
        .expect("open logger");

    logger.info("first batch");
    logger.flush().await;
    logger.info("second batch");
    logger.flush().await;

    let notification = receiver.recv().await.expect("exported file");
    assert_eq!(notification.attachments.len(), 1);
    let exported = String::from_utf8(notification.attachments[0].content.to_vec()).unwrap();
    assert!(exported.contains("first batch"));
    assert!(!exported.contains("second batch"));

    let live = read(logger.path());
    assert!(live.contains("second batch"));
    assert!(!live.contains("first batch"));
    logger.close().await;
}

#[tokio::test]
async fn test_config_from_yaml() {
    let dir = tempfile::tempdir().expect("temp dir");
    let yaml = format!(
        r#"
filename: {}
size: 1K
file_size: 2M
output_level: info
action: nightly
socket_dir: {}
date_format: "{}"
"#,
        dir.path().join("app.log").display(),
        dir.path().join("sockets").display(),
        MILLIS_FORMAT,
    );
    let config: LogConfig = serde_yaml::from_str(&yaml).expect("parse config");
    assert_eq!(config.size, Some(1024));
    assert_eq!(config.file_size, 2 * 1024 * 1024);

    let logger = Logger::from_config(config).await.expect("open logger");
    logger.debug("hidden");
    logger.info("shown");
    logger.close().await;

    let written = read(logger.path());
    assert_eq!(written.lines().count(), 1);
    assert!(written.contains("[INFO][nightly] - shown"));
}

#[tokio::test]
async fn test_malformed_payload_is_reported_and_skipped() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = config(dir.path()).with_size(1 << 20);
    let logger = Logger::from_config(cfg.clone()).await.expect("open logger");
    let socket = socket_path(&cfg.socket_dir(), logger.path());

    let mut raw = UnixStream::connect(&socket).await.expect("connect");
    let mut bytes = frame(b"oops!");
    bytes.extend(record_frame(7, "[7][INFO] - good"));
    raw.write_all(&bytes).await.expect("write frames");

    assert!(wait_for(&logger, "[7][INFO] - good").await);
    assert!(read(logger.path()).contains("[ERROR] - Transport error: malformed frame"));

    drop(raw);
    logger.close().await;
}

#[tokio::test]
async fn test_oversized_prefix_resets_only_that_connection() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = config(dir.path()).with_size(1 << 20);
    let logger = Logger::from_config(cfg.clone()).await.expect("open logger");
    let socket = socket_path(&cfg.socket_dir(), logger.path());

    let mut bad = UnixStream::connect(&socket).await.expect("connect");
    let mut bytes = u32::MAX.to_be_bytes().to_vec();
    bytes.extend(record_frame(8, "[8][INFO] - after reset"));
    bad.write_all(&bytes).await.expect("write frames");

    let mut good = UnixStream::connect(&socket).await.expect("connect");
    good.write_all(&record_frame(9, "[9][INFO] - other"))
        .await
        .expect("write frame");

    assert!(wait_for(&logger, "Transport error: resetting channel connection").await);
    assert!(wait_for(&logger, "[9][INFO] - other").await);

    drop(bad);
    drop(good);
    logger.close().await;
    assert!(!read(logger.path()).contains("after reset"));
}

#[tokio::test]
async fn test_follower_outlives_owner() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = config(dir.path()).with_size(1 << 20);
    let owner = Logger::from_config(cfg.clone()).await.expect("open owner");
    let follower = Logger::from_config(cfg.clone()).await.expect("open follower");

    owner.info("before");
    owner.close().await;

    // Goes to stderr: nobody owns the file any more.
    follower.info("orphan");
    follower.flush().await;
    follower.close().await;

    let written = read(owner.path());
    assert!(written.contains("] - before"));
    assert!(!written.contains("orphan"));

    let reopened = Logger::from_config(cfg).await.expect("reopen");
    assert!(reopened.is_owner());
    reopened.info("after");
    reopened.close().await;
    assert!(read(reopened.path()).contains("] - after"));
}

#[tokio::test]
async fn test_stale_socket_is_reclaimed_on_open() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = config(dir.path()).with_size(1 << 20);
    let target = canonical_target(&cfg.filename).expect("canonical path");
    let socket = socket_path(&cfg.socket_dir(), &target);
    std::fs::create_dir_all(cfg.socket_dir()).expect("socket dir");
    // A listener dropped without cleanup, as after a crashed owner.
    drop(std::os::unix::net::UnixListener::bind(&socket).expect("bind"));
    assert!(socket.exists());

    let logger = Logger::from_config(cfg).await.expect("open logger");
    assert!(logger.is_owner());
    logger.info("recovered");
    logger.close().await;

    assert!(read(logger.path()).contains("] - recovered"));
    assert!(!socket.exists());
}
