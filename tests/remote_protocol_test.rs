//! Remote line protocol over a real TCP socket.

mod common;

use common::*;
use laser_level::remote;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

async fn read_reply<R: AsyncBufReadExt + Unpin>(lines: &mut tokio::io::Lines<R>) -> String {
    timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("reply within timeout")
        .expect("socket readable")
        .expect("connection open")
}

#[tokio::test]
async fn test_zero_and_sample_over_tcp() {
    let settings = test_settings(3);
    let (level, task, laser) = start_level(&settings).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(remote::serve(listener, level.clone()));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    // Give the server a moment to subscribe before the first completion.
    tokio::time::sleep(Duration::from_millis(20)).await;

    writer.write_all(b"ZERO\n").await.unwrap();
    assert_eq!(read_reply(&mut lines).await, "ZERO_COMPLETE");

    move_line(&laser, 29.0).await;
    writer.write_all(b"TAKE_SAMPLE\n").await.unwrap();
    let reply = read_reply(&mut lines).await;
    let value: f64 = reply
        .strip_prefix("SAMPLE ")
        .expect("sample reply")
        .parse()
        .unwrap();
    assert!((value - 5.0 * MM_PER_PX).abs() < TOLERANCE);

    writer.write_all(b"MEASURE\n").await.unwrap();
    let reply = read_reply(&mut lines).await;
    assert!(reply.starts_with("ERROR "), "got {}", reply);

    server.abort();
    stop_level(level, task).await;
}

#[tokio::test]
async fn test_busy_engine_reports_conflict() {
    let settings = test_settings(3);
    let (level, task, laser) = start_level(&settings).await;
    laser.set_enabled(None).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(remote::serve(listener, level.clone()));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    level.zero().await.unwrap();
    writer.write_all(b"TAKE_SAMPLE\n").await.unwrap();
    let reply = read_reply(&mut lines).await;
    assert_eq!(
        reply,
        "ERROR An acquisition session is already in progress"
    );

    server.abort();
    stop_level(level, task).await;
}
