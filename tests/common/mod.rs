//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use replay_engine::http::HttpClient;
use std::io::{Cursor, Write};
use std::time::Duration;
use zip::write::SimpleFileOptions;

/// Client with no transport retries so failures surface immediately
pub fn http() -> HttpClient {
    HttpClient::new(0, Duration::from_millis(1), Duration::from_secs(5)).unwrap()
}

/// In-memory zip archive of `(name, contents)` entries
pub fn zip_bytes<C: AsRef<[u8]>>(entries: &[(&str, C)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(contents.as_ref()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A port nothing is listening on right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
