//! Test support: a minimal HTTP byte-range server and a synthetic
//! container builder.

use std::{
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::JoinHandle,
};

use zerocopy::{IntoBytes, big_endian as be};

use pupfs::container::{
    DIGEST_ENTRY_SIZE, DigestEntry, HEADER_DIGEST_SIZE, HEADER_SIZE, Header, HeaderDigest, MAGIC,
    SEGMENT_ENTRY_SIZE, SegmentEntry, SignAlgorithm,
};

/// Initialize test logging; safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Build a container holding the given `(id, payload)` segments
/// back-to-back in the data region.
pub fn build_container(segments: &[(u64, &[u8])]) -> Vec<u8> {
    let n = segments.len() as u64;
    let header_length =
        HEADER_SIZE + n * (SEGMENT_ENTRY_SIZE + DIGEST_ENTRY_SIZE) + HEADER_DIGEST_SIZE;
    let data_length: u64 = segments.iter().map(|(_, data)| data.len() as u64).sum();

    let header = Header {
        magic: MAGIC,
        format_flag: 1,
        package_version: be::U64::new(0x0003_5500),
        image_version: be::U64::new(42),
        segment_num: be::U64::new(n),
        header_length: be::U64::new(header_length),
        data_length: be::U64::new(data_length),
    };

    let mut out = header.as_bytes().to_vec();
    let mut offset = header_length;
    for (id, data) in segments {
        let entry = SegmentEntry {
            id: be::U64::new(*id),
            offset: be::U64::new(offset),
            size: be::U64::new(data.len() as u64),
            sign_algorithm: SignAlgorithm::HMAC_SHA1,
            padding: [0; 4],
        };
        out.extend_from_slice(entry.as_bytes());
        offset += data.len() as u64;
    }
    for (index, (id, _)) in segments.iter().enumerate() {
        let entry = DigestEntry {
            segment_index: be::U64::new(index as u64),
            digest: [*id as u8; 20],
            padding: [0; 4],
        };
        out.extend_from_slice(entry.as_bytes());
    }
    out.extend_from_slice(HeaderDigest { digest: [0xd1; 20] }.as_bytes());
    assert_eq!(out.len() as u64, header_length);
    for (_, data) in segments {
        out.extend_from_slice(data);
    }
    out
}

/// Pad `blob` with zeros up to a multiple of `blksz`.
pub fn pad_to_blocks(mut blob: Vec<u8>, blksz: u64) -> Vec<u8> {
    let len = (blob.len() as u64).div_ceil(blksz) * blksz;
    blob.resize(len as usize, 0);
    blob
}

/// A byte-range HTTP server for a single in-memory blob.
///
/// Answers HEAD with `Accept-Ranges: bytes` (unless built with
/// [`RangeServer::serve_no_ranges`]) and `Content-Length`, and GET with
/// either the whole blob or the requested `bytes=a-b` span, clamped to the
/// blob's end as real servers do. Request counts are observable for
/// asserting fetch behavior.
pub struct RangeServer {
    addr: std::net::SocketAddr,
    gets: Arc<AtomicUsize>,
    heads: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RangeServer {
    pub fn serve(blob: Vec<u8>) -> Self {
        Self::start(blob, true)
    }

    /// A server that never advertises byte-range support.
    pub fn serve_no_ranges(blob: Vec<u8>) -> Self {
        Self::start(blob, false)
    }

    fn start(blob: Vec<u8>, ranges: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let gets = Arc::new(AtomicUsize::new(0));
        let heads = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let (gets, heads, shutdown) = (gets.clone(), heads.clone(), shutdown.clone());
            std::thread::spawn(move || {
                for sock in listener.incoming() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(sock) = sock else { continue };
                    // Connections are handled one at a time and closed
                    // after each response.
                    let _ = handle_conn(sock, &blob, ranges, &gets, &heads);
                }
            })
        };

        Self {
            addr,
            gets,
            heads,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/fw.pup", self.addr)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }
}

impl Drop for RangeServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept loop.
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_conn(
    sock: TcpStream,
    blob: &[u8],
    ranges: bool,
    gets: &AtomicUsize,
    heads: &AtomicUsize,
) -> std::io::Result<()> {
    let mut rdr = BufReader::new(sock.try_clone()?);
    let mut line = String::new();
    rdr.read_line(&mut line)?;
    let method = line.split_whitespace().next().unwrap_or("").to_owned();

    let mut range = None;
    loop {
        let mut header = String::new();
        if rdr.read_line(&mut header)? == 0 {
            break;
        }
        let header = header.trim();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = parse_range(value.trim());
            }
        }
    }

    let mut sock = sock;
    match &*method {
        "HEAD" => {
            heads.fetch_add(1, Ordering::SeqCst);
            let mut resp = String::from("HTTP/1.1 200 OK\r\n");
            if ranges {
                resp.push_str("Accept-Ranges: bytes\r\n");
            }
            resp.push_str(&format!(
                "Content-Length: {}\r\nConnection: close\r\n\r\n",
                blob.len()
            ));
            sock.write_all(resp.as_bytes())?;
        }
        "GET" => {
            gets.fetch_add(1, Ordering::SeqCst);
            let (status, body, content_range) = match range {
                Some((start, end)) if (start as usize) < blob.len() => {
                    let end = (end as usize).min(blob.len() - 1);
                    let body = &blob[start as usize..=end];
                    (
                        "206 Partial Content",
                        body,
                        Some(format!("bytes {start}-{end}/{}", blob.len())),
                    )
                }
                Some(_) => ("416 Range Not Satisfiable", &blob[..0], None),
                None => ("200 OK", blob, None),
            };
            let mut resp = format!("HTTP/1.1 {status}\r\n");
            if ranges {
                resp.push_str("Accept-Ranges: bytes\r\n");
            }
            if let Some(cr) = content_range {
                resp.push_str(&format!("Content-Range: {cr}\r\n"));
            }
            resp.push_str(&format!(
                "Content-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            ));
            sock.write_all(resp.as_bytes())?;
            sock.write_all(body)?;
        }
        _ => {
            sock.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")?;
        }
    }
    sock.flush()?;
    Ok(())
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}
