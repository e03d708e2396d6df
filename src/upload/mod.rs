//! Upload handoff
//!
//! Once the recorder seals the trajectory log, the whole file is streamed to
//! the server over one reliable TCP connection: raw bytes in ≤64 KiB chunks
//! strictly in order, a literal `"EOF"` sentinel, a write-side shutdown, and
//! then a bounded wait for the peer to acknowledge closure. One attempt per
//! session; failure is surfaced, never retried.

use crate::error::{Error, Result};
use log::{debug, info, warn};
use std::fs::File;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;

/// Fixed chunk size: 64 KiB. The final chunk may be shorter.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// End-of-data sentinel sent after the last chunk.
pub const SENTINEL: &[u8] = b"EOF";

/// Outcome of a completed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub chunks_sent: usize,
    pub bytes_sent: u64,
}

/// One-shot streamer for the finished log file.
pub struct UploadStreamer {
    server_addr: SocketAddr,
    close_ack_timeout: Duration,
}

impl UploadStreamer {
    pub fn new(server_addr: SocketAddr, close_ack_timeout: Duration) -> Self {
        Self {
            server_addr,
            close_ack_timeout,
        }
    }

    /// Stream `log_path` to the server. Returns the transfer report once the
    /// peer's close acknowledgment has been observed.
    pub fn upload(&self, log_path: &Path) -> Result<UploadReport> {
        info!(
            "Uploading {} to {}",
            log_path.display(),
            self.server_addr
        );

        let mut file = File::open(log_path)
            .map_err(|e| Error::UploadFailed(format!("open {}: {}", log_path.display(), e)))?;
        let mut stream = TcpStream::connect(self.server_addr)
            .map_err(|e| Error::UploadFailed(format!("connect {}: {}", self.server_addr, e)))?;

        let report = self.send_chunks(&mut file, &mut stream)?;
        info!(
            "Sent {} bytes in {} chunks; sending sentinel",
            report.bytes_sent, report.chunks_sent
        );

        stream
            .write_all(SENTINEL)
            .map_err(|e| Error::UploadFailed(format!("send sentinel: {}", e)))?;
        stream
            .flush()
            .map_err(|e| Error::UploadFailed(format!("flush: {}", e)))?;

        // Graceful close: stop sending, then wait (bounded) for the peer to
        // acknowledge by responding or closing its side.
        stream
            .shutdown(Shutdown::Write)
            .map_err(|e| Error::UploadFailed(format!("shutdown: {}", e)))?;
        self.await_close_ack(&mut stream)?;

        info!("Upload complete ({} bytes)", report.bytes_sent);
        Ok(report)
    }

    /// Send the file as fixed-size chunks, each write completing before the
    /// next chunk is read (sequential backpressure, no reordering).
    fn send_chunks(&self, file: &mut File, stream: &mut TcpStream) -> Result<UploadReport> {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut chunks_sent = 0usize;
        let mut bytes_sent = 0u64;

        loop {
            let n = read_chunk(file, &mut chunk)
                .map_err(|e| Error::UploadFailed(format!("read log: {}", e)))?;
            if n == 0 {
                break;
            }
            stream
                .write_all(&chunk[..n])
                .map_err(|e| Error::UploadFailed(format!("send chunk {}: {}", chunks_sent, e)))?;
            chunks_sent += 1;
            bytes_sent += n as u64;
            debug!("Sent chunk {} ({} bytes)", chunks_sent, n);
        }

        Ok(UploadReport {
            chunks_sent,
            bytes_sent,
        })
    }

    /// Bounded wait for the peer's close acknowledgment: either an ack
    /// payload or a clean end-of-stream counts; a timeout does not.
    fn await_close_ack(&self, stream: &mut TcpStream) -> Result<()> {
        stream
            .set_read_timeout(Some(self.close_ack_timeout))
            .map_err(|e| Error::UploadFailed(format!("set timeout: {}", e)))?;

        let mut buf = [0u8; 256];
        match stream.read(&mut buf) {
            Ok(0) => {
                debug!("Peer closed without ack payload");
                Ok(())
            }
            Ok(n) => {
                debug!("Peer ack: {:?}", String::from_utf8_lossy(&buf[..n]));
                Ok(())
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                warn!("No close acknowledgment within {:?}", self.close_ack_timeout);
                Err(Error::CloseAckTimeout)
            }
            Err(e) => Err(Error::UploadFailed(format!("await close ack: {}", e))),
        }
    }
}

/// Fill `buf` from `file` as far as possible, tolerating short reads.
/// Returns 0 only at end of file.
fn read_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use tempfile::TempDir;

    /// Accept one connection, read everything until EOF, reply with an ack,
    /// and hand back the received bytes.
    fn spawn_receiver(ack: bool) -> (SocketAddr, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).unwrap();
            if ack {
                stream.write_all(b"File received successfully").unwrap();
            }
            received
        });
        (addr, handle)
    }

    fn write_log(dir: &TempDir, len: usize) -> std::path::PathBuf {
        let path = dir.path().join("trace.csv");
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, payload).unwrap();
        path
    }

    #[test]
    fn test_chunking_130kib_file() {
        // 130 KiB -> chunks of 64 KiB, 64 KiB, 2 KiB, then the sentinel
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, 130 * 1024);
        let (addr, receiver) = spawn_receiver(true);

        let streamer = UploadStreamer::new(addr, Duration::from_secs(5));
        let report = streamer.upload(&path).unwrap();

        assert_eq!(report.chunks_sent, 3);
        assert_eq!(report.bytes_sent, 130 * 1024);

        let received = receiver.join().unwrap();
        let mut expected = std::fs::read(&path).unwrap();
        expected.extend_from_slice(SENTINEL);
        assert_eq!(received, expected);
    }

    #[test]
    fn test_exact_chunk_boundary() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, CHUNK_SIZE);
        let (addr, receiver) = spawn_receiver(true);

        let streamer = UploadStreamer::new(addr, Duration::from_secs(5));
        let report = streamer.upload(&path).unwrap();

        assert_eq!(report.chunks_sent, 1);
        let received = receiver.join().unwrap();
        assert_eq!(received.len(), CHUNK_SIZE + SENTINEL.len());
        assert_eq!(&received[CHUNK_SIZE..], SENTINEL);
    }

    #[test]
    fn test_empty_file_sends_only_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, 0);
        let (addr, receiver) = spawn_receiver(false);

        let streamer = UploadStreamer::new(addr, Duration::from_secs(5));
        let report = streamer.upload(&path).unwrap();

        assert_eq!(report.chunks_sent, 0);
        assert_eq!(report.bytes_sent, 0);
        assert_eq!(receiver.join().unwrap(), SENTINEL);
    }

    #[test]
    fn test_connect_failure_is_upload_error() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, 16);

        // Bind then drop to get an address nothing listens on
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };

        let streamer = UploadStreamer::new(addr, Duration::from_millis(100));
        let err = streamer.upload(&path).unwrap_err();
        assert!(matches!(err, Error::UploadFailed(_)));
    }

    #[test]
    fn test_close_ack_timeout() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, 16);

        // Receiver accepts but never reads to completion nor closes
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let holder = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let streamer = UploadStreamer::new(addr, Duration::from_millis(50));
        let err = streamer.upload(&path).unwrap_err();
        assert!(matches!(err, Error::CloseAckTimeout));
        holder.join().unwrap();
    }
}
