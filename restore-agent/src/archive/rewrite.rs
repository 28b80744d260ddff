//! Single-pass TAR rewriting.
//!
//! Entries are read, renamed and re-emitted one at a time; an entry's payload
//! is copied straight from the input to the output before the next header is
//! read, so the archive is never held in memory.

use crate::{RestoreError, Result};
use futures_util::StreamExt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tar::{Archive, Builder};
use tracing::debug;

/// Counters for one rewritten archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub entries: u64,
    pub payload_bytes: u64,
}

/// Map `{db}/{rp}/{shard}/{file}` onto the destination database and shard.
pub fn rewrite_entry_name(name: &str, destination_database: &str, destination_shard_id: u64) -> Result<String> {
    let segments: Vec<&str> = name.split('/').collect();
    if segments.len() != 4 || segments.iter().any(|s| s.is_empty()) {
        return Err(RestoreError::ArchiveFormat(format!(
            "entry {:?} is not of the form database/retention/shard/file",
            name
        )));
    }

    Ok(format!(
        "{}/{}/{}/{}",
        destination_database, segments[1], destination_shard_id, segments[3]
    ))
}

/// Copy a TAR stream from `reader` to `writer`, renaming every entry with
/// `rename`. Entry headers other than the name, and all payload bytes, are
/// carried over unchanged.
pub async fn rewrite_archive<R, W, F>(reader: R, writer: W, mut rename: F) -> Result<(W, ArchiveStats)>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
    F: FnMut(&str) -> Result<String>,
{
    let sealed = Arc::new(AtomicBool::new(false));
    let mut builder = Builder::new(SealableWriter {
        inner: writer,
        sealed: Arc::clone(&sealed),
    });

    match copy_entries(reader, &mut builder, &mut rename).await {
        Ok(stats) => {
            let writer = builder
                .into_inner()
                .await
                .map_err(|e| RestoreError::Transport(format!("finish archive: {}", e)))?;
            Ok((writer.inner, stats))
        }
        Err(e) => {
            // The builder writes an end-of-archive trailer when dropped
            // unfinished; the peer must not see a truncated archive as complete.
            sealed.store(true, Ordering::SeqCst);
            drop(builder);
            Err(e)
        }
    }
}

async fn copy_entries<R, W, F>(reader: R, builder: &mut Builder<W>, rename: &mut F) -> Result<ArchiveStats>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
    F: FnMut(&str) -> Result<String>,
{
    let mut archive = Archive::new(reader);
    let mut entries = archive.entries().map_err(format_error("read archive"))?;
    let mut stats = ArchiveStats::default();

    while let Some(entry) = entries.next().await {
        let mut entry = entry.map_err(format_error("read archive entry"))?;
        let name = {
            let bytes = entry.path_bytes();
            std::str::from_utf8(&bytes).map(str::to_string).map_err(|_| {
                RestoreError::ArchiveFormat(format!(
                    "entry name {:?} is not valid UTF-8",
                    String::from_utf8_lossy(&bytes)
                ))
            })?
        };
        let renamed = rename(&name)?;

        let mut header = entry.header().clone();
        let size = header.size().map_err(format_error("read entry size"))?;

        builder
            .append_data(&mut header, &renamed, &mut entry)
            .await
            .map_err(|e| RestoreError::Transport(format!("stream entry {}: {}", renamed, e)))?;

        debug!("Rewrote {} -> {} ({} bytes)", name, renamed, size);
        stats.entries += 1;
        stats.payload_bytes += size;
    }

    Ok(stats)
}

fn format_error(context: &'static str) -> impl Fn(io::Error) -> RestoreError {
    move |e| RestoreError::ArchiveFormat(format!("{}: {}", context, e))
}

/// Writer that starts refusing writes once its archive has been abandoned.
struct SealableWriter<W> {
    inner: W,
    sealed: Arc<AtomicBool>,
}

impl<W: AsyncWrite + Unpin> AsyncWrite for SealableWriter<W> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.sealed.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "archive rewrite aborted",
            )));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio_tar::Header;

    pub(crate) async fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_700_000_000);
            builder.append_data(&mut header, name, *data).await.unwrap();
        }
        builder.into_inner().await.unwrap()
    }

    pub(crate) async fn read_archive(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = Archive::new(Cursor::new(bytes));
        let mut entries = archive.entries().unwrap();
        let mut out = Vec::new();
        while let Some(entry) = entries.next().await {
            let mut entry = entry.unwrap();
            let name = String::from_utf8(entry.path_bytes().to_vec()).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).await.unwrap();
            out.push((name, data));
        }
        out
    }

    #[derive(Clone, Default, Debug)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl AsyncWrite for SharedBuf {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_rewrite_entry_name() {
        assert_eq!(
            rewrite_entry_name("db1/rp1/42/data.tsm", "db2", 99).unwrap(),
            "db2/rp1/99/data.tsm"
        );
    }

    #[test]
    fn test_rewrite_entry_name_rejects_wrong_arity() {
        for name in [
            "db1/rp1/data.tsm",
            "db1/rp1/42/sub/data.tsm",
            "data.tsm",
            "db1//42/data.tsm",
            "",
        ] {
            let err = rewrite_entry_name(name, "db2", 99).unwrap_err();
            assert!(matches!(err, RestoreError::ArchiveFormat(_)), "{:?}", name);
        }
    }

    #[tokio::test]
    async fn test_rewrite_archive_renames_and_preserves_payload() {
        let tsm = b"tsm block bytes".repeat(100);
        let input = build_archive(&[
            ("db1/rp1/42/000000001-000000001.tsm", tsm.as_slice()),
            ("db1/rp1/42/fields.idx", b"field index".as_slice()),
        ])
        .await;

        let (output, stats) = rewrite_archive(Cursor::new(input), Vec::new(), |name| {
            rewrite_entry_name(name, "db2", 99)
        })
        .await
        .unwrap();

        assert_eq!(stats.entries, 2);
        assert_eq!(stats.payload_bytes, tsm.len() as u64 + 11);

        let entries = read_archive(output).await;
        assert_eq!(
            entries,
            vec![
                ("db2/rp1/99/000000001-000000001.tsm".to_string(), tsm.clone()),
                ("db2/rp1/99/fields.idx".to_string(), b"field index".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_rewrite_archive_handles_long_names() {
        let file_name = format!("{}.tsm", "a".repeat(150));
        let input_name = format!("db1/autogen/3/{}", file_name);
        let input = build_archive(&[(input_name.as_str(), b"payload".as_slice())]).await;

        let (output, _) = rewrite_archive(Cursor::new(input), Vec::new(), |name| {
            rewrite_entry_name(name, "restoreddb", 1003)
        })
        .await
        .unwrap();

        let entries = read_archive(output).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, format!("restoreddb/autogen/1003/{}", file_name));
        assert_eq!(entries[0].1, b"payload".to_vec());
    }

    #[tokio::test]
    async fn test_rewrite_archive_empty_input() {
        let input = build_archive(&[]).await;
        let (output, stats) = rewrite_archive(Cursor::new(input), Vec::new(), |name| {
            rewrite_entry_name(name, "db2", 1)
        })
        .await
        .unwrap();

        assert_eq!(stats, ArchiveStats::default());
        assert!(read_archive(output).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entry_aborts_without_trailer() {
        let input = build_archive(&[
            ("db1/rp1/42/ok.tsm", b"x".as_slice()),
            ("db1/rp1/bad.tsm", b"y".as_slice()),
        ]).await;
        let sink = SharedBuf::default();

        let err = rewrite_archive(Cursor::new(input), sink.clone(), |name| {
            rewrite_entry_name(name, "db2", 99)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RestoreError::ArchiveFormat(_)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        // One header block and one padded data block for the first entry only.
        assert_eq!(sink.0.lock().unwrap().len(), 1024);
    }
}
