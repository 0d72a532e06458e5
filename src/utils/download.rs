use std::future::Future;
use std::io::{self, Cursor, Read, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::InstallerError;
use crate::utils::tracker::{Progress, describe};

/// Size of each write when copying an image onto a mounted drive
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;

pub const ARCHIVE_EXTENSION: &str = ".zip";

#[derive(Debug, Clone, PartialEq)]
pub struct CachedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Files downloaded during this session, looked up by file name
#[derive(Debug, Default)]
pub struct FileCache {
    entries: Vec<CachedFile>,
}

impl FileCache {
    pub fn get(&self, filename: &str) -> Option<&CachedFile> {
        self.entries.iter().find(|e| e.filename == filename)
    }

    pub fn insert(&mut self, filename: impl Into<String>, data: Vec<u8>) {
        let filename = filename.into();
        self.entries.retain(|e| e.filename != filename);
        self.entries.push(CachedFile { filename, data });
    }

    pub fn remove(&mut self, filename: &str) -> Option<CachedFile> {
        let index = self.entries.iter().position(|e| e.filename == filename)?;
        Some(self.entries.remove(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A downloaded (and possibly extracted) file
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Last path segment of a URL, without query or fragment
pub fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

/// Destination that accepts chunks at absolute offsets
pub trait ChunkWriter {
    fn write_at(&mut self, offset: u64, chunk: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    fn close(self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Writes chunks into a file on a mounted drive
pub struct FileChunkWriter {
    file: tokio::fs::File,
}

impl FileChunkWriter {
    pub async fn create(path: &Path) -> io::Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self { file })
    }
}

impl ChunkWriter for FileChunkWriter {
    async fn write_at(&mut self, offset: u64, chunk: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(chunk).await
    }

    async fn close(mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

/// Write `data` in `COPY_CHUNK_SIZE` pieces, each at its own offset.
///
/// Closing the destination may fail when the board reboots as soon as the
/// last byte lands (a UF2 bootloader does exactly that); once every byte has
/// been written that failure is only logged.
pub async fn copy_in_chunks<W: ChunkWriter>(
    data: &[u8],
    mut writer: W,
    progress: Option<&mpsc::UnboundedSender<Progress>>,
) -> anyhow::Result<u64> {
    let total = data.len() as u64;

    for (index, chunk) in data.chunks(COPY_CHUNK_SIZE).enumerate() {
        let offset = (index * COPY_CHUNK_SIZE) as u64;
        writer
            .write_at(offset, chunk)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write at offset {}: {}", offset, e))?;

        if let Some(tx) = progress {
            let _ = tx.send(Progress::new(offset + chunk.len() as u64, Some(total)));
        }
    }

    if let Err(e) = writer.close().await {
        warn!("Closing the copied file failed (the board may have rebooted): {}", e);
    }

    Ok(total)
}

/// Look for `member` in a zip archive. Only the final path component of each
/// entry is compared, case-sensitively; the first match wins.
pub fn extract_member(archive_name: &str, data: &[u8], member: &str) -> anyhow::Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| InstallerError::Download(format!("{} is not a valid zip file: {}", archive_name, e)))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().rsplit('/').next().unwrap_or_default().to_string();
        if entry_name == member {
            debug!("Extracting {} from {}", entry.name(), archive_name);
            // The declared size comes from the archive and is not trusted
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return Ok(contents);
        }
    }

    Err(InstallerError::MemberNotFound {
        member: member.to_string(),
        archive: archive_name.to_string(),
    }
    .into())
}

/// Downloads release files, keeping an in-memory cache for the session
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    cache: Arc<Mutex<FileCache>>,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            cache: Arc::new(Mutex::new(FileCache::default())),
        }
    }

    pub fn cache_insert(&self, filename: impl Into<String>, data: Vec<u8>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(filename, data);
        }
    }

    pub fn cached(&self, filename: &str) -> Option<Vec<u8>> {
        let cache = self.cache.lock().ok()?;
        cache.get(filename).map(|entry| entry.data.clone())
    }

    /// Drop a cached file once it has been consumed
    pub fn evict(&self, filename: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            if cache.remove(filename).is_some() {
                debug!("Evicted {} from the file cache", filename);
            }
        }
    }

    /// Stream `url` into memory, reporting progress after every chunk
    pub async fn download_file(
        &self,
        url: &str,
        progress: Option<&mpsc::UnboundedSender<Progress>>,
    ) -> anyhow::Result<Vec<u8>> {
        info!("Downloading {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InstallerError::Download(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(InstallerError::Download(format!(
                "Failed to download {}, status: {}",
                url,
                response.status()
            ))
            .into());
        }

        let total = response.content_length();
        let mut chunks = Vec::new();
        let mut received = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(item) = stream.next().await {
            let chunk = item
                .map_err(|e| InstallerError::Download(format!("Failed to download chunk: {}", e)))?;
            received += chunk.len() as u64;
            chunks.push(chunk);

            if let Some(tx) = progress {
                let _ = tx.send(Progress::new(received, total));
            }
        }

        let mut data = Vec::with_capacity(received as usize);
        for chunk in &chunks {
            data.extend_from_slice(chunk);
        }

        info!("Downloaded {} ({})", url, describe(&Progress::new(received, total)));
        Ok(data)
    }

    /// Fetch `url` (or take it from the cache) and, for zip archives with a
    /// requested member, return that member instead of the archive.
    pub async fn download_and_extract(
        &self,
        url: &str,
        member: Option<&str>,
        cacheable: bool,
        progress: Option<&mpsc::UnboundedSender<Progress>>,
    ) -> anyhow::Result<DownloadedFile> {
        let filename = filename_from_url(url);

        let data = match self.cached(&filename) {
            Some(data) => {
                debug!("Using cached {}", filename);
                if let Some(tx) = progress {
                    let _ = tx.send(Progress::new(data.len() as u64, Some(data.len() as u64)));
                }
                data
            }
            None => {
                let data = self.download_file(url, progress).await?;
                if cacheable {
                    self.cache_insert(filename.clone(), data.clone());
                }
                data
            }
        };

        match member {
            Some(member) if filename.ends_with(ARCHIVE_EXTENSION) => {
                let contents = extract_member(&filename, &data, member)?;
                Ok(DownloadedFile {
                    filename: member.to_string(),
                    data: contents,
                })
            }
            _ => Ok(DownloadedFile { filename, data }),
        }
    }

    /// Download `url` and write it into `target_dir` chunk by chunk
    pub async fn download_and_copy(
        &self,
        url: &str,
        member: Option<&str>,
        target_dir: &Path,
        download_progress: Option<&mpsc::UnboundedSender<Progress>>,
        copy_progress: Option<&mpsc::UnboundedSender<Progress>>,
    ) -> anyhow::Result<PathBuf> {
        let file = self
            .download_and_extract(url, member, false, download_progress)
            .await?;
        let destination = target_dir.join(&file.filename);

        info!("Copying {} to {:?}", file.filename, destination);
        let writer = FileChunkWriter::create(&destination)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {:?}: {}", destination, e))?;
        let written = copy_in_chunks(&file.data, writer, copy_progress).await?;
        info!("Copied {} bytes to {:?}", written, destination);

        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Default)]
    struct RecordingWriter {
        writes: Arc<Mutex<Vec<(u64, usize)>>>,
        fail_close: bool,
    }

    impl ChunkWriter for RecordingWriter {
        async fn write_at(&mut self, offset: u64, chunk: &[u8]) -> io::Result<()> {
            self.writes.lock().unwrap().push((offset, chunk.len()));
            Ok(())
        }

        async fn close(self) -> io::Result<()> {
            if self.fail_close {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "device went away"))
            } else {
                Ok(())
            }
        }
    }

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://host/bin/feather_s2/en_US/cp-8.2.0.uf2"),
            "cp-8.2.0.uf2"
        );
        assert_eq!(filename_from_url("https://host/boot.zip?x=1#top"), "boot.zip");
        assert_eq!(filename_from_url("firmware.bin"), "firmware.bin");
    }

    #[test]
    fn test_file_cache() {
        let mut cache = FileCache::default();
        cache.insert("a.bin", vec![1]);
        cache.insert("b.bin", vec![2]);
        cache.insert("a.bin", vec![3]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a.bin").unwrap().data, vec![3]);
        assert_eq!(cache.remove("a.bin").unwrap().data, vec![3]);
        assert!(cache.get("a.bin").is_none());
        assert!(cache.remove("a.bin").is_none());
    }

    #[tokio::test]
    async fn test_chunk_offsets_cover_every_byte_once() {
        for size in [0usize, 1000, COPY_CHUNK_SIZE, COPY_CHUNK_SIZE * 2, COPY_CHUNK_SIZE * 2 + 1] {
            let data = vec![0xA5u8; size];
            let writer = RecordingWriter::default();
            let writes = writer.writes.clone();
            let (tx, mut rx) = mpsc::unbounded_channel();

            let written = copy_in_chunks(&data, writer, Some(&tx)).await.unwrap();
            assert_eq!(written, size as u64);

            let writes = writes.lock().unwrap().clone();
            let mut expected_offset = 0u64;
            for (offset, len) in &writes {
                assert_eq!(*offset, expected_offset);
                assert!(*len > 0 && *len <= COPY_CHUNK_SIZE);
                expected_offset += *len as u64;
            }
            assert_eq!(expected_offset, size as u64);
            assert_eq!(writes.len(), size.div_ceil(COPY_CHUNK_SIZE));

            drop(tx);
            let mut last = None;
            while let Some(p) = rx.recv().await {
                last = Some(p);
            }
            if size > 0 {
                assert_eq!(last.unwrap().percent, Some(100.0));
            } else {
                assert!(last.is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_close_failure_after_full_write_is_not_an_error() {
        let writer = RecordingWriter {
            fail_close: true,
            ..RecordingWriter::default()
        };
        let written = copy_in_chunks(&[1, 2, 3], writer, None).await.unwrap();
        assert_eq!(written, 3);
    }

    #[test]
    fn test_extract_member_matches_exact_name() {
        let archive = zip_with(&[
            ("docs/readme.txt", b"hello"),
            ("tinyuf2/Combined.bin", b"wrong case"),
            ("tinyuf2/combined.bin", b"image"),
        ]);
        let data = extract_member("boot.zip", &archive, "combined.bin").unwrap();
        assert_eq!(data, b"image");

        let err = extract_member("boot.zip", &archive, "missing.bin").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstallerError>(),
            Some(InstallerError::MemberNotFound { .. })
        ));
    }

    #[test]
    fn test_extract_member_ignores_forged_size() {
        let mut archive = zip_with(&[("combined.bin", b"image")]);
        // Claim a ~4 GiB member in the central directory
        let header = archive.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        archive[header + 24..header + 28].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());

        if let Ok(data) = extract_member("boot.zip", &archive, "combined.bin") {
            assert_eq!(data, b"image");
        }
    }

    #[tokio::test]
    async fn test_cached_file_is_returned_without_fetching() {
        let downloader = Downloader::new();
        downloader.cache_insert("firmware.uf2", vec![7, 8, 9]);

        // Nothing listens on this port; a fetch would fail
        let file = downloader
            .download_and_extract("http://127.0.0.1:9/firmware.uf2", None, false, None)
            .await
            .unwrap();
        assert_eq!(file.filename, "firmware.uf2");
        assert_eq!(file.data, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_cached_archive_member_is_extracted() {
        let downloader = Downloader::new();
        downloader.cache_insert("boot.zip", zip_with(&[("combined.bin", b"bootloader")]));

        let file = downloader
            .download_and_extract("http://127.0.0.1:9/boot.zip", Some("combined.bin"), true, None)
            .await
            .unwrap();
        assert_eq!(file.filename, "combined.bin");
        assert_eq!(file.data, b"bootloader");

        downloader.evict("boot.zip");
        assert!(downloader.cached("boot.zip").is_none());
    }

    #[tokio::test]
    async fn test_download_and_copy_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new();
        let data: Vec<u8> = (0..(COPY_CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        downloader.cache_insert("firmware.uf2", data.clone());

        let path = downloader
            .download_and_copy("http://127.0.0.1:9/firmware.uf2", None, dir.path(), None, None)
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("firmware.uf2"));
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_network_failure_is_reported() {
        let downloader = Downloader::new();
        let result = downloader
            .download_file("http://127.0.0.1:9/firmware.uf2", None)
            .await;
        assert!(result.is_err());
    }
}
