//! HTTP download transport
//!
//! Streams a URL to a local file through a `.part` file, calling back with
//! byte-count samples at a fixed interval.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How often progress samples are emitted
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

const CHUNK_SIZE: usize = 64 * 1024;

/// Filename used when the URL has no usable last path segment
pub const FALLBACK_FILENAME: &str = "download.iso";

/// Last path segment of a URL, ignoring query string and fragment
pub fn filename_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = without_query
        .split_once("://")
        .map(|(_, rest)| rest.split_once('/').map(|(_, p)| p).unwrap_or(""))
        .unwrap_or(without_query);

    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Download `url` to `dest`, reporting `(downloaded, total, elapsed)`.
///
/// `total` is 0 when the server sends no content length. The destination
/// only appears once the transfer completed; a failed transfer leaves no
/// partial file behind.
pub fn download_to<F>(url: &str, dest: &Path, mut on_sample: F) -> Result<u64>
where
    F: FnMut(u64, u64, Duration),
{
    let client = reqwest::blocking::Client::builder()
        .timeout(None::<Duration>)
        .user_agent(concat!("pxc/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    tracing::info!(url, dest = %dest.display(), "starting download");

    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("Request to {} failed", url))?;

    if !response.status().is_success() {
        bail!("Download failed: HTTP {}", response.status());
    }

    let total = response.content_length().unwrap_or(0);
    let part = part_path(dest);

    let result = stream_body(&mut response, &part, total, &mut on_sample);
    match result {
        Ok(downloaded) => {
            fs::rename(&part, dest)
                .with_context(|| format!("Failed to move download into {:?}", dest))?;
            tracing::info!(downloaded, dest = %dest.display(), "download complete");
            Ok(downloaded)
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}

fn stream_body<R, F>(body: &mut R, part: &Path, total: u64, on_sample: &mut F) -> Result<u64>
where
    R: Read,
    F: FnMut(u64, u64, Duration),
{
    let mut file = File::create(part).with_context(|| format!("Failed to create {:?}", part))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut downloaded = 0u64;
    let start = Instant::now();
    let mut last_sample = start;

    on_sample(0, total, Duration::ZERO);

    loop {
        let n = body.read(&mut buf).context("Error while reading download stream")?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .with_context(|| format!("Failed to write {:?}", part))?;
        downloaded += n as u64;

        if last_sample.elapsed() >= SAMPLE_INTERVAL {
            last_sample = Instant::now();
            on_sample(downloaded, total, start.elapsed());
        }
    }

    file.flush().with_context(|| format!("Failed to flush {:?}", part))?;
    on_sample(downloaded, total, start.elapsed());

    if total > 0 && downloaded != total {
        bail!("Download truncated: got {} of {} bytes", downloaded, total);
    }
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://cdimage.debian.org/debian-cd/12.5.0/amd64/iso-cd/debian-12.5.0-amd64-netinst.iso"),
            "debian-12.5.0-amd64-netinst.iso"
        );
        assert_eq!(
            filename_from_url("https://example.com/images/alpine.iso?mirror=eu#top"),
            "alpine.iso"
        );
        assert_eq!(filename_from_url("https://example.com/"), FALLBACK_FILENAME);
        assert_eq!(filename_from_url("https://example.com"), FALLBACK_FILENAME);
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/var/lib/vz/template/iso/a.iso")),
            PathBuf::from("/var/lib/vz/template/iso/a.iso.part")
        );
    }

    #[test]
    fn test_stream_body_writes_and_samples() {
        let dir = TempDir::new().unwrap();
        let part = dir.path().join("x.iso.part");
        let data = vec![7u8; 200_000];
        let mut samples = Vec::new();

        let n = stream_body(&mut Cursor::new(data.clone()), &part, data.len() as u64, &mut |d, t, _| {
            samples.push((d, t))
        })
        .unwrap();

        assert_eq!(n, 200_000);
        assert_eq!(fs::read(&part).unwrap(), data);
        assert_eq!(samples.first(), Some(&(0, 200_000)));
        assert_eq!(samples.last(), Some(&(200_000, 200_000)));
    }

    #[test]
    fn test_stream_body_detects_truncation() {
        let dir = TempDir::new().unwrap();
        let part = dir.path().join("x.iso.part");
        let err = stream_body(&mut Cursor::new(vec![1u8; 10]), &part, 20, &mut |_, _, _| {})
            .unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }
}
