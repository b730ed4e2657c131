//! Input decompression and archive handling.
//!
//! Opens a log file as a plain byte stream, transparently decoding gzip and
//! zstd, and recognizes tar archives whose members are handled as
//! independent streams by the pipeline. The codec is chosen from the file
//! extension first, falling back to magic bytes for extension-less input
//! (including stdin).

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

/// Error type for input open/decode failures.
#[derive(Debug)]
pub enum SourceError {
    /// The file could not be opened.
    Open(PathBuf, io::Error),
    /// The compressed stream could not be initialized.
    Decode(PathBuf, io::Error),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Open(path, e) => write!(f, "cannot open {}: {}", path.display(), e),
            SourceError::Decode(path, e) => {
                write!(f, "cannot decompress {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for SourceError {}

/// An opened input: either a single decoded log stream or a tar archive
/// whose members each hold one stream.
pub enum Input {
    Stream(Box<dyn Read + Send>),
    Archive(Box<dyn Read + Send>),
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Opens a log file, decoding by extension with a magic-byte fallback.
pub fn open(path: &Path) -> Result<Input, SourceError> {
    let open_err = |e| SourceError::Open(path.to_path_buf(), e);
    let decode_err = |e| SourceError::Decode(path.to_path_buf(), e);

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        let file = File::open(path).map_err(open_err)?;
        return Ok(Input::Archive(Box::new(GzDecoder::new(BufReader::new(
            file,
        )))));
    }
    if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
        let file = File::open(path).map_err(open_err)?;
        let decoder = zstd::stream::read::Decoder::new(file).map_err(decode_err)?;
        return Ok(Input::Archive(Box::new(decoder)));
    }
    if name.ends_with(".tar") {
        let file = File::open(path).map_err(open_err)?;
        return Ok(Input::Archive(Box::new(BufReader::new(file))));
    }
    if name.ends_with(".gz") {
        let file = File::open(path).map_err(open_err)?;
        return Ok(Input::Stream(Box::new(GzDecoder::new(BufReader::new(
            file,
        )))));
    }
    if name.ends_with(".zst") || name.ends_with(".zstd") {
        let file = File::open(path).map_err(open_err)?;
        let decoder = zstd::stream::read::Decoder::new(file).map_err(decode_err)?;
        return Ok(Input::Stream(Box::new(decoder)));
    }

    let file = File::open(path).map_err(open_err)?;
    let stream = sniff_codec(BufReader::new(file)).map_err(decode_err)?;
    Ok(Input::Stream(stream))
}

/// Opens stdin as a log stream with magic-byte codec detection.
pub fn open_stdin() -> Result<Input, SourceError> {
    let reader = BufReader::new(io::stdin());
    let stream =
        sniff_codec(reader).map_err(|e| SourceError::Decode(PathBuf::from("-"), e))?;
    Ok(Input::Stream(stream))
}

/// Picks a decoder by inspecting the first bytes of the stream.
fn sniff_codec<R: BufRead + Send + 'static>(
    mut reader: R,
) -> io::Result<Box<dyn Read + Send>> {
    let head = reader.fill_buf()?;
    if head.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(GzDecoder::new(reader)))
    } else if head.starts_with(&ZSTD_MAGIC) {
        Ok(Box::new(zstd::stream::read::Decoder::with_buffer(reader)?))
    } else {
        Ok(Box::new(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn read_all(input: Input) -> String {
        let mut out = String::new();
        match input {
            Input::Stream(mut r) => {
                r.read_to_string(&mut out).unwrap();
            }
            Input::Archive(_) => panic!("expected plain stream"),
        }
        out
    }

    #[test]
    fn test_open_plain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgresql.log");
        std::fs::write(&path, "hello\n").unwrap();
        assert_eq!(read_all(open(&path).unwrap()), "hello\n");
    }

    #[test]
    fn test_open_gzip_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgresql.log.gz");
        let file = std::fs::File::create(&path).unwrap();
        let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        enc.write_all(b"compressed line\n").unwrap();
        enc.finish().unwrap();
        assert_eq!(read_all(open(&path).unwrap()), "compressed line\n");
    }

    #[test]
    fn test_open_gzip_by_magic() {
        // No extension at all, decoder picked from magic bytes
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logdump");
        let file = std::fs::File::create(&path).unwrap();
        let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        enc.write_all(b"sniffed\n").unwrap();
        enc.finish().unwrap();
        assert_eq!(read_all(open(&path).unwrap()), "sniffed\n");
    }

    #[test]
    fn test_open_zstd() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgresql.log.zst");
        let data = zstd::encode_all(&b"zstd line\n"[..], 3).unwrap();
        std::fs::write(&path, data).unwrap();
        assert_eq!(read_all(open(&path).unwrap()), "zstd line\n");
    }

    #[test]
    fn test_open_tar_is_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.tar");
        let file = std::fs::File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);
        let data = b"2024-01-15 10:30:00 UTC [1] LOG:  ready\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "pg.log", &data[..])
            .unwrap();
        builder.finish().unwrap();

        assert!(matches!(open(&path).unwrap(), Input::Archive(_)));
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            open(Path::new("/nonexistent/log/file.log")),
            Err(SourceError::Open(_, _))
        ));
    }
}
