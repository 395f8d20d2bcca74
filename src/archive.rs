//! 아카이브 협력자 (디렉터리 묶기, 받은 아카이브 풀기)
//!
//! 지원 형식: `.tar`, `.tar.gz`, `.zip`. 풀 때는 확장자가 아니라 앞부분 매직으로 판별한다.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::{Error, Result};

/// 형식 판별에 읽는 앞부분 크기 (tar 헤더 블록)
const SNIFF_LEN: u64 = 512;

/// ustar 매직 위치
const USTAR_MAGIC_OFFSET: usize = 257;

const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";

/// 아카이브 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    #[default]
    Tar,
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// `--format` + `--compression` 조합 해석
    pub fn from_parts(format: &str, compression: Option<&str>) -> std::result::Result<Self, String> {
        let compression = compression.map(str::to_ascii_lowercase);
        match (format.parse::<Self>()?, compression.as_deref()) {
            (format, None) => Ok(format),
            (Self::Tar, Some("gz" | "gzip")) => Ok(Self::TarGz),
            (Self::Tar | Self::TarGz, Some(other)) => Err(format!("지원하지 않는 압축: {}", other)),
            (Self::Zip, Some(_)) => Err("zip은 압축 옵션을 받지 않음".into()),
        }
    }

    /// 파일 확장자 (점 제외)
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }

    /// 파일 앞부분으로 형식 판별
    pub fn detect(head: &[u8]) -> Option<Self> {
        if head.starts_with(GZIP_MAGIC) {
            Some(Self::TarGz)
        } else if head.starts_with(ZIP_MAGIC) || head.starts_with(ZIP_EMPTY_MAGIC) {
            Some(Self::Zip)
        } else if head.get(USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 5) == Some(&b"ustar"[..]) {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tar" => Ok(Self::Tar),
            "tar.gz" | "tgz" => Ok(Self::TarGz),
            "zip" => Ok(Self::Zip),
            other => Err(format!("지원하지 않는 아카이브 형식: {}", other)),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[async_trait]
pub trait Archiver: Send + Sync {
    /// `dir` 내용을 `format` 형식의 `dest` 아카이브 파일로 묶기
    async fn pack_dir(&self, dir: &Path, dest: &Path, format: ArchiveFormat) -> Result<()>;

    /// `archive`를 `dest_dir`에 풀기
    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()>;
}

/// 기본 아카이버 (`tar`, `flate2`, `zip` 크레이트)
#[derive(Debug, Clone, Copy, Default)]
pub struct FileArchiver;

#[async_trait]
impl Archiver for FileArchiver {
    async fn pack_dir(&self, dir: &Path, dest: &Path, format: ArchiveFormat) -> Result<()> {
        let (dir, dest) = (dir.to_path_buf(), dest.to_path_buf());
        blocking(move || pack(&dir, &dest, format)).await
    }

    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()> {
        let (archive, dest_dir) = (archive.to_path_buf(), dest_dir.to_path_buf());
        blocking(move || unpack(&archive, &dest_dir)).await
    }
}

async fn blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::ArchiveExtractionFailed(format!("작업 실패: {}", e)))?
}

fn archive_error(path: &Path, reason: impl fmt::Display) -> Error {
    Error::ArchiveExtractionFailed(format!("{}: {}", path.display(), reason))
}

fn pack(dir: &Path, dest: &Path, format: ArchiveFormat) -> Result<()> {
    let file = File::create(dest)?;
    match format {
        ArchiveFormat::Tar => {
            pack_tar(dir, file)?;
        }
        ArchiveFormat::TarGz => {
            let encoder = pack_tar(dir, GzEncoder::new(file, Compression::default()))?;
            encoder.finish().map_err(|e| archive_error(dest, e))?;
        }
        ArchiveFormat::Zip => {
            let mut zip = ZipWriter::new(file);
            let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
            add_zip_entries(&mut zip, dir, "", &options)?;
            zip.finish().map_err(|e| archive_error(dest, e))?;
        }
    }
    debug!("디렉터리 묶음 ({}): {} -> {}", format, dir.display(), dest.display());
    Ok(())
}

fn pack_tar<W: io::Write>(dir: &Path, writer: W) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", dir)
        .map_err(|e| archive_error(dir, format!("묶기 실패: {}", e)))?;
    builder
        .into_inner()
        .map_err(|e| archive_error(dir, format!("아카이브 마무리 실패: {}", e)))
}

/// 디렉터리를 재귀로 zip에 추가 (심볼릭 링크는 건너뜀)
fn add_zip_entries(
    zip: &mut ZipWriter<File>,
    dir: &Path,
    prefix: &str,
    options: &SimpleFileOptions,
) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let file_type = entry.file_type()?;
        let name = format!("{}{}", prefix, entry.file_name().to_string_lossy());
        if file_type.is_dir() {
            let name = format!("{}/", name);
            zip.add_directory(name.clone(), options.clone())
                .map_err(|e| archive_error(&entry.path(), e))?;
            add_zip_entries(zip, &entry.path(), &name, options)?;
        } else if file_type.is_file() {
            zip.start_file(name, options.clone())
                .map_err(|e| archive_error(&entry.path(), e))?;
            io::copy(&mut File::open(entry.path())?, zip)?;
        }
    }
    Ok(())
}

fn unpack(archive: &Path, dest_dir: &Path) -> Result<()> {
    let mut head = Vec::new();
    File::open(archive)?.take(SNIFF_LEN).read_to_end(&mut head)?;
    let format = ArchiveFormat::detect(&head)
        .ok_or_else(|| archive_error(archive, "지원하지 않는 아카이브 형식 (tar, tar.gz, zip)"))?;

    std::fs::create_dir_all(dest_dir)?;
    let file = File::open(archive)?;
    match format {
        ArchiveFormat::Tar => tar::Archive::new(file)
            .unpack(dest_dir)
            .map_err(|e| archive_error(archive, e))?,
        ArchiveFormat::TarGz => tar::Archive::new(GzDecoder::new(file))
            .unpack(dest_dir)
            .map_err(|e| archive_error(archive, e))?,
        ArchiveFormat::Zip => zip::ZipArchive::new(file)
            .and_then(|mut zip| zip.extract(dest_dir))
            .map_err(|e| archive_error(archive, e))?,
    }
    debug!("아카이브 풀기 ({}): {} -> {}", format, archive.display(), dest_dir.display());
    Ok(())
}

/// 압축 해제 기본 위치: 아카이브와 같은 디렉터리에 확장자 뺀 이름
pub fn default_extract_dir(archive: &Path) -> PathBuf {
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let lower = name.to_ascii_lowercase();
    for suffix in [".tar.gz", ".tgz", ".tar", ".zip"] {
        if lower.len() > suffix.len() && lower.ends_with(suffix) {
            return parent.join(&name[..name.len() - suffix.len()]);
        }
    }
    match archive.file_stem() {
        Some(stem) if archive.extension().is_some() => parent.join(stem),
        _ => parent.join(format!("{}.d", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree(root: &Path) -> PathBuf {
        let src = root.join("src");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("a.txt"), b"alpha").unwrap();
        std::fs::write(src.join("sub").join("b.txt"), b"beta").unwrap();
        src
    }

    #[tokio::test]
    async fn test_pack_and_extract_each_format() {
        for format in [ArchiveFormat::Tar, ArchiveFormat::TarGz, ArchiveFormat::Zip] {
            let tmp = tempfile::tempdir().unwrap();
            let src = sample_tree(tmp.path());

            let archive = tmp.path().join(format!("bundle.{}", format.extension()));
            FileArchiver.pack_dir(&src, &archive, format).await.unwrap();

            let head = std::fs::read(&archive).unwrap();
            assert_eq!(ArchiveFormat::detect(&head), Some(format), "{}", format);

            let out = default_extract_dir(&archive);
            assert_eq!(out, tmp.path().join("bundle"));
            FileArchiver.extract(&archive, &out).await.unwrap();
            assert_eq!(std::fs::read(out.join("a.txt")).unwrap(), b"alpha", "{}", format);
            assert_eq!(std::fs::read(out.join("sub").join("b.txt")).unwrap(), b"beta", "{}", format);
        }
    }

    #[tokio::test]
    async fn test_extract_detects_format_by_content() {
        let tmp = tempfile::tempdir().unwrap();
        let src = sample_tree(tmp.path());

        // 확장자가 내용과 달라도 매직으로 판별
        let archive = tmp.path().join("download.bin");
        FileArchiver.pack_dir(&src, &archive, ArchiveFormat::Zip).await.unwrap();
        let out = tmp.path().join("out");
        FileArchiver.extract(&archive, &out).await.unwrap();
        assert_eq!(std::fs::read(out.join("a.txt")).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn test_extract_rejects_unknown_format() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("fake.zip");
        std::fs::write(&archive, vec![b'P'; 1024]).unwrap();

        let err = FileArchiver
            .extract(&archive, &tmp.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ArchiveExtractionFailed(_)));

        std::fs::write(&archive, b"PK").unwrap();
        assert!(FileArchiver.extract(&archive, &tmp.path().join("out")).await.is_err());
    }

    #[test]
    fn test_format_from_parts() {
        assert_eq!(ArchiveFormat::from_parts("tar", None), Ok(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_parts("TAR", Some("gzip")), Ok(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_parts("tar", Some("gz")), Ok(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_parts("zip", None), Ok(ArchiveFormat::Zip));
        assert!(ArchiveFormat::from_parts("zip", Some("gz")).is_err());
        assert!(ArchiveFormat::from_parts("tar", Some("xz")).is_err());
        assert!(ArchiveFormat::from_parts("rar", None).is_err());
    }

    #[test]
    fn test_default_extract_dir() {
        assert_eq!(
            default_extract_dir(Path::new("/tmp/x/bundle.tar")),
            PathBuf::from("/tmp/x/bundle")
        );
        assert_eq!(
            default_extract_dir(Path::new("/tmp/x/bundle.tar.gz")),
            PathBuf::from("/tmp/x/bundle")
        );
        assert_eq!(
            default_extract_dir(Path::new("/tmp/x/bundle.bin")),
            PathBuf::from("/tmp/x/bundle")
        );
        assert_eq!(
            default_extract_dir(Path::new("/tmp/x/bundle")),
            PathBuf::from("/tmp/x/bundle.d")
        );
    }
}
