//! 레이어 핸들: content-addressed 파일시스템 diff
//!
//! [`Layer`]는 불변이며 복제 비용이 낮습니다. 내용은 메모리 버퍼(`Bytes`)이거나
//! 디스크 파일 경로이고, [`Layer::reader`]를 호출할 때마다 독립적인 커서를 가진
//! 새 스트림이 열립니다. 스캐너는 스트림을 소유하며 필요한 만큼 되감아 읽습니다.
//!
//! 아카이브 읽기는 blocking I/O이므로 async 컨텍스트에서는 `spawn_blocking` 안에서
//! 호출해야 합니다.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use layerdex_core::types::Digest;

use crate::context::ScanContext;
use crate::error::ScanError;

/// `Layer::files`로 읽을 수 있는 파일 하나의 최대 크기 (16MB)
pub const MAX_PROBE_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// 되감기 가능한 아카이브 스트림
pub trait ArchiveReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveReader for T {}

#[derive(Clone)]
enum Content {
    Memory(Bytes),
    File(Arc<PathBuf>),
}

/// 레이어 핸들
#[derive(Clone)]
pub struct Layer {
    hash: Digest,
    ordinal: usize,
    content: Content,
}

impl Layer {
    /// 메모리 버퍼로 레이어를 생성합니다. 버퍼는 압축되지 않은 tar여야 합니다.
    pub fn from_bytes(hash: Digest, ordinal: usize, bytes: impl Into<Bytes>) -> Self {
        Self {
            hash,
            ordinal,
            content: Content::Memory(bytes.into()),
        }
    }

    /// 디스크의 tar 파일로 레이어를 생성합니다.
    pub fn from_path(hash: Digest, ordinal: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            hash,
            ordinal,
            content: Content::File(Arc::new(path.into())),
        }
    }

    /// 레이어 digest
    pub fn hash(&self) -> &Digest {
        &self.hash
    }

    /// 매니페스트 내 순서
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// 디스크 파일 기반이면 파일 경로
    pub fn path(&self) -> Option<&Path> {
        match &self.content {
            Content::Memory(_) => None,
            Content::File(path) => Some(path.as_path()),
        }
    }

    /// 새 아카이브 스트림을 엽니다.
    pub fn reader(&self) -> std::io::Result<Box<dyn ArchiveReader>> {
        match &self.content {
            Content::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            Content::File(path) => Ok(Box::new(BufReader::new(File::open(path.as_path())?))),
        }
    }

    /// 요청한 경로의 파일 내용을 읽습니다.
    ///
    /// 경로는 양쪽 모두 정규화해서 비교합니다. 같은 경로가 여러 번 나오면 마지막
    /// 엔트리가 이깁니다. 찾지 못한 경로는 `None`으로 남고, 아카이브를 읽을 수 없을
    /// 때만 에러를 반환합니다.
    pub fn files(&self, ctx: &ScanContext, paths: &[&str]) -> Result<LayerFiles, ScanError> {
        let wanted: Vec<String> = paths.iter().map(|p| clean_path(p)).collect();
        let mut found: HashMap<String, Bytes> = HashMap::new();

        let mut archive = tar::Archive::new(self.reader()?);
        for entry in archive.entries()? {
            ctx.check()?;
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = clean_path(&entry.path()?.to_string_lossy());
            if !wanted.contains(&path) {
                continue;
            }
            let size = entry.size();
            if size > MAX_PROBE_FILE_SIZE {
                return Err(ScanError::TooLarge {
                    path,
                    size,
                    max: MAX_PROBE_FILE_SIZE,
                });
            }
            let mut buf = Vec::with_capacity(size as usize);
            entry.read_to_end(&mut buf)?;
            found.insert(path, Bytes::from(buf));
        }

        let entries = wanted
            .into_iter()
            .map(|path| {
                let content = found.get(&path).cloned();
                (path, content)
            })
            .collect();
        Ok(LayerFiles { entries })
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let content = match &self.content {
            Content::Memory(bytes) => format!("memory({} bytes)", bytes.len()),
            Content::File(path) => format!("file({})", path.display()),
        };
        f.debug_struct("Layer")
            .field("hash", &self.hash.to_string())
            .field("ordinal", &self.ordinal)
            .field("content", &content)
            .finish()
    }
}

/// [`Layer::files`] 결과. 요청 순서를 유지합니다.
#[derive(Debug, Clone, Default)]
pub struct LayerFiles {
    entries: Vec<(String, Option<Bytes>)>,
}

impl LayerFiles {
    /// 경로의 내용 (없으면 `None`)
    pub fn get(&self, path: &str) -> Option<&Bytes> {
        let path = clean_path(path);
        self.entries
            .iter()
            .find(|(p, _)| *p == path)
            .and_then(|(_, content)| content.as_ref())
    }

    /// 요청한 파일이 하나도 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, content)| content.is_none())
    }

    /// 찾은 파일을 요청 순서대로 순회합니다.
    pub fn found(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries
            .iter()
            .filter_map(|(path, content)| content.as_ref().map(|c| (path.as_str(), c)))
    }
}

/// 아카이브 경로를 정규화합니다.
///
/// 앞의 `/`와 `./`, 빈 컴포넌트와 `.`를 제거하고 `..`는 상위로 접습니다.
/// 루트를 넘어가는 `..`는 버립니다.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// 정규화된 경로를 (디렉토리, 파일명)으로 나눕니다. 최상위 파일의 디렉토리는 빈 문자열입니다.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((dir, base)) => (dir, base),
        None => ("", path),
    }
}

/// 디렉토리와 파일명을 합칩니다.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{dir}/{name}")
    }
}


#[cfg(test)]
mod tests {
    use std::io::SeekFrom;

    use super::testing::*;
    use super::*;

    #[test]
    fn clean_path_normalizes() {
        assert_eq!(clean_path("/etc/os-release"), "etc/os-release");
        assert_eq!(clean_path("./etc/os-release"), "etc/os-release");
        assert_eq!(clean_path("etc//apt/./sources.list"), "etc/apt/sources.list");
        assert_eq!(clean_path("var/lib/../lib/dpkg/"), "var/lib/dpkg");
        assert_eq!(clean_path("../../etc/passwd"), "etc/passwd");
        assert_eq!(clean_path("status"), "status");
    }

    #[test]
    fn split_and_join() {
        assert_eq!(split_path("var/lib/dpkg/status"), ("var/lib/dpkg", "status"));
        assert_eq!(split_path("status"), ("", "status"));
        assert_eq!(join_path("var/lib/dpkg", "status"), "var/lib/dpkg/status");
        assert_eq!(join_path("", "status"), "status");
    }

    #[test]
    fn files_returns_requested_content() {
        let layer = layer(
            'a',
            &[
                ("etc/os-release", "ID=ubuntu\n"),
                ("etc/hostname", "box\n"),
            ],
        );
        let files = layer
            .files(
                &ScanContext::detached(),
                &["/etc/os-release", "etc/lsb-release"],
            )
            .unwrap();

        assert!(!files.is_empty());
        assert_eq!(&files.get("etc/os-release").unwrap()[..], b"ID=ubuntu\n");
        assert!(files.get("etc/lsb-release").is_none());
        assert!(files.get("etc/hostname").is_none());
        assert_eq!(files.found().count(), 1);
    }

    #[test]
    fn files_last_entry_wins() {
        let layer = layer(
            'a',
            &[("etc/os-release", "first"), ("etc/os-release", "second")],
        );
        let files = layer
            .files(&ScanContext::detached(), &["etc/os-release"])
            .unwrap();
        assert_eq!(&files.get("etc/os-release").unwrap()[..], b"second");
    }

    #[test]
    fn files_preserves_request_order() {
        let layer = layer(
            'a',
            &[("etc/lsb-release", "lsb"), ("etc/os-release", "os")],
        );
        let files = layer
            .files(
                &ScanContext::detached(),
                &["etc/os-release", "etc/lsb-release"],
            )
            .unwrap();
        let order: Vec<&str> = files.found().map(|(p, _)| p).collect();
        assert_eq!(order, vec!["etc/os-release", "etc/lsb-release"]);
    }

    #[test]
    fn files_on_garbage_fails() {
        let layer = Layer::from_bytes(digest('b'), 0, vec![0xffu8; 1024]);
        let result = layer.files(&ScanContext::detached(), &["etc/os-release"]);
        assert!(matches!(result, Err(ScanError::Archive(_))));
    }

    #[test]
    fn files_respects_cancellation() {
        let layer = layer('a', &[("etc/os-release", "ID=ubuntu\n")]);
        let ctx = ScanContext::detached();
        ctx.cancel_token().cancel();
        let result = layer.files(&ctx, &["etc/os-release"]);
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[test]
    fn readers_are_independent_and_seekable() {
        let layer = layer('a', &[("a", "1")]);
        let mut first = layer.reader().unwrap();
        let end = first.seek(SeekFrom::End(0)).unwrap();
        assert!(end > 0);

        let mut second = layer.reader().unwrap();
        assert_eq!(second.stream_position().unwrap(), 0);
        first.rewind().unwrap();
        assert_eq!(first.stream_position().unwrap(), 0);
    }

    #[test]
    fn file_backed_layer_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.tar");
        std::fs::write(&path, tar_bytes(&[("etc/lsb-release", "DISTRIB_ID=Ubuntu")])).unwrap();

        let layer = Layer::from_path(digest('c'), 2, &path);
        assert_eq!(layer.ordinal(), 2);
        assert_eq!(layer.path(), Some(path.as_path()));
        let files = layer
            .files(&ScanContext::detached(), &["etc/lsb-release"])
            .unwrap();
        assert_eq!(
            &files.get("etc/lsb-release").unwrap()[..],
            b"DISTRIB_ID=Ubuntu"
        );
    }
}
