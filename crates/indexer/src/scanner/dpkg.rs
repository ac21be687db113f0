//! dpkg 패키지 DB 스캐너
//!
//! 레이어에서 dpkg 데이터베이스를 찾아 설치된 바이너리 패키지를 추출합니다.
//!
//! # 동작
//!
//! 1. **탐색**: 모든 엔트리를 훑어 `status`와 `available` 파일이 함께 있는
//!    디렉토리만 데이터베이스로 인정합니다.
//! 2. **추출**: 데이터베이스마다 (정렬 순서로) 아카이브를 다시 열어
//!    `<dir>/status`를 읽고 파싱합니다.
//! 3. **fingerprint**: 다시 한 번 열어 `<dir>/info/<name>[:<arch>].md5sums` 파일의
//!    MD5를 해당 패키지의 `repository_hint`로 기록합니다.

use std::collections::BTreeMap;
use std::io::Read;

use md5::{Digest as _, Md5};
use serde::Deserialize;
use tracing::{debug, warn};

use layerdex_core::types::{Package, ScannerKind};

use crate::context::ScanContext;
use crate::error::ScanError;
use crate::layer::{Layer, clean_path, join_path, split_path};
use crate::scanner::{Entities, Scanner, run_blocking};

/// 스캐너 이름
pub const NAME: &str = "dpkg";

/// 스캐너 버전
pub const VERSION: &str = "0.3.0";

/// status 파일 기본 최대 크기 (64MB)
pub const DEFAULT_MAX_DATABASE_SIZE: u64 = 64 * 1024 * 1024;

const MD5SUMS_SUFFIX: &str = ".md5sums";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DpkgConfig {
    max_database_size: u64,
}

impl Default for DpkgConfig {
    fn default() -> Self {
        Self {
            max_database_size: DEFAULT_MAX_DATABASE_SIZE,
        }
    }
}

/// dpkg 패키지 스캐너
#[derive(Debug, Clone)]
pub struct DpkgScanner {
    max_database_size: u64,
}

impl DpkgScanner {
    /// 기본 설정으로 생성합니다.
    pub fn new() -> Self {
        Self {
            max_database_size: DEFAULT_MAX_DATABASE_SIZE,
        }
    }

    /// status 파일 최대 크기
    pub fn max_database_size(&self) -> u64 {
        self.max_database_size
    }
}

impl Default for DpkgScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for DpkgScanner {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Package
    }

    fn configure(&mut self, payload: &[u8]) -> Result<(), ScanError> {
        let config: DpkgConfig =
            serde_json::from_slice(payload).map_err(|e| ScanError::Config {
                scanner: NAME.to_owned(),
                reason: e.to_string(),
            })?;
        if config.max_database_size == 0 {
            return Err(ScanError::Config {
                scanner: NAME.to_owned(),
                reason: "max_database_size must be greater than 0".to_owned(),
            });
        }
        self.max_database_size = config.max_database_size;
        Ok(())
    }

    async fn scan(&self, ctx: &ScanContext, layer: &Layer) -> Result<Option<Entities>, ScanError> {
        let ctx = ctx.clone();
        let layer = layer.clone();
        let max = self.max_database_size;
        run_blocking(move || {
            let _entered = ctx.span().enter();
            scan_layer(&ctx, &layer, max)
        })
        .await
    }
}

/// 레이어의 모든 패키지 DB를 읽습니다. 패키지가 0개인 DB도 `sources`에 남습니다.
fn scan_layer(
    ctx: &ScanContext,
    layer: &Layer,
    max_database_size: u64,
) -> Result<Option<Entities>, ScanError> {
    let databases = locate_databases(ctx, layer)?;
    debug!(layer = %layer.hash(), count = databases.len(), "scanned for possible databases");
    if databases.is_empty() {
        return Ok(None);
    }

    let mut sources = Vec::with_capacity(databases.len());
    let mut packages = Vec::new();
    for dir in &databases {
        let db_path = join_path(dir, "status");
        debug!(database = %db_path, "examining package database");

        let Some(contents) = read_status(ctx, layer, &db_path, max_database_size)? else {
            debug!(database = %db_path, "archive ended before status file");
            return Ok(None);
        };

        let mut found = parse_status(&db_path, &contents);
        attach_hints(ctx, layer, dir, &mut found)?;
        debug!(database = %db_path, count = found.len(), "found packages");
        packages.extend(found);
        sources.push(db_path);
    }

    Ok(Some(Entities::Packages { sources, packages }))
}

/// `status`와 `available`이 모두 있는 디렉토리를 정렬 순서로 반환합니다.
fn locate_databases(ctx: &ScanContext, layer: &Layer) -> Result<Vec<String>, ScanError> {
    // (status 있음, available 있음)
    let mut seen: BTreeMap<String, (bool, bool)> = BTreeMap::new();

    let mut archive = tar::Archive::new(layer.reader()?);
    for entry in archive.entries()? {
        ctx.check()?;
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = clean_path(&entry.path()?.to_string_lossy());
        let (dir, base) = split_path(&path);
        match base {
            "status" => seen.entry(dir.to_owned()).or_default().0 = true,
            "available" => seen.entry(dir.to_owned()).or_default().1 = true,
            _ => {}
        }
    }

    Ok(seen
        .into_iter()
        .filter(|(_, (status, available))| *status && *available)
        .map(|(dir, _)| dir)
        .collect())
}

/// status 파일을 읽습니다.
///
/// 탐색 이후 아카이브가 바뀌어 파일을 만나기 전에 끝나거나(정상 종료, 잘린 헤더)
/// 파일 내용 중간에서 끊기면 `Ok(None)`입니다. 엔트리를 찾았는데 읽을 수 없을
/// 때만 불변 조건 위반입니다.
fn read_status(
    ctx: &ScanContext,
    layer: &Layer,
    db_path: &str,
    max: u64,
) -> Result<Option<String>, ScanError> {
    let mut archive = tar::Archive::new(layer.reader()?);
    for entry in archive.entries()? {
        ctx.check()?;
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(database = %db_path, error = %e, "archive truncated before status file");
                return Ok(None);
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        if clean_path(&entry.path()?.to_string_lossy()) != db_path {
            continue;
        }

        let size = entry.size();
        if size > max {
            return Err(ScanError::TooLarge {
                path: db_path.to_owned(),
                size,
                max,
            });
        }
        let mut buf = Vec::with_capacity(size as usize);
        if let Err(e) = entry.read_to_end(&mut buf) {
            return Err(ScanError::Invariant(format!(
                "{db_path} was located but could not be read: {e}"
            )));
        }
        if (buf.len() as u64) < size {
            debug!(database = %db_path, size, read = buf.len(), "status file truncated");
            return Ok(None);
        }
        return Ok(Some(String::from_utf8_lossy(&buf).into_owned()));
    }

    Ok(None)
}

/// md5sums 파일의 MD5를 패키지의 `repository_hint`로 기록합니다.
///
/// 파일명에 아키텍처가 있으면 같은 아키텍처 패키지를 우선하고, 없으면 이름만으로 맞춥니다.
fn attach_hints(
    ctx: &ScanContext,
    layer: &Layer,
    db_dir: &str,
    packages: &mut [Package],
) -> Result<(), ScanError> {
    let info_dir = join_path(db_dir, "info");

    let mut archive = tar::Archive::new(layer.reader()?);
    for entry in archive.entries()? {
        ctx.check()?;
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "stopped reading package metadata");
                break;
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = clean_path(&entry.path()?.to_string_lossy());
        let (dir, base) = split_path(&path);
        if dir != info_dir {
            continue;
        }
        let Some(stem) = base.strip_suffix(MD5SUMS_SUFFIX) else {
            continue;
        };
        let (name, arch) = match stem.split_once(':') {
            Some((name, arch)) => (name, Some(arch)),
            None => (stem, None),
        };

        let targets = match_packages(packages, name, arch);
        if targets.is_empty() {
            debug!(package = name, "extra metadata found, ignoring");
            continue;
        }

        let mut buf = Vec::new();
        if let Err(e) = entry.read_to_end(&mut buf) {
            warn!(package = name, error = %e, "unable to read package metadata");
            continue;
        }
        let hint = hex::encode(Md5::digest(&buf));
        for i in targets {
            packages[i].repository_hint = Some(hint.clone());
        }
    }
    Ok(())
}

fn match_packages(packages: &[Package], name: &str, arch: Option<&str>) -> Vec<usize> {
    let by_name = || {
        packages
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.name == name)
    };
    if let Some(arch) = arch {
        let exact: Vec<usize> = by_name()
            .filter(|(_, p)| p.arch == arch)
            .map(|(i, _)| i)
            .collect();
        if !exact.is_empty() {
            return exact;
        }
    }
    by_name().map(|(i, _)| i).collect()
}

/// dpkg status 파일을 파싱합니다.
///
/// `Package`, `Version`, `Architecture`, `Source`, `Status` 필드만 사용합니다.
/// `Package`가 없는 stanza와 설치 상태가 아닌 패키지는 건너뜁니다.
/// 소스 패키지 버전은 `Source: name (version)` 형식이면 괄호 안 버전을,
/// 아니면 바이너리 버전을 사용합니다.
pub fn parse_status(db_path: &str, contents: &str) -> Vec<Package> {
    let mut packages = Vec::new();
    let mut stanza = Stanza::default();

    for line in contents.lines() {
        if line.trim().is_empty() {
            if let Some(pkg) = stanza.finish(db_path) {
                packages.push(pkg);
            }
            continue;
        }
        if line.starts_with([' ', '\t']) {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_owned();
        match key.trim().to_ascii_lowercase().as_str() {
            "package" => stanza.package = Some(value),
            "version" => stanza.version = Some(value),
            "architecture" => stanza.architecture = Some(value),
            "source" => stanza.source = Some(value),
            "status" => stanza.status = Some(value),
            _ => {}
        }
    }
    if let Some(pkg) = stanza.finish(db_path) {
        packages.push(pkg);
    }

    packages
}

#[derive(Default)]
struct Stanza {
    package: Option<String>,
    version: Option<String>,
    architecture: Option<String>,
    source: Option<String>,
    status: Option<String>,
}

impl Stanza {
    /// 현재 stanza를 패키지로 만들고 상태를 초기화합니다.
    fn finish(&mut self, db_path: &str) -> Option<Package> {
        let stanza = std::mem::take(self);
        let name = stanza.package.filter(|n| !n.is_empty())?;

        let installed = stanza
            .status
            .as_deref()
            .is_none_or(|s| s.split_whitespace().last() == Some("installed"));
        if !installed {
            return None;
        }

        let version = stanza.version.unwrap_or_default();
        let mut pkg = Package::binary(
            name,
            version.clone(),
            stanza.architecture.unwrap_or_default(),
            db_path,
        );

        if let Some(source) = stanza.source.filter(|s| !s.is_empty()) {
            let (src_name, src_version) = match source.split_once('(') {
                Some((n, v)) => (n.trim().to_owned(), v.trim_end_matches(')').trim().to_owned()),
                None => (source.trim().to_owned(), version),
            };
            pkg.source = Some(Box::new(Package::source(src_name, src_version, db_path)));
        }

        Some(pkg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::testing::{digest, layer, tar_bytes};
    use layerdex_core::types::PackageKind;

    const STATUS: &str = "\
Package: foo
Status: install ok installed
Architecture: amd64
Version: 1.0
Description: a package
 with a long description
 .
 and more

Package: libbar1
Status: install ok installed
Architecture: amd64
Source: bar
Version: 2.3-1

Package: baz-utils
Status: install ok installed
Architecture: all
Source: baz (4.5-2)
Version: 4.5-2+b1

Package: gone
Status: deinstall ok config-files
Architecture: amd64
Version: 0.9

Version: 1.2
Architecture: amd64
";

    fn packages(result: Option<Entities>) -> Vec<Package> {
        match result {
            Some(Entities::Packages { packages, .. }) => packages,
            other => panic!("expected packages, got {other:?}"),
        }
    }

    #[test]
    fn parse_status_extracts_installed_packages() {
        let pkgs = parse_status("var/lib/dpkg/status", STATUS);
        let names: Vec<&str> = pkgs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "libbar1", "baz-utils"]);

        let foo = &pkgs[0];
        assert_eq!(foo.version, "1.0");
        assert_eq!(foo.arch, "amd64");
        assert_eq!(foo.kind, PackageKind::Binary);
        assert_eq!(foo.package_db, "var/lib/dpkg/status");
        assert!(foo.source.is_none());
    }

    #[test]
    fn parse_status_synthesizes_source_with_binary_version() {
        let pkgs = parse_status("var/lib/dpkg/status", STATUS);
        let src = pkgs[1].source.as_deref().unwrap();
        assert_eq!(src.name, "bar");
        assert_eq!(src.version, "2.3-1");
        assert_eq!(src.kind, PackageKind::Source);
        assert_eq!(src.package_db, "var/lib/dpkg/status");
        assert!(src.arch.is_empty());
    }

    #[test]
    fn parse_status_honors_parenthesized_source_version() {
        let pkgs = parse_status("var/lib/dpkg/status", STATUS);
        let src = pkgs[2].source.as_deref().unwrap();
        assert_eq!(src.name, "baz");
        assert_eq!(src.version, "4.5-2");
    }

    #[test]
    fn parse_status_handles_crlf_and_no_trailing_newline() {
        let pkgs = parse_status("s", "Package: a\r\nVersion: 1\r\n\r\nPackage: b\r\nVersion: 2");
        assert_eq!(pkgs.len(), 2);
        assert_eq!(pkgs[0].version, "1");
        assert_eq!(pkgs[1].name, "b");
    }

    #[test]
    fn parse_status_empty_input() {
        assert!(parse_status("s", "").is_empty());
        assert!(parse_status("s", "\n\n\n").is_empty());
    }

    #[tokio::test]
    async fn round_trip_single_package() {
        let layer = layer(
            'a',
            &[
                ("var/lib/dpkg/status", "Package: foo\nVersion: 1.0\nArchitecture: amd64\n"),
                ("var/lib/dpkg/available", ""),
            ],
        );
        let result = DpkgScanner::new()
            .scan(&ScanContext::detached(), &layer)
            .await
            .unwrap();
        let pkgs = packages(result);
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].name, "foo");
        assert_eq!(pkgs[0].version, "1.0");
        assert_eq!(pkgs[0].arch, "amd64");
        assert_eq!(pkgs[0].kind, PackageKind::Binary);
        assert_eq!(pkgs[0].package_db, "var/lib/dpkg/status");
    }

    #[tokio::test]
    async fn requires_both_files_in_same_directory() {
        let layer = layer(
            'a',
            &[
                ("var/lib/dpkg/status", "Package: foo\nVersion: 1.0\n"),
                ("var/lib/other/available", ""),
            ],
        );
        let result = DpkgScanner::new()
            .scan(&ScanContext::detached(), &layer)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn duplicate_status_entries_do_not_count_twice() {
        let layer = layer(
            'a',
            &[
                ("var/lib/dpkg/status", "Package: foo\nVersion: 1.0\n"),
                ("var/lib/dpkg/status", "Package: foo\nVersion: 1.1\n"),
            ],
        );
        let result = DpkgScanner::new()
            .scan(&ScanContext::detached(), &layer)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn empty_status_is_present_but_empty() {
        let layer = layer(
            'a',
            &[("var/lib/dpkg/status", ""), ("var/lib/dpkg/available", "")],
        );
        let result = DpkgScanner::new()
            .scan(&ScanContext::detached(), &layer)
            .await
            .unwrap();
        assert_eq!(
            result,
            Some(Entities::Packages {
                sources: vec!["var/lib/dpkg/status".to_owned()],
                packages: vec![],
            })
        );
    }

    #[tokio::test]
    async fn database_without_installed_packages_is_still_a_source() {
        let layer = layer(
            'a',
            &[
                ("var/lib/dpkg/status", "Package: gone\nStatus: deinstall ok config-files\n"),
                ("var/lib/dpkg/available", ""),
                ("opt/dpkg/status", "Package: kept\nVersion: 1\n"),
                ("opt/dpkg/available", ""),
            ],
        );
        let result = DpkgScanner::new()
            .scan(&ScanContext::detached(), &layer)
            .await
            .unwrap();
        match result {
            Some(Entities::Packages { sources, packages }) => {
                assert_eq!(sources, vec!["opt/dpkg/status", "var/lib/dpkg/status"]);
                assert_eq!(packages.len(), 1);
                assert_eq!(packages[0].name, "kept");
            }
            other => panic!("expected packages, got {other:?}"),
        }
    }

    #[test]
    fn status_missing_after_rewrite_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.tar");
        std::fs::write(
            &path,
            tar_bytes(&[
                ("var/lib/dpkg/status", "Package: foo\nVersion: 1.0\n"),
                ("var/lib/dpkg/available", ""),
            ]),
        )
        .unwrap();
        let layer = Layer::from_path(digest('a'), 0, &path);
        let ctx = ScanContext::detached();

        assert_eq!(locate_databases(&ctx, &layer).unwrap(), vec!["var/lib/dpkg"]);

        // 두 번째 패스 전에 파일이 바뀜
        std::fs::write(&path, tar_bytes(&[("var/lib/dpkg/available", "")])).unwrap();
        let status = read_status(&ctx, &layer, "var/lib/dpkg/status", DEFAULT_MAX_DATABASE_SIZE);
        assert!(matches!(status, Ok(None)), "{status:?}");
    }

    #[test]
    fn truncated_archive_is_absent() {
        let big = "x".repeat(4096);
        let full = tar_bytes(&[
            ("var/lib/dpkg/available", ""),
            ("usr/share/doc/big", big.as_str()),
            ("var/lib/dpkg/status", "Package: foo\nVersion: 1.0\n"),
        ]);
        let ctx = ScanContext::detached();

        // 1) 앞 엔트리 데이터 중간, 2) status 헤더 중간, 3) status 내용 중간
        let status_header = 512 + 512 + 4096;
        for cut in [2048, status_header + 100, status_header + 512 + 4] {
            let layer = Layer::from_bytes(digest('a'), 0, full[..cut].to_vec());
            let status = read_status(&ctx, &layer, "var/lib/dpkg/status", DEFAULT_MAX_DATABASE_SIZE);
            assert!(matches!(status, Ok(None)), "cut at {cut}: {status:?}");
        }

        let layer = Layer::from_bytes(digest('a'), 0, full);
        let status = read_status(&ctx, &layer, "var/lib/dpkg/status", DEFAULT_MAX_DATABASE_SIZE)
            .unwrap()
            .unwrap();
        assert!(status.starts_with("Package: foo"));
    }

    #[tokio::test]
    async fn md5sums_sets_repository_hint() {
        let md5sums = "d41d8cd98f00b204e9800998ecf8427e  usr/bin/foo\n";
        let layer = layer(
            'a',
            &[
                (
                    "var/lib/dpkg/status",
                    "Package: foo\nVersion: 1.0\nArchitecture: amd64\n",
                ),
                ("var/lib/dpkg/available", ""),
                ("var/lib/dpkg/info/foo:amd64.md5sums", md5sums),
                ("var/lib/dpkg/info/unknown.md5sums", "ignored"),
                ("var/lib/dpkg/info/foo.list", "/usr/bin/foo\n"),
            ],
        );
        let pkgs = packages(
            DpkgScanner::new()
                .scan(&ScanContext::detached(), &layer)
                .await
                .unwrap(),
        );
        assert_eq!(pkgs.len(), 1);
        let expected = hex::encode(Md5::digest(md5sums.as_bytes()));
        assert_eq!(pkgs[0].repository_hint.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn md5sums_prefers_matching_arch() {
        let status = "\
Package: libc6
Version: 2.35
Architecture: amd64

Package: libc6
Version: 2.35
Architecture: i386
";
        let layer = layer(
            'a',
            &[
                ("var/lib/dpkg/status", status),
                ("var/lib/dpkg/available", ""),
                ("var/lib/dpkg/info/libc6:i386.md5sums", "i386 sums"),
            ],
        );
        let pkgs = packages(
            DpkgScanner::new()
                .scan(&ScanContext::detached(), &layer)
                .await
                .unwrap(),
        );
        assert_eq!(pkgs.len(), 2);
        assert!(pkgs[0].repository_hint.is_none());
        assert_eq!(
            pkgs[1].repository_hint.as_deref(),
            Some(hex::encode(Md5::digest(b"i386 sums")).as_str())
        );
    }

    #[tokio::test]
    async fn databases_are_processed_in_sorted_order() {
        let layer = layer(
            'a',
            &[
                ("var/lib/dpkg/status", "Package: second\nVersion: 1\n"),
                ("var/lib/dpkg/available", ""),
                ("opt/dpkg/status", "Package: first\nVersion: 1\n"),
                ("opt/dpkg/available", ""),
            ],
        );
        let pkgs = packages(
            DpkgScanner::new()
                .scan(&ScanContext::detached(), &layer)
                .await
                .unwrap(),
        );
        let dbs: Vec<&str> = pkgs.iter().map(|p| p.package_db.as_str()).collect();
        assert_eq!(dbs, vec!["opt/dpkg/status", "var/lib/dpkg/status"]);
    }

    #[tokio::test]
    async fn oversized_status_is_rejected() {
        let mut scanner = DpkgScanner::new();
        scanner.configure(br#"{"max_database_size": 8}"#).unwrap();
        assert_eq!(scanner.max_database_size(), 8);

        let layer = layer(
            'a',
            &[
                ("var/lib/dpkg/status", "Package: foo\nVersion: 1.0\n"),
                ("var/lib/dpkg/available", ""),
            ],
        );
        let err = scanner
            .scan(&ScanContext::detached(), &layer)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::TooLarge { max: 8, .. }));
    }

    #[test]
    fn configure_rejects_bad_payloads() {
        let mut scanner = DpkgScanner::new();
        assert!(scanner.configure(b"not json").is_err());
        assert!(scanner.configure(br#"{"max_database_size": 0}"#).is_err());
        assert!(scanner.configure(br#"{"unknown": 1}"#).is_err());
        scanner.configure(b"{}").unwrap();
        assert_eq!(scanner.max_database_size(), DEFAULT_MAX_DATABASE_SIZE);
    }

    #[tokio::test]
    async fn cancelled_scan_returns_cancelled() {
        let layer = layer(
            'a',
            &[
                ("var/lib/dpkg/status", "Package: foo\n"),
                ("var/lib/dpkg/available", ""),
            ],
        );
        let ctx = ScanContext::detached();
        ctx.cancel_token().cancel();
        let err = DpkgScanner::new().scan(&ctx, &layer).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
