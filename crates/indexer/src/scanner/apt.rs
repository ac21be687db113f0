//! apt 저장소 스캐너
//!
//! `etc/apt/sources.list`와 `etc/apt/sources.list.d/*.list`의 one-line 형식
//! `deb` 항목을 저장소로 변환합니다. 컴포넌트마다 저장소 하나가 만들어집니다.
//!
//! ```text
//! deb [arch=amd64 signed-by=/usr/share/keyrings/ubuntu.gpg] http://archive.ubuntu.com/ubuntu jammy main universe
//! ```

use std::collections::BTreeMap;
use std::io::Read;

use tracing::debug;

use layerdex_core::types::{Repository, ScannerKind};

use crate::context::ScanContext;
use crate::error::ScanError;
use crate::layer::{Layer, MAX_PROBE_FILE_SIZE, clean_path, split_path};
use crate::scanner::{Entities, Scanner, run_blocking};

/// 스캐너 이름
pub const NAME: &str = "apt-sources";

/// 스캐너 버전
pub const VERSION: &str = "0.2.0";

const SOURCES_LIST: &str = "etc/apt/sources.list";
const SOURCES_LIST_D: &str = "etc/apt/sources.list.d";

/// apt sources 스캐너
#[derive(Debug, Clone, Default)]
pub struct AptSourcesScanner;

impl Scanner for AptSourcesScanner {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Repository
    }

    async fn scan(&self, ctx: &ScanContext, layer: &Layer) -> Result<Option<Entities>, ScanError> {
        let ctx = ctx.clone();
        let layer = layer.clone();
        run_blocking(move || {
            let _entered = ctx.span().enter();
            let files = read_sources(&ctx, &layer)?;
            if files.is_empty() {
                return Ok(None);
            }
            let mut repos = Vec::new();
            for (path, contents) in &files {
                let found = parse_sources_list(path, contents);
                debug!(layer = %layer.hash(), path = %path, count = found.len(), "parsed apt sources");
                repos.extend(found);
            }
            Ok(Some(Entities::Repositories {
                sources: files.into_keys().collect(),
                repositories: repos,
            }))
        })
        .await
    }
}

fn is_sources_file(path: &str) -> bool {
    if path == SOURCES_LIST {
        return true;
    }
    let (dir, base) = split_path(path);
    dir == SOURCES_LIST_D && base.ends_with(".list")
}

/// sources 파일을 경로 순서로 읽습니다. 같은 경로가 여러 번 나오면 마지막 엔트리가 이깁니다.
fn read_sources(ctx: &ScanContext, layer: &Layer) -> Result<BTreeMap<String, String>, ScanError> {
    let mut files = BTreeMap::new();
    let mut archive = tar::Archive::new(layer.reader()?);
    for entry in archive.entries()? {
        ctx.check()?;
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = clean_path(&entry.path()?.to_string_lossy());
        if !is_sources_file(&path) {
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
        files.insert(path, String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(files)
}

/// one-line 형식 sources.list를 파싱합니다.
///
/// `deb-src`와 형식이 잘못된 줄은 건너뜁니다.
pub fn parse_sources_list(source_path: &str, contents: &str) -> Vec<Repository> {
    let mut repos = Vec::new();

    for line in contents.lines() {
        let line = match line.split_once('#') {
            Some((before, _)) => before,
            None => line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        let mut tokens = line.split_whitespace().peekable();
        if tokens.next() != Some("deb") {
            continue;
        }

        let mut key = None;
        if tokens.peek().is_some_and(|t| t.starts_with('[')) {
            let mut options = Vec::new();
            for token in tokens.by_ref() {
                let done = token.ends_with(']');
                options.push(token.trim_start_matches('[').trim_end_matches(']'));
                if done {
                    break;
                }
            }
            key = options
                .iter()
                .find_map(|opt| opt.strip_prefix("signed-by="))
                .filter(|v| !v.is_empty())
                .map(str::to_owned);
        }

        let (Some(uri), Some(suite)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let components: Vec<&str> = tokens.collect();

        let repo = |name: String| Repository {
            name,
            uri: uri.to_owned(),
            key: key.clone(),
            source_path: source_path.to_owned(),
        };
        if components.is_empty() {
            repos.push(repo(suite.to_owned()));
        } else {
            repos.extend(components.iter().map(|c| repo(format!("{suite}/{c}"))));
        }
    }

    repos
}
