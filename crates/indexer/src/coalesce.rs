//! 레이어별 findings 병합: overlay(union mount) 규칙
//!
//! 레이어는 매니페스트 순서(아래 → 위)로 병합합니다.
//!
//! - 패키지: provenance 경로(`package_db`)별로 묶습니다. 뒤 레이어가 어떤 경로를
//!   읽었으면 그 경로의 이전 집합을 통째로 대체합니다. 패키지가 0개여도 마찬가지라서
//!   비워진 DB는 이전 패키지를 지웁니다. 다른 경로는 유지됩니다.
//! - 저장소: `source_path`별로 같은 규칙을 적용합니다.
//! - 경로 목록은 findings의 `sources`와 엔티티의 provenance 경로를 합친 것입니다.
//! - 배포판: absent가 아니고 비어 있지 않은 마지막 레이어의 결과입니다.
//! - 같은 경로 안의 중복(이름, 버전, 종류, 아키텍처가 같음)은 하나로 합칩니다.
//!
//! 경로를 건드리지 않은 레이어는 집합을 바꾸지 않으므로 1, 3번 레이어만 같은
//! 경로를 가지면 3번 레이어의 집합이 남습니다.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use layerdex_core::report::{Environment, IndexReport, LayerStatus};
use layerdex_core::types::{Digest, Distribution, Package, Repository, ScannerKind};

use crate::runner::LayerScanOutput;

/// 한 provenance 경로의 현재 패키지 집합
#[derive(Debug, Default)]
struct PackageSet {
    packages: Vec<Package>,
    introduced: HashMap<String, Digest>,
}

/// overlay 병합기
///
/// [`Coalescer::push`]는 매니페스트 순서대로 호출해야 합니다.
#[derive(Debug, Default)]
pub struct Coalescer {
    packages: BTreeMap<String, PackageSet>,
    repositories: BTreeMap<String, Vec<Repository>>,
    distributions: Vec<Distribution>,
    layers: Vec<LayerStatus>,
}

impl Coalescer {
    /// 빈 병합기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 레이어의 결과를 병합합니다.
    pub fn push(&mut self, output: &LayerScanOutput) {
        let mut packages: BTreeMap<&str, Vec<&Package>> = BTreeMap::new();
        let mut repositories: BTreeMap<&str, Vec<&Repository>> = BTreeMap::new();
        let mut distributions: Vec<&Distribution> = Vec::new();

        for findings in &output.findings {
            if findings.absent {
                continue;
            }
            for path in &findings.sources {
                match findings.scanner.kind {
                    ScannerKind::Package => {
                        packages.entry(path.as_str()).or_default();
                    }
                    ScannerKind::Repository => {
                        repositories.entry(path.as_str()).or_default();
                    }
                    ScannerKind::Distribution => {}
                }
            }
            for pkg in &findings.packages {
                packages.entry(pkg.package_db.as_str()).or_default().push(pkg);
            }
            for repo in &findings.repositories {
                repositories
                    .entry(repo.source_path.as_str())
                    .or_default()
                    .push(repo);
            }
            if findings.scanner.kind == ScannerKind::Distribution {
                distributions.extend(&findings.distributions);
            }
        }

        for (path, found) in packages {
            let previous = self.packages.remove(path).unwrap_or_default();
            let mut next = PackageSet::default();
            let mut seen = HashSet::new();
            for pkg in found {
                let key = pkg.key();
                if !seen.insert(key.clone()) {
                    continue;
                }
                let introduced = previous
                    .introduced
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| output.layer.clone());
                next.introduced.insert(key, introduced);
                next.packages.push(pkg.clone());
            }
            debug!(
                layer = %output.layer,
                path,
                previous = previous.packages.len(),
                current = next.packages.len(),
                "package database replaced"
            );
            self.packages.insert(path.to_owned(), next);
        }

        for (path, found) in repositories {
            let mut seen = HashSet::new();
            let set: Vec<Repository> = found
                .into_iter()
                .filter(|r| seen.insert((r.name.as_str(), r.uri.as_str(), r.key.as_deref())))
                .cloned()
                .collect();
            self.repositories.insert(path.to_owned(), set);
        }

        if !distributions.is_empty() {
            let mut unique: Vec<Distribution> = Vec::new();
            for dist in distributions {
                if !unique.contains(dist) {
                    unique.push(dist.clone());
                }
            }
            self.distributions = unique;
        }

        self.layers.push(output.status());
    }

    /// 병합 결과를 리포트에 기록합니다.
    ///
    /// 상태 필드(`state`, `success`)는 건드리지 않습니다.
    pub fn finish(self, report: &mut IndexReport) {
        let distribution = (!self.distributions.is_empty()).then_some(0);

        report.packages.clear();
        report.environments.clear();
        for (path, set) in self.packages {
            for pkg in set.packages {
                let key = pkg.key();
                if let Some(introduced_in) = set.introduced.get(&key) {
                    report.environments.insert(
                        key,
                        Environment {
                            package_db: path.clone(),
                            introduced_in: introduced_in.clone(),
                            distribution,
                        },
                    );
                }
                report.packages.push(pkg);
            }
        }

        report.repositories = self.repositories.into_values().flatten().collect();
        report.distributions = self.distributions;
        report.layers = self.layers;
    }
}

/// 레이어 결과를 순서대로 정렬해서 병합합니다.
pub fn coalesce(report: &mut IndexReport, outputs: &mut [LayerScanOutput]) {
    outputs.sort_by_key(|o| o.ordinal);
    let mut coalescer = Coalescer::new();
    for output in outputs.iter() {
        coalescer.push(output);
    }
    coalescer.finish(report);
}
