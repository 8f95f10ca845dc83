//! 플러그인 레지스트리 — 카탈로그 조회, 로드, 정지
//!
//! [`PluginCatalog`]은 `kind` 이름을 플러그인 생성 함수로 매핑하는 정적 팩토리 표이고,
//! [`PluginRegistry`]는 로드에 성공한 플러그인 핸들을 등록 순서대로 소유합니다.
//!
//! 로드 단계가 끝나면 레지스트리는 `Arc`로 고정되어 디스패처와 팬아웃이
//! 읽기 전용으로 공유합니다.
//!
//! # 사용 예시
//! ```ignore
//! let catalog = PluginCatalog::new().with("log_sink", |cfg| Ok(Box::new(LogSink::from_config(cfg)?)));
//!
//! let mut registry = PluginRegistry::new();
//! registry.load(&catalog, &PluginConfig::new("sink", "log_sink"), &ingress).await?;
//!
//! // ... 실행 중 ...
//!
//! let report = registry.halt_all(None).await;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::PluginConfig;
use crate::error::{LoadError, PluginError};
use crate::ingress::IngressHandle;
use crate::plugin::{Capabilities, DynPlugin};

// ─── PluginCatalog ───────────────────────────────────────────────────

/// 플러그인 생성 함수
///
/// 설정을 받아 아직 초기화되지 않은 플러그인 인스턴스를 만듭니다.
pub type PluginFactory =
    Arc<dyn Fn(&PluginConfig) -> Result<Box<dyn DynPlugin>, PluginError> + Send + Sync>;

/// `kind` → 팩토리 표
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginCatalog {
    /// 빈 카탈로그를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 팩토리를 등록합니다. 같은 `kind`가 있으면 교체합니다.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&PluginConfig) -> Result<Box<dyn DynPlugin>, PluginError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    /// 빌더 형태로 팩토리를 등록합니다.
    pub fn with<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginConfig) -> Result<Box<dyn DynPlugin>, PluginError> + Send + Sync + 'static,
    {
        self.register(kind, factory);
        self
    }

    /// 설정의 `kind`로 플러그인 인스턴스를 생성합니다.
    pub fn resolve(&self, config: &PluginConfig) -> Result<Box<dyn DynPlugin>, LoadError> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| LoadError::UnknownKind {
                name: config.name.clone(),
                kind: config.kind.clone(),
            })?;
        factory(config).map_err(|e| LoadError::Construct {
            name: config.name.clone(),
            reason: e.to_string(),
        })
    }

    /// 등록된 `kind` 목록 (정렬됨)
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// `kind`가 등록되어 있는지 확인합니다.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("kinds", &self.kinds())
            .finish()
    }
}

// ─── PluginHandle ────────────────────────────────────────────────────

/// 로드된 플러그인 하나
///
/// capability는 로드 시점에 한 번 기록됩니다.
#[derive(Clone)]
pub struct PluginHandle {
    name: Arc<str>,
    kind: String,
    capabilities: Capabilities,
    plugin: Arc<dyn DynPlugin>,
}

impl PluginHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub(crate) fn plugin(&self) -> Arc<dyn DynPlugin> {
        Arc::clone(&self.plugin)
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// 상태 조회용 플러그인 요약
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub kind: String,
    pub capabilities: Capabilities,
}

/// `halt_all` 결과
#[derive(Debug, Default)]
pub struct HaltReport {
    /// 정상 정지한 플러그인
    pub halted: Vec<String>,
    /// 실패(에러, 패닉, 시간 초과)한 플러그인과 사유
    pub failed: Vec<(String, String)>,
}

impl HaltReport {
    /// 모든 플러그인이 정상 정지했는지 확인합니다.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ─── PluginRegistry ──────────────────────────────────────────────────

/// 플러그인 레지스트리
///
/// 등록 순서 = 로드 순서 = 설정 선언 순서이며, 이 순서가 미들웨어 적용 순서입니다.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginHandle>,
}

impl PluginRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 카탈로그에서 플러그인을 생성하고 초기화한 뒤 등록합니다.
    ///
    /// `init`이 실패하면 플러그인은 등록되지 않고 폐기됩니다.
    pub async fn load(
        &mut self,
        catalog: &PluginCatalog,
        config: &PluginConfig,
        ingress: &IngressHandle,
    ) -> Result<Capabilities, LoadError> {
        self.ensure_unique(&config.name)?;
        let plugin = catalog.resolve(config)?;
        self.load_instance(config, plugin, ingress).await
    }

    /// 이미 생성된 플러그인 인스턴스를 초기화하고 등록합니다.
    pub async fn load_instance(
        &mut self,
        config: &PluginConfig,
        mut plugin: Box<dyn DynPlugin>,
        ingress: &IngressHandle,
    ) -> Result<Capabilities, LoadError> {
        self.ensure_unique(&config.name)?;

        plugin
            .init(config, ingress.clone())
            .await
            .map_err(|source| LoadError::InitFailed {
                name: config.name.clone(),
                source,
            })?;

        let capabilities = plugin.capabilities();
        debug!(
            plugin = %config.name,
            kind = %config.kind,
            capabilities = %capabilities,
            "plugin initialized"
        );

        self.plugins.push(PluginHandle {
            name: Arc::from(config.name.as_str()),
            kind: config.kind.clone(),
            capabilities,
            plugin: Arc::from(plugin),
        });
        Ok(capabilities)
    }

    fn ensure_unique(&self, name: &str) -> Result<(), LoadError> {
        if self.plugins.iter().any(|p| p.name() == name) {
            return Err(LoadError::DuplicateName {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// 이름으로 플러그인을 조회합니다.
    pub fn get(&self, name: &str) -> Option<&PluginHandle> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    /// 등록 순서대로 모든 플러그인
    pub fn iter(&self) -> impl Iterator<Item = &PluginHandle> {
        self.plugins.iter()
    }

    /// 주어진 capability를 가진 플러그인을 등록 순서대로 반환합니다.
    pub fn with_capability(&self, capability: Capabilities) -> impl Iterator<Item = &PluginHandle> {
        self.plugins
            .iter()
            .filter(move |p| p.capabilities.contains(capability))
    }

    /// 등록된 플러그인 수를 반환합니다.
    pub fn count(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// 등록된 플러그인 이름 목록
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(PluginHandle::name).collect()
    }

    /// 상태 조회용 요약
    pub fn summaries(&self) -> Vec<PluginSummary> {
        self.plugins
            .iter()
            .map(|p| PluginSummary {
                name: p.name.to_string(),
                kind: p.kind.clone(),
                capabilities: p.capabilities,
            })
            .collect()
    }

    /// 모든 플러그인의 `halt`를 동시에 호출하고 전부 반환할 때까지 기다립니다.
    ///
    /// `timeout`이 주어지면 각 호출은 그 시간 안에 끝나야 하며, 초과한 플러그인은
    /// 실패로 기록됩니다. 개별 실패(에러, 패닉 포함)는 나머지 정지를 막지 않습니다.
    pub async fn halt_all(&self, timeout: Option<Duration>) -> HaltReport {
        let tasks: Vec<_> = self
            .plugins
            .iter()
            .map(|handle| {
                let name = handle.shared_name();
                let plugin = handle.plugin();
                let task = tokio::spawn(async move {
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, plugin.halt())
                            .await
                            .unwrap_or_else(|_| {
                                Err(PluginError::Halt(format!(
                                    "timed out after {}s",
                                    limit.as_secs_f64()
                                )))
                            }),
                        None => plugin.halt().await,
                    }
                });
                (name, task)
            })
            .collect();

        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        let mut report = HaltReport::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => {
                    debug!(plugin = %name, "plugin halted");
                    report.halted.push(name.to_string());
                }
                Ok(Err(e)) => {
                    warn!(plugin = %name, error = %e, "plugin halt failed");
                    report.failed.push((name.to_string(), e.to_string()));
                }
                Err(join_err) => {
                    error!(plugin = %name, error = %join_err, "plugin halt task panicked");
                    report.failed.push((name.to_string(), join_err.to_string()));
                }
            }
        }

        info!(
            halted = report.halted.len(),
            failed = report.failed.len(),
            "all plugins halted"
        );
        report
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
