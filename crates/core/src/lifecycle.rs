//! 생명주기 컨트롤러 — 순서 있는 시작, 합류하는 종료
//!
//! # 상태 전환
//! ```text
//! Unstarted → Loading → Running → Halting → Halted
//! ```
//!
//! - `Loading`: 선언 순서대로 한 번에 하나씩 `init`. 개별 실패는 허용됩니다.
//! - `Running`: 디스패처 루프가 돌고 `emit_event`를 받습니다.
//! - `Halting`: 수신 큐를 닫고 디스패처가 남은 이벤트를 처리하게 한 뒤,
//!   진행 중인 전달을 기다리고 모든 플러그인의 `halt`를 동시에 호출합니다.
//! - `Halted`: 모든 `halt`가 반환된 뒤에만 도달합니다.
//!
//! # 사용 예시
//! ```ignore
//! let mut manager = PluginManager::new(config.pipeline.clone());
//! manager.load_all(&catalog, &config.effective_plugins()).await?;
//! manager.start()?;
//!
//! manager.emit_event(event).await?;
//!
//! let report = manager.halt().await?;
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{PipelineConfig, PluginConfig, UndeliveredPolicy};
use crate::dispatcher::{DispatchOutcome, Dispatcher, IngressPath};
use crate::error::{LifecycleError, LoadError, SinkholeError};
use crate::event::Event;
use crate::ingress::{IngressHandle, IngressReceiver, ingress_channel};
use crate::metrics as m;
use crate::plugin::{Capabilities, DynPlugin};
use crate::registry::{HaltReport, PluginCatalog, PluginRegistry, PluginSummary};

/// 생명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unstarted,
    Loading,
    Running,
    Halting,
    Halted,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unstarted => write!(f, "unstarted"),
            Self::Loading => write!(f, "loading"),
            Self::Running => write!(f, "running"),
            Self::Halting => write!(f, "halting"),
            Self::Halted => write!(f, "halted"),
        }
    }
}

/// `load_all` 결과
#[derive(Debug, Default)]
pub struct LoadReport {
    /// 로드된 플러그인 이름 (등록 순서)
    pub loaded: Vec<String>,
    /// 실패한 플러그인
    pub failed: Vec<LoadError>,
}

struct Running {
    registry: Arc<PluginRegistry>,
    dispatcher: Arc<Dispatcher>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    started: Instant,
}

/// 플러그인 매니저 — 레지스트리, 수신 큐, 디스패처를 묶는 생명주기 컨트롤러
///
/// 로드 단계(`load`, `load_all`, `start`)는 `&mut self`를 요구하고,
/// 시작 이후(`emit_event`, `halt`)는 `&self`로 여러 태스크에서 공유됩니다.
pub struct PluginManager {
    config: PipelineConfig,
    state: Mutex<LifecycleState>,
    registry: PluginRegistry,
    ingress: IngressHandle,
    receiver: Option<IngressReceiver>,
    running: Option<Running>,
}

impl PluginManager {
    /// 새 매니저를 생성합니다. 수신 큐는 이 시점에 만들어집니다.
    pub fn new(config: PipelineConfig) -> Self {
        let (ingress, receiver) = ingress_channel(config.ingress_capacity, config.overflow_policy);
        Self {
            config,
            state: Mutex::new(LifecycleState::Unstarted),
            registry: PluginRegistry::new(),
            ingress,
            receiver: Some(receiver),
            running: None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 현재 상태
    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 플러그인에 전달되는 것과 같은 수신 큐 핸들
    pub fn ingress(&self) -> IngressHandle {
        self.ingress.clone()
    }

    fn registry(&self) -> &PluginRegistry {
        match &self.running {
            Some(running) => &running.registry,
            None => &self.registry,
        }
    }

    /// 로드된 플러그인 요약 (등록 순서)
    pub fn plugins(&self) -> Vec<PluginSummary> {
        self.registry().summaries()
    }

    /// 로드된 플러그인 수
    pub fn plugin_count(&self) -> usize {
        self.registry().count()
    }

    /// `start` 이후 경과 시간. 시작 전에는 `None`
    pub fn uptime(&self) -> Option<Duration> {
        self.running.as_ref().map(|running| running.started.elapsed())
    }

    fn transition(
        &self,
        operation: &'static str,
        expected: &'static str,
        allowed: &[LifecycleState],
        next: LifecycleState,
    ) -> Result<LifecycleState, LifecycleError> {
        let mut state = self.lock_state();
        if !allowed.contains(&state) {
            return Err(LifecycleError::InvalidTransition {
                operation,
                expected,
                current: state.to_string(),
            });
        }
        let previous = *state;
        *state = next;
        Ok(previous)
    }

    fn begin_loading(&self) -> Result<(), LifecycleError> {
        self.transition(
            "load",
            "unstarted or loading",
            &[LifecycleState::Unstarted, LifecycleState::Loading],
            LifecycleState::Loading,
        )
        .map(|_| ())
    }

    /// 카탈로그에서 플러그인 하나를 로드합니다.
    ///
    /// 실패는 로그와 메트릭으로 남고 호출자에게 반환되지만, 매니저 상태는
    /// 그대로이므로 다음 플러그인 로드를 계속할 수 있습니다.
    pub async fn load(
        &mut self,
        catalog: &PluginCatalog,
        config: &PluginConfig,
    ) -> Result<Capabilities, SinkholeError> {
        self.begin_loading()?;
        let result = self.registry.load(catalog, config, &self.ingress).await;
        Ok(self.record_load(config, result)?)
    }

    /// 이미 생성된 플러그인 인스턴스를 로드합니다.
    pub async fn load_instance(
        &mut self,
        config: &PluginConfig,
        plugin: Box<dyn DynPlugin>,
    ) -> Result<Capabilities, SinkholeError> {
        self.begin_loading()?;
        let result = self
            .registry
            .load_instance(config, plugin, &self.ingress)
            .await;
        Ok(self.record_load(config, result)?)
    }

    fn record_load(
        &self,
        config: &PluginConfig,
        result: Result<Capabilities, LoadError>,
    ) -> Result<Capabilities, LoadError> {
        match &result {
            Ok(capabilities) => info!(
                plugin = %config.name,
                kind = %config.kind,
                capabilities = %capabilities,
                "plugin loaded"
            ),
            Err(e) => {
                error!(plugin = %config.name, kind = %config.kind, error = %e, "plugin discarded");
                counter!(m::PLUGIN_LOAD_FAILURES_TOTAL).increment(1);
            }
        }
        result
    }

    /// 선언 순서대로 모든 플러그인을 로드합니다.
    ///
    /// 한 플러그인의 실패는 나머지 로드를 막지 않습니다.
    pub async fn load_all(
        &mut self,
        catalog: &PluginCatalog,
        configs: &[PluginConfig],
    ) -> Result<LoadReport, LifecycleError> {
        self.begin_loading()?;
        let mut report = LoadReport::default();
        for config in configs {
            let result = self.registry.load(catalog, config, &self.ingress).await;
            match self.record_load(config, result) {
                Ok(_) => report.loaded.push(config.name.clone()),
                Err(e) => report.failed.push(e),
            }
        }
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "plugin loading finished"
        );
        Ok(report)
    }

    /// 로드 단계를 마치고 디스패처 루프를 시작합니다.
    ///
    /// 이 시점부터 플러그인 목록은 읽기 전용입니다.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.transition(
            "start",
            "unstarted or loading",
            &[LifecycleState::Unstarted, LifecycleState::Loading],
            LifecycleState::Running,
        )?;

        let registry = Arc::new(std::mem::take(&mut self.registry));
        let dispatcher = Arc::new(Dispatcher::new(&registry, self.config.undelivered));

        if dispatcher.fanout().target_count() == 0 {
            let outcome = match self.config.undelivered {
                UndeliveredPolicy::Discard => "discarded",
                UndeliveredPolicy::Warn => "discarded with a warning",
            };
            warn!(outcome, "no downstream plugins loaded, surviving events will be {outcome}");
        }

        let loop_task = self
            .receiver
            .take()
            .map(|receiver| dispatcher.spawn(receiver));

        gauge!(m::PLUGINS_LOADED).set(registry.count() as f64);
        info!(
            plugins = registry.count(),
            middleware = ?dispatcher.chain().stage_names(),
            downstream = ?dispatcher.fanout().target_names(),
            "plugin manager running"
        );

        self.running = Some(Running {
            registry,
            dispatcher,
            loop_task: Mutex::new(loop_task),
            started: Instant::now(),
        });
        Ok(())
    }

    /// 큐를 거치지 않고 이벤트 하나를 처리합니다.
    ///
    /// 디스패처 루프와 같은 임계 구역을 사용하므로 미들웨어 체인은
    /// 항상 한 번에 하나의 이벤트만 실행합니다. 전달 완료는 기다리지 않습니다.
    pub async fn emit_event(&self, event: Event) -> Result<DispatchOutcome, LifecycleError> {
        self.emit_shared(Arc::new(event)).await
    }

    /// 공유 중인 이벤트를 직접 처리합니다.
    pub async fn emit_shared(&self, event: Arc<Event>) -> Result<DispatchOutcome, LifecycleError> {
        let state = self.state();
        let running = match (&self.running, state) {
            (Some(running), LifecycleState::Running) => running,
            _ => {
                return Err(LifecycleError::InvalidTransition {
                    operation: "emit_event",
                    expected: "running",
                    current: state.to_string(),
                });
            }
        };
        match running.dispatcher.process(event, IngressPath::Emit).await {
            // 상태 확인과 임계 구역 진입 사이에 halt가 시작된 경우
            DispatchOutcome::Closed => Err(LifecycleError::InvalidTransition {
                operation: "emit_event",
                expected: "running",
                current: self.state().to_string(),
            }),
            outcome => Ok(outcome),
        }
    }

    /// 모든 플러그인을 정지합니다.
    ///
    /// 1. 수신 큐를 닫고 디스패처가 남은 이벤트를 처리할 때까지 대기
    /// 2. 디스패처를 닫음. 진행 중인 `emit_event`가 끝날 때까지 대기
    /// 3. 진행 중인 전달을 `drain_timeout_secs`까지 대기
    /// 4. 모든 플러그인의 `halt`를 동시에 호출하고 전부 반환할 때까지 대기
    pub async fn halt(&self) -> Result<HaltReport, LifecycleError> {
        self.transition(
            "halt",
            "loading or running",
            &[LifecycleState::Loading, LifecycleState::Running],
            LifecycleState::Halting,
        )?;
        info!("halting plugin manager");

        self.ingress.close();

        if let Some(running) = &self.running {
            let loop_task = running
                .loop_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(task) = loop_task {
                if let Err(e) = task.await {
                    error!(error = %e, "dispatcher loop terminated abnormally");
                }
            }
            running.dispatcher.close().await;
            running
                .dispatcher
                .fanout()
                .drain(self.config.drain_timeout())
                .await;
        }

        let report = self.registry().halt_all(self.config.halt_timeout()).await;
        *self.lock_state() = LifecycleState::Halted;
        gauge!(m::PLUGINS_LOADED).set(0.0);
        info!(
            halted = report.halted.len(),
            failed = report.failed.len(),
            "plugin manager halted"
        );
        Ok(report)
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("state", &self.state())
            .field("plugins", &self.registry().names())
            .finish()
    }
}
