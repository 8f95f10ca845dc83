//! 미들웨어 체인 — 순서를 보존하는 필터/변환/폐기 단계
//!
//! Middleware capability를 가진 플러그인만 등록 순서대로 미리 색인해 두고,
//! 이벤트마다 그 목록을 순서대로 적용합니다.
//!
//! ```text
//! e1 = P1.filter_event(e0)
//! e2 = P2.filter_event(e1)
//! ...
//! ```
//!
//! - `Ok(Some(e))`: 다음 단계는 `e`를 관찰
//! - `Ok(None)`: 즉시 종료, 이후 미들웨어와 팬아웃 모두 실행 안 함
//! - `Err(_)` 또는 패닉: 로그를 남기고 마지막 정상 이벤트로 계속

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use tracing::{debug, error};

use crate::event::Event;
use crate::metrics as m;
use crate::plugin::{Capabilities, DynPlugin};
use crate::registry::PluginRegistry;

struct Stage {
    name: Arc<str>,
    plugin: Arc<dyn DynPlugin>,
}

/// 체인 적용 결과
#[derive(Debug)]
pub enum ChainOutcome {
    /// 모든 단계를 통과한 최종 이벤트
    Pass(Arc<Event>),
    /// `by` 플러그인이 이벤트를 폐기함
    Dropped { by: Arc<str> },
}

/// 미들웨어 체인
pub struct MiddlewareChain {
    stages: Vec<Stage>,
}

impl MiddlewareChain {
    /// 레지스트리에서 Middleware 플러그인을 등록 순서대로 색인합니다.
    pub fn from_registry(registry: &PluginRegistry) -> Self {
        let stages = registry
            .with_capability(Capabilities::MIDDLEWARE)
            .map(|handle| Stage {
                name: handle.shared_name(),
                plugin: handle.plugin(),
            })
            .collect();
        Self { stages }
    }

    /// 체인 단계 수
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 단계 이름 (적용 순서)
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| &*s.name).collect()
    }

    /// 이벤트에 체인을 적용합니다.
    pub async fn apply(&self, event: Arc<Event>) -> ChainOutcome {
        let mut current = event;

        for stage in &self.stages {
            let attempt = AssertUnwindSafe(stage.plugin.filter_event(Arc::clone(&current)))
                .catch_unwind()
                .await;

            match attempt {
                Ok(Ok(Some(next))) => current = next,
                Ok(Ok(None)) => {
                    debug!(plugin = %stage.name, event = %current, "event dropped by middleware");
                    counter!(m::EVENTS_DROPPED_TOTAL, m::LABEL_PLUGIN => stage.name.to_string())
                        .increment(1);
                    return ChainOutcome::Dropped {
                        by: Arc::clone(&stage.name),
                    };
                }
                Ok(Err(e)) => {
                    error!(
                        plugin = %stage.name,
                        error = %e,
                        "middleware failed, continuing with last good event"
                    );
                    counter!(m::MIDDLEWARE_ERRORS_TOTAL, m::LABEL_PLUGIN => stage.name.to_string())
                        .increment(1);
                }
                Err(panic) => {
                    error!(
                        plugin = %stage.name,
                        panic = %panic_message(panic.as_ref()),
                        "middleware panicked, continuing with last good event"
                    );
                    counter!(m::MIDDLEWARE_ERRORS_TOTAL, m::LABEL_PLUGIN => stage.name.to_string())
                        .increment(1);
                }
            }
        }

        ChainOutcome::Pass(current)
    }
}

/// 패닉 페이로드에서 메시지를 꺼냅니다.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
