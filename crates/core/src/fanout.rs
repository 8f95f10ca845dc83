//! 팬아웃 전달 — 다운스트림 플러그인별 독립 태스크
//!
//! 살아남은 이벤트마다 Downstream 플러그인 수만큼 새 태스크를 띄워 `inbox`를
//! 호출합니다. 디스패처는 전달 완료를 기다리지 않습니다 (fire-and-forget).
//!
//! 전달 태스크의 에러와 패닉은 태스크 경계에서 잡혀 로그로만 남고,
//! 다른 플러그인으로의 전달이나 디스패처에 영향을 주지 않습니다.
//! 진행 중인 전달은 [`TaskTracker`]로 추적되어 종료 시 드레인할 수 있습니다.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::counter;
use tokio_util::task::TaskTracker;
use tracing::{error, trace, warn};

use crate::event::Event;
use crate::metrics as m;
use crate::middleware::panic_message;
use crate::plugin::{Capabilities, DynPlugin};
use crate::registry::PluginRegistry;

struct Target {
    name: Arc<str>,
    plugin: Arc<dyn DynPlugin>,
}

/// 팬아웃 단계
pub struct FanOut {
    targets: Vec<Target>,
    tracker: TaskTracker,
}

impl FanOut {
    /// 레지스트리에서 Downstream 플러그인을 등록 순서대로 색인합니다.
    pub fn from_registry(registry: &PluginRegistry) -> Self {
        let targets = registry
            .with_capability(Capabilities::DOWNSTREAM)
            .map(|handle| Target {
                name: handle.shared_name(),
                plugin: handle.plugin(),
            })
            .collect();
        Self {
            targets,
            tracker: TaskTracker::new(),
        }
    }

    /// 전달 대상 수
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// 전달 대상 이름 (등록 순서)
    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| &*t.name).collect()
    }

    /// 진행 중인 전달 태스크 수
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// 모든 대상에 이벤트 전달 태스크를 띄우고, 띄운 태스크 수를 반환합니다.
    pub fn deliver(&self, event: &Arc<Event>) -> usize {
        for target in &self.targets {
            let name = Arc::clone(&target.name);
            let plugin = Arc::clone(&target.plugin);
            let event = Arc::clone(event);

            self.tracker.spawn(async move {
                let outcome = AssertUnwindSafe(plugin.inbox(event)).catch_unwind().await;
                match outcome {
                    Ok(Ok(())) => {
                        trace!(plugin = %name, "event delivered");
                        counter!(m::DELIVERIES_TOTAL, m::LABEL_PLUGIN => name.to_string())
                            .increment(1);
                    }
                    Ok(Err(e)) => {
                        error!(plugin = %name, error = %e, "delivery failed");
                        counter!(m::DELIVERY_FAILURES_TOTAL, m::LABEL_PLUGIN => name.to_string())
                            .increment(1);
                    }
                    Err(panic) => {
                        error!(
                            plugin = %name,
                            panic = %panic_message(panic.as_ref()),
                            "delivery panicked"
                        );
                        counter!(m::DELIVERY_FAILURES_TOTAL, m::LABEL_PLUGIN => name.to_string())
                            .increment(1);
                    }
                }
            });
        }
        self.targets.len()
    }

    /// 진행 중인 전달이 끝날 때까지 기다립니다.
    ///
    /// 이후에도 `deliver`는 동작합니다. `timeout`이 지나면 `false`를 반환합니다.
    pub async fn drain(&self, timeout: Option<Duration>) -> bool {
        self.tracker.close();
        let drained = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.tracker.wait())
                .await
                .is_ok(),
            None => {
                self.tracker.wait().await;
                true
            }
        };
        if !drained {
            warn!(
                in_flight = self.tracker.len(),
                "deliveries still in flight after drain timeout"
            );
        }
        self.tracker.reopen();
        drained
    }
}
