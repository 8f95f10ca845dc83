//! 디스패처 — 이벤트 하나를 처음부터 끝까지 처리하는 단일 임계 구역
//!
//! 두 경로가 같은 임계 구역을 두고 경쟁합니다.
//! - 수신 큐 루프 ([`Dispatcher::spawn`]): 큐에서 하나를 꺼내 처리한 뒤 다음을 꺼냄
//! - 직접 제출 ([`Dispatcher::process`], `PluginManager::emit_event`): 큐를 거치지 않음
//!
//! 임계 구역 안에서 미들웨어 체인을 실행하고 팬아웃 태스크를 띄웁니다.
//! 따라서 두 이벤트가 동시에 체인을 실행하는 일은 없고, 체인은 큐에
//! 들어간 순서대로 실행됩니다. 전달 완료는 기다리지 않습니다.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::UndeliveredPolicy;
use crate::event::Event;
use crate::fanout::FanOut;
use crate::ingress::IngressReceiver;
use crate::metrics as m;
use crate::middleware::{ChainOutcome, MiddlewareChain};
use crate::registry::PluginRegistry;

/// 이벤트가 파이프라인에 들어온 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressPath {
    /// 수신 큐 (플러그인 제출)
    Ingress,
    /// 직접 제출 (HTTP 게이트웨이 등)
    Emit,
}

impl IngressPath {
    fn label(self) -> &'static str {
        match self {
            Self::Ingress => m::PATH_INGRESS,
            Self::Emit => m::PATH_EMIT,
        }
    }
}

/// 이벤트 하나의 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 체인을 통과해 `deliveries`개의 전달 태스크가 시작됨
    Delivered { deliveries: usize },
    /// 미들웨어 `by`가 이벤트를 폐기함
    Dropped { by: String },
    /// 체인을 통과했지만 다운스트림 플러그인이 없음
    Undelivered,
    /// 디스패처가 닫힌 뒤 도착해 처리되지 않음
    Closed,
}

/// 디스패처
pub struct Dispatcher {
    chain: MiddlewareChain,
    fanout: FanOut,
    undelivered: UndeliveredPolicy,
    /// 임계 구역. 값은 닫힘 여부
    critical: Mutex<bool>,
}

impl Dispatcher {
    /// 고정된 레지스트리로부터 체인과 팬아웃 색인을 만듭니다.
    pub fn new(registry: &PluginRegistry, undelivered: UndeliveredPolicy) -> Self {
        Self {
            chain: MiddlewareChain::from_registry(registry),
            fanout: FanOut::from_registry(registry),
            undelivered,
            critical: Mutex::new(false),
        }
    }

    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    pub fn fanout(&self) -> &FanOut {
        &self.fanout
    }

    /// 이벤트 하나를 임계 구역 안에서 처리합니다.
    pub async fn process(&self, event: Arc<Event>, path: IngressPath) -> DispatchOutcome {
        let closed = self.critical.lock().await;
        if *closed {
            debug!(event = %event, "dispatcher closed, event not processed");
            return DispatchOutcome::Closed;
        }
        counter!(m::EVENTS_RECEIVED_TOTAL, m::LABEL_PATH => path.label()).increment(1);

        let event = match self.chain.apply(event).await {
            ChainOutcome::Pass(event) => event,
            ChainOutcome::Dropped { by } => {
                return DispatchOutcome::Dropped { by: by.to_string() };
            }
        };

        let deliveries = self.fanout.deliver(&event);
        if deliveries > 0 {
            return DispatchOutcome::Delivered { deliveries };
        }

        counter!(m::EVENTS_UNDELIVERED_TOTAL).increment(1);
        match self.undelivered {
            UndeliveredPolicy::Discard => {
                debug!(event = %event, "no downstream plugin, event discarded");
            }
            UndeliveredPolicy::Warn => {
                warn!(event = %event, "no downstream plugin, event discarded");
            }
        }
        DispatchOutcome::Undelivered
    }

    /// 디스패처를 닫습니다.
    ///
    /// 진행 중인 `process`가 임계 구역을 놓을 때까지 기다리므로, 반환 이후에는
    /// 새 팬아웃 태스크가 생기지 않습니다. 이후의 `process`는 `Closed`를 반환합니다.
    pub async fn close(&self) {
        *self.critical.lock().await = true;
    }

    /// 닫혔는지 확인합니다.
    pub async fn is_closed(&self) -> bool {
        *self.critical.lock().await
    }

    /// 수신 큐 루프를 시작합니다.
    ///
    /// 큐가 닫히고 남은 이벤트를 모두 처리하면 태스크가 끝납니다.
    pub fn spawn(self: &Arc<Self>, mut receiver: IngressReceiver) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            debug!("dispatcher loop started");
            let mut processed: u64 = 0;
            while let Some(event) = receiver.recv().await {
                dispatcher.process(event, IngressPath::Ingress).await;
                processed += 1;
            }
            debug!(processed, "ingress closed, dispatcher loop stopped");
        })
    }
}
