//! 수신 큐 — 다수 생산자, 단일 소비자의 유한 큐
//!
//! [`IngressHandle`]은 모든 플러그인의 `init`에 전달되는 제출 핸들이고,
//! [`IngressReceiver`]는 디스패처 루프 하나만 소유합니다.
//!
//! # 오버플로우 정책
//! 큐가 가득 찬 경우:
//! - [`OverflowPolicy::Block`]: 공간이 생길 때까지 생산자가 대기 (배압)
//! - [`OverflowPolicy::DropOldest`]: 가장 오래된 이벤트를 드롭하고 새 이벤트를 추가
//! - [`OverflowPolicy::Reject`]: 새 이벤트를 [`IngressError::Full`]로 거부
//!
//! # 종료
//! [`IngressHandle::close`] 이후의 제출은 [`IngressError::Closed`]로 실패하고,
//! 대기 중이던 생산자도 깨어나 같은 에러를 받습니다. 수신자는 남은 이벤트를
//! 모두 꺼낸 뒤 `None`을 반환합니다.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::{counter, gauge};
use tokio::sync::Notify;

use crate::config::OverflowPolicy;
use crate::error::IngressError;
use crate::event::Event;
use crate::metrics as m;

/// 유한 수신 큐를 생성합니다.
///
/// 용량 0은 1로 보정됩니다.
pub fn ingress_channel(capacity: usize, policy: OverflowPolicy) -> (IngressHandle, IngressReceiver) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState {
            buffer: VecDeque::with_capacity(capacity.min(10_000)),
            closed: false,
            dropped_count: 0,
            rejected_count: 0,
        }),
        capacity,
        policy,
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (
        IngressHandle {
            shared: Arc::clone(&shared),
        },
        IngressReceiver { shared },
    )
}

struct Shared {
    state: Mutex<QueueState>,
    capacity: usize,
    policy: OverflowPolicy,
    /// 이벤트가 추가되었거나 큐가 닫힘
    readable: Notify,
    /// 공간이 생겼거나 큐가 닫힘
    writable: Notify,
}

struct QueueState {
    buffer: VecDeque<Arc<Event>>,
    closed: bool,
    dropped_count: u64,
    rejected_count: u64,
}

enum Push {
    Accepted,
    Wait(Arc<Event>),
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // 잠금 구간에서 패닉이 나지 않으므로 poison 상태여도 데이터는 일관됨
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_push(&self, event: Arc<Event>, may_wait: bool) -> Result<Push, IngressError> {
        let mut state = self.lock();
        if state.closed {
            return Err(IngressError::Closed);
        }

        if state.buffer.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::Block if may_wait => return Ok(Push::Wait(event)),
                OverflowPolicy::Block | OverflowPolicy::Reject => {
                    state.rejected_count += 1;
                    counter!(m::INGRESS_OVERFLOW_TOTAL, m::LABEL_POLICY => "reject").increment(1);
                    tracing::warn!(
                        rejected = state.rejected_count,
                        capacity = self.capacity,
                        "ingress queue full, rejected new event"
                    );
                    return Err(IngressError::Full {
                        capacity: self.capacity,
                    });
                }
                OverflowPolicy::DropOldest => {
                    state.buffer.pop_front();
                    state.dropped_count += 1;
                    counter!(m::INGRESS_OVERFLOW_TOTAL, m::LABEL_POLICY => "drop_oldest")
                        .increment(1);
                    tracing::warn!(
                        dropped = state.dropped_count,
                        capacity = self.capacity,
                        "ingress queue full, dropped oldest event"
                    );
                }
            }
        }

        state.buffer.push_back(event);
        gauge!(m::INGRESS_QUEUE_DEPTH).set(state.buffer.len() as f64);
        drop(state);
        self.readable.notify_one();
        Ok(Push::Accepted)
    }
}

/// 수신 큐 제출 핸들
///
/// 복제 비용이 낮으며 여러 태스크에서 동시에 사용할 수 있습니다.
#[derive(Clone)]
pub struct IngressHandle {
    shared: Arc<Shared>,
}

impl IngressHandle {
    /// 이벤트를 제출합니다.
    ///
    /// `Block` 정책에서는 공간이 생길 때까지 대기합니다.
    pub async fn submit(&self, event: Event) -> Result<(), IngressError> {
        self.submit_shared(Arc::new(event)).await
    }

    /// 이미 공유 중인 이벤트를 제출합니다.
    pub async fn submit_shared(&self, event: Arc<Event>) -> Result<(), IngressError> {
        let mut pending = event;
        loop {
            let writable = self.shared.writable.notified();
            tokio::pin!(writable);
            // 용량 확인 전에 등록해야 pop/close 알림을 놓치지 않음
            writable.as_mut().enable();

            match self.shared.try_push(pending, true)? {
                Push::Accepted => return Ok(()),
                Push::Wait(event) => pending = event,
            }
            writable.await;
        }
    }

    /// 대기하지 않고 이벤트를 제출합니다.
    ///
    /// `Block` 정책에서 큐가 가득 차 있으면 [`IngressError::Full`]을 반환합니다.
    pub fn try_submit(&self, event: Event) -> Result<(), IngressError> {
        match self.shared.try_push(Arc::new(event), false)? {
            Push::Accepted => Ok(()),
            Push::Wait(_) => Err(IngressError::Full {
                capacity: self.shared.capacity,
            }),
        }
    }

    /// 큐를 닫습니다. 대기 중인 생산자와 소비자를 모두 깨웁니다.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.readable.notify_waiters();
        self.shared.writable.notify_waiters();
    }

    /// 큐가 닫혔는지 확인합니다.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// 현재 대기 중인 이벤트 수
    pub fn len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// 큐가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 최대 용량
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// 오버플로우 정책
    pub fn policy(&self) -> OverflowPolicy {
        self.shared.policy
    }

    /// 오버플로우로 드롭된 이벤트 수 (`DropOldest`)
    pub fn dropped_count(&self) -> u64 {
        self.shared.lock().dropped_count
    }

    /// 오버플로우로 거부된 이벤트 수
    pub fn rejected_count(&self) -> u64 {
        self.shared.lock().rejected_count
    }
}

impl std::fmt::Debug for IngressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngressHandle")
            .field("capacity", &self.shared.capacity)
            .field("policy", &self.shared.policy)
            .finish()
    }
}

/// 수신 큐 소비자 (디스패처 전용)
pub struct IngressReceiver {
    shared: Arc<Shared>,
}

impl IngressReceiver {
    /// 다음 이벤트를 꺼냅니다.
    ///
    /// 큐가 닫히고 비어 있으면 `None`을 반환합니다.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            let readable = self.shared.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if let Some(event) = state.buffer.pop_front() {
                    gauge!(m::INGRESS_QUEUE_DEPTH).set(state.buffer.len() as f64);
                    drop(state);
                    self.shared.writable.notify_one();
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }

            readable.await;
        }
    }

    /// 수신 측에서 큐를 닫습니다.
    pub fn close(&self) {
        IngressHandle {
            shared: Arc::clone(&self.shared),
        }
        .close();
    }
}
