//! 플러그인 계약 — 생명주기와 capability
//!
//! 모든 플러그인은 기본 생명주기(`init`, `halt`)를 구현하고,
//! 선언한 [`Capabilities`]에 따라 선택적 메서드를 추가로 구현합니다.
//!
//! | Capability | 메서드 | 역할 |
//! |---|---|---|
//! | `UPSTREAM` | (없음) | `init`에서 받은 [`IngressHandle`]로 이벤트 제출 |
//! | `DOWNSTREAM` | [`Plugin::inbox`] | 살아남은 이벤트 수신 |
//! | `MIDDLEWARE` | [`Plugin::filter_event`] | 이벤트 변환/통과/폐기 |
//!
//! Capability는 로드 시점에 한 번만 기록되며, 이벤트마다 다시 확인하지 않습니다.
//!
//! # 생명주기
//! ```text
//! Created → init(config, ingress) → Loaded → halt() → Halted
//! ```

use std::fmt;
use std::future::Future;
use std::ops::BitOr;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::config::PluginConfig;
use crate::error::PluginError;
use crate::event::Event;
use crate::ingress::IngressHandle;

/// dyn-compatible trait에서 사용하는 boxed future 타입
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ─── Capabilities ────────────────────────────────────────────────────

/// 플러그인이 선언하는 capability 집합
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    /// 기본 생명주기만 구현
    pub const NONE: Self = Self(0);
    /// 수신 핸들로 이벤트를 생산
    pub const UPSTREAM: Self = Self(1);
    /// `inbox`로 이벤트를 소비
    pub const DOWNSTREAM: Self = Self(1 << 1);
    /// `filter_event`로 이벤트를 가공
    pub const MIDDLEWARE: Self = Self(1 << 2);

    const NAMED: [(Self, &'static str); 3] = [
        (Self::UPSTREAM, "upstream"),
        (Self::DOWNSTREAM, "downstream"),
        (Self::MIDDLEWARE, "middleware"),
    ];

    /// 두 집합의 합집합
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `other`의 모든 capability를 포함하는지 확인합니다.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_upstream(self) -> bool {
        self.contains(Self::UPSTREAM)
    }

    pub const fn is_downstream(self) -> bool {
        self.contains(Self::DOWNSTREAM)
    }

    pub const fn is_middleware(self) -> bool {
        self.contains(Self::MIDDLEWARE)
    }

    /// 포함된 capability 이름 목록
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

impl Serialize for Capabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names().serialize(serializer)
    }
}

// ─── Plugin Trait ────────────────────────────────────────────────────

/// 모든 플러그인이 구현하는 trait
///
/// `inbox`와 `filter_event`의 기본 구현은 각각 `Unsupported` 에러와
/// 무변경 통과입니다. 파이프라인은 선언된 capability에 해당하는
/// 메서드만 호출합니다.
///
/// # 구현 예시
/// ```ignore
/// struct Counter { seen: AtomicUsize }
///
/// impl Plugin for Counter {
///     fn capabilities(&self) -> Capabilities { Capabilities::DOWNSTREAM }
///
///     async fn init(&mut self, _config: &PluginConfig, _ingress: IngressHandle)
///         -> Result<(), PluginError> { Ok(()) }
///     async fn halt(&self) -> Result<(), PluginError> { Ok(()) }
///
///     async fn inbox(&self, _event: Arc<Event>) -> Result<(), PluginError> {
///         self.seen.fetch_add(1, Ordering::Relaxed);
///         Ok(())
///     }
/// }
/// ```
pub trait Plugin: Send + Sync + 'static {
    /// 선언된 capability 집합
    fn capabilities(&self) -> Capabilities;

    /// 플러그인을 초기화합니다.
    ///
    /// Upstream 플러그인은 `ingress`를 보관하고 생산 태스크를 시작합니다.
    /// 실패하면 플러그인은 폐기되고 나머지 로드는 계속됩니다.
    fn init(
        &mut self,
        config: &PluginConfig,
        ingress: IngressHandle,
    ) -> impl Future<Output = Result<(), PluginError>> + Send;

    /// 플러그인을 정지합니다. 종료 시 모든 플러그인에 동시에 호출됩니다.
    fn halt(&self) -> impl Future<Output = Result<(), PluginError>> + Send;

    /// 이벤트를 수신합니다 (Downstream).
    fn inbox(&self, event: Arc<Event>) -> impl Future<Output = Result<(), PluginError>> + Send {
        drop(event);
        async { Err(PluginError::Unsupported("inbox")) }
    }

    /// 이벤트를 가공합니다 (Middleware).
    ///
    /// `Ok(None)`을 반환하면 이벤트는 폐기되고 이후 단계는 실행되지 않습니다.
    fn filter_event(
        &self,
        event: Arc<Event>,
    ) -> impl Future<Output = Result<Option<Arc<Event>>, PluginError>> + Send {
        async move { Ok(Some(event)) }
    }
}

// ─── DynPlugin Trait ─────────────────────────────────────────────────

/// dyn-compatible 플러그인 trait
///
/// `Plugin` trait은 RPITIT를 사용하므로 `dyn Plugin`이 불가합니다.
/// `DynPlugin`은 `BoxFuture`를 반환하여 `Box<dyn DynPlugin>`으로
/// 플러그인을 동적 관리할 수 있게 합니다.
pub trait DynPlugin: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn init<'a>(
        &'a mut self,
        config: &'a PluginConfig,
        ingress: IngressHandle,
    ) -> BoxFuture<'a, Result<(), PluginError>>;

    fn halt(&self) -> BoxFuture<'_, Result<(), PluginError>>;

    fn inbox(&self, event: Arc<Event>) -> BoxFuture<'_, Result<(), PluginError>>;

    fn filter_event(&self, event: Arc<Event>)
    -> BoxFuture<'_, Result<Option<Arc<Event>>, PluginError>>;
}

/// Plugin을 구현한 타입은 자동으로 DynPlugin도 구현됩니다.
impl<T: Plugin> DynPlugin for T {
    fn capabilities(&self) -> Capabilities {
        Plugin::capabilities(self)
    }

    fn init<'a>(
        &'a mut self,
        config: &'a PluginConfig,
        ingress: IngressHandle,
    ) -> BoxFuture<'a, Result<(), PluginError>> {
        Box::pin(Plugin::init(self, config, ingress))
    }

    fn halt(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        Box::pin(Plugin::halt(self))
    }

    fn inbox(&self, event: Arc<Event>) -> BoxFuture<'_, Result<(), PluginError>> {
        Box::pin(Plugin::inbox(self, event))
    }

    fn filter_event(
        &self,
        event: Arc<Event>,
    ) -> BoxFuture<'_, Result<Option<Arc<Event>>, PluginError>> {
        Box::pin(Plugin::filter_event(self, event))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverflowPolicy;
    use crate::ingress::ingress_channel;

    struct Bare;

    impl Plugin for Bare {
        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE
        }

        async fn init(
            &mut self,
            _config: &PluginConfig,
            _ingress: IngressHandle,
        ) -> Result<(), PluginError> {
            Ok(())
        }

        async fn halt(&self) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[test]
    fn capabilities_contains_and_union() {
        let caps = Capabilities::DOWNSTREAM | Capabilities::MIDDLEWARE;
        assert!(caps.is_downstream());
        assert!(caps.is_middleware());
        assert!(!caps.is_upstream());
        assert!(caps.contains(Capabilities::DOWNSTREAM));
        assert!(caps.contains(Capabilities::NONE));
        assert!(!Capabilities::NONE.contains(Capabilities::UPSTREAM));
    }

    #[test]
    fn capabilities_display() {
        assert_eq!(Capabilities::NONE.to_string(), "none");
        assert_eq!(
            (Capabilities::UPSTREAM | Capabilities::MIDDLEWARE).to_string(),
            "upstream|middleware"
        );
    }

    #[test]
    fn capabilities_serialize_as_name_list() {
        let json = serde_json::to_string(&Capabilities::DOWNSTREAM).unwrap();
        assert_eq!(json, r#"["downstream"]"#);
    }

    #[tokio::test]
    async fn default_methods_reject_inbox_and_pass_filter() {
        let (ingress, _receiver) = ingress_channel(1, OverflowPolicy::Block);
        let mut plugin: Box<dyn DynPlugin> = Box::new(Bare);
        plugin
            .init(&PluginConfig::new("bare", "bare"), ingress)
            .await
            .unwrap();

        let event = Arc::new(Event::new("email", "test"));
        let err = plugin.inbox(Arc::clone(&event)).await.unwrap_err();
        assert!(matches!(err, PluginError::Unsupported("inbox")));

        let passed = plugin.filter_event(Arc::clone(&event)).await.unwrap();
        assert!(Arc::ptr_eq(&passed.unwrap(), &event));

        plugin.halt().await.unwrap();
    }
}
