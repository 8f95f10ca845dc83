#![doc = include_str!("../README.md")]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod fanout;
pub mod ingress;
pub mod lifecycle;
pub mod metrics;
pub mod middleware;
pub mod plugin;
pub mod registry;
pub mod wire;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{
    ConfigError, DecodeError, IngressError, LifecycleError, LoadError, PluginError, SinkholeError,
};

// 설정
pub use config::{
    OverflowPolicy, PipelineConfig, PluginConfig, SinkholeConfig, UndeliveredPolicy,
};

// 이벤트
pub use event::{Event, Metadata, Sample, sha256_hex};
pub use wire::decode_event;

// 플러그인 계약
pub use plugin::{BoxFuture, Capabilities, DynPlugin, Plugin};
pub use registry::{HaltReport, PluginCatalog, PluginFactory, PluginRegistry, PluginSummary};

// 파이프라인
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use ingress::{IngressHandle, IngressReceiver, ingress_channel};
pub use lifecycle::{LifecycleState, LoadReport, PluginManager};
