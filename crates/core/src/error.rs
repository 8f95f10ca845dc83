//! 에러 타입 — 도메인별 에러 정의
//!
//! 플러그인 내부에서 발생한 에러는 어떤 것도 프로세스를 종료시키지 않습니다.
//! 각 단계(로드, 초기화, 미들웨어, 전달, 수신 경계)는 자기 에러를
//! 로그로 남기고 격리합니다.

/// Sinkhole 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum SinkholeError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 플러그인 로드 에러
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// 플러그인 실행 에러
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// 수신 큐 에러
    #[error("ingress error: {0}")]
    Ingress(#[from] IngressError),

    /// 외부 이벤트 디코딩 에러
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// 생명주기 전환 에러
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 플러그인 로드 에러
///
/// 로드 실패는 해당 플러그인만 건너뛰고 나머지 로드는 계속됩니다.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// 카탈로그에 없는 플러그인 종류
    #[error("unknown plugin kind '{kind}' for plugin '{name}'")]
    UnknownKind { name: String, kind: String },

    /// 플러그인 생성 실패 (설정 형식 오류 등)
    #[error("failed to construct plugin '{name}': {reason}")]
    Construct { name: String, reason: String },

    /// `init` 실패 — 플러그인은 폐기됩니다
    #[error("plugin '{name}' failed to initialize: {source}")]
    InitFailed {
        name: String,
        #[source]
        source: PluginError,
    },

    /// 동일한 이름의 플러그인이 이미 로드됨
    #[error("plugin already loaded: {name}")]
    DuplicateName { name: String },
}

/// 플러그인 실행 에러
///
/// 플러그인 구현체가 `init`, `halt`, `inbox`, `filter_event`에서 반환합니다.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// 초기화 실패
    #[error("init failed: {0}")]
    Init(String),

    /// 정지 실패
    #[error("halt failed: {0}")]
    Halt(String),

    /// 이벤트 수신 처리 실패
    #[error("inbox failed: {0}")]
    Inbox(String),

    /// 미들웨어 필터링 실패
    #[error("filter failed: {0}")]
    Filter(String),

    /// 선언되지 않은 capability 호출
    #[error("capability not supported: {0}")]
    Unsupported(&'static str),
}

/// 수신 큐 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngressError {
    /// 큐가 가득 차서 거부됨 (`reject` 정책)
    #[error("ingress queue full (capacity: {capacity})")]
    Full { capacity: usize },

    /// 큐가 닫힘 (종료 중)
    #[error("ingress queue closed")]
    Closed,
}

/// 외부 이벤트 디코딩 에러
///
/// 수신 경계에서 거부되며 파이프라인에 절대 들어가지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// 요청 본문 없음
    #[error("please send a request body")]
    MissingBody,

    /// JSON 형식 오류
    #[error("malformed event json: {0}")]
    Json(String),

    /// 샘플 데이터의 base64 디코딩 실패
    #[error("sample {index}: invalid base64 data: {reason}")]
    Base64 { index: usize, reason: String },
}

/// 생명주기 전환 에러
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// 허용되지 않는 상태에서의 호출
    #[error("invalid lifecycle transition: {operation} requires {expected}, current state is {current}")]
    InvalidTransition {
        operation: &'static str,
        expected: &'static str,
        current: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_init_failed_display_includes_cause() {
        let err = LoadError::InitFailed {
            name: "dns".to_owned(),
            source: PluginError::Init("bind failed".to_owned()),
        };
        let msg = err.to_string();
        assert!(msg.contains("dns"));
        assert!(msg.contains("bind failed"));
    }

    #[test]
    fn ingress_full_display() {
        let err = IngressError::Full { capacity: 8 };
        assert_eq!(err.to_string(), "ingress queue full (capacity: 8)");
    }

    #[test]
    fn errors_convert_to_sinkhole_error() {
        let err: SinkholeError = IngressError::Closed.into();
        assert!(matches!(err, SinkholeError::Ingress(IngressError::Closed)));

        let err: SinkholeError = DecodeError::MissingBody.into();
        assert!(err.to_string().contains("request body"));

        let err: SinkholeError = LoadError::UnknownKind {
            name: "x".to_owned(),
            kind: "nope".to_owned(),
        }
        .into();
        assert!(err.to_string().contains("nope"));
    }
}
