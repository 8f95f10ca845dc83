//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `sinkhole_`
//! - 단계명: `events_`, `middleware_`, `deliveries_`, `ingress_`, `plugins_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(sinkhole_core::metrics::DELIVERIES_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 수신 경로 레이블 키 (ingress, emit)
pub const LABEL_PATH: &str = "path";

/// 플러그인 이름 레이블 키
pub const LABEL_PLUGIN: &str = "plugin";

/// 오버플로우 정책 레이블 키 (drop_oldest, reject)
pub const LABEL_POLICY: &str = "policy";

/// 수신 경로 값: 수신 큐
pub const PATH_INGRESS: &str = "ingress";

/// 수신 경로 값: 직접 제출 (`emit_event`)
pub const PATH_EMIT: &str = "emit";

// ─── 파이프라인 메트릭 ─────────────────────────────────────────────

/// 처리를 시작한 이벤트 수 (counter, label: path)
pub const EVENTS_RECEIVED_TOTAL: &str = "sinkhole_events_received_total";

/// 미들웨어가 버린 이벤트 수 (counter, label: plugin)
pub const EVENTS_DROPPED_TOTAL: &str = "sinkhole_events_dropped_total";

/// 다운스트림이 없어 전달되지 않은 이벤트 수 (counter)
pub const EVENTS_UNDELIVERED_TOTAL: &str = "sinkhole_events_undelivered_total";

/// 미들웨어 에러 수 (counter, label: plugin)
pub const MIDDLEWARE_ERRORS_TOTAL: &str = "sinkhole_middleware_errors_total";

/// 성공한 전달 수 (counter, label: plugin)
pub const DELIVERIES_TOTAL: &str = "sinkhole_deliveries_total";

/// 실패한 전달 수, 패닉 포함 (counter, label: plugin)
pub const DELIVERY_FAILURES_TOTAL: &str = "sinkhole_delivery_failures_total";

// ─── 수신 큐 메트릭 ────────────────────────────────────────────────

/// 수신 큐에 대기 중인 이벤트 수 (gauge)
pub const INGRESS_QUEUE_DEPTH: &str = "sinkhole_ingress_queue_depth";

/// 오버플로우로 버려지거나 거부된 이벤트 수 (counter, label: policy)
pub const INGRESS_OVERFLOW_TOTAL: &str = "sinkhole_ingress_overflow_total";

// ─── 플러그인 메트릭 ───────────────────────────────────────────────

/// 로드된 플러그인 수 (gauge)
pub const PLUGINS_LOADED: &str = "sinkhole_plugins_loaded";

/// 로드 또는 초기화에 실패한 플러그인 수 (counter)
pub const PLUGIN_LOAD_FAILURES_TOTAL: &str = "sinkhole_plugin_load_failures_total";

// ─── 데몬 메트릭 ───────────────────────────────────────────────────

/// 데몬 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "sinkhole_daemon_uptime_seconds";

/// 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "sinkhole_daemon_build_info";

/// 모든 메트릭의 설명을 등록합니다.
///
/// Prometheus recorder 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        EVENTS_RECEIVED_TOTAL,
        "Events that entered the processing pipeline"
    );
    describe_counter!(EVENTS_DROPPED_TOTAL, "Events dropped by middleware");
    describe_counter!(
        EVENTS_UNDELIVERED_TOTAL,
        "Events that survived middleware with no downstream plugin loaded"
    );
    describe_counter!(MIDDLEWARE_ERRORS_TOTAL, "Middleware filter failures");
    describe_counter!(DELIVERIES_TOTAL, "Successful downstream deliveries");
    describe_counter!(
        DELIVERY_FAILURES_TOTAL,
        "Downstream deliveries that returned an error or panicked"
    );
    describe_gauge!(INGRESS_QUEUE_DEPTH, "Events waiting in the ingress queue");
    describe_counter!(
        INGRESS_OVERFLOW_TOTAL,
        "Events dropped or rejected because the ingress queue was full"
    );
    describe_gauge!(PLUGINS_LOADED, "Plugins loaded and initialised");
    describe_counter!(
        PLUGIN_LOAD_FAILURES_TOTAL,
        "Plugins that failed to resolve or initialise"
    );
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
    describe_gauge!(DAEMON_BUILD_INFO, "Build information");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metric_names_use_prefix() {
        let names = [
            EVENTS_RECEIVED_TOTAL,
            EVENTS_DROPPED_TOTAL,
            EVENTS_UNDELIVERED_TOTAL,
            MIDDLEWARE_ERRORS_TOTAL,
            DELIVERIES_TOTAL,
            DELIVERY_FAILURES_TOTAL,
            INGRESS_QUEUE_DEPTH,
            INGRESS_OVERFLOW_TOTAL,
            PLUGINS_LOADED,
            PLUGIN_LOAD_FAILURES_TOTAL,
            DAEMON_UPTIME_SECONDS,
            DAEMON_BUILD_INFO,
        ];
        for name in names {
            assert!(name.starts_with("sinkhole_"), "{name}");
        }
    }

    #[test]
    fn describe_all_without_recorder_is_noop() {
        describe_all();
    }
}
