//! 설정 관리 — sinkhole.toml 파싱 및 런타임 설정
//!
//! [`SinkholeConfig`]는 데몬 전체 설정을 담는 최상위 구조체입니다.
//! 전역 싱글턴 없이 한 번 생성된 값을 각 컴포넌트에 참조로 전달합니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`SINKHOLE_PIPELINE_INGRESS_CAPACITY=128` 형식)
//! 3. 설정 파일 (`sinkhole.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 플러그인 설정
//! `[[plugins]]` 배열의 선언 순서가 곧 등록 순서이며, 미들웨어 적용 순서입니다.
//!
//! ```toml
//! [[plugins]]
//! name = "noise-filter"
//! kind = "type_filter"
//!
//! [plugins.config]
//! deny = ["noise"]
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing::warn;

use crate::error::{ConfigError, PluginError, SinkholeError};

/// 플러그인 설정에 주입되는 로그 레벨 키
pub const PLUGIN_LOG_LEVEL_KEY: &str = "log_level";

/// 허용되는 로그 레벨
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Sinkhole 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkholeConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// HTTP 수신 게이트웨이 설정
    #[serde(default)]
    pub api: ApiConfig,
    /// 이벤트 파이프라인 설정
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 플러그인 목록 (선언 순서 = 등록 순서)
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl SinkholeConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용한 뒤 검증합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SinkholeError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음, 검증 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SinkholeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SinkholeError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                SinkholeError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, SinkholeError> {
        toml::from_str(toml_str).map_err(|e| {
            SinkholeError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 네이밍 규칙: `SINKHOLE_{SECTION}_{FIELD}`,
    /// 플러그인은 `SINKHOLE_PLUGIN_{NAME}_{KEY}` (이미 존재하는 키만 대상)
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SINKHOLE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SINKHOLE_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "SINKHOLE_GENERAL_PID_FILE");

        // API
        override_bool(&mut self.api.enabled, "SINKHOLE_API_ENABLED");
        override_string(&mut self.api.listen_addr, "SINKHOLE_API_LISTEN_ADDR");
        override_usize(&mut self.api.max_body_bytes, "SINKHOLE_API_MAX_BODY_BYTES");

        // Pipeline
        override_usize(
            &mut self.pipeline.ingress_capacity,
            "SINKHOLE_PIPELINE_INGRESS_CAPACITY",
        );
        override_parsed(
            &mut self.pipeline.overflow_policy,
            "SINKHOLE_PIPELINE_OVERFLOW_POLICY",
        );
        override_parsed(&mut self.pipeline.undelivered, "SINKHOLE_PIPELINE_UNDELIVERED");
        override_u64(
            &mut self.pipeline.halt_timeout_secs,
            "SINKHOLE_PIPELINE_HALT_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.pipeline.drain_timeout_secs,
            "SINKHOLE_PIPELINE_DRAIN_TIMEOUT_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "SINKHOLE_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "SINKHOLE_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "SINKHOLE_METRICS_PORT");

        // Plugins
        for plugin in &mut self.plugins {
            plugin.apply_env_overrides();
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), SinkholeError> {
        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", LOG_LEVELS.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.api.enabled {
            if self.api.listen_addr.parse::<SocketAddr>().is_err() {
                return Err(invalid(
                    "api.listen_addr",
                    format!("'{}' is not a socket address", self.api.listen_addr),
                ));
            }
            if self.api.max_body_bytes == 0 {
                return Err(invalid("api.max_body_bytes", "must be greater than 0".to_owned()));
            }
        }

        if self.pipeline.ingress_capacity == 0 {
            return Err(invalid(
                "pipeline.ingress_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.metrics.enabled && !self.metrics.endpoint.starts_with('/') {
            return Err(invalid(
                "metrics.endpoint",
                format!("'{}' must start with '/'", self.metrics.endpoint),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for (index, plugin) in self.plugins.iter().enumerate() {
            if plugin.name.trim().is_empty() {
                return Err(invalid(
                    &format!("plugins[{index}].name"),
                    "must not be empty".to_owned(),
                ));
            }
            if plugin.kind.trim().is_empty() {
                return Err(invalid(
                    &format!("plugins[{index}].kind"),
                    "must not be empty".to_owned(),
                ));
            }
            if !seen.insert(plugin.name.as_str()) {
                return Err(invalid(
                    &format!("plugins[{index}].name"),
                    format!("duplicate plugin name '{}'", plugin.name),
                ));
            }
            if let Some(level) = plugin.config.get(PLUGIN_LOG_LEVEL_KEY) {
                if !level.as_str().is_some_and(|l| LOG_LEVELS.contains(&l)) {
                    return Err(invalid(
                        &format!("plugins[{index}].config.{PLUGIN_LOG_LEVEL_KEY}"),
                        format!("must be one of: {}", LOG_LEVELS.join(", ")),
                    ));
                }
            }
        }

        Ok(())
    }

    /// 활성화된 플러그인 설정을 선언 순서대로 반환합니다.
    ///
    /// 플러그인 설정에 `log_level`이 없으면 전역 로그 레벨을 주입합니다.
    pub fn effective_plugins(&self) -> Vec<PluginConfig> {
        self.plugins
            .iter()
            .filter(|p| p.enabled)
            .map(|p| {
                let mut plugin = p.clone();
                plugin
                    .config
                    .entry(PLUGIN_LOG_LEVEL_KEY)
                    .or_insert_with(|| toml::Value::String(self.general.log_level.clone()));
                plugin
            })
            .collect()
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 사용 안 함)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/sinkhole/sinkhole.pid".to_owned(),
        }
    }
}

/// HTTP 수신 게이트웨이 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 요청 본문 최대 크기 (바이트)
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8080".to_owned(),
            max_body_bytes: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// 이벤트 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 수신 큐 용량
    pub ingress_capacity: usize,
    /// 수신 큐가 가득 찼을 때의 정책
    pub overflow_policy: OverflowPolicy,
    /// 다운스트림 플러그인이 없을 때의 정책
    pub undelivered: UndeliveredPolicy,
    /// 플러그인별 `halt` 제한 시간 (초, 0이면 무제한)
    pub halt_timeout_secs: u64,
    /// 종료 시 진행 중인 전달을 기다리는 최대 시간 (초, 0이면 기다리지 않음)
    pub drain_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingress_capacity: 64,
            overflow_policy: OverflowPolicy::Block,
            undelivered: UndeliveredPolicy::Discard,
            halt_timeout_secs: 0,
            drain_timeout_secs: 5,
        }
    }
}

impl PipelineConfig {
    /// `halt` 제한 시간. `None`이면 모든 플러그인을 끝까지 기다립니다.
    pub fn halt_timeout(&self) -> Option<Duration> {
        (self.halt_timeout_secs > 0).then(|| Duration::from_secs(self.halt_timeout_secs))
    }

    /// 진행 중 전달 대기 시간. `None`이면 기다리지 않습니다.
    pub fn drain_timeout(&self) -> Option<Duration> {
        (self.drain_timeout_secs > 0).then(|| Duration::from_secs(self.drain_timeout_secs))
    }
}

/// 수신 큐 오버플로우 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// 공간이 생길 때까지 생산자를 대기시킴 (배압)
    #[default]
    Block,
    /// 가장 오래된 이벤트를 버리고 새 이벤트를 넣음
    DropOldest,
    /// 새 이벤트를 거부
    Reject,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::DropOldest => write!(f, "drop_oldest"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Self::Block),
            "drop_oldest" => Ok(Self::DropOldest),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown overflow policy '{other}'")),
        }
    }
}

/// 다운스트림 플러그인이 하나도 없을 때 살아남은 이벤트의 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndeliveredPolicy {
    /// 조용히 버림 (debug 로그 + 카운터)
    #[default]
    Discard,
    /// 버리되 warn 로그를 남김
    Warn,
}

impl fmt::Display for UndeliveredPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discard => write!(f, "discard"),
            Self::Warn => write!(f, "warn"),
        }
    }
}

impl FromStr for UndeliveredPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discard" => Ok(Self::Discard),
            "warn" => Ok(Self::Warn),
            other => Err(format!("unknown undelivered policy '{other}'")),
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// 플러그인 하나의 설정
///
/// `config` 테이블은 플러그인이 자기 타입으로 해석합니다
/// ([`PluginConfig::settings`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// 플러그인 인스턴스 이름 (고유)
    pub name: String,
    /// 플러그인 종류 (카탈로그 키)
    pub kind: String,
    /// 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 플러그인 전용 설정
    #[serde(default)]
    pub config: toml::Table,
}

impl PluginConfig {
    /// 빈 설정으로 새 플러그인 설정을 만듭니다.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            enabled: true,
            config: toml::Table::new(),
        }
    }

    /// 설정 키를 추가합니다.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// 설정 테이블을 플러그인 고유 타입으로 해석합니다.
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T, PluginError> {
        toml::Value::Table(self.config.clone())
            .try_into()
            .map_err(|e| PluginError::Init(format!("invalid config for '{}': {e}", self.name)))
    }

    /// 문자열 설정값을 조회합니다.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(toml::Value::as_str)
    }

    /// 주입된 로그 레벨
    pub fn log_level(&self) -> Option<&str> {
        self.get_str(PLUGIN_LOG_LEVEL_KEY)
    }

    /// 이 플러그인이 남길 가장 상세한 로그 레벨. 주입되지 않았으면 `info`
    pub fn max_log_level(&self) -> Result<LevelFilter, PluginError> {
        match self.log_level() {
            None => Ok(LevelFilter::INFO),
            Some(level) if LOG_LEVELS.contains(&level) => level.parse().map_err(|_| {
                PluginError::Init(format!("invalid log_level '{level}' for '{}'", self.name))
            }),
            Some(level) => Err(PluginError::Init(format!(
                "invalid log_level '{level}' for '{}'",
                self.name
            ))),
        }
    }

    /// 이 플러그인의 환경변수 접두어 (`SINKHOLE_PLUGIN_{NAME}`)
    pub fn env_prefix(&self) -> String {
        format!("SINKHOLE_PLUGIN_{}", env_segment(&self.name))
    }

    /// `SINKHOLE_PLUGIN_{NAME}_{KEY}` 환경변수로 기존 키를 덮어씁니다.
    pub fn apply_env_overrides(&mut self) {
        let prefix = self.env_prefix();
        for (key, value) in self.config.iter_mut() {
            let env_key = format!("{prefix}_{}", env_segment(key));
            if let Ok(raw) = std::env::var(&env_key) {
                *value = parse_env_value(&raw);
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn invalid(field: &str, reason: String) -> SinkholeError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

fn env_segment(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn parse_env_value(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(raw.to_owned())
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_parsed<T: FromStr<Err = String>>(target: &mut T, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(reason) => warn!(
                env_key,
                value = val.as_str(),
                reason = reason.as_str(),
                "failed to parse env var, ignoring"
            ),
        }
    }
}
