//! 이벤트 모델 — 파이프라인을 흐르는 기본 단위
//!
//! [`Event`]는 관측된 활동 하나를 나타내며, 0개 이상의 [`Sample`]
//! (첨부 파일, 드롭된 바이너리 등)을 가질 수 있습니다.
//!
//! # 불변성
//! 팬아웃 단계에서 하나의 이벤트가 여러 다운스트림 태스크에 동시에
//! 전달되므로, 이벤트는 항상 `Arc<Event>`로 공유되고 제자리에서 수정되지 않습니다.
//! 이벤트를 바꾸려는 단계는 [`Event::with_metadata`] 등으로 새 값을 만듭니다.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

// --- 이벤트 타입 상수 ---

/// 이메일 이벤트 타입
pub const EVENT_TYPE_EMAIL: &str = "email";
/// 요청(HTTP/DNS 등) 이벤트 타입
pub const EVENT_TYPE_REQUEST: &str = "request";
/// 하트비트 이벤트 타입
pub const EVENT_TYPE_HEARTBEAT: &str = "heartbeat";

/// 이벤트 메타데이터 — 임의 구조의 JSON 값
///
/// 참조로 전달되며 여러 이벤트 사이에서 공유될 수 있습니다.
pub type Metadata = Arc<Value>;

/// 주어진 바이트의 SHA-256 다이제스트를 소문자 hex 문자열로 반환합니다.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// 이벤트에 첨부되는 바이너리 샘플
///
/// 샘플은 다이제스트로 식별됩니다. `sha256`은 항상 `data`의 다이제스트와
/// 일치해야 하므로 필드를 직접 조립하지 말고 [`Sample::new`]를 사용합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    /// 원시 바이트 (JSON 직렬화 시 base64)
    #[serde(serialize_with = "serialize_base64")]
    pub data: Bytes,
    /// `data`의 소문자 hex SHA-256
    pub sha256: String,
    /// 원본 파일 이름
    #[serde(rename = "filename")]
    pub file_name: String,
}

impl Sample {
    /// 새 샘플을 만들고 SHA-256을 계산합니다.
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let sha256 = sha256_hex(&data);
        Self {
            data,
            sha256,
            file_name: file_name.into(),
        }
    }

    /// 저장된 다이제스트가 데이터와 일치하는지 확인합니다.
    pub fn verify(&self) -> bool {
        self.sha256 == sha256_hex(&self.data)
    }

    /// 샘플 크기 (바이트)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 빈 샘플인지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 파이프라인을 흐르는 이벤트
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// 내부 추적용 ID (UUID v4, 와이어 형식에는 포함되지 않음)
    #[serde(skip)]
    pub id: String,
    /// 이벤트 타입 ("email", "request" 등 자유 형식)
    #[serde(rename = "type")]
    pub event_type: String,
    /// 이벤트 발생 시각
    pub timestamp: DateTime<Utc>,
    /// 첨부 샘플 (순서 유지)
    pub samples: Vec<Sample>,
    /// 생성자 식별자 (강제되지 않음)
    pub source: String,
    /// 임의 구조의 메타데이터
    #[serde(serialize_with = "serialize_metadata")]
    pub metadata: Metadata,
}

impl Event {
    /// 현재 시각으로 새 이벤트를 생성합니다.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            samples: Vec::new(),
            source: source.into(),
            metadata: Arc::new(Value::Null),
        }
    }

    /// 타임스탬프를 지정합니다.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 샘플 하나를 추가합니다.
    pub fn with_sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }

    /// 샘플 목록을 교체합니다.
    pub fn with_samples(mut self, samples: Vec<Sample>) -> Self {
        self.samples = samples;
        self
    }

    /// 메타데이터를 교체한 새 이벤트를 반환합니다.
    ///
    /// 기존 메타데이터는 다른 참조자에게 그대로 남아 있습니다.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Arc::new(metadata);
        self
    }

    /// 메타데이터를 읽습니다.
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// 이벤트 타입이 일치하는지 확인합니다.
    pub fn is_type(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    /// 모든 샘플의 다이제스트가 유효한지 확인합니다.
    pub fn samples_verified(&self) -> bool {
        self.samples.iter().all(Sample::verify)
    }

    /// 샘플 다이제스트 목록
    pub fn sample_digests(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.sha256.as_str()).collect()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event[{}] type={} source={} samples={}",
            &self.id[..8.min(self.id.len())],
            self.event_type,
            self.source,
            self.samples.len(),
        )
    }
}

fn serialize_base64<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(data))
}

fn serialize_metadata<S: Serializer>(
    metadata: &Metadata,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    metadata.as_ref().serialize(serializer)
}
