//! 수신 경계 — 외부에서 제출된 JSON 이벤트 디코딩
//!
//! 와이어 형식:
//! ```text
//! {
//!   "type": "email",
//!   "timestamp": "2024-01-01T00:00:00Z",
//!   "samples": [{"data": "<base64>", "sha256": "<무시됨>", "filename": "a.exe"}],
//!   "source": "api",
//!   "metadata": { ... 임의 JSON ... }
//! }
//! ```
//!
//! 샘플의 `data`는 base64 디코딩되고 `sha256`은 디코딩된 바이트로부터
//! 다시 계산됩니다. 클라이언트가 보낸 다이제스트는 항상 버려집니다.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::DecodeError;
use crate::event::{Event, Sample};

// 명시적 `null`은 필드가 없는 것과 같게 취급합니다.
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    event_type: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    samples: Vec<WireSample>,
    #[serde(default, deserialize_with = "null_as_default")]
    source: String,
    #[serde(default)]
    metadata: Value,
}

// `sha256` 필드는 선언하지 않으므로 역직렬화 시 그대로 무시됩니다.
#[derive(Debug, Deserialize)]
struct WireSample {
    #[serde(default, deserialize_with = "null_as_default")]
    data: String,
    #[serde(default, deserialize_with = "null_as_default")]
    filename: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// 요청 본문을 [`Event`]로 디코딩합니다.
///
/// 빈 본문, JSON 형식 오류, 잘못된 base64 샘플은 [`DecodeError`]로 거부되며
/// 파이프라인에 들어가지 않습니다. `timestamp`가 없으면 수신 시각을 사용합니다.
pub fn decode_event(body: &[u8]) -> Result<Event, DecodeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::MissingBody);
    }

    let wire: WireEvent =
        serde_json::from_slice(body).map_err(|e| DecodeError::Json(e.to_string()))?;

    let samples = wire
        .samples
        .into_iter()
        .enumerate()
        .map(|(index, sample)| {
            let data = BASE64
                .decode(sample.data.as_bytes())
                .map_err(|e| DecodeError::Base64 {
                    index,
                    reason: e.to_string(),
                })?;
            Ok(Sample::new(sample.filename, data))
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    let mut event = Event::new(wire.event_type, wire.source)
        .with_samples(samples)
        .with_metadata(wire.metadata);
    if let Some(timestamp) = wire.timestamp {
        event = event.with_timestamp(timestamp);
    }
    Ok(event)
}
