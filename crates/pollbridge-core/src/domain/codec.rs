//! Payload decode.

use super::message::Payload;

/// Decode a message body.
///
/// JSON として読めれば `Payload::Structured`、読めなければ入力をそのまま
/// `Payload::Raw` で返す。失敗はしない。
pub fn decode(body: &str) -> Payload {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => Payload::Structured(value),
        Err(_) => Payload::Raw(body.to_string()),
    }
}
