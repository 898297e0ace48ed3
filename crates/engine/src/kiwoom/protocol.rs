//! JSON frames of the Kiwoom condition-search websocket channel.
//!
//! Every frame carries a `trnm` transaction name. Requests we send are
//! `LOGIN`, `CNSRLST` (catalog) and `CNSRREQ` (execute a saved condition).
//! Responses echo the `trnm`, add a numeric `return_code` (0 = success) and a
//! `data` payload. The server also sends `PING` frames that must be echoed.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use common::{ConditionInfo, Error, Result};

pub const TRNM_LOGIN: &str = "LOGIN";
pub const TRNM_CONDITION_LIST: &str = "CNSRLST";
pub const TRNM_CONDITION_QUERY: &str = "CNSRREQ";
pub const TRNM_PING: &str = "PING";

/// Jmcode field holding the symbol when query rows arrive as objects.
const SYMBOL_FIELD: &str = "9001";

/// Frames sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "trnm")]
pub enum OutboundFrame<'a> {
    #[serde(rename = "LOGIN")]
    Login { token: &'a str },

    #[serde(rename = "CNSRLST")]
    ConditionList,

    #[serde(rename = "CNSRREQ")]
    ExecuteQuery {
        seq: &'a str,
        /// "0" = one-shot search, no real-time registration.
        search_type: &'static str,
        /// "K" = KRX.
        stex_tp: &'static str,
        cont_yn: &'static str,
        next_key: &'static str,
    },
}

impl<'a> OutboundFrame<'a> {
    pub fn execute(condition_id: &'a str) -> Self {
        OutboundFrame::ExecuteQuery {
            seq: condition_id,
            search_type: "0",
            stex_tp: "K",
            cont_yn: "N",
            next_key: "",
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Correlation key of a response frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponseKey {
    Login,
    ConditionList,
    Query(String),
}

/// Any frame received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    pub trnm: String,
    #[serde(default, deserialize_with = "code_from_number_or_string")]
    pub return_code: i64,
    #[serde(default)]
    pub return_msg: Option<String>,
    #[serde(default, deserialize_with = "opt_string_from_scalar")]
    pub seq: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("malformed frame: {e}")))
    }

    pub fn is_ping(&self) -> bool {
        self.trnm == TRNM_PING
    }

    pub fn is_success(&self) -> bool {
        self.return_code == 0
    }

    pub fn message(&self) -> String {
        self.return_msg.clone().unwrap_or_default()
    }

    /// Which pending request this frame answers, if any.
    pub fn key(&self) -> Option<ResponseKey> {
        match self.trnm.as_str() {
            TRNM_LOGIN => Some(ResponseKey::Login),
            TRNM_CONDITION_LIST => Some(ResponseKey::ConditionList),
            TRNM_CONDITION_QUERY => self.seq.clone().map(ResponseKey::Query),
            _ => None,
        }
    }

    /// Catalog payload: `[[seq, name], ...]`.
    pub fn conditions(&self) -> Result<Vec<ConditionInfo>> {
        rows(&self.data)?
            .iter()
            .map(|row| match row.as_array().map(Vec::as_slice) {
                Some([seq, name, ..]) => Ok(ConditionInfo {
                    sequence_id: scalar_to_string(seq)
                        .ok_or_else(|| Error::Protocol(format!("bad condition seq: {seq}")))?,
                    name: scalar_to_string(name).unwrap_or_default(),
                }),
                _ => Err(Error::Protocol(format!("bad catalog row: {row}"))),
            })
            .collect()
    }

    /// Query payload: symbol strings or objects with the symbol under `9001`.
    pub fn symbols(&self) -> Result<Vec<String>> {
        rows(&self.data)?
            .iter()
            .map(|row| {
                let raw = match row {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(map) => map.get(SYMBOL_FIELD).and_then(Value::as_str),
                    _ => None,
                };
                raw.map(normalize_symbol)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| Error::Protocol(format!("bad symbol row: {row}")))
            })
            .collect()
    }
}

/// Trim and drop the `A` prefix the channel puts in front of six-digit KRX codes.
pub fn normalize_symbol(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_prefix('A') {
        Some(code) if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) => {
            code.to_string()
        }
        _ => trimmed.to_string(),
    }
}

fn rows(data: &Value) -> Result<&[Value]> {
    match data {
        Value::Null => Ok(&[]),
        Value::Array(items) => Ok(items.as_slice()),
        other => Err(Error::Protocol(format!("expected array payload, got {other}"))),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn code_from_number_or_string<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    match Value::deserialize(de)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("non-integer return_code {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("non-numeric return_code '{s}'"))),
        other => Err(serde::de::Error::custom(format!("unexpected return_code {other}"))),
    }
}

fn opt_string_from_scalar<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(scalar_to_string(&Value::deserialize(de)?).map(|s| s.trim().to_string()))
}
