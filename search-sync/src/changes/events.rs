//! Change payloads.

use serde::Deserialize;
use serde_json::Map;
use tracing::warn;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::signals::Signal;
use crate::store::Row;

/// What happened to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Save,
    Delete,
}

/// One row change, e.g.
/// `{"op": "delete", "model": "company", "pk": "<uuid>", "txid": 4711}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub model: String,
    pub pk: Uuid,
    /// Transaction that made the change. Consecutive changes with the same
    /// id are applied as one unit of work.
    #[serde(default)]
    pub txid: Option<i64>,
}

impl ChangeEvent {
    pub fn save(model: impl Into<String>, pk: Uuid, txid: Option<i64>) -> Self {
        Self {
            op: ChangeOp::Save,
            model: model.into(),
            pk,
            txid,
        }
    }

    pub fn delete(model: impl Into<String>, pk: Uuid, txid: Option<i64>) -> Self {
        Self {
            op: ChangeOp::Delete,
            model: model.into(),
            pk,
            txid,
        }
    }

    pub fn from_payload(payload: &str) -> Result<Self, StoreError> {
        serde_json::from_str(payload)
            .map_err(|e| StoreError::decode(format!("Invalid change payload {}: {}", payload, e)))
    }

    /// Whether `other` belongs to the same transaction.
    pub fn same_transaction(&self, other: &Self) -> bool {
        self.txid.is_some() && self.txid == other.txid
    }

    /// The signal announcing this change. Receivers only need the key.
    pub fn to_signal(&self) -> Signal {
        let row = Row::new(self.model.clone(), self.pk, Map::new());
        match self.op {
            ChangeOp::Save => Signal::post_save(row),
            ChangeOp::Delete => Signal::post_delete(row),
        }
    }
}

/// Decode payloads in order, skipping the ones that do not parse.
pub fn parse_payloads<'a>(payloads: impl IntoIterator<Item = &'a str>) -> Vec<ChangeEvent> {
    payloads
        .into_iter()
        .filter_map(|payload| match ChangeEvent::from_payload(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, "Skipping change notification");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalKind;

    #[test]
    fn test_from_payload() {
        let pk = Uuid::new_v4();
        let payload = format!(r#"{{"op": "delete", "model": "company", "pk": "{}", "txid": 7}}"#, pk);

        let event = ChangeEvent::from_payload(&payload).unwrap();

        assert_eq!(event, ChangeEvent::delete("company", pk, Some(7)));
        assert_eq!(event.to_signal().kind, SignalKind::PostDelete);
        assert_eq!(event.to_signal().row.pk, pk);
    }

    #[test]
    fn test_txid_is_optional() {
        let pk = Uuid::new_v4();
        let event =
            ChangeEvent::from_payload(&format!(r#"{{"op": "save", "model": "contact", "pk": "{}"}}"#, pk))
                .unwrap();

        assert_eq!(event.txid, None);
        assert!(!event.same_transaction(&event.clone()));
    }

    #[test]
    fn test_parse_payloads_skips_invalid() {
        let pk = Uuid::new_v4();
        let valid = format!(r#"{{"op": "save", "model": "company", "pk": "{}"}}"#, pk);

        let events = parse_payloads([
            "not json",
            r#"{"op": "truncate", "model": "company", "pk": "x"}"#,
            valid.as_str(),
        ]);

        assert_eq!(events, vec![ChangeEvent::save("company", pk, None)]);
    }
}
