//! JSON-RPC history ledger.
//!
//! Every request with an id gets one record: `absent -> pending -> resolved`.
//! A second request with the same id, or a second response, is rejected rather
//! than overwriting the record. This is what makes at-least-once relay delivery
//! safe. Records are persisted so redelivery after a restart is still caught.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rpc::{RpcId, RpcRequest, RpcResponse};
use crate::storage::{CodableStore, KeyValueStorage, StorageError};
use crate::Topic;

const STORE_PREFIX: &str = "history";

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("request has no id")]
    UnidentifiedRequest,
    #[error("duplicate request id {0}")]
    RequestDuplicateNotAllowed(RpcId),
    #[error("response has no id")]
    UnidentifiedResponse,
    #[error("no pending request for response {0}")]
    RequestMatchingResponseNotFound(RpcId),
    #[error("duplicate response for {0}")]
    ResponseDuplicateNotAllowed(RpcId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Which side emitted the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcHistoryRecord {
    pub id: RpcId,
    pub topic: Topic,
    pub origin: Origin,
    pub request: RpcRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<RpcResponse>,
    pub created_at: i64,
}

impl RpcHistoryRecord {
    pub fn is_pending(&self) -> bool {
        self.response.is_none()
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }
}

/// Persistent, per-id serialized request/response ledger.
pub struct RpcHistory {
    records: CodableStore<RpcHistoryRecord>,
}

impl RpcHistory {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            records: CodableStore::new(storage, STORE_PREFIX),
        }
    }

    /// Record a request. Fails if it has no id or the id is already known.
    pub fn set(&self, request: &RpcRequest, topic: &Topic, origin: Origin) -> Result<(), HistoryError> {
        let id = request.id.clone().ok_or(HistoryError::UnidentifiedRequest)?;
        self.records.modify(&id.as_key(), |slot| {
            if slot.is_some() {
                debug!(%id, %topic, ?origin, "duplicate request rejected");
                return Err(HistoryError::RequestDuplicateNotAllowed(id.clone()));
            }
            *slot = Some(RpcHistoryRecord {
                id: id.clone(),
                topic: topic.clone(),
                origin,
                request: request.clone(),
                response: None,
                created_at: crate::unix_now(),
            });
            Ok(())
        })
    }

    /// Attach `response` to its pending request. Returns the resolved record.
    pub fn resolve(&self, response: &RpcResponse) -> Result<RpcHistoryRecord, HistoryError> {
        let id = response.id.clone().ok_or(HistoryError::UnidentifiedResponse)?;
        self.records.modify(&id.as_key(), |slot| match slot {
            None => Err(HistoryError::RequestMatchingResponseNotFound(id.clone())),
            Some(record) if record.response.is_some() => {
                debug!(%id, "duplicate response rejected");
                Err(HistoryError::ResponseDuplicateNotAllowed(id.clone()))
            }
            Some(record) => {
                record.response = Some(response.clone());
                Ok(record.clone())
            }
        })
    }

    pub fn get(&self, id: &RpcId) -> Result<Option<RpcHistoryRecord>, HistoryError> {
        Ok(self.records.get(&id.as_key())?)
    }

    /// All unresolved records, oldest first.
    pub fn get_pending(&self) -> Result<Vec<RpcHistoryRecord>, HistoryError> {
        let mut pending: Vec<_> = self
            .records
            .get_all()?
            .into_iter()
            .filter(RpcHistoryRecord::is_pending)
            .collect();
        pending.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(pending)
    }

    /// Unresolved records whose method is one of `methods`.
    pub fn get_pending_for_methods(&self, methods: &[&str]) -> Result<Vec<RpcHistoryRecord>, HistoryError> {
        Ok(self
            .get_pending()?
            .into_iter()
            .filter(|r| methods.contains(&r.method()))
            .collect())
    }

    /// Remove every record on the given topics.
    pub fn delete_all(&self, topics: &[Topic]) -> Result<usize, HistoryError> {
        let mut removed = 0;
        for record in self.records.get_all()? {
            if topics.contains(&record.topic) {
                self.records.delete(&record.id.as_key())?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "deleted history records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::JsonRpcError;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn history() -> RpcHistory {
        RpcHistory::new(Arc::new(InMemoryStorage::new()))
    }

    fn request(id: i64) -> RpcRequest {
        RpcRequest::with_id(RpcId::Number(id), "wc_sessionRequest", json!({}))
    }

    #[test]
    fn test_duplicate_request_rejected() {
        let history = history();
        let topic = Topic::generate();
        history.set(&request(1), &topic, Origin::Local).unwrap();
        let err = history.set(&request(1), &topic, Origin::Remote).unwrap_err();
        assert!(matches!(err, HistoryError::RequestDuplicateNotAllowed(RpcId::Number(1))));
        assert_eq!(history.get(&RpcId::Number(1)).unwrap().unwrap().origin, Origin::Local);
    }

    #[test]
    fn test_notification_is_not_tracked() {
        let history = history();
        let note = RpcRequest::notification("m", json!({}));
        assert!(matches!(
            history.set(&note, &Topic::generate(), Origin::Local),
            Err(HistoryError::UnidentifiedRequest)
        ));
    }

    #[test]
    fn test_resolve_lifecycle() {
        let history = history();
        let topic = Topic::generate();
        let response = RpcResponse::success(RpcId::Number(2), json!({}));

        assert!(matches!(
            history.resolve(&response),
            Err(HistoryError::RequestMatchingResponseNotFound(_))
        ));

        history.set(&request(2), &topic, Origin::Local).unwrap();
        let record = history.resolve(&response).unwrap();
        assert_eq!(record.response, Some(response.clone()));

        let err = history.resolve(&response).unwrap_err();
        assert!(matches!(err, HistoryError::ResponseDuplicateNotAllowed(_)));

        // a different second response does not overwrite the first
        let other = RpcResponse::error(RpcId::Number(2), JsonRpcError::new(5000, "no"));
        assert!(history.resolve(&other).is_err());
        assert_eq!(history.get(&RpcId::Number(2)).unwrap().unwrap().response, Some(response));
    }

    #[test]
    fn test_response_without_id() {
        let history = history();
        let response = RpcResponse {
            id: None,
            outcome: crate::rpc::RpcResult::Error(JsonRpcError::parse_error()),
        };
        assert!(matches!(history.resolve(&response), Err(HistoryError::UnidentifiedResponse)));
    }

    #[test]
    fn test_pending_filters_and_delete_by_topic() {
        let history = history();
        let t1 = Topic::generate();
        let t2 = Topic::generate();
        history.set(&request(1), &t1, Origin::Remote).unwrap();
        history
            .set(&RpcRequest::with_id(RpcId::Number(2), "wc_sessionPing", json!({})), &t1, Origin::Local)
            .unwrap();
        history.set(&request(3), &t2, Origin::Remote).unwrap();
        history.resolve(&RpcResponse::success(RpcId::Number(3), json!({}))).unwrap();

        let pending = history.get_pending().unwrap();
        assert_eq!(pending.len(), 2);
        let requests = history.get_pending_for_methods(&["wc_sessionRequest"]).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, RpcId::Number(1));

        assert_eq!(history.delete_all(&[t1.clone()]).unwrap(), 2);
        assert!(history.get(&RpcId::Number(1)).unwrap().is_none());
        assert!(history.get(&RpcId::Number(3)).unwrap().is_some());
    }

    #[test]
    fn test_survives_restart() {
        let storage: Arc<dyn KeyValueStorage> = Arc::new(InMemoryStorage::new());
        let topic = Topic::generate();
        RpcHistory::new(storage.clone())
            .set(&request(5), &topic, Origin::Remote)
            .unwrap();
        let reopened = RpcHistory::new(storage);
        assert!(reopened.set(&request(5), &topic, Origin::Remote).is_err());
    }

    #[test]
    fn test_concurrent_duplicates_resolve_once() {
        let history = Arc::new(history());
        let topic = Topic::generate();
        history.set(&request(7), &topic, Origin::Local).unwrap();
        let response = RpcResponse::success(RpcId::Number(7), json!({}));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let history = history.clone();
                let response = response.clone();
                std::thread::spawn(move || history.resolve(&response).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
