// src/network/jrpc/handler_map.rs
//! Pending calls waiting for their response.

use crate::network::connection::CxnHandle;
use crate::network::jrpc::message::Message;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Runs once with the response to a tracked call
pub type ResponseHandler = Box<dyn FnOnce(CxnHandle, Message) + Send>;

struct PendingCall {
    id: Value,
    created: Instant,
    handler: ResponseHandler,
}

/// Response handlers keyed by call id
///
/// Several calls may share an id; each response pops exactly one of them.
#[derive(Default)]
pub struct HandlerMap {
    calls: HashMap<String, Vec<PendingCall>>,
}

fn key(id: &Value) -> String {
    id.to_string()
}

impl HandlerMap {
    /// Creates an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for responses with `id`
    pub fn add(&mut self, id: &Value, handler: ResponseHandler) {
        self.calls.entry(key(id)).or_default().push(PendingCall {
            id: id.clone(),
            created: Instant::now(),
            handler,
        });
    }

    /// Removes one handler registered for `id`
    pub fn try_pop(&mut self, id: &Value) -> Option<ResponseHandler> {
        let key = key(id);
        let calls = self.calls.get_mut(&key)?;
        let call = calls.pop();
        if calls.is_empty() {
            self.calls.remove(&key);
        }
        call.map(|c| c.handler)
    }

    /// Drops every call older than `max_age` without running it
    ///
    /// # Returns
    /// Number of calls dropped
    pub fn remove_older_than(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.calls.retain(|_, calls| {
            calls.retain(|call| {
                let expired = now.duration_since(call.created) > max_age;
                if expired {
                    log::debug!("Dropping unanswered call with id {}", call.id);
                    removed += 1;
                }
                !expired
            });
            !calls.is_empty()
        });
        removed
    }

    /// Whether any handler is registered for `id`
    pub fn contains(&self, id: &Value) -> bool {
        self.calls.contains_key(&key(id))
    }

    /// Total number of pending calls
    pub fn len(&self) -> usize {
        self.calls.values().map(Vec::len).sum()
    }

    /// Whether no call is pending
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(hits: &Arc<AtomicUsize>) -> ResponseHandler {
        let hits = hits.clone();
        Box::new(move |_, _| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_each_response_pops_one_handler() {
        let mut map = HandlerMap::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            map.add(&json!(7), counting(&hits));
        }
        assert_eq!(map.len(), 3);

        for expected in 1..=3 {
            let handler = map.try_pop(&json!(7)).expect("one handler per response");
            handler(CxnHandle::default(), Message::with_result(json!(7), json!(true)));
            assert_eq!(hits.load(Ordering::SeqCst), expected);
        }
        assert!(map.try_pop(&json!(7)).is_none(), "fourth response is untracked");
        assert!(map.is_empty());
    }

    #[test]
    fn test_ids_are_typed() {
        let mut map = HandlerMap::new();
        map.add(&json!(1), Box::new(|_, _| {}));
        assert!(!map.contains(&json!("1")), "string and number ids differ");
        assert!(map.contains(&json!(1)));
    }

    #[test]
    fn test_remove_older_than() {
        let mut map = HandlerMap::new();
        map.add(&json!(1), Box::new(|_, _| {}));
        std::thread::sleep(Duration::from_millis(20));
        map.add(&json!(2), Box::new(|_, _| {}));

        assert_eq!(map.remove_older_than(Duration::from_millis(10)), 1);
        assert!(!map.contains(&json!(1)), "old call is gone");
        assert!(map.contains(&json!(2)), "young call survives");
    }
}
