use model::{DdlEvent, Protocol, Ts};
use std::time::SystemTime;

const MAX_VARINT32_LEN: usize = 5;
const MAX_VARINT64_LEN: usize = 10;

/// Fixed per-record framing overhead the bus client adds on top of key,
/// value and headers. Counted pessimistically so that `length()` is an upper
/// bound on the wire size.
pub const MAX_RECORD_OVERHEAD: usize = 5 * MAX_VARINT32_LEN + MAX_VARINT64_LEN + 1;

/// Ack callback attached to a message; invoked exactly once by the producer
/// after broker acknowledgement.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Chain `callbacks` into a single callback firing them in order.
pub fn compose_callbacks(callbacks: Vec<Callback>) -> Callback {
    Box::new(move || {
        for callback in callbacks {
            callback();
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Row,
    Ddl,
    Resolved,
}

/// The sharding key for per-destination ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartitionKey {
    pub topic: String,
    pub partition: i32,
}

/// An outbound batch envelope: encoded key and value bytes plus the metadata
/// the producer and its callbacks need.
pub struct Message {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub ts: Ts,
    pub table_id: i64,
    pub handle_keys: Vec<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub ty: MessageType,
    pub protocol: Protocol,
    pub partition_key: Option<String>,
    pub callback: Option<Callback>,
    rows_count: usize,
}

impl Message {
    pub fn new(
        protocol: Protocol,
        key: Vec<u8>,
        value: Vec<u8>,
        ts: Ts,
        ty: MessageType,
        schema: Option<String>,
        table: Option<String>,
    ) -> Self {
        Self {
            key,
            value,
            ts,
            table_id: 0,
            handle_keys: Vec::new(),
            schema,
            table,
            ty,
            protocol,
            partition_key: None,
            callback: None,
            rows_count: 0,
        }
    }

    pub fn new_ddl(protocol: Protocol, key: Vec<u8>, value: Vec<u8>, event: &DdlEvent) -> Self {
        Self::new(
            protocol,
            key,
            value,
            event.commit_ts,
            MessageType::Ddl,
            Some(event.table_info.name.schema.clone()),
            Some(event.table_info.name.table.clone()),
        )
    }

    pub fn new_resolved(protocol: Protocol, key: Vec<u8>, value: Vec<u8>, ts: Ts) -> Self {
        Self::new(protocol, key, value, ts, MessageType::Resolved, None, None)
    }

    /// A conservative upper bound on the message's wire size: headers with
    /// worst-case varints, key, value, and the fixed record overhead.
    pub fn length(&self) -> usize {
        let headers: usize = self
            .headers()
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2 * MAX_VARINT32_LEN)
            .sum();
        headers + self.key.len() + self.value.len() + MAX_RECORD_OVERHEAD
    }

    /// Headers published with every record.
    pub fn headers(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        vec![
            (b"tableID".to_vec(), self.table_id.to_string().into_bytes()),
            (b"commitTs".to_vec(), self.ts.to_string().into_bytes()),
            (b"handleKey".to_vec(), self.handle_keys.join(",").into_bytes()),
        ]
    }

    /// Wall-clock time of the message's commit-ts.
    pub fn physical_time(&self) -> SystemTime {
        model::physical_time(self.ts)
    }

    pub fn rows_count(&self) -> usize {
        self.rows_count
    }

    pub fn set_rows_count(&mut self, count: usize) {
        self.rows_count = count;
    }

    pub fn inc_rows_count(&mut self) {
        self.rows_count += 1;
    }

    /// Invoke the ack callback, if one is attached.
    pub fn ack(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("ts", &self.ts)
            .field("ty", &self.ty)
            .field("protocol", &self.protocol)
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("key_len", &self.key.len())
            .field("value_len", &self.value.len())
            .field("rows_count", &self.rows_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_is_a_conservative_upper_bound() {
        let mut msg = Message::new(
            Protocol::Open,
            vec![0u8; 10],
            vec![0u8; 100],
            0,
            MessageType::Row,
            None,
            None,
        );
        msg.table_id = 42;
        msg.handle_keys = vec!["id".to_string()];

        let headers: usize = msg
            .headers()
            .iter()
            .map(|(k, v)| k.len() + v.len() + 10)
            .sum();
        assert_eq!(msg.length(), headers + 10 + 100 + MAX_RECORD_OVERHEAD);
        assert_eq!(MAX_RECORD_OVERHEAD, 36);
    }

    #[test]
    fn composed_callbacks_fire_in_order() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let fired = Arc::new(AtomicUsize::new(0));
        let callbacks: Vec<Callback> = (0..3)
            .map(|i| {
                let order = order.clone();
                let fired = fired.clone();
                Box::new(move || {
                    order.lock().unwrap().push(i);
                    fired.fetch_add(1, Ordering::SeqCst);
                }) as Callback
            })
            .collect();

        compose_callbacks(callbacks)();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
