use log::debug;
use plugin_protocol::{Event, ProtocolError, Response};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};

pub(crate) type Delivery = Result<Response, ProtocolError>;
pub(crate) type StreamDelivery = Result<(Response, Option<mpsc::Receiver<Event>>), ProtocolError>;

enum Slot {
    Unary(oneshot::Sender<Delivery>),
    Stream(oneshot::Sender<StreamDelivery>),
}

#[derive(Default)]
struct Table {
    pending: HashMap<String, Slot>,
    streams: HashMap<String, mpsc::Sender<Event>>,
    failure: Option<ProtocolError>,
}

/// Correlates responses with requests and events with open streams.
///
/// The table is the only state the reader task shares with callers. It is
/// never held across an await.
pub struct Router {
    table: Mutex<Table>,
    stream_capacity: usize,
}

impl Router {
    pub fn new(stream_capacity: usize) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            stream_capacity: stream_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves a slot for `request_id`. Fails fast once the session died.
    pub fn register(&self, request_id: &str) -> Result<oneshot::Receiver<Delivery>, ProtocolError> {
        let mut table = self.lock();
        if let Some(err) = &table.failure {
            return Err(err.clone());
        }
        let (tx, rx) = oneshot::channel();
        table.pending.insert(request_id.to_string(), Slot::Unary(tx));
        Ok(rx)
    }

    /// Like [`Router::register`], but a successful response also opens the
    /// event channel for the stream id it names.
    pub fn register_stream(
        &self,
        request_id: &str,
    ) -> Result<oneshot::Receiver<StreamDelivery>, ProtocolError> {
        let mut table = self.lock();
        if let Some(err) = &table.failure {
            return Err(err.clone());
        }
        let (tx, rx) = oneshot::channel();
        table.pending.insert(request_id.to_string(), Slot::Stream(tx));
        Ok(rx)
    }

    /// Evicts a slot whose caller gave up. A late response is then dropped.
    pub fn cancel(&self, request_id: &str) {
        self.lock().pending.remove(request_id);
    }

    pub fn deliver(&self, response: Response) {
        let mut table = self.lock();
        let slot = match table.pending.remove(&response.request_id) {
            Some(slot) => slot,
            None => {
                debug!("discarding response for unknown request {}", response.request_id);
                return;
            }
        };
        match slot {
            Slot::Unary(tx) => {
                let _ = tx.send(Ok(response));
            }
            Slot::Stream(tx) => {
                let stream_id = response
                    .output
                    .as_ref()
                    .and_then(|o| o.get("stream_id"))
                    .and_then(|v| v.as_str())
                    .filter(|id| !id.is_empty())
                    .map(str::to_string);
                let events = match (response.ok, stream_id) {
                    (true, Some(id)) => {
                        // Opened under the lock so events that follow the
                        // response on the wire always find their channel.
                        let (ev_tx, ev_rx) = mpsc::channel(self.stream_capacity);
                        table.streams.insert(id, ev_tx);
                        Some(ev_rx)
                    }
                    _ => None,
                };
                let _ = tx.send(Ok((response, events)));
            }
        }
    }

    /// Routes an event to its stream, waiting while the consumer is behind.
    pub async fn publish(&self, event: Event) {
        let sender = {
            let mut table = self.lock();
            if event.is_end() {
                table.streams.remove(&event.stream_id)
            } else {
                table.streams.get(&event.stream_id).cloned()
            }
        };
        let sender = match sender {
            Some(s) => s,
            None => {
                debug!("discarding event for unknown stream {}", event.stream_id);
                return;
            }
        };
        let stream_id = event.stream_id.clone();
        if sender.send(event).await.is_err() {
            // consumer went away
            self.lock().streams.remove(&stream_id);
        }
    }

    /// Fails every pending slot and closes every stream.
    ///
    /// The first failure sticks: later registrations get a copy of it.
    pub fn fail_all(&self, err: ProtocolError) {
        let mut table = self.lock();
        let err = table.failure.get_or_insert(err).clone();
        for (_, slot) in table.pending.drain() {
            match slot {
                Slot::Unary(tx) => {
                    let _ = tx.send(Err(err.clone()));
                }
                Slot::Stream(tx) => {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
        table.streams.clear();
    }

    pub fn failure(&self) -> Option<ProtocolError> {
        self.lock().failure.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn open_streams(&self) -> usize {
        self.lock().streams.len()
    }
}
