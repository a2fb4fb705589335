//! Agent Executor: the server-side adapter that wraps one agent's streaming
//! logic and enforces the "exactly one final event per task" invariant
//! (spec.md §3, §5).
//!
//! Generalizes the reference service's `ExecutionStreamHandler` (a fixed
//! `Started`/`Progress`/`Completed`/`Failed` vocabulary pushed onto an mpsc
//! channel guarded by an `active` flag) to the richer [`crate::a2a::Event`]
//! union, with the guard enforcing finality instead of mere open/closed state.

use crate::a2a::Event;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// An agent's executable unit of work: given a task id and an input message,
/// stream [`Event`]s describing its progress until exactly one final event
/// has been emitted.
#[async_trait::async_trait]
pub trait AgentLogic: Send + Sync {
    async fn run(&self, task_id: String, input: serde_json::Value, sink: EventSink);
}

/// Channel handle passed to agent logic; enforces that at most one final
/// event is ever sent for a task, per spec.md §5 "at-most-one final event
/// per node".
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
    finished: Arc<AtomicBool>,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("task already reached a final event")]
    AlreadyFinal,
    #[error("receiver dropped")]
    Closed,
}

impl EventSink {
    pub fn send(&self, event: Event) -> Result<(), SinkError> {
        if self.finished.load(Ordering::SeqCst) {
            warn!(task_id = %event.task_id(), "dropped event sent after task finalized");
            return Err(SinkError::AlreadyFinal);
        }
        if event.is_final() {
            self.finished.store(true, Ordering::SeqCst);
        }
        self.tx.try_send(event).map_err(|_| SinkError::Closed)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Drives one [`AgentLogic`] invocation to completion, yielding its events
/// on an mpsc channel and guaranteeing a final event is always observed:
/// if the logic returns without sending one, a synthetic `Error` event is
/// appended so callers never hang waiting on a task that silently died.
pub struct AgentExecutor {
    buffer_size: usize,
}

impl Default for AgentExecutor {
    fn default() -> Self {
        Self { buffer_size: 64 }
    }
}

impl AgentExecutor {
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size }
    }

    pub fn execute(
        &self,
        logic: Arc<dyn AgentLogic>,
        task_id: String,
    ) -> (mpsc::Sender<serde_json::Value>, mpsc::Receiver<Event>) {
        let (input_tx, mut input_rx) = mpsc::channel::<serde_json::Value>(1);
        let (event_tx, event_rx) = mpsc::channel(self.buffer_size);
        let finished = Arc::new(AtomicBool::new(false));

        let sink = EventSink {
            tx: event_tx.clone(),
            finished: finished.clone(),
        };

        tokio::spawn(async move {
            let Some(input) = input_rx.recv().await else {
                return;
            };
            let run_task_id = task_id.clone();
            logic.run(run_task_id, input, sink.clone()).await;

            if !finished.load(Ordering::SeqCst) {
                warn!(%task_id, "agent logic returned without a final event; synthesizing one");
                let _ = sink.send(Event::Error {
                    task_id,
                    kind: "Fatal".to_string(),
                    detail: "agent logic returned without emitting a final event".to_string(),
                    recoverable: false,
                });
            }
        });

        (input_tx, event_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl AgentLogic for Echo {
        async fn run(&self, task_id: String, input: serde_json::Value, sink: EventSink) {
            let _ = sink.send(Event::StreamingResponse {
                task_id: task_id.clone(),
                parts: vec![crate::a2a::MessagePart::data(input)],
                is_final: true,
            });
        }
    }

    struct Silent;

    #[async_trait::async_trait]
    impl AgentLogic for Silent {
        async fn run(&self, _task_id: String, _input: serde_json::Value, _sink: EventSink) {}
    }

    #[tokio::test]
    async fn echo_logic_emits_one_final_event() {
        let executor = AgentExecutor::default();
        let (input_tx, mut events) = executor.execute(Arc::new(Echo), "t1".to_string());
        input_tx.send(serde_json::json!({"x": 1})).await.unwrap();

        let event = events.recv().await.unwrap();
        assert!(event.is_final());
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn silent_logic_gets_a_synthesized_final_error() {
        let executor = AgentExecutor::default();
        let (input_tx, mut events) = executor.execute(Arc::new(Silent), "t1".to_string());
        input_tx.send(serde_json::json!({})).await.unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(event, Event::Error { .. }));
        assert!(event.is_final());
    }

    #[test]
    fn sink_rejects_events_sent_after_final() {
        let (tx, _rx) = mpsc::channel(4);
        let sink = EventSink {
            tx,
            finished: Arc::new(AtomicBool::new(false)),
        };
        sink.send(Event::Error {
            task_id: "t1".to_string(),
            kind: "x".to_string(),
            detail: "y".to_string(),
            recoverable: false,
        })
        .unwrap();

        let result = sink.send(Event::StatusUpdate {
            task_id: "t1".to_string(),
            state: "done".to_string(),
            message: None,
            is_final: true,
        });
        assert!(matches!(result, Err(SinkError::AlreadyFinal)));
    }
}
