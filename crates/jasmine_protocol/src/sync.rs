//! Lifecycle synchronizer.
//!
//! Every node of the tree owns exactly two events in the stream: its
//! `*Started` event and, after all descendant pairs, its `*Done` event.
//! [`SyncScope`] consumes the first on entry and the second on exit, checking
//! that both carry the expected event name and node id. There is no
//! resynchronization: the first mismatch is fatal for the run.

use std::collections::VecDeque;

use thiserror::Error;

use crate::wire::{EventData, NodeKind, RunEvent};

/// Violations of the event stream contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("expected {expected_event} for '{expected_id}', got {actual_event} for '{actual_id}'")]
    Mismatch {
        expected_event: &'static str,
        expected_id: String,
        actual_event: String,
        actual_id: String,
    },

    #[error("event stream ended while waiting for {expected_event} for '{expected_id}'")]
    UnexpectedEnd {
        expected_event: &'static str,
        expected_id: String,
    },

    #[error("unexpected {actual_event} for '{actual_id}' after the last node finished")]
    UnexpectedEvent { actual_event: String, actual_id: String },

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("failed to read event stream: {0}")]
    Stream(String),
}

/// Errors that leave the event stream out of step.
///
/// When a synchronized body fails with such an error the done event is not
/// consumed: the stream can no longer be trusted and the run is over.
pub trait StreamFault {
    fn breaks_stream(&self) -> bool;
}

impl StreamFault for ProtocolError {
    fn breaks_stream(&self) -> bool {
        true
    }
}

/// A pull-based, single-pass source of run events.
pub trait EventSource {
    /// Block until the next event is available; `Ok(None)` once the stream is exhausted.
    fn next_event(&mut self) -> Result<Option<RunEvent>, ProtocolError>;
}

impl EventSource for VecDeque<RunEvent> {
    fn next_event(&mut self) -> Result<Option<RunEvent>, ProtocolError> {
        Ok(self.pop_front())
    }
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn next_event(&mut self) -> Result<Option<RunEvent>, ProtocolError> {
        (**self).next_event()
    }
}

/// Pull one event and check that it is `expected_event` for `expected_id`.
fn expect_event<S>(source: &mut S, expected_event: &'static str, expected_id: &str) -> Result<EventData, ProtocolError>
where
    S: EventSource + ?Sized,
{
    let Some(event) = source.next_event()? else {
        return Err(ProtocolError::UnexpectedEnd {
            expected_event,
            expected_id: expected_id.to_string(),
        });
    };

    if event.event != expected_event || event.data.id != expected_id {
        return Err(ProtocolError::Mismatch {
            expected_event,
            expected_id: expected_id.to_string(),
            actual_event: event.event,
            actual_id: event.data.id,
        });
    }

    tracing::trace!(event = expected_event, id = expected_id, "event consumed");
    Ok(event.data)
}

/// Check that `source` holds no more events.
///
/// Called once every node has been synchronized: an event left over belongs
/// to no node of the tree.
pub fn expect_end<S>(source: &mut S) -> Result<(), ProtocolError>
where
    S: EventSource + ?Sized,
{
    match source.next_event()? {
        None => Ok(()),
        Some(event) => Err(ProtocolError::UnexpectedEvent {
            actual_event: event.event,
            actual_id: event.data.id,
        }),
    }
}

/// Start/done bracket for one node.
///
/// Created by [`SyncScope::enter`], which consumes the start event. Closing it
/// with [`SyncScope::exit`] consumes the done event and hands back its data.
/// A scope that is dropped without `exit` (an early return or a panic in the
/// body) still consumes the done event, and logs the node as unresolved.
pub struct SyncScope<'s, S: EventSource + ?Sized> {
    source: &'s mut S,
    kind: NodeKind,
    id: String,
    closed: bool,
}

impl<'s, S: EventSource + ?Sized> SyncScope<'s, S> {
    pub fn enter(source: &'s mut S, kind: NodeKind, id: &str) -> Result<Self, ProtocolError> {
        expect_event(source, kind.started_event(), id)?;
        Ok(Self {
            source,
            kind,
            id: id.to_string(),
            closed: false,
        })
    }

    /// The event source, for synchronizing descendants inside this bracket.
    pub fn source(&mut self) -> &mut S {
        &mut *self.source
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn exit(mut self) -> Result<EventData, ProtocolError> {
        self.closed = true;
        expect_event(&mut *self.source, self.kind.done_event(), &self.id)
    }

    /// Close without consuming the done event.
    pub fn abandon(mut self) {
        self.closed = true;
        tracing::debug!(kind = %self.kind, id = %self.id, "scope abandoned");
    }
}

impl<S: EventSource + ?Sized> Drop for SyncScope<'_, S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!(kind = %self.kind, id = %self.id, "scope left unresolved");
        if let Err(error) = expect_event(&mut *self.source, self.kind.done_event(), &self.id) {
            tracing::warn!(id = %self.id, %error, "failed to consume done event of unresolved scope");
        }
    }
}

/// Run `body` between the start and done events of one node.
///
/// On success the done event's data is returned with the body's value. When
/// the body fails its error is returned; the done event is still consumed
/// unless the error [breaks the stream](StreamFault), and a failure to close
/// the bracket is only logged.
pub fn synchronize<S, T, E, F>(source: &mut S, kind: NodeKind, id: &str, body: F) -> Result<(T, EventData), E>
where
    S: EventSource + ?Sized,
    E: From<ProtocolError> + StreamFault,
    F: FnOnce(&mut S) -> Result<T, E>,
{
    let mut scope = SyncScope::enter(source, kind, id)?;
    match body(scope.source()) {
        Ok(value) => {
            let data = scope.exit()?;
            Ok((value, data))
        }
        Err(error) if error.breaks_stream() => {
            scope.abandon();
            Err(error)
        }
        Err(error) => {
            if let Err(close_error) = scope.exit() {
                tracing::warn!(%kind, id, error = %close_error, "node left unresolved after failure");
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, id: &str) -> RunEvent {
        RunEvent::new(name, EventData::new(id))
    }

    fn stream(events: &[(&str, &str)]) -> VecDeque<RunEvent> {
        events.iter().map(|(name, id)| event(name, id)).collect()
    }

    #[test]
    fn test_synchronize_spec() {
        let mut source = stream(&[("specStarted", "p0"), ("specDone", "p0")]);
        let ((), data) = synchronize(&mut source, NodeKind::Spec, "p0", |_| Ok::<_, ProtocolError>(())).unwrap();
        assert_eq!(data.id, "p0");
        assert!(source.is_empty());
    }

    #[test]
    fn test_enter_with_wrong_id() {
        let mut source = stream(&[("specStarted", "wrong"), ("specDone", "wrong")]);
        let err = synchronize(&mut source, NodeKind::Spec, "p0", |_| Ok::<_, ProtocolError>(())).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Mismatch {
                expected_event: "specStarted",
                expected_id: "p0".to_string(),
                actual_event: "specStarted".to_string(),
                actual_id: "wrong".to_string(),
            }
        );
        // Nothing beyond the offending event was consumed
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_enter_with_wrong_event() {
        let mut source = stream(&[("suiteStarted", "p0")]);
        let err = SyncScope::enter(&mut source, NodeKind::Spec, "p0").err().unwrap();
        assert!(matches!(err, ProtocolError::Mismatch { actual_event, .. } if actual_event == "suiteStarted"));
    }

    #[test]
    fn test_exit_with_wrong_id() {
        let mut source = stream(&[("suiteStarted", "s0"), ("suiteDone", "s1")]);
        let err = synchronize(&mut source, NodeKind::Suite, "s0", |_| Ok::<_, ProtocolError>(())).unwrap_err();
        assert!(matches!(err, ProtocolError::Mismatch { expected_event: "suiteDone", .. }));
    }

    #[test]
    fn test_unexpected_end() {
        let mut source = stream(&[("specStarted", "p0")]);
        let err = synchronize(&mut source, NodeKind::Spec, "p0", |_| Ok::<_, ProtocolError>(())).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedEnd {
                expected_event: "specDone",
                expected_id: "p0".to_string(),
            }
        );
    }

    #[derive(Debug, PartialEq)]
    enum BodyError {
        Hook,
        Protocol(ProtocolError),
    }

    impl From<ProtocolError> for BodyError {
        fn from(error: ProtocolError) -> Self {
            BodyError::Protocol(error)
        }
    }

    impl StreamFault for BodyError {
        fn breaks_stream(&self) -> bool {
            matches!(self, BodyError::Protocol(_))
        }
    }

    #[test]
    fn test_done_event_consumed_when_body_fails() {
        let mut source = stream(&[("suiteStarted", "s0"), ("suiteDone", "s0"), ("specStarted", "next")]);
        let err = synchronize(&mut source, NodeKind::Suite, "s0", |_| Err::<(), _>(BodyError::Hook)).unwrap_err();
        assert_eq!(err, BodyError::Hook);
        assert_eq!(source.len(), 1);
        assert_eq!(source[0].data.id, "next");
    }

    #[test]
    fn test_nested_mismatch_stops_consuming() {
        let mut source = stream(&[
            ("suiteStarted", "s0"),
            ("specStarted", "wrong"),
            ("specDone", "wrong"),
            ("suiteDone", "s0"),
        ]);
        let err = synchronize(&mut source, NodeKind::Suite, "s0", |source| {
            synchronize(source, NodeKind::Spec, "p0", |_| Ok::<_, BodyError>(())).map(|((), data)| data)
        })
        .unwrap_err();
        assert!(matches!(err, BodyError::Protocol(ProtocolError::Mismatch { .. })));
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_dropped_scope_consumes_done_event() {
        let mut source = stream(&[("specStarted", "p0"), ("specDone", "p0"), ("specStarted", "p1")]);
        {
            let scope = SyncScope::enter(&mut source, NodeKind::Spec, "p0").unwrap();
            assert_eq!(scope.id(), "p0");
        }
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_nested_scopes() {
        let mut source = stream(&[
            ("suiteStarted", "s0"),
            ("specStarted", "p0"),
            ("specDone", "p0"),
            ("suiteDone", "s0"),
        ]);
        let (inner, outer) = synchronize(&mut source, NodeKind::Suite, "s0", |source| {
            synchronize(source, NodeKind::Spec, "p0", |_| Ok::<_, ProtocolError>(())).map(|((), data)| data)
        })
        .unwrap();
        assert_eq!(inner.id, "p0");
        assert_eq!(outer.id, "s0");
    }

    #[test]
    fn test_expect_end() {
        let mut source = stream(&[]);
        assert_eq!(expect_end(&mut source), Ok(()));

        let mut source = stream(&[("specStarted", "p9"), ("specDone", "p9")]);
        let err = expect_end(&mut source).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedEvent {
                actual_event: "specStarted".to_string(),
                actual_id: "p9".to_string(),
            }
        );
        assert_eq!(source.len(), 1);
    }
}
