//! Seam between the lifecycle code and the document-store driver
//!
//! The lifecycle manager only needs a handful of capabilities from a
//! connection: report its state, probe reachability, hand out sessions and
//! notify about asynchronous errors. [`MongoDriver`](super::MongoDriver)
//! implements them over the `mongodb` crate; tests substitute mocks.

use async_trait::async_trait;
use std::sync::Arc;

use super::ConnectionOptions;
use crate::common::BoxError;

/// Callback invoked for asynchronous errors raised after a connection is established
pub type ErrorObserver = Arc<dyn Fn(&(dyn std::error::Error + Send + Sync)) + Send + Sync>;

/// Numeric connection state as reported by the driver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReadyState(pub u8);

impl ReadyState {
    pub const DISCONNECTED: ReadyState = ReadyState(0);
    pub const CONNECTED: ReadyState = ReadyState(1);
    pub const CONNECTING: ReadyState = ReadyState(2);
    pub const DISCONNECTING: ReadyState = ReadyState(3);
    pub const UNINITIALIZED: ReadyState = ReadyState(99);
}

/// Opens connections from a rendered connection string and options
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Connection: Connection;

    /// Process-wide command tracing toggle. Idempotent; only connections
    /// opened through the shared handle honour it.
    fn set_debug(&self, enabled: bool);

    /// Open a connection. With `shared` set, the driver's process-wide handle
    /// is initialised (once) and returned instead of an independent connection.
    async fn connect(
        &self,
        connection_string: &str,
        options: &ConnectionOptions,
        shared: bool,
    ) -> Result<Self::Connection, BoxError>;

    /// Close and forget the process-wide handle, if one was initialised
    async fn release_shared(&self) -> Result<(), BoxError>;
}

/// A live connection to one logical database
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Session: TransactionSession;

    fn ready_state(&self) -> ReadyState;

    /// Register an observer for errors raised after establishment
    fn on_error(&self, observer: ErrorObserver);

    /// Lightweight round trip confirming the server is reachable
    async fn probe(&self) -> Result<(), BoxError>;

    async fn start_session(&self) -> Result<Self::Session, BoxError>;

    async fn close(&self) -> Result<(), BoxError>;
}

/// A client session able to run one transaction at a time
#[async_trait]
pub trait TransactionSession: Send + 'static {
    async fn start_transaction(&mut self) -> Result<(), BoxError>;

    async fn abort_transaction(&mut self) -> Result<(), BoxError>;

    async fn end_session(self);
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use mockall::mock;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        pub Driver {}

        #[async_trait]
        impl Driver for Driver {
            type Connection = MockConnection;

            fn set_debug(&self, enabled: bool);
            async fn connect(
                &self,
                connection_string: &str,
                options: &ConnectionOptions,
                shared: bool,
            ) -> Result<MockConnection, BoxError>;
            async fn release_shared(&self) -> Result<(), BoxError>;
        }
    }

    mock! {
        pub Connection {}

        #[async_trait]
        impl Connection for Connection {
            type Session = FakeSession;

            fn ready_state(&self) -> ReadyState;
            fn on_error(&self, observer: ErrorObserver);
            async fn probe(&self) -> Result<(), BoxError>;
            async fn start_session(&self) -> Result<FakeSession, BoxError>;
            async fn close(&self) -> Result<(), BoxError>;
        }
    }

    /// Call counters shared between a [`FakeSession`] and the test
    #[derive(Debug, Default)]
    pub struct SessionCalls {
        pub start_transaction: AtomicUsize,
        pub abort_transaction: AtomicUsize,
        pub end_session: AtomicUsize,
        pub events: Mutex<Vec<&'static str>>,
    }

    impl SessionCalls {
        pub fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }

        fn record(&self, counter: &AtomicUsize, event: &'static str) {
            counter.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().push(event);
        }
    }

    /// Session fake; `end_session` consumes the session, which mocks cannot express
    #[derive(Debug)]
    pub struct FakeSession {
        pub calls: Arc<SessionCalls>,
        pub fail_start: bool,
    }

    impl FakeSession {
        pub fn new(calls: Arc<SessionCalls>) -> Self {
            Self {
                calls,
                fail_start: false,
            }
        }

        pub fn failing(calls: Arc<SessionCalls>) -> Self {
            Self {
                calls,
                fail_start: true,
            }
        }
    }

    #[async_trait]
    impl TransactionSession for FakeSession {
        async fn start_transaction(&mut self) -> Result<(), BoxError> {
            self.calls
                .record(&self.calls.start_transaction, "start_transaction");
            if self.fail_start {
                return Err("Unable to start transaction".into());
            }
            Ok(())
        }

        async fn abort_transaction(&mut self) -> Result<(), BoxError> {
            self.calls
                .record(&self.calls.abort_transaction, "abort_transaction");
            Ok(())
        }

        async fn end_session(self) {
            self.calls.record(&self.calls.end_session, "end_session");
        }
    }

    /// Connection mock reporting `state`, probing successfully
    pub fn connection_in_state(state: ReadyState) -> MockConnection {
        let mut connection = MockConnection::new();
        connection.expect_ready_state().return_const(state);
        connection.expect_probe().returning(|| Ok(()));
        connection.expect_on_error().return_const(());
        connection
    }
}
