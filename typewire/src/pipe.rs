//! Per-connection listening pipe.
//!
//! One background task per connection: read a framed message, decode it,
//! release the payload buffer, dispatch the decoded value, repeat. Dispatch
//! is awaited to completion before the next read, so inbound messages on one
//! connection are processed strictly in arrival order with a single
//! in-flight dispatch — a slow handler throttles its own connection and
//! nothing else.
//!
//! The loop never restarts itself: cancellation ends in a graceful
//! disconnect, everything else in an error disconnect, and recovery is a new
//! connection.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::TypeTable;
use crate::dispatch::{DispatchError, DispatchTable};
use crate::net::{BoxedReadHalf, Connection};
use crate::wire::{FrameReader, RawMessage, TransportError};

enum LoopEnd {
    Cancelled,
    Failed(String),
}

/// Start the pipe for one connection.
pub(crate) fn spawn(
    reader: FrameReader<BoxedReadHalf>,
    table: DispatchTable,
    types: Arc<TypeTable>,
    connection: Arc<Connection>,
) -> JoinHandle<()> {
    tokio::spawn(run(reader, table, types, connection))
}

async fn run(
    mut reader: FrameReader<BoxedReadHalf>,
    table: DispatchTable,
    types: Arc<TypeTable>,
    connection: Arc<Connection>,
) {
    let cancel = connection.cancel_token().clone();

    match read_loop(&mut reader, &table, &types, &cancel).await {
        LoopEnd::Cancelled => {
            tracing::debug!(id = %connection.id(), "pipe cancelled");
            connection.disconnect().await;
        }
        LoopEnd::Failed(reason) => {
            tracing::warn!(id = %connection.id(), %reason, "pipe failed");
            connection.disconnect_with_error(&reason).await;
        }
    }
}

async fn read_loop(
    reader: &mut FrameReader<BoxedReadHalf>,
    table: &DispatchTable,
    types: &TypeTable,
    cancel: &CancellationToken,
) -> LoopEnd {
    loop {
        if cancel.is_cancelled() {
            return LoopEnd::Cancelled;
        }

        let raw = match reader.read_message(cancel).await {
            Ok(raw) => raw,
            Err(TransportError::Cancelled) => return LoopEnd::Cancelled,
            Err(error) => return LoopEnd::Failed(error.to_string()),
        };

        let RawMessage { type_id, payload } = raw;
        let decoded = types.decode(type_id, payload.as_slice());
        // The buffer goes back to the pool before dispatch, decode success
        // or not; its content must not be touched past this point.
        drop(payload);

        let message = match decoded {
            Ok(message) => message,
            Err(error) => return LoopEnd::Failed(error.to_string()),
        };

        if let Err(DispatchError::NoHandler) = table.dispatch(message).await {
            let name = types.name_of(type_id).unwrap_or("<unknown>");
            return LoopEnd::Failed(format!("no handler bound for message type {name}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::codec::{JsonCodec, TypeTableBuilder};
    use crate::net::{ConnectionHooks, ConnectionId, ConnectionInfo, DisconnectReason};
    use crate::pool::BufferPool;
    use crate::wire::FrameWriter;
    use crate::{bind_handlers, message_types};

    message_types! {
        pub struct Tick {
            pub seq: u32,
        }

        pub struct Stray {
            pub ignored: bool,
        }
    }

    #[derive(Default)]
    struct TickHandler {
        seen: Mutex<Vec<u32>>,
    }

    impl TickHandler {
        async fn on_tick(&self, tick: Tick) {
            self.seen.lock().expect("lock").push(tick.seq);
        }
    }

    bind_handlers! {
        TickHandler {
            async fn on_tick(Tick);
        }
    }

    struct EndHooks {
        disconnects: AtomicUsize,
        errors: AtomicUsize,
    }

    impl EndHooks {
        fn new() -> Self {
            Self {
                disconnects: AtomicUsize::new(0),
                errors: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ConnectionHooks for EndHooks {
        async fn on_disconnected(&self, _info: &ConnectionInfo, reason: &DisconnectReason) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            if matches!(reason, DisconnectReason::Error(_)) {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct Harness {
        connection: Arc<Connection>,
        handler: Arc<TickHandler>,
        hooks: Arc<EndHooks>,
        remote: tokio::io::DuplexStream,
        pipe: JoinHandle<()>,
        types: Arc<TypeTable>,
    }

    fn start() -> Harness {
        let types = Arc::new(
            TypeTableBuilder::new(JsonCodec)
                .register::<Tick>()
                .register::<Stray>()
                .build()
                .expect("build table"),
        );
        let hooks = Arc::new(EndHooks::new());
        let handler = Arc::new(TickHandler::default());

        let (local, remote) = tokio::io::duplex(4096);
        let (connection, reader) = Connection::wire_up(
            ConnectionId::new(),
            "pipe-test".to_string(),
            local,
            BufferPool::new(64),
            Duration::from_secs(1),
            hooks.clone(),
            std::sync::Weak::new(),
            CancellationToken::new(),
        );

        let table =
            DispatchTable::bind(Arc::clone(&handler), &types).expect("bind dispatch table");
        let pipe = spawn(reader, table, Arc::clone(&types), Arc::clone(&connection));

        Harness {
            connection,
            handler,
            hooks,
            remote,
            pipe,
            types,
        }
    }

    #[tokio::test]
    async fn test_pipe_dispatches_in_order() {
        let mut harness = start();
        let cancel = CancellationToken::new();
        let mut writer = FrameWriter::new(&mut harness.remote, Duration::from_secs(1));

        for seq in 0..5u32 {
            let (payload, id) = harness.types.encode(&Tick { seq }).expect("encode");
            writer
                .write_message(&payload, id, &cancel)
                .await
                .expect("write");
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if harness.handler.seen.lock().expect("lock").len() == 5 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("all ticks dispatched");

        assert_eq!(
            harness.handler.seen.lock().expect("lock").as_slice(),
            &[0, 1, 2, 3, 4]
        );
        assert!(harness.connection.is_working());
    }

    #[tokio::test]
    async fn test_stop_is_a_graceful_disconnect() {
        let harness = start();

        harness.connection.disconnect().await;
        tokio::time::timeout(Duration::from_secs(2), harness.pipe)
            .await
            .expect("pipe exits")
            .expect("pipe task");

        assert_eq!(harness.hooks.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(harness.hooks.errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bad_magic_is_an_error_disconnect() {
        let mut harness = start();

        use tokio::io::AsyncWriteExt;
        harness
            .remote
            .write_all(&[0xDE, 0xAD, 0, 0, 0, 0, 0, 0])
            .await
            .expect("write garbage");

        tokio::time::timeout(Duration::from_secs(2), harness.pipe)
            .await
            .expect("pipe exits")
            .expect("pipe task");

        assert_eq!(harness.hooks.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(harness.hooks.errors.load(Ordering::SeqCst), 1);
        assert!(!harness.connection.is_working());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_an_error_disconnect() {
        let mut harness = start();
        let cancel = CancellationToken::new();
        let mut writer = FrameWriter::new(&mut harness.remote, Duration::from_secs(1));

        let id = harness.types.id_of::<Tick>().expect("tick id");
        writer
            .write_message(b"not json", id, &cancel)
            .await
            .expect("write");

        tokio::time::timeout(Duration::from_secs(2), harness.pipe)
            .await
            .expect("pipe exits")
            .expect("pipe task");

        assert_eq!(harness.hooks.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unhandled_type_is_an_error_disconnect() {
        let mut harness = start();
        let cancel = CancellationToken::new();
        let mut writer = FrameWriter::new(&mut harness.remote, Duration::from_secs(1));

        let (payload, id) = harness
            .types
            .encode(&Stray { ignored: true })
            .expect("encode");
        writer
            .write_message(&payload, id, &cancel)
            .await
            .expect("write");

        tokio::time::timeout(Duration::from_secs(2), harness.pipe)
            .await
            .expect("pipe exits")
            .expect("pipe task");

        assert_eq!(harness.hooks.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peer_close_is_an_error_disconnect() {
        let harness = start();

        drop(harness.remote); // EOF under the reader

        tokio::time::timeout(Duration::from_secs(2), harness.pipe)
            .await
            .expect("pipe exits")
            .expect("pipe task");

        assert_eq!(harness.hooks.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(harness.hooks.errors.load(Ordering::SeqCst), 1);
    }
}
