//! Asynchronous client for the cipher worker.
//!
//! Every call registers a one-shot reply slot under a fresh correlation id,
//! posts a request to the worker and waits (bounded) for the dispatcher to
//! route the matching response back.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::worker::{Credentials, Operation, Reply, Request, Response, Worker};
use veilvault_common::{ByteStream, Error, Result, SensitiveString};

/// Engine timeouts and queue bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum time to wait for the worker to come up.
    pub startup_timeout: Duration,
    /// Timeout for string-valued operations.
    pub request_timeout: Duration,
    /// Timeout for stream operations, covering only the hand-off of the
    /// transformed stream, not its consumption.
    pub stream_handoff_timeout: Duration,
    /// Capacity of the request channel. Also bounds the pending table.
    pub queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            stream_handoff_timeout: Duration::from_secs(30),
            queue_depth: 256,
        }
    }
}

type PendingTable = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Result<Reply>>>>>;

enum EngineState {
    Idle,
    Running(mpsc::Sender<Request>),
    Terminated,
}

struct EngineInner {
    config: EngineConfig,
    state: Mutex<EngineState>,
    pending: PendingTable,
    terminated: Arc<AtomicBool>,
}

/// Handle to the cipher engine. Cheap to clone.
#[derive(Clone)]
pub struct CipherEngine {
    inner: Arc<EngineInner>,
}

impl CipherEngine {
    /// Create an engine that has not been started yet.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                state: Mutex::new(EngineState::Idle),
                pending: Arc::new(Mutex::new(HashMap::new())),
                terminated: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Create and start an engine.
    pub async fn start_with(config: EngineConfig) -> Result<Self> {
        let engine = Self::new(config);
        engine.start().await?;
        Ok(engine)
    }

    /// Spawn the worker thread and the response dispatcher.
    ///
    /// Must be called from within a tokio runtime. Starting a running engine
    /// is a no-op.
    pub async fn start(&self) -> Result<()> {
        match &*self.inner.state.lock() {
            EngineState::Running(_) => return Ok(()),
            EngineState::Terminated => return Err(Error::EngineTerminated),
            EngineState::Idle => {}
        }

        let (request_tx, request_rx) = mpsc::channel(self.inner.config.queue_depth.max(1));
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker = Worker::new(request_rx, response_tx, Arc::clone(&self.inner.terminated));
        thread::Builder::new()
            .name("veilvault-cipher".to_string())
            .spawn(move || worker.run(ready_tx))?;

        tokio::spawn(dispatch(response_rx, Arc::clone(&self.inner.pending)));

        let startup = self.inner.config.startup_timeout;
        match tokio::time::timeout(startup, ready_rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(Error::EngineNotReady),
            Err(_) => {
                return Err(Error::OperationTimeout {
                    operation: "engine startup".to_string(),
                    timeout: startup,
                })
            }
        }

        let mut state = self.inner.state.lock();
        if let EngineState::Idle = *state {
            *state = EngineState::Running(request_tx);
            info!("Cipher engine started");
        }
        Ok(())
    }

    /// Terminate the engine. Every pending request fails with
    /// `EngineTerminated`, as does every later call.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if let EngineState::Terminated = *state {
                return;
            }
            *state = EngineState::Terminated;
        }
        self.inner.terminated.store(true, Ordering::Release);

        let drained: Vec<_> = self.inner.pending.lock().drain().collect();
        for (_, reply) in drained {
            let _ = reply.send(Err(Error::EngineTerminated));
        }
        info!("Cipher engine terminated");
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.state.lock(), EngineState::Running(_))
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub async fn encrypt_filename(
        &self,
        plain: &str,
        password: &SensitiveString,
        salt: Option<&SensitiveString>,
    ) -> Result<String> {
        if plain.is_empty() {
            return Ok(String::new());
        }
        let operation = Operation::EncryptFilename {
            name: plain.to_string(),
            credentials: credentials(password, salt),
        };
        self.text(operation).await
    }

    pub async fn decrypt_filename(
        &self,
        encrypted: &str,
        password: &SensitiveString,
        salt: Option<&SensitiveString>,
    ) -> Result<String> {
        if encrypted.is_empty() {
            return Ok(String::new());
        }
        let operation = Operation::DecryptFilename {
            name: encrypted.to_string(),
            credentials: credentials(password, salt),
        };
        self.text(operation).await
    }

    /// Encrypt a byte stream. The returned stream transforms lazily as it
    /// is polled.
    pub async fn encrypt_stream(
        &self,
        source: ByteStream,
        password: &SensitiveString,
        salt: Option<&SensitiveString>,
    ) -> Result<ByteStream> {
        let operation = Operation::EncryptStream {
            source,
            credentials: credentials(password, salt),
        };
        self.stream(operation).await
    }

    /// Decrypt a byte stream produced by [`encrypt_stream`](Self::encrypt_stream).
    pub async fn decrypt_stream(
        &self,
        source: ByteStream,
        password: &SensitiveString,
        salt: Option<&SensitiveString>,
    ) -> Result<ByteStream> {
        let operation = Operation::DecryptStream {
            source,
            credentials: credentials(password, salt),
        };
        self.stream(operation).await
    }

    pub async fn obscure_password(&self, plain: &SensitiveString) -> Result<String> {
        if plain.is_empty() {
            return Ok(String::new());
        }
        self.text(Operation::ObscurePassword { plain: plain.clone() }).await
    }

    pub async fn reveal_password(&self, token: &str) -> Result<SensitiveString> {
        if token.is_empty() {
            return Ok(SensitiveString::new(""));
        }
        let revealed = self
            .text(Operation::RevealPassword { token: token.to_string() })
            .await?;
        Ok(SensitiveString::new(revealed))
    }

    async fn text(&self, operation: Operation) -> Result<String> {
        let timeout = self.inner.config.request_timeout;
        match self.call(operation, timeout).await? {
            Reply::Text(text) => Ok(text),
            Reply::Stream(_) => Err(Error::Crypto("Unexpected stream reply".to_string())),
        }
    }

    async fn stream(&self, operation: Operation) -> Result<ByteStream> {
        let timeout = self.inner.config.stream_handoff_timeout;
        match self.call(operation, timeout).await? {
            Reply::Stream(stream) => Ok(stream),
            Reply::Text(_) => Err(Error::Crypto("Unexpected text reply".to_string())),
        }
    }

    async fn call(&self, operation: Operation, timeout: Duration) -> Result<Reply> {
        let sender = match &*self.inner.state.lock() {
            EngineState::Running(sender) => sender.clone(),
            EngineState::Idle => return Err(Error::EngineNotReady),
            EngineState::Terminated => return Err(Error::EngineTerminated),
        };

        let id = Uuid::new_v4();
        let name = operation.name();
        let pending = &self.inner.pending;

        // A reply slot is registered only once the request channel has room,
        // so callers waiting for capacity stay out of the pending table.
        let exchange = async {
            let permit = sender.reserve().await.map_err(|_| Error::EngineTerminated)?;
            let (reply_tx, reply_rx) = oneshot::channel();
            pending.lock().insert(id, reply_tx);
            permit.send(Request { id, operation });
            reply_rx.await.map_err(|_| Error::EngineTerminated)?
        };
        let outcome = tokio::time::timeout(timeout, exchange).await;

        // The dispatcher removes answered entries; this covers timeouts and
        // send failures.
        self.inner.pending.lock().remove(&id);

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(request_id = %id, operation = name, "Cipher request timed out");
                Err(Error::OperationTimeout {
                    operation: name.to_string(),
                    timeout,
                })
            }
        }
    }
}

fn credentials(password: &SensitiveString, salt: Option<&SensitiveString>) -> Credentials {
    Credentials::new(password.clone(), salt.cloned())
}

/// Route worker responses to their waiting callers.
async fn dispatch(mut responses: mpsc::UnboundedReceiver<Response>, pending: PendingTable) {
    while let Some(Response { id, result }) = responses.recv().await {
        let slot = pending.lock().remove(&id);
        match slot {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => debug!(request_id = %id, "Discarding response for expired request"),
        }
    }

    let drained: Vec<_> = pending.lock().drain().collect();
    for (_, reply) in drained {
        let _ = reply.send(Err(Error::EngineTerminated));
    }
    debug!("Cipher dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilvault_common::{bytes_stream, collect_stream};

    fn pw(value: &str) -> SensitiveString {
        SensitiveString::new(value)
    }

    async fn engine() -> CipherEngine {
        CipherEngine::start_with(EngineConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_not_started_is_not_ready() {
        let engine = CipherEngine::new(EngineConfig::default());
        assert!(!engine.is_ready());
        let result = engine.encrypt_filename("a", &pw("p"), None).await;
        assert!(matches!(result, Err(Error::EngineNotReady)));
    }

    #[tokio::test]
    async fn test_empty_name_short_circuits() {
        // No worker is running, so this can only succeed without a round trip.
        let engine = CipherEngine::new(EngineConfig::default());
        assert_eq!(engine.encrypt_filename("", &pw("p"), None).await.unwrap(), "");
        assert_eq!(engine.decrypt_filename("", &pw("p"), None).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_filename_roundtrip_and_determinism() {
        let engine = engine().await;
        let a = engine.encrypt_filename("report.pdf", &pw("p1"), None).await.unwrap();
        let b = engine.encrypt_filename("report.pdf", &pw("p1"), None).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(
            engine.decrypt_filename(&a, &pw("p1"), None).await.unwrap(),
            "report.pdf"
        );

        let salted = engine
            .encrypt_filename("report.pdf", &pw("p1"), Some(&pw("s")))
            .await
            .unwrap();
        assert_ne!(a, salted);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_matched() {
        let engine = engine().await;
        let password = pw("p1");
        let names: Vec<String> = (0..32).map(|i| format!("file-{}", i)).collect();

        let encrypted = futures::future::try_join_all(
            names.iter().map(|n| engine.encrypt_filename(n, &password, None)),
        )
        .await
        .unwrap();
        let decrypted = futures::future::try_join_all(
            encrypted.iter().map(|n| engine.decrypt_filename(n, &password, None)),
        )
        .await
        .unwrap();

        assert_eq!(decrypted, names);
        assert_eq!(engine.pending_requests(), 0);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let engine = engine().await;
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 97) as u8).collect();

        let encrypted = engine
            .encrypt_stream(bytes_stream(data.clone(), 4096), &pw("p1"), None)
            .await
            .unwrap();
        let decrypted = engine.decrypt_stream(encrypted, &pw("p1"), None).await.unwrap();
        assert_eq!(collect_stream(decrypted).await.unwrap(), data);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_obscure_reveal() {
        let engine = engine().await;
        let token = engine.obscure_password(&pw("hunter2")).await.unwrap();
        assert!(crate::is_obscured(&token));
        assert_eq!(engine.reveal_password(&token).await.unwrap().expose(), "hunter2");
        assert_eq!(engine.obscure_password(&pw("")).await.unwrap(), "");
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_cipher_setup_failure() {
        let engine = engine().await;
        let result = engine.encrypt_filename("a", &pw(""), None).await;
        assert!(matches!(result, Err(Error::CipherSetupFailed(_))));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_timeout_purges_pending() {
        let config = EngineConfig {
            request_timeout: Duration::from_millis(1),
            ..EngineConfig::default()
        };
        let engine = CipherEngine::start_with(config).await.unwrap();

        // A fresh password forces a full scrypt derivation on the worker.
        let result = engine
            .encrypt_filename("slow", &pw("never-seen-before"), None)
            .await;
        assert!(matches!(result, Err(Error::OperationTimeout { .. })));
        assert_eq!(engine.pending_requests(), 0);
        engine.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pending_table_bounded_by_queue_depth() {
        let config = EngineConfig {
            queue_depth: 1,
            ..EngineConfig::default()
        };
        let engine = CipherEngine::start_with(config).await.unwrap();

        // Fresh passwords force a slow key derivation per request.
        let calls: Vec<_> = (0..40)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .encrypt_filename("x", &SensitiveString::new(format!("load-{}", i)), None)
                        .await
                })
            })
            .collect();

        let mut peak = 0;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            peak = peak.max(engine.pending_requests());
        }
        // One queued request, one on the worker, one reply being routed.
        assert!(peak <= 3, "pending table grew to {}", peak);

        engine.shutdown();
        for call in calls {
            let _ = call.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_and_later_calls() {
        let engine = engine().await;

        let in_flight = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .encrypt_filename("a", &SensitiveString::new("another-fresh-password"), None)
                    .await
            })
        };
        // Let the request reach the pending table.
        while engine.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }
        engine.shutdown();

        let result = in_flight.await.unwrap();
        assert!(matches!(result, Err(Error::EngineTerminated)));
        assert!(matches!(
            engine.encrypt_filename("b", &pw("p1"), None).await,
            Err(Error::EngineTerminated)
        ));
        assert!(!engine.is_ready());
    }
}
