//! The cipher worker: a dedicated thread that owns the session cache.
//!
//! The worker only talks to the rest of the process through channels. Each
//! request carries a correlation id which is echoed on its response.
//!
//! Key derivation and filename transforms run on the worker thread. Stream
//! operations only hand back a lazy stream bound to the cached session; the
//! block sealing and opening runs on whichever task polls that stream.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::cipher::Cipher;
use crate::obscure;
use veilvault_common::{ByteStream, Result, SensitiveString};

/// Password and optional secondary password identifying a cipher session.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub password: SensitiveString,
    pub salt: Option<SensitiveString>,
}

impl Credentials {
    pub fn new(password: SensitiveString, salt: Option<SensitiveString>) -> Self {
        Self { password, salt }
    }

    fn salt(&self) -> Option<&str> {
        self.salt.as_ref().map(|s| s.expose())
    }

    /// Cache key for the derived session.
    ///
    /// Both fields are length-prefixed so distinct pairs never share a key.
    /// A missing salt and an empty salt derive the same keys and share one.
    fn session_key(&self) -> [u8; 32] {
        let password = self.password.expose().as_bytes();
        let salt = self.salt().unwrap_or_default().as_bytes();
        let mut hasher = Blake2b::<U32>::new();
        hasher.update((password.len() as u64).to_le_bytes());
        hasher.update(password);
        hasher.update((salt.len() as u64).to_le_bytes());
        hasher.update(salt);
        hasher.finalize().into()
    }
}

pub(crate) enum Operation {
    EncryptFilename { name: String, credentials: Credentials },
    DecryptFilename { name: String, credentials: Credentials },
    EncryptStream { source: ByteStream, credentials: Credentials },
    DecryptStream { source: ByteStream, credentials: Credentials },
    ObscurePassword { plain: SensitiveString },
    RevealPassword { token: String },
}

impl Operation {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Operation::EncryptFilename { .. } => "encrypt_filename",
            Operation::DecryptFilename { .. } => "decrypt_filename",
            Operation::EncryptStream { .. } => "encrypt_stream",
            Operation::DecryptStream { .. } => "decrypt_stream",
            Operation::ObscurePassword { .. } => "obscure_password",
            Operation::RevealPassword { .. } => "reveal_password",
        }
    }
}

pub(crate) enum Reply {
    Text(String),
    Stream(ByteStream),
}

pub(crate) struct Request {
    pub id: Uuid,
    pub operation: Operation,
}

pub(crate) struct Response {
    pub id: Uuid,
    pub result: Result<Reply>,
}

pub(crate) struct Worker {
    sessions: HashMap<[u8; 32], Arc<Cipher>>,
    requests: mpsc::Receiver<Request>,
    responses: mpsc::UnboundedSender<Response>,
    terminated: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn new(
        requests: mpsc::Receiver<Request>,
        responses: mpsc::UnboundedSender<Response>,
        terminated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            requests,
            responses,
            terminated,
        }
    }

    /// Serve requests until the request channel closes or the engine is
    /// terminated. Blocks the calling thread.
    pub(crate) fn run(mut self, ready: oneshot::Sender<()>) {
        let _ = ready.send(());
        debug!("Cipher worker started");

        while let Some(Request { id, operation }) = self.requests.blocking_recv() {
            if self.terminated.load(Ordering::Acquire) {
                break;
            }
            trace!(request_id = %id, operation = operation.name(), "Handling cipher request");
            let result = self.handle(operation);
            if self.responses.send(Response { id, result }).is_err() {
                break;
            }
        }

        self.sessions.clear();
        debug!("Cipher worker stopped");
    }

    fn session(&mut self, credentials: &Credentials) -> Result<Arc<Cipher>> {
        let key = credentials.session_key();
        if let Some(cipher) = self.sessions.get(&key) {
            return Ok(Arc::clone(cipher));
        }
        let cipher = Arc::new(Cipher::new(
            credentials.password.expose(),
            credentials.salt(),
        )?);
        self.sessions.insert(key, Arc::clone(&cipher));
        debug!(sessions = self.sessions.len(), "Derived new cipher session");
        Ok(cipher)
    }

    fn handle(&mut self, operation: Operation) -> Result<Reply> {
        match operation {
            Operation::EncryptFilename { name, credentials } => {
                let cipher = self.session(&credentials)?;
                cipher.encrypt_name(&name).map(Reply::Text)
            }
            Operation::DecryptFilename { name, credentials } => {
                let cipher = self.session(&credentials)?;
                cipher.decrypt_name(&name).map(Reply::Text)
            }
            Operation::EncryptStream { source, credentials } => {
                let cipher = self.session(&credentials)?;
                Ok(Reply::Stream(cipher.encrypt_stream(source)))
            }
            Operation::DecryptStream { source, credentials } => {
                let cipher = self.session(&credentials)?;
                Ok(Reply::Stream(cipher.decrypt_stream(source)))
            }
            Operation::ObscurePassword { plain } => obscure::obscure(plain.expose()).map(Reply::Text),
            Operation::RevealPassword { token } => obscure::reveal(&token).map(Reply::Text),
        }
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
