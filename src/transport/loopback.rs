//! In-process key service and binder.
//!
//! # Responsibilities
//! - Serve the full [`RemoteService`] surface from an in-memory key vault
//! - Emulate the platform binder: latency, refusal, silence
//! - Inject failures: death, orderly disconnect, failed ping, per-method
//!   status codes and transport faults
//!
//! The vault outlives individual service instances, the way hardware-backed
//! keys survive a restart of the service process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::keys::codec::{ExportedKeyCodec, KeyDescriptor};
use crate::link::handle::BindAttempt;
use crate::transport::{
    BindingSink, DeathRecipient, ExportResult, ParamValue, RemoteService, ServiceBinder,
    SessionResult, SignResult, TransportError, STATUS_OK,
};

/// Status the loopback service returns for a missing key or session.
pub const STATUS_NOT_FOUND: i32 = 404;

/// Version reported by the loopback service.
pub const LOOPBACK_VERSION: i32 = 2;

#[derive(Debug, Default)]
struct UidKeys {
    master: Option<Vec<u8>>,
    auth: HashMap<String, Vec<u8>>,
}

/// Key storage shared by every service instance of one binder.
#[derive(Debug, Default)]
pub struct KeyVault {
    keys: Mutex<HashMap<i32, UidKeys>>,
    counter: AtomicU64,
}

impl KeyVault {
    pub fn new() -> Self {
        Self::default()
    }

    fn export(&self, uid: i32, name: &str) -> Vec<u8> {
        let descriptor = KeyDescriptor {
            public_key: format!("loopback-pub:{uid}:{name}"),
            counter: self.counter.fetch_add(1, Ordering::Relaxed),
            cpu_id: "loopback".to_string(),
            uid,
            ..Default::default()
        };
        let signature = format!("sig:{uid}:{name}").into_bytes();
        ExportedKeyCodec::encode(&descriptor, &signature).unwrap_or_default()
    }

    fn with_keys<T>(&self, uid: i32, f: impl FnOnce(&mut UidKeys) -> T) -> T {
        let mut keys = self.keys.lock().expect("vault mutex poisoned");
        f(keys.entry(uid).or_default())
    }
}

/// Injected behavior for one remote method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Return this status instead of the real result.
    Status(i32),
    /// Fail with a transport error.
    Transport,
    /// Fail as if the process died mid-call.
    Dead,
    /// Replace the exported payload with these bytes.
    Payload(Vec<u8>),
}

/// One instance of the in-process key service.
#[derive(Debug)]
pub struct LoopbackService {
    vault: Arc<KeyVault>,
    alive: AtomicBool,
    responsive: AtomicBool,
    refuse_death_watch: AtomicBool,
    recipients: Mutex<Vec<DeathRecipient>>,
    faults: Mutex<HashMap<&'static str, Fault>>,
    params: Mutex<HashMap<String, ParamValue>>,
    sessions: Mutex<HashMap<i64, (i32, String)>>,
    next_session: AtomicI64,
    ping_threads: Mutex<Vec<ThreadId>>,
}

impl LoopbackService {
    pub fn new(vault: Arc<KeyVault>) -> Self {
        Self {
            vault,
            alive: AtomicBool::new(true),
            responsive: AtomicBool::new(true),
            refuse_death_watch: AtomicBool::new(false),
            recipients: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            params: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicI64::new(1),
            ping_threads: Mutex::new(Vec::new()),
        }
    }

    /// A service with its own private vault.
    pub fn standalone() -> Self {
        Self::new(Arc::new(KeyVault::new()))
    }

    /// Terminate the service and notify every death recipient.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let recipients = std::mem::take(
            &mut *self.recipients.lock().expect("recipients mutex poisoned"),
        );
        for recipient in recipients {
            recipient.binder_died();
        }
    }

    /// Terminate the service without notifying death recipients.
    pub fn stop(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Make `ping` fail while the process stays alive.
    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    /// Threads that have served `ping`, oldest first.
    pub fn ping_threads(&self) -> Vec<ThreadId> {
        self.ping_threads
            .lock()
            .expect("ping threads mutex poisoned")
            .clone()
    }

    /// Make `link_to_death` fail.
    pub fn refuse_death_watch(&self, refuse: bool) {
        self.refuse_death_watch.store(refuse, Ordering::SeqCst);
    }

    /// Inject `fault` into every call of `method` until cleared.
    pub fn inject(&self, method: &'static str, fault: Fault) {
        self.faults
            .lock()
            .expect("faults mutex poisoned")
            .insert(method, fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().expect("faults mutex poisoned").clear();
    }

    pub fn set_param(&self, key: &str, value: ParamValue) {
        self.params
            .lock()
            .expect("params mutex poisoned")
            .insert(key.to_string(), value);
    }

    /// Death recipients currently registered.
    pub fn death_recipients(&self) -> Vec<DeathRecipient> {
        self.recipients.lock().expect("recipients mutex poisoned").clone()
    }

    /// Number of death recipients currently registered.
    pub fn death_watch_count(&self) -> usize {
        self.recipients.lock().expect("recipients mutex poisoned").len()
    }

    fn enter(&self, method: &'static str) -> Result<Option<Fault>, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::DeadObject);
        }
        match self.faults.lock().expect("faults mutex poisoned").get(method) {
            Some(Fault::Transport) => Err(TransportError::Failed(format!(
                "injected transport fault in {method}"
            ))),
            Some(Fault::Dead) => Err(TransportError::DeadObject),
            fault => Ok(fault.cloned()),
        }
    }

    fn status_call(
        &self,
        method: &'static str,
        f: impl FnOnce() -> i32,
    ) -> Result<i32, TransportError> {
        match self.enter(method)? {
            Some(Fault::Status(status)) => Ok(status),
            _ => Ok(f()),
        }
    }

    fn export_call(
        &self,
        method: &'static str,
        f: impl FnOnce() -> Option<Vec<u8>>,
    ) -> Result<ExportResult, TransportError> {
        match self.enter(method)? {
            Some(Fault::Status(status)) => Ok(ExportResult {
                status,
                payload: Vec::new(),
            }),
            Some(Fault::Payload(payload)) => Ok(ExportResult {
                status: STATUS_OK,
                payload,
            }),
            _ => Ok(match f() {
                Some(payload) => ExportResult {
                    status: STATUS_OK,
                    payload,
                },
                None => ExportResult {
                    status: STATUS_NOT_FOUND,
                    payload: Vec::new(),
                },
            }),
        }
    }
}

impl RemoteService for LoopbackService {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn ping(&self) -> bool {
        self.ping_threads
            .lock()
            .expect("ping threads mutex poisoned")
            .push(std::thread::current().id());
        self.is_alive() && self.responsive.load(Ordering::SeqCst)
    }

    fn link_to_death(&self, recipient: DeathRecipient) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::DeadObject);
        }
        if self.refuse_death_watch.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("death watch refused".into()));
        }
        self.recipients
            .lock()
            .expect("recipients mutex poisoned")
            .push(recipient);
        Ok(())
    }

    fn unlink_to_death(&self, recipient: &DeathRecipient) {
        self.recipients
            .lock()
            .expect("recipients mutex poisoned")
            .retain(|r| r.handle() != recipient.handle());
    }

    fn generate_master_key(&self, uid: i32) -> Result<i32, TransportError> {
        self.status_call("generate_master_key", || {
            let payload = self.vault.export(uid, "master");
            self.vault.with_keys(uid, |keys| keys.master = Some(payload));
            STATUS_OK
        })
    }

    fn remove_all_keys(&self, uid: i32) -> Result<i32, TransportError> {
        self.status_call("remove_all_keys", || {
            self.vault.with_keys(uid, |keys| {
                keys.master = None;
                keys.auth.clear();
            });
            STATUS_OK
        })
    }

    fn has_master_key(&self, uid: i32) -> Result<bool, TransportError> {
        self.enter("has_master_key")?;
        Ok(self.vault.with_keys(uid, |keys| keys.master.is_some()))
    }

    fn export_master_key(&self, uid: i32) -> Result<ExportResult, TransportError> {
        self.export_call("export_master_key", || {
            self.vault.with_keys(uid, |keys| keys.master.clone())
        })
    }

    fn generate_auth_key(&self, uid: i32, name: &str) -> Result<i32, TransportError> {
        self.status_call("generate_auth_key", || {
            let has_master = self.vault.with_keys(uid, |keys| keys.master.is_some());
            if !has_master {
                return STATUS_NOT_FOUND;
            }
            let payload = self.vault.export(uid, name);
            self.vault.with_keys(uid, |keys| {
                keys.auth.insert(name.to_string(), payload);
            });
            STATUS_OK
        })
    }

    fn remove_auth_key(&self, uid: i32, name: &str) -> Result<i32, TransportError> {
        self.status_call("remove_auth_key", || {
            self.vault.with_keys(uid, |keys| keys.auth.remove(name));
            STATUS_OK
        })
    }

    fn has_auth_key(&self, uid: i32, name: &str) -> Result<bool, TransportError> {
        self.enter("has_auth_key")?;
        Ok(self.vault.with_keys(uid, |keys| keys.auth.contains_key(name)))
    }

    fn export_auth_key(&self, uid: i32, name: &str) -> Result<ExportResult, TransportError> {
        self.export_call("export_auth_key", || {
            self.vault.with_keys(uid, |keys| keys.auth.get(name).cloned())
        })
    }

    fn init_sign(
        &self,
        uid: i32,
        name: &str,
        challenge: &str,
    ) -> Result<SessionResult, TransportError> {
        if let Some(Fault::Status(status)) = self.enter("init_sign")? {
            return Ok(SessionResult { session: 0, status });
        }
        if !self.vault.with_keys(uid, |keys| keys.auth.contains_key(name)) {
            return Ok(SessionResult {
                session: 0,
                status: STATUS_NOT_FOUND,
            });
        }
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .insert(session, (uid, format!("{name}:{challenge}")));
        Ok(SessionResult {
            session,
            status: STATUS_OK,
        })
    }

    fn finish_sign(&self, session: i64) -> Result<SignResult, TransportError> {
        if let Some(Fault::Status(status)) = self.enter("finish_sign")? {
            return Ok(SignResult {
                status,
                payload: Vec::new(),
            });
        }
        let entry = self
            .sessions
            .lock()
            .expect("sessions mutex poisoned")
            .remove(&session);
        Ok(match entry {
            Some((uid, message)) => SignResult {
                status: STATUS_OK,
                payload: format!("signed:{uid}:{message}").into_bytes(),
            },
            None => SignResult {
                status: STATUS_NOT_FOUND,
                payload: Vec::new(),
            },
        })
    }

    fn version(&self) -> Result<i32, TransportError> {
        self.enter("version")?;
        Ok(LOOPBACK_VERSION)
    }

    fn extra_param(&self, key: &str) -> Result<Option<ParamValue>, TransportError> {
        self.enter("extra_param")?;
        Ok(self
            .params
            .lock()
            .expect("params mutex poisoned")
            .get(key)
            .cloned())
    }
}

/// How the loopback binder answers a bind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindBehavior {
    /// Connect after `latency`.
    Accept { latency: Duration },
    /// Refuse synchronously.
    Refuse,
    /// Accept the bind but never answer.
    Ignore,
}

/// Platform binder emulation around a replaceable [`LoopbackService`].
pub struct LoopbackBinder {
    runtime: Handle,
    vault: Arc<KeyVault>,
    behavior: Mutex<BindBehavior>,
    service: Mutex<Arc<LoopbackService>>,
    current: Mutex<Option<BindingSink>>,
    binds: AtomicUsize,
    unbinds: AtomicUsize,
}

impl LoopbackBinder {
    /// Binder whose connection callbacks run on `runtime`.
    pub fn new(runtime: Handle, behavior: BindBehavior) -> Self {
        let vault = Arc::new(KeyVault::new());
        Self {
            runtime,
            service: Mutex::new(Arc::new(LoopbackService::new(Arc::clone(&vault)))),
            vault,
            behavior: Mutex::new(behavior),
            current: Mutex::new(None),
            binds: AtomicUsize::new(0),
            unbinds: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: BindBehavior) {
        *self.behavior.lock().expect("behavior mutex poisoned") = behavior;
    }

    /// The service instance the next connection will hand out.
    pub fn service(&self) -> Arc<LoopbackService> {
        Arc::clone(&self.service.lock().expect("service mutex poisoned"))
    }

    /// Number of `bind` calls received.
    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    /// Number of `unbind` calls received.
    pub fn unbind_count(&self) -> usize {
        self.unbinds.load(Ordering::SeqCst)
    }

    /// Sink of the binding currently held, if any.
    pub fn current_sink(&self) -> Option<BindingSink> {
        self.current.lock().expect("sink mutex poisoned").clone()
    }

    /// Deliver the current service to the pending binding now.
    pub fn connect_pending(&self) -> bool {
        match self.current_sink() {
            Some(sink) => {
                sink.connected(self.service());
                true
            }
            None => false,
        }
    }

    /// Crash the service process; a fresh instance serves later binds.
    pub fn kill_service(&self) -> Arc<LoopbackService> {
        let old = self.restart();
        old.kill();
        old
    }

    /// Stop the service in an orderly way and report the disconnect.
    pub fn disconnect_service(&self) -> Arc<LoopbackService> {
        let old = self.restart();
        old.stop();
        if let Some(sink) = self.current_sink() {
            sink.disconnected();
        }
        old
    }

    /// Report that the current binding died.
    pub fn kill_binding(&self) {
        if let Some(sink) = self.current_sink() {
            sink.binding_died();
        }
    }

    fn restart(&self) -> Arc<LoopbackService> {
        let fresh = Arc::new(LoopbackService::new(Arc::clone(&self.vault)));
        std::mem::replace(&mut *self.service.lock().expect("service mutex poisoned"), fresh)
    }
}

impl ServiceBinder for LoopbackBinder {
    fn bind(&self, sink: BindingSink) -> Result<(), TransportError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock().expect("behavior mutex poisoned");

        match behavior {
            BindBehavior::Refuse => Err(TransportError::BindRefused("loopback refusing".into())),
            BindBehavior::Ignore => {
                *self.current.lock().expect("sink mutex poisoned") = Some(sink);
                Ok(())
            }
            BindBehavior::Accept { latency } => {
                *self.current.lock().expect("sink mutex poisoned") = Some(sink.clone());
                let service = self.service();
                self.runtime.spawn(async move {
                    tokio::time::sleep(latency).await;
                    sink.connected(service);
                });
                Ok(())
            }
        }
    }

    fn unbind(&self, attempt: BindAttempt) {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock().expect("sink mutex poisoned");
        if current.as_ref().is_some_and(|s| s.attempt() == attempt) {
            *current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_survives_restart() {
        let vault = Arc::new(KeyVault::new());
        let first = LoopbackService::new(Arc::clone(&vault));
        assert_eq!(first.generate_master_key(1), Ok(STATUS_OK));
        first.kill();
        assert_eq!(first.has_master_key(1), Err(TransportError::DeadObject));

        let second = LoopbackService::new(vault);
        assert_eq!(second.has_master_key(1), Ok(true));
    }

    #[test]
    fn test_auth_key_needs_master() {
        let service = LoopbackService::standalone();
        assert_eq!(service.generate_auth_key(1, "pay"), Ok(STATUS_NOT_FOUND));
        service.generate_master_key(1).unwrap();
        assert_eq!(service.generate_auth_key(1, "pay"), Ok(STATUS_OK));
        assert_eq!(service.has_auth_key(1, "pay"), Ok(true));

        service.remove_all_keys(1).unwrap();
        assert_eq!(service.has_auth_key(1, "pay"), Ok(false));
    }

    #[test]
    fn test_injected_faults() {
        let service = LoopbackService::standalone();
        service.inject("generate_master_key", Fault::Status(7));
        service.inject("version", Fault::Transport);

        assert_eq!(service.generate_master_key(1), Ok(7));
        assert!(matches!(service.version(), Err(TransportError::Failed(_))));

        service.clear_faults();
        assert_eq!(service.version(), Ok(LOOPBACK_VERSION));
    }

    #[test]
    fn test_sign_session() {
        let service = LoopbackService::standalone();
        service.generate_master_key(1).unwrap();
        service.generate_auth_key(1, "pay").unwrap();

        let session = service.init_sign(1, "pay", "nonce").unwrap();
        assert_eq!(session.status, STATUS_OK);

        let signed = service.finish_sign(session.session).unwrap();
        assert_eq!(signed.status, STATUS_OK);
        assert_eq!(signed.payload, b"signed:1:pay:nonce");

        // Sessions are single-use.
        assert_eq!(service.finish_sign(session.session).unwrap().status, STATUS_NOT_FOUND);
    }

    #[test]
    fn test_ping_tracks_responsiveness() {
        let service = LoopbackService::standalone();
        assert!(service.ping());
        service.set_responsive(false);
        assert!(service.is_alive());
        assert!(!service.ping());
    }
}
