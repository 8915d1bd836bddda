use core::str;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use thiserror::Error;
use tokio::io::AsyncReadExt as _;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::cache::{BlocklistCache, Policy};
use crate::extract::{get_field, get_operation_code, ExtractError};
use crate::{State, MAX_DOMAIN_LENGTH, MAX_PAYLOAD};

/// Messages are actioned only when they carry this code.
const CODE_SUCCESS: &str = "100";

const OP_SET_AD_BLOCK: i32 = 50;
const OP_SET_ADULT_BLOCK: i32 = 51;
const OP_ADD_DOMAIN: i32 = 52;
const OP_REMOVE_DOMAIN: i32 = 53;
const OP_BULK_SYNC: i32 = 55;

/// A per-message failure: the offending message is dropped and the worker
/// continues with the next receive.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("failed to extract a required field: {0}")]
    Extract(#[from] ExtractError),
    #[error("unknown operation code {0}")]
    UnknownOperation(i32),
    #[error("domain entry of {0} bytes exceeds the supported length")]
    DomainTooLong(usize),
    #[error("message is not valid UTF-8")]
    NotText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Listening,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ChannelState::Connecting,
            2 => ChannelState::Listening,
            _ => ChannelState::Disconnected,
        }
    }
}

/// The persistent connection to the management server.
///
/// One background worker performs blocking receives and applies each
/// message to the shared cache. Any receive error is terminal: the channel
/// goes back to `Disconnected` and stays there, there is no reconnect.
pub struct ControlChannel {
    worker: JoinHandle<()>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    channel_state: Arc<AtomicU8>,
}

impl ControlChannel {
    /// Opens the outbound connection and starts the receive worker.
    ///
    /// Connection failure is fatal: the caller is expected to abort
    /// start-up of the whole filtering subsystem.
    pub async fn connect(addr: SocketAddr, state: Arc<State>) -> anyhow::Result<Self> {
        let channel_state = Arc::new(AtomicU8::new(ChannelState::Connecting as u8));

        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to the management server at {}", addr))?;
        tracing::info!(%addr, "connected to the management server");
        channel_state.store(ChannelState::Listening as u8, Ordering::SeqCst);

        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());
        let worker = tokio::spawn(listen_loop(
            stream,
            state,
            running.clone(),
            shutdown.clone(),
            channel_state.clone(),
        ));

        Ok(ControlChannel {
            worker,
            running,
            shutdown,
            channel_state,
        })
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.channel_state.load(Ordering::SeqCst))
    }

    /// Clears the running flag and interrupts the pending receive, then
    /// joins the worker. The receive has no timeout of its own, so this is
    /// the only way to stop an idle channel.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
        self.worker.await.context("control channel worker panicked")
    }
}

async fn listen_loop(
    mut stream: TcpStream,
    state: Arc<State>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    channel_state: Arc<AtomicU8>,
) {
    let mut buf = vec![0u8; MAX_PAYLOAD];
    while running.load(Ordering::SeqCst) {
        let received = tokio::select! {
            _ = shutdown.notified() => break,
            received = stream.read(&mut buf) => received,
        };
        match received {
            Ok(0) => {
                tracing::info!("management server closed the connection");
                break;
            }
            // One successful receive is one logical message: the protocol
            // sends no length framing
            Ok(n) => {
                if let Err(error) = process_message(&state, &buf[..n]) {
                    tracing::warn!(%error, "dropping control message");
                }
            }
            Err(error) => {
                tracing::error!(%error, "control connection receive failed");
                break;
            }
        }
    }
    channel_state.store(ChannelState::Disconnected as u8, Ordering::SeqCst);
    tracing::debug!("control channel worker exited");
}

fn process_message(state: &State, raw: &[u8]) -> Result<(), ProtocolError> {
    let raw = str::from_utf8(raw).map_err(|_| ProtocolError::NotText)?;

    // A message without the success code is ignored, not failed
    if get_field(raw, "code").map_or(true, |code| code != CODE_SUCCESS) {
        tracing::trace!("ignoring message without a success code");
        return Ok(());
    }

    let cache = &state.cache;
    match get_operation_code(raw)? {
        OP_SET_AD_BLOCK => {
            let enabled = get_field(raw, "content")? == "on";
            let current = cache.snapshot_policy();
            cache.set_policy(Policy {
                ad_block: enabled,
                ..current
            });
            tracing::info!(enabled, "ad filtering updated");
        }
        OP_SET_ADULT_BLOCK => {
            let enabled = get_field(raw, "content")? == "on";
            let current = cache.snapshot_policy();
            cache.set_policy(Policy {
                adult_block: enabled,
                ..current
            });
            tracing::info!(enabled, "adult content filtering updated");
        }
        OP_ADD_DOMAIN => {
            let domain = checked_domain(get_field(raw, "content")?)?;
            cache.insert(domain);
        }
        OP_REMOVE_DOMAIN => {
            let domain = checked_domain(get_field(raw, "content")?)?;
            cache.remove(domain);
        }
        OP_BULK_SYNC => {
            let settings = get_field(raw, "settings")?;
            cache.set_policy(Policy {
                ad_block: get_field(settings, "ad_block")? == "on",
                adult_block: get_field(settings, "adult_block")? == "on",
            });
            let (added, skipped) = sync_domains(cache, get_field(raw, "domains")?);
            tracing::info!(added, skipped, "initial domain sync applied");
        }
        op => return Err(ProtocolError::UnknownOperation(op)),
    }

    Ok(())
}

fn checked_domain(domain: &str) -> Result<&str, ProtocolError> {
    if domain.len() >= MAX_DOMAIN_LENGTH {
        return Err(ProtocolError::DomainTooLong(domain.len()));
    }
    Ok(domain)
}

/// Inserts every array entry that fits the bound. Oversized entries are
/// skipped and counted rather than failing the whole sync.
fn sync_domains(cache: &BlocklistCache, array: &str) -> (usize, usize) {
    let inner = array.trim_start_matches('[').trim_end_matches(']');
    let mut added = 0;
    let mut skipped = 0;
    for entry in inner.split(',') {
        let domain = entry.trim().trim_matches('"');
        if domain.is_empty() {
            continue;
        }
        if domain.len() >= MAX_DOMAIN_LENGTH {
            tracing::warn!(length = domain.len(), "skipping oversized domain entry");
            skipped += 1;
            continue;
        }
        cache.insert(domain);
        added += 1;
    }
    (added, skipped)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    use super::*;

    fn process(state: &State, raw: &str) -> Result<(), ProtocolError> {
        process_message(state, raw.as_bytes())
    }

    // The protocol has no acknowledgements, so tests poll for the
    // observable effect of each message before sending the next one
    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition was not reached in time");
    }

    #[tokio::test]
    async fn channel_applies_messages_from_the_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(State::new());
        let channel = ControlChannel::connect(addr, state.clone()).await.unwrap();
        assert_eq!(channel.state(), ChannelState::Listening);

        let (mut server, _) = listener.accept().await.unwrap();
        server.set_nodelay(true).unwrap();

        server
            .write_all(br#"{"code": "100", "operation": "52", "content": "ads.example.com"}"#)
            .await
            .unwrap();
        wait_until(|| state.cache.contains("ads.example.com")).await;

        server
            .write_all(br#"{"code": "100", "operation": "50", "content": "on"}"#)
            .await
            .unwrap();
        wait_until(|| state.cache.snapshot_policy().ad_block).await;

        channel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn channel_goes_disconnected_when_the_server_hangs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(State::new());
        let channel = ControlChannel::connect(addr, state).await.unwrap();

        let (server, _) = listener.accept().await.unwrap();
        drop(server);

        wait_until(|| channel.state() == ChannelState::Disconnected).await;
        channel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn connection_failure_is_fatal() {
        // Nothing listens on port 1
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let state = Arc::new(State::new());
        assert!(ControlChannel::connect(addr, state).await.is_err());
    }

    #[test]
    fn add_and_remove_domain_operations() {
        let state = State::new();

        process(&state, r#"{"code": "100", "operation": "52", "content": "ads.example.com"}"#).unwrap();
        assert!(state.cache.contains("ads.example.com"));

        process(&state, r#"{"code": "100", "operation": "53", "content": "ads.example.com"}"#).unwrap();
        assert!(!state.cache.contains("ads.example.com"));
    }

    #[test]
    fn flag_operations_preserve_the_other_flag() {
        let state = State::new();

        process(&state, r#"{"code": "100", "operation": "50", "content": "on"}"#).unwrap();
        assert_eq!(
            state.cache.snapshot_policy(),
            Policy { ad_block: true, adult_block: false }
        );

        process(&state, r#"{"code": "100", "operation": "51", "content": "on"}"#).unwrap();
        assert_eq!(
            state.cache.snapshot_policy(),
            Policy { ad_block: true, adult_block: true }
        );

        process(&state, r#"{"code": "100", "operation": "50", "content": "off"}"#).unwrap();
        assert_eq!(
            state.cache.snapshot_policy(),
            Policy { ad_block: false, adult_block: true }
        );
    }

    #[test]
    fn bulk_sync_applies_settings_and_domains() {
        let state = State::new();

        let msg = r#"{"code": "100", "operation": "55", "settings": {"ad_block": "on", "adult_block": "off"}, "domains": ["a.com", "b.com"]}"#;
        process(&state, msg).unwrap();

        assert!(state.cache.contains("a.com"));
        assert!(state.cache.contains("b.com"));
        assert_eq!(state.cache.len(), 2);
        assert_eq!(
            state.cache.snapshot_policy(),
            Policy { ad_block: true, adult_block: false }
        );
    }

    #[test]
    fn bulk_sync_counts_additions_and_skips_oversized_entries() {
        let state = State::new();
        let oversized = "a".repeat(MAX_DOMAIN_LENGTH);
        let array = format!(r#"["a.com", "{}", "b.com"]"#, oversized);

        assert_eq!(sync_domains(&state.cache, &array), (2, 1));
        assert_eq!(state.cache.len(), 2);
    }

    #[test]
    fn messages_without_a_success_code_are_ignored() {
        let state = State::new();

        process(&state, r#"{"code": "101", "operation": "52", "content": "ads.example.com"}"#).unwrap();
        process(&state, r#"{"operation": "52", "content": "ads.example.com"}"#).unwrap();
        assert!(state.cache.is_empty());
    }

    #[test]
    fn unknown_operations_are_a_protocol_error() {
        let state = State::new();
        assert_eq!(
            process(&state, r#"{"code": "100", "operation": "54", "content": "x"}"#),
            Err(ProtocolError::UnknownOperation(54))
        );
    }

    #[test]
    fn missing_required_fields_are_a_protocol_error() {
        let state = State::new();
        assert_eq!(
            process(&state, r#"{"code": "100", "operation": "52"}"#),
            Err(ProtocolError::Extract(ExtractError::NotFound))
        );
    }

    #[test]
    fn oversized_single_domain_is_rejected() {
        let state = State::new();
        let msg = format!(
            r#"{{"code": "100", "operation": "52", "content": "{}"}}"#,
            "a".repeat(MAX_DOMAIN_LENGTH)
        );
        assert_eq!(
            process(&state, &msg),
            Err(ProtocolError::DomainTooLong(MAX_DOMAIN_LENGTH))
        );
    }
}
