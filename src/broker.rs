//! Broker boundary: the publish/subscribe capability the recorder and the
//! replayer consume, plus its MQTT implementation.
//!
//! Connection events (connected, message) are delivered to a
//! [`ConnectionHandler`]. The recorder and the replayer's status watcher
//! each bind their own behavior to that same shape.
use crate::clock::Shutdown;
use crate::config::BrokerAddress;
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use rumqttc::{Client, Connection, ConnectionError, Event, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pause before the event loop polls again after losing the link.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Shortest keep-alive the MQTT client accepts.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Longest single wait for a state change, so a pending shutdown is
/// noticed quickly.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Capacity of the client's request queue.
const REQUEST_CAP: usize = 64;

pub trait Broker {
    /// Subscribes to a topic pattern (`#` matches a whole subtree).
    fn subscribe(&self, pattern: &str) -> Result<()>;

    /// Fire-and-forget publish.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Asks the connection to close once queued requests are flushed.
    fn disconnect(&self) -> Result<()>;
}

pub trait ConnectionHandler {
    fn on_connecting(&mut self) {}

    fn on_connected(&mut self, broker: &dyn Broker);

    fn on_disconnected(&mut self) {}

    fn on_message(&mut self, topic: &str, payload: &[u8]);
}

#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub address: BrokerAddress,
    pub client_id: String,
    pub keep_alive: Duration,
}

/// MQTT client half; cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct MqttBroker {
    client: Client,
}

/// MQTT network half. Must be driven by [`MqttEventLoop::run`] for any
/// request made through [`MqttBroker`] to reach the wire.
pub struct MqttEventLoop {
    address: BrokerAddress,
    connection: Connection,
}

impl MqttBroker {
    pub fn connect(opts: &BrokerOptions) -> (MqttBroker, MqttEventLoop) {
        let mut mqtt = MqttOptions::new(
            opts.client_id.clone(),
            opts.address.host.clone(),
            opts.address.port,
        );
        mqtt.set_keep_alive(opts.keep_alive.max(MIN_KEEP_ALIVE));
        let (client, connection) = Client::new(mqtt, REQUEST_CAP);
        (
            MqttBroker { client },
            MqttEventLoop {
                address: opts.address.clone(),
                connection,
            },
        )
    }
}

impl Broker for MqttBroker {
    fn subscribe(&self, pattern: &str) -> Result<()> {
        self.client
            .subscribe(pattern, QoS::AtMostOnce)
            .map_err(|e| Error::Connection(format!("subscribe {pattern}: {e}")))
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| Error::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .map_err(|e| Error::Connection(format!("disconnect: {e}")))
    }
}

impl MqttEventLoop {
    /// Drives network I/O and dispatches events to `handler` on the calling
    /// thread until the client disconnects.
    ///
    /// Failing before the first acknowledged connection is fatal. Later
    /// losses are reported to the handler and retried.
    pub fn run<H>(mut self, broker: &dyn Broker, handler: &mut H) -> Result<()>
    where
        H: ConnectionHandler + ?Sized,
    {
        let mut connected_once = false;
        handler.on_connecting();
        for notification in self.connection.iter() {
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    connected_once = true;
                    info!(broker = %self.address, code = ?ack.code, "connected");
                    handler.on_connected(broker);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    handler.on_message(&publish.topic, &publish.payload);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!(broker = %self.address, "disconnect requested");
                    handler.on_disconnected();
                    break;
                }
                Ok(_) => {}
                Err(ConnectionError::RequestsDone) => {
                    handler.on_disconnected();
                    break;
                }
                Err(e) if !connected_once => {
                    handler.on_disconnected();
                    return Err(Error::Connection(format!("{}: {e}", self.address)));
                }
                Err(e) => {
                    warn!(broker = %self.address, error = %e, "connection lost, retrying");
                    handler.on_disconnected();
                    std::thread::sleep(RECONNECT_DELAY);
                    handler.on_connecting();
                }
            }
        }
        Ok(())
    }
}

/// Handler half of a connection-state watch, fed by the event loop.
pub struct StatusWatcher {
    connected: Arc<AtomicBool>,
    changes: Sender<bool>,
}

/// Observer half: lets another thread wait for the `Connected` transition.
#[derive(Clone)]
pub struct ConnectionStatus {
    connected: Arc<AtomicBool>,
    changes: Receiver<bool>,
}

pub fn connection_status() -> (StatusWatcher, ConnectionStatus) {
    let connected = Arc::new(AtomicBool::new(false));
    // one pending wake-up is enough, the flag holds the actual state
    let (tx, rx) = bounded(1);
    (
        StatusWatcher {
            connected: connected.clone(),
            changes: tx,
        },
        ConnectionStatus {
            connected,
            changes: rx,
        },
    )
}

impl StatusWatcher {
    fn set(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        let _ = self.changes.try_send(connected);
    }
}

impl ConnectionHandler for StatusWatcher {
    fn on_connected(&mut self, _broker: &dyn Broker) {
        self.set(true);
    }

    fn on_disconnected(&mut self) {
        self.set(false);
    }

    fn on_message(&mut self, topic: &str, _payload: &[u8]) {
        debug!(topic, "ignoring inbound message");
    }
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Waits at most `timeout` for the link to come up. Returns early with
    /// the current state if the watcher side has gone away or `shutdown`
    /// fires.
    pub fn wait_connected(&self, timeout: Duration, shutdown: &Shutdown) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_connected() {
                return true;
            }
            if shutdown.is_triggered() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.is_connected();
            }
            match self.changes.recv_timeout(remaining.min(WAIT_SLICE)) {
                Ok(_) | Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return self.is_connected(),
            }
        }
    }
}
