//! Utilities for shutting down slink servers and login managers.

use std::{
    io,
    sync::{atomic::AtomicBool, Arc},
};

use tokio::sync::broadcast;

use crate::atomic::ORDERING;

/// Owner of a shutdown signal. Receivers observe the signal both as an event
/// ([ShutdownReceiver::recv_shutdown_immediately]) and as a flag
/// ([ShutdownReceiver::is_shutdown]) for loops that only poll between steps.
pub struct ShutdownManager {
    shutting_down: Arc<AtomicBool>,
    immediate_shutdown_tx: broadcast::Sender<()>,
    shutdown: bool,
}

impl ShutdownManager {
    pub fn new_pair() -> (Self, ShutdownReceiver) {
        let (immediate_shutdown_tx, immediate_shutdown_rx) = broadcast::channel(1);

        let manager = Self {
            shutting_down: Arc::new(AtomicBool::new(false)),
            immediate_shutdown_tx,
            shutdown: false,
        };
        let recv = ShutdownReceiver {
            shutting_down: Arc::clone(&manager.shutting_down),
            immediate_shutdown_rx,
        };

        (manager, recv)
    }

    pub fn add_receiver(&self) -> ShutdownReceiver {
        ShutdownReceiver {
            shutting_down: Arc::clone(&self.shutting_down),
            immediate_shutdown_rx: self.immediate_shutdown_tx.subscribe(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Signals every receiver. May only be called once.
    pub fn shutdown_immediately(&mut self) -> io::Result<usize> {
        assert!(!self.shutdown);
        self.shutdown = true;
        self.shutting_down.store(true, ORDERING);
        self.immediate_shutdown_tx.send(()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "could not send shutdown message",
            )
        })
    }
}

pub struct ShutdownReceiver {
    shutting_down: Arc<AtomicBool>,
    immediate_shutdown_rx: broadcast::Receiver<()>,
}

impl ShutdownReceiver {
    /// Resolves once shutdown is signalled. Resolves immediately if it already was.
    pub async fn recv_shutdown_immediately(&mut self) -> io::Result<()> {
        if self.is_shutdown() {
            return Ok(());
        }
        self.immediate_shutdown_rx
            .recv()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()))
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutting_down.load(ORDERING)
    }
}
