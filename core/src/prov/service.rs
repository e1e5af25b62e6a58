// Bearer service — runs a PB-GATT bearer on its own tokio task
//
// Proxy notifications, provisioning-layer requests and protocol timer
// expiries all arrive on the task's queues and are handled one at a time,
// each to completion, so the link never sees interleaved operations.

use crate::config::BearerConfig;
use crate::prov::bearer::{
    BearerError, BearerType, LinkEvent, LinkStatus, ProvBearer, ProvBearerCallbacks,
};
use crate::prov::pb_gatt::PbGatt;
use crate::prov::timer::TokioTimer;
use crate::prov::transport::{ConnHandle, ProxyTransport};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Errors from the bearer service handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Bearer(#[from] BearerError),
    #[error("Bearer task not running")]
    NotRunning,
}

type Reply = oneshot::Sender<Result<(), BearerError>>;

/// Commands processed by the bearer task
pub enum BearerCommand {
    /// Install callbacks for the next link
    Accept {
        callbacks: Box<dyn ProvBearerCallbacks>,
        reply: Reply,
    },
    /// Proxy connection established
    Open { conn: ConnHandle, reply: Reply },
    /// Proxy delivered a provisioning PDU
    Recv {
        conn: ConnHandle,
        pdu: Vec<u8>,
        reply: Reply,
    },
    /// Proxy connection closed
    Close { conn: ConnHandle, reply: Reply },
    /// Send a PDU on the active link
    Send { pdu: Vec<u8>, reply: Reply },
    /// Drop any in-flight send
    ClearTx,
    /// Query the active connection
    ActiveConn {
        reply: oneshot::Sender<Option<ConnHandle>>,
    },
    /// Stop the task
    Shutdown,
}

/// Callback set forwarding link events onto a channel
pub struct ChannelCallbacks {
    event_tx: mpsc::UnboundedSender<LinkEvent>,
}

impl ChannelCallbacks {
    pub fn new(event_tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { event_tx }
    }

    /// Create a callback set together with the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn forward(&self, event: LinkEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Link event receiver dropped");
        }
    }
}

impl ProvBearerCallbacks for ChannelCallbacks {
    fn link_opened(&mut self, bearer: BearerType) {
        self.forward(LinkEvent::Opened { bearer });
    }

    fn link_closed(&mut self, bearer: BearerType, status: LinkStatus) {
        self.forward(LinkEvent::Closed { bearer, status });
    }

    fn recv(&mut self, bearer: BearerType, pdu: &[u8]) {
        self.forward(LinkEvent::Received {
            bearer,
            pdu: pdu.to_vec(),
        });
    }
}

/// Handle to communicate with the running bearer task
#[derive(Clone)]
pub struct BearerHandle {
    command_tx: mpsc::Sender<BearerCommand>,
}

impl BearerHandle {
    async fn request(
        &self,
        build: impl FnOnce(Reply) -> BearerCommand,
    ) -> Result<(), ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| ServiceError::NotRunning)?;

        reply_rx.await.map_err(|_| ServiceError::NotRunning)??;
        Ok(())
    }

    /// Install callbacks for the next link
    pub async fn accept(
        &self,
        callbacks: Box<dyn ProvBearerCallbacks>,
    ) -> Result<(), ServiceError> {
        self.request(|reply| BearerCommand::Accept { callbacks, reply })
            .await
    }

    /// Report an established proxy connection
    pub async fn open(&self, conn: ConnHandle) -> Result<(), ServiceError> {
        self.request(|reply| BearerCommand::Open { conn, reply }).await
    }

    /// Deliver a provisioning PDU from the proxy
    pub async fn recv(&self, conn: ConnHandle, pdu: Vec<u8>) -> Result<(), ServiceError> {
        self.request(|reply| BearerCommand::Recv { conn, pdu, reply })
            .await
    }

    /// Report a closed proxy connection
    pub async fn close(&self, conn: ConnHandle) -> Result<(), ServiceError> {
        self.request(|reply| BearerCommand::Close { conn, reply })
            .await
    }

    /// Send a PDU on the active link
    pub async fn send(&self, pdu: Vec<u8>) -> Result<(), ServiceError> {
        self.request(|reply| BearerCommand::Send { pdu, reply })
            .await
    }

    /// Drop any in-flight send
    pub async fn clear_tx(&self) -> Result<(), ServiceError> {
        self.command_tx
            .send(BearerCommand::ClearTx)
            .await
            .map_err(|_| ServiceError::NotRunning)
    }

    /// Connection of the active link, if any
    pub async fn active_conn(&self) -> Result<Option<ConnHandle>, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(BearerCommand::ActiveConn { reply: reply_tx })
            .await
            .map_err(|_| ServiceError::NotRunning)?;

        reply_rx.await.map_err(|_| ServiceError::NotRunning)
    }

    /// Shut down the bearer task
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.command_tx
            .send(BearerCommand::Shutdown)
            .await
            .map_err(|_| ServiceError::NotRunning)
    }
}

fn dispatch<T: ProxyTransport>(bearer: &mut PbGatt<T, TokioTimer>, command: BearerCommand) {
    match command {
        BearerCommand::Accept { callbacks, reply } => {
            let _ = reply.send(bearer.link_accept(callbacks));
        }
        BearerCommand::Open { conn, reply } => {
            let _ = reply.send(bearer.open(conn));
        }
        BearerCommand::Recv { conn, pdu, reply } => {
            let _ = reply.send(bearer.recv(conn, &pdu));
        }
        BearerCommand::Close { conn, reply } => {
            let _ = reply.send(bearer.close(conn));
        }
        BearerCommand::Send { pdu, reply } => {
            let _ = reply.send(bearer.send(&pdu));
        }
        BearerCommand::ClearTx => bearer.clear_tx(),
        BearerCommand::ActiveConn { reply } => {
            let _ = reply.send(bearer.link().conn());
        }
        BearerCommand::Shutdown => {}
    }
}

/// Build a PB-GATT bearer over `transport` and start its task.
///
/// Must be called from within a tokio runtime. The returned join handle
/// completes once the task has shut down.
pub async fn start_bearer<T>(
    config: BearerConfig,
    transport: T,
) -> Result<(BearerHandle, JoinHandle<()>), BearerError>
where
    T: ProxyTransport + 'static,
{
    let (timer, mut expired_rx) = TokioTimer::channel();
    let mut bearer = PbGatt::new(config, transport, timer)?;

    let (command_tx, mut command_rx) = mpsc::channel::<BearerCommand>(64);
    let handle = BearerHandle { command_tx };

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    None | Some(BearerCommand::Shutdown) => break,
                    Some(command) => dispatch(&mut bearer, command),
                },
                Some(id) = expired_rx.recv() => bearer.on_timeout(id),
            }
        }
        debug!("Bearer task stopped");
    });

    Ok((handle, task))
}
