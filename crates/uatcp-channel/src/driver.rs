//! Per-channel async driver.
//!
//! One task owns the transport and the handler; everything that touches
//! channel state flows through it. Upper layers hold a cheap
//! [`SecureChannelHandle`] that submits requests over a command queue and
//! awaits oneshot completions. The driver loop multiplexes three sources:
//! commands from handles, bytes from the transport, and the handler's
//! deadlines (handshake timeout, scheduled renewal).

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot},
};
use uatcp_proto::{MessageCodec, RequestMessage, ResponseMessage};

use crate::{
    env::Environment,
    error::ChannelError,
    framing::FramingReader,
    handler::{ChannelHandler, HandlerAction},
    pending::ResponseSender,
};

/// Commands a handle can send to the driver.
enum Command {
    Submit { request: RequestMessage, reply: ResponseSender },
    Close,
}

/// Upper-layer handle to a running channel.
#[derive(Clone)]
pub struct SecureChannelHandle {
    commands: mpsc::Sender<Command>,
}

impl SecureChannelHandle {
    /// Submit a request and await its response.
    ///
    /// # Errors
    ///
    /// Fails with the channel error that terminated the request: a service
    /// fault, a message abort, a size violation, or `ConnectionClosed` when
    /// the channel went away.
    pub async fn send_request(
        &self,
        request: RequestMessage,
    ) -> Result<ResponseMessage, ChannelError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Submit { request, reply })
            .await
            .map_err(|_| ChannelError::ConnectionClosed)?;
        response.await.map_err(|_| ChannelError::ConnectionClosed)?
    }

    /// Ask the driver to close the channel cleanly.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }
}

/// Drives one secure channel over a byte-stream transport.
pub struct ChannelDriver<T, E: Environment, C: MessageCodec> {
    transport: T,
    env: E,
    handler: ChannelHandler<E, C>,
    commands: mpsc::Receiver<Command>,
    framing: FramingReader,
}

impl<T, E, C> ChannelDriver<T, E, C>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
    E: Environment,
    C: MessageCodec,
{
    /// Pair a driver with the handle upper layers will use.
    ///
    /// The handler's handshake sender (created alongside the handler) is the
    /// way to observe handshake completion.
    pub fn new(
        transport: T,
        env: E,
        handler: ChannelHandler<E, C>,
        max_chunk_size: u32,
    ) -> (SecureChannelHandle, Self) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let driver = Self {
            transport,
            env,
            handler,
            commands: commands_rx,
            framing: FramingReader::new(max_chunk_size),
        };
        (SecureChannelHandle { commands: commands_tx }, driver)
    }

    /// Run the channel to completion.
    ///
    /// Returns `Ok(())` on a clean close or orderly transport shutdown, and
    /// the fatal error otherwise. Pending requests are always failed before
    /// this returns.
    ///
    /// # Errors
    ///
    /// The first fatal [`ChannelError`] that tore the channel down.
    pub async fn run(self) -> Result<(), ChannelError> {
        let Self { transport, env, mut handler, mut commands, mut framing } = self;
        let (mut reader, mut writer) = tokio::io::split(transport);

        let attach_actions = match handler.attach(env.now()) {
            Ok(actions) => actions,
            Err(error) => {
                handler.fail(&error);
                return Err(error);
            },
        };
        if execute(&mut writer, &mut handler, attach_actions).await? {
            return Ok(());
        }

        loop {
            let pruned = handler.context().pending.prune_closed();
            if pruned > 0 {
                tracing::debug!(pruned, "pruned abandoned request waiters");
            }

            let deadline = handler.next_deadline();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Submit { request, reply }) => {
                        match handler.submit(request, reply) {
                            Ok(actions) => {
                                if execute(&mut writer, &mut handler, actions).await? {
                                    return Ok(());
                                }
                            },
                            Err(error) => {
                                handler.fail(&error);
                                let _ = writer.shutdown().await;
                                return Err(error);
                            },
                        }
                    },
                    // All handles dropped: treat like an explicit close.
                    Some(Command::Close) | None => {
                        let actions = handler.request_close();
                        let _ = execute(&mut writer, &mut handler, actions).await;
                        handler.transport_closed();
                        return Ok(());
                    },
                },

                read = reader.read_buf(framing.buffer_mut()) => match read {
                    Ok(0) => {
                        handler.transport_closed();
                        return Ok(());
                    },
                    Ok(_) => {
                        loop {
                            match framing.next_chunk() {
                                Ok(Some(chunk)) => {
                                    match handler.handle_chunk(chunk, env.now()) {
                                        Ok(actions) => {
                                            if execute(&mut writer, &mut handler, actions).await? {
                                                return Ok(());
                                            }
                                        },
                                        Err(error) => {
                                            tracing::error!(%error, "fatal error handling chunk");
                                            handler.fail(&error);
                                            let _ = writer.shutdown().await;
                                            return Err(error);
                                        },
                                    }
                                },
                                Ok(None) => break,
                                Err(error) => {
                                    tracing::error!(%error, "fatal framing error");
                                    handler.fail(&error);
                                    let _ = writer.shutdown().await;
                                    return Err(error);
                                },
                            }
                        }
                    },
                    Err(error) => {
                        tracing::error!(%error, "transport read failed");
                        handler.transport_closed();
                        return Err(ChannelError::ConnectionClosed);
                    },
                },

                () = sleep_until(&env, deadline), if deadline.is_some() => {
                    let actions = handler.tick(env.now());
                    if execute(&mut writer, &mut handler, actions).await? {
                        return Ok(());
                    }
                },
            }
        }
    }
}

async fn sleep_until<E: Environment>(env: &E, deadline: Option<E::Instant>) {
    match deadline {
        Some(deadline) => {
            let now = env.now();
            if deadline > now {
                env.sleep(deadline - now).await;
            }
        },
        None => std::future::pending().await,
    }
}

/// Execute the handler's actions. Returns true when the channel is finished
/// and the driver should stop.
async fn execute<W, E, C>(
    writer: &mut W,
    handler: &mut ChannelHandler<E, C>,
    actions: Vec<HandlerAction>,
) -> Result<bool, ChannelError>
where
    W: AsyncWrite + Unpin,
    E: Environment,
    C: MessageCodec,
{
    for action in actions {
        match action {
            HandlerAction::Write(bytes) => {
                if let Err(error) = write_all_flush(writer, &bytes).await {
                    tracing::error!(%error, "transport write failed");
                    handler.transport_closed();
                    return Err(ChannelError::ConnectionClosed);
                }
            },
            HandlerAction::WriteAndClose(bytes) => {
                if let Err(error) = write_all_flush(writer, &bytes).await {
                    tracing::error!(%error, "transport write failed during close");
                }
                let _ = writer.shutdown().await;
                handler.transport_closed();
                return Ok(true);
            },
            HandlerAction::Close { reason } => {
                tracing::debug!(reason, "closing transport");
                let _ = writer.shutdown().await;
                handler.transport_closed();
                return Ok(true);
            },
        }
    }
    Ok(false)
}

async fn write_all_flush<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &Bytes) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}
