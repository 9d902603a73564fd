use log::{debug, warn};
use shared::{
    read_frame, write_frame, Envelope, FrameError, MessageKind, Payload, PlayerState,
    PositionReport, ProtocolError, Response, ResponseCode, ResponseData, RoomInfo,
    RoomPlayerUpdate, DEFAULT_MAX_FRAME_SIZE,
};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection to server closed")]
    Disconnected,
    #[error("{kind:?} rejected with {code:?}: {message}")]
    Rejected {
        kind: MessageKind,
        code: ResponseCode,
        message: String,
    },
    #[error("expected a response to {expected:?}, got {received:?}")]
    Unexpected {
        expected: MessageKind,
        received: MessageKind,
    },
}

/// A framed connection to the session server.
///
/// Incoming envelopes are decoded by a background task and buffered, so
/// broadcasts that arrive between requests are never lost.
pub struct GameClient<S = TcpStream> {
    writer: WriteHalf<S>,
    inbound: mpsc::UnboundedReceiver<Envelope>,
    reader_task: JoinHandle<()>,
}

impl GameClient<TcpStream> {
    pub async fn connect(address: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", address);
        Ok(Self::from_stream(stream))
    }
}

impl<S> GameClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn from_stream(stream: S) -> Self {
        let (mut reader, writer) = tokio::io::split(stream);
        let (tx, inbound) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(async move {
            loop {
                let frame = match read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await {
                    Ok(frame) => frame,
                    Err(FrameError::ConnectionClosed) => break,
                    Err(e) => {
                        warn!("Dropping server connection: {}", e);
                        break;
                    }
                };
                match Envelope::decode(&frame) {
                    Ok(envelope) => {
                        if tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Server sent an undecodable envelope: {}", e);
                        break;
                    }
                }
            }
        });

        GameClient {
            writer,
            inbound,
            reader_task,
        }
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), ClientError> {
        let payload = envelope.encode()?;
        write_frame(&mut self.writer, &payload).await?;
        Ok(())
    }

    /// Next envelope from the server, in arrival order
    pub async fn recv(&mut self) -> Result<Envelope, ClientError> {
        self.inbound.recv().await.ok_or(ClientError::Disconnected)
    }

    /// Like [`GameClient::recv`] but gives up after `wait`
    pub async fn recv_timeout(&mut self, wait: Duration) -> Result<Option<Envelope>, ClientError> {
        match tokio::time::timeout(wait, self.inbound.recv()).await {
            Ok(Some(envelope)) => Ok(Some(envelope)),
            Ok(None) => Err(ClientError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    /// Reads until a response tagged `kind` arrives, returning it whatever
    /// its code. Anything else read on the way is dropped.
    pub async fn response_to(&mut self, kind: MessageKind) -> Result<Response, ClientError> {
        loop {
            let envelope = self.recv().await?;
            match envelope.payload {
                Payload::Response(response) if envelope.kind == kind => return Ok(response),
                _ => debug!("Skipping {:?} while waiting for {:?}", envelope.kind, kind),
            }
        }
    }

    pub async fn login(&mut self, player_id: &str) -> Result<Response, ClientError> {
        self.request(MessageKind::SessionLogin, player_id).await
    }

    pub async fn logout(&mut self, player_id: &str) -> Result<Response, ClientError> {
        self.request(MessageKind::SessionLogout, player_id).await
    }

    /// Queues the player; the returned response is the queue acknowledgement,
    /// the room snapshot follows separately once a partner is found
    pub async fn start_matchmaking(&mut self, player_id: &str) -> Result<Response, ClientError> {
        self.request(MessageKind::MatchmakingStart, player_id).await
    }

    pub async fn cancel_matchmaking(&mut self, player_id: &str) -> Result<Response, ClientError> {
        self.request(MessageKind::MatchmakingCancel, player_id).await
    }

    /// Waits for the room snapshot that follows a successful pairing
    pub async fn wait_for_room(&mut self) -> Result<RoomInfo, ClientError> {
        loop {
            let response = self.response_to(MessageKind::MatchmakingStart).await?;
            if response.code != ResponseCode::Success {
                return Err(rejected(MessageKind::MatchmakingStart, response));
            }
            if let Some(ResponseData::RoomInfo(room)) = response.data {
                return Ok(room);
            }
        }
    }

    /// Sends a room state update. Accepted updates are not answered, so this
    /// returns as soon as the frame is written.
    pub async fn send_update(
        &mut self,
        kind: MessageKind,
        room_id: &str,
        player: PlayerState,
    ) -> Result<(), ClientError> {
        self.send(&Envelope::room_update(kind, room_id, player)).await
    }

    pub async fn report_position(
        &mut self,
        player_id: &str,
        x: f32,
        y: f32,
        z: f32,
    ) -> Result<(), ClientError> {
        let report = PositionReport {
            player_id: player_id.to_string(),
            x,
            y,
            z,
        };
        let envelope =
            Envelope::new(MessageKind::PlayerPositionUpdate, Payload::PositionReport(report));
        self.send(&envelope).await
    }

    /// Next state change mirrored from the other occupant
    pub async fn next_room_update(
        &mut self,
    ) -> Result<(MessageKind, RoomPlayerUpdate), ClientError> {
        loop {
            let envelope = self.recv().await?;
            if let Payload::Response(Response {
                data: Some(ResponseData::RoomPlayerUpdate(update)),
                ..
            }) = envelope.payload
            {
                return Ok((envelope.kind, update));
            }
            debug!("Skipping {:?} while waiting for a room update", envelope.kind);
        }
    }

    async fn request(
        &mut self,
        kind: MessageKind,
        player_id: &str,
    ) -> Result<Response, ClientError> {
        self.send(&Envelope::player_request(kind, player_id)).await?;
        let response = self.response_to(kind).await?;
        // The session moves to this connection even on a repeated login
        if response.code == ResponseCode::Success
            || (kind == MessageKind::SessionLogin && response.code == ResponseCode::Conflict)
        {
            Ok(response)
        } else {
            Err(rejected(kind, response))
        }
    }
}

impl<S> Drop for GameClient<S> {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

fn rejected(kind: MessageKind, response: Response) -> ClientError {
    ClientError::Rejected {
        kind,
        code: response.code,
        message: response.message,
    }
}
