use std::sync::Arc;

use tabcap_engine::core::{EngineBroadcast, EngineEvent};
use tabcap_proto::protocol::{Broadcast, EngineState, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    state: Arc<RwLock<EngineState>>,
    event_tx: mpsc::Sender<EngineEvent>,
    broadcast_tx: broadcast::Sender<EngineBroadcast>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, state, event_tx, broadcast_tx).await;
    })
}

async fn serve(
    listener: TcpListener,
    state: Arc<RwLock<EngineState>>,
    event_tx: mpsc::Sender<EngineEvent>,
    broadcast_tx: broadcast::Sender<EngineBroadcast>,
) {
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let state = state.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    handle_client(stream, state, id, evt_tx, bcast_rx).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state: Arc<RwLock<EngineState>>,
    client_id: usize,
    event_tx: mpsc::Sender<EngineEvent>,
    mut broadcast_rx: broadcast::Receiver<EngineBroadcast>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&state).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            if read_buf.len() < 4 { break; }
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    if event_tx.send(EngineEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("EngineEvent channel closed");
                                        return;
                                    }

                                    if let Ok(encoded) = encode_state(&state).await {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(_) => break,
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(EngineBroadcast::StateUpdated(data)) => {
                        if let Ok(encoded) = Message::Broadcast(Broadcast::State { data }).encode() {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(EngineBroadcast::Badge { tab_id, text }) => {
                        if let Ok(encoded) = Message::Broadcast(Broadcast::Badge { tab_id, text }).encode() {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Ok(EngineBroadcast::Visual(frame)) => {
                        let broadcast = Broadcast::Visual { frame: (*frame).clone() };
                        if let Ok(encoded) = Message::Broadcast(broadcast).encode() {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Ok(EngineBroadcast::Log(message)) => {
                        if let Ok(encoded) = Message::Broadcast(Broadcast::Log { message }).encode() {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Ok(EngineBroadcast::Error(message)) => {
                        if let Ok(encoded) = Message::Broadcast(Broadcast::Error { message }).encode() {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        if let Ok(encoded) = encode_state(&state).await {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

async fn encode_hello(state: &RwLock<EngineState>) -> anyhow::Result<Vec<u8>> {
    let snapshot = state.read().await.clone();
    let rev = snapshot.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        engine_rev: rev,
        state: snapshot,
    })
    .encode()
}

async fn encode_state(state: &RwLock<EngineState>) -> anyhow::Result<Vec<u8>> {
    let data = state.read().await.clone();
    Message::Broadcast(Broadcast::State { data }).encode()
}
