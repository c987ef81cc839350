//! Server network layer handling UDP communications and the session tick

use crate::session::SessionHost;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::protocol::MAX_DATAGRAM_SIZE;
use shared::{Packet, SessionConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    Shutdown,
}

/// Messages sent from the session loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// UDP front end driving a [`SessionHost`] at a fixed tick rate
pub struct Server {
    socket: Arc<UdpSocket>,
    host: SessionHost,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl Server {
    pub async fn new(addr: &str, config: SessionConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            tick_duration: Duration::from_secs_f32(1.0 / config.tick_rate as f32),
            host: SessionHost::new(config),
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for asking the main loop to stop
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn host(&self) -> &SessionHost {
        &self.host
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(OutboundMessage::SendPacket { packet, addr }) = outbound_rx.recv().await {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Hands everything the session queued to the sender task
    fn flush_outgoing(&mut self) {
        for (addr, packet) in self.host.drain_outgoing() {
            if let Err(e) = self
                .outbound_tx
                .send(OutboundMessage::SendPacket { packet, addr })
            {
                error!("Failed to queue packet for sending: {}", e);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.host.handle_packet(addr, packet);
                            self.flush_outgoing();
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let tick = self.host.tick();
                    self.flush_outgoing();

                    if tick % 300 == 0 {
                        debug!("Tick {}: {} peers", tick, self.host.peers().len());
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_server_message_creation() {
        let packet = Packet::Join {
            client_version: 1,
            name: "ada".to_string(),
        };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let msg = ServerMessage::PacketReceived {
            packet: packet.clone(),
            addr,
        };

        match msg {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(p, packet);
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        assert!(tx
            .send(ServerMessage::PacketReceived {
                packet: Packet::Leave,
                addr,
            })
            .is_ok());

        match rx.try_recv() {
            Ok(ServerMessage::PacketReceived { packet, addr: a }) => {
                assert_eq!(a, addr);
                assert_eq!(packet, Packet::Leave);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_refused() {
        let mut config = SessionConfig::default();
        config.tick_rate = 0;
        let result = tokio_test::block_on(Server::new("127.0.0.1:0", config));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_server_binds_and_shuts_down() {
        let mut server = Server::new("127.0.0.1:0", SessionConfig::default())
            .await
            .unwrap();
        assert!(server.local_addr().unwrap().port() > 0);

        let shutdown = server.shutdown_handle();
        shutdown.send(ServerMessage::Shutdown).unwrap();
        assert!(server.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_join_over_udp() {
        let mut server = Server::new("127.0.0.1:0", SessionConfig::default())
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(async move { server.run().await.map_err(|e| e.to_string()) });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let join = serialize(&Packet::Join {
            client_version: shared::PROTOCOL_VERSION,
            name: "udp".to_string(),
        })
        .unwrap();
        client.send_to(&join, server_addr).await.unwrap();

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let reply = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let (len, _) = client.recv_from(&mut buffer).await.unwrap();
                let packet: Packet = deserialize(&buffer[..len]).unwrap();
                if matches!(packet, Packet::Joined { .. }) {
                    return packet;
                }
            }
        })
        .await
        .unwrap();

        assert!(matches!(reply, Packet::Joined { peer, .. } if peer.0 == 1));
        shutdown.send(ServerMessage::Shutdown).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
