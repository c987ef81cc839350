use crate::input::{BotInput, InputSource};
use crate::net_stats::NetStats;
use crate::peer::{Peer, SessionStatus};
use crate::presentation::{LogPresenter, Presenter};
use log::{debug, error, info, warn};
use shared::protocol::{timestamp_millis, MAX_DATAGRAM_SIZE};
use shared::Packet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

/// Give up on a join the host does not answer within this long.
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    peer: Peer,
    input: Box<dyn InputSource + Send>,
    presenter: Box<dyn Presenter + Send>,
    stats: NetStats,
    fake_ping_ms: u64,
    join_timeout: Duration,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        name: &str,
        fake_ping_ms: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            peer: Peer::new(name),
            input: Box::new(BotInput::new()),
            presenter: Box::new(LogPresenter::new()),
            stats: NetStats::new(),
            fake_ping_ms,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        })
    }

    pub fn with_input(mut self, input: impl InputSource + Send + 'static) -> Self {
        self.input = Box::new(input);
        self
    }

    pub fn with_presenter(mut self, presenter: impl Presenter + Send + 'static) -> Self {
        self.presenter = Box::new(presenter);
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = packet.encode()?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn flush_outgoing(&mut self) {
        for packet in self.peer.drain_outgoing() {
            if let Err(e) = self.send_packet(&packet).await {
                error!("Error sending packet: {}", e);
            }
        }
    }

    async fn handle_datagram(&mut self, data: &[u8]) {
        let packet = match Packet::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Undecodable datagram from host: {}", e);
                return;
            }
        };

        if let Packet::Snapshot { timestamp, .. } = &packet {
            if *timestamp > 0 {
                let ping = timestamp_millis().saturating_sub(*timestamp);
                self.stats.record(ping as f32);
            }
        }

        if self.peer.handle_packet(packet) {
            let frame = self.input.next_frame(self.peer.world(), self.peer.config());
            self.peer.step(&frame);
            self.flush_outgoing().await;
        }
    }

    fn present(&mut self) {
        for event in self.peer.drain_events() {
            self.presenter.present(&event);
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Joining session at {}", self.server_addr);
        self.send_packet(&self.peer.join_packet()).await?;
        let started = Instant::now();

        let mut join_retry = interval(self.join_timeout.min(Duration::from_secs(1)));
        let mut render_interval = interval(Duration::from_millis(16));
        let mut stats_interval = interval(Duration::from_secs(10));
        let mut last_frame = Instant::now();

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            match self.peer.status() {
                SessionStatus::Failed(failure) => {
                    error!("Could not join: {} ({})", failure, failure.reason_code());
                    return Err(failure.clone().into());
                }
                SessionStatus::Left => break,
                SessionStatus::Connecting | SessionStatus::Joined => {}
            }

            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }
                            self.handle_datagram(&buffer[..len]).await;
                        }
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = join_retry.tick() => {
                    if *self.peer.status() == SessionStatus::Connecting {
                        if started.elapsed() >= self.join_timeout {
                            self.peer.join_timed_out();
                        } else {
                            debug!("Retrying join");
                            let join = self.peer.join_packet();
                            if let Err(e) = self.send_packet(&join).await {
                                error!("Error sending join: {}", e);
                            }
                        }
                    }
                },

                _ = render_interval.tick() => {
                    let now = Instant::now();
                    let frame_dt = now.duration_since(last_frame).as_secs_f32();
                    last_frame = now;

                    self.peer.render(frame_dt);
                    self.present();
                },

                _ = stats_interval.tick() => {
                    if let (Some(average), Some(max)) = (self.stats.average(), self.stats.max()) {
                        info!(
                            "Latency avg {:.1}ms, max {:.1}ms over {} snapshots",
                            average,
                            max,
                            self.stats.snapshots_received()
                        );
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, leaving session");
                    self.peer.leave();
                },
            }
        }

        self.flush_outgoing().await;
        Ok(())
    }
}
