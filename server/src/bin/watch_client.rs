use arena_shared::{Packet, PROTOCOL_VERSION};
use bincode::{deserialize, serialize};
use clap::Parser;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Connects to a running server, opens a private room filled with bots and
/// watches the match until it ends
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,
    /// Give up after this many seconds
    #[clap(long, default_value = "300")]
    max_secs: u64,
}

async fn send(
    socket: &UdpSocket,
    server: SocketAddr,
    packet: &Packet,
) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&serialize(packet)?, server).await?;
    Ok(())
}

/// Receives packets until one satisfies `wanted`, printing errors on the way.
async fn wait_for(
    socket: &UdpSocket,
    wanted: impl Fn(&Packet) -> bool,
) -> Result<Packet, Box<dyn std::error::Error>> {
    let mut buf = [0u8; 2048];
    loop {
        let (len, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf)).await??;
        match deserialize::<Packet>(&buf[0..len]) {
            Ok(packet) if wanted(&packet) => return Ok(packet),
            Ok(Packet::Error { message }) => println!("Server error: {}", message),
            Ok(_) => {}
            Err(e) => println!("Undecodable packet: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    send(
        &socket,
        args.server,
        &Packet::Connect {
            client_version: PROTOCOL_VERSION,
        },
    )
    .await?;
    match wait_for(&socket, |p| {
        matches!(p, Packet::Connected { .. } | Packet::Disconnected { .. })
    })
    .await?
    {
        Packet::Connected { client_id } => println!("Connected as client {}", client_id),
        other => {
            println!("Connection refused: {:?}", other);
            return Ok(());
        }
    }

    send(
        &socket,
        args.server,
        &Packet::Register {
            player_id: "watcher".to_string(),
            character_id: "Watcher".to_string(),
        },
    )
    .await?;
    if let Packet::Registered { outcome } =
        wait_for(&socket, |p| matches!(p, Packet::Registered { .. })).await?
    {
        println!("Registered: {:?}", outcome);
    }

    send(&socket, args.server, &Packet::CreatePrivateSession).await?;
    if let Packet::SessionCreated(snapshot) =
        wait_for(&socket, |p| matches!(p, Packet::SessionCreated(_))).await?
    {
        println!(
            "Room {} created",
            snapshot.code.unwrap_or_else(|| "?".to_string())
        );
    }

    send(
        &socket,
        args.server,
        &Packet::SelectTeam {
            team: "A".to_string(),
        },
    )
    .await?;
    for _ in 0..5 {
        send(&socket, args.server, &Packet::AddBot).await?;
        if let Packet::BotAdded(bot) =
            wait_for(&socket, |p| matches!(p, Packet::BotAdded(_))).await?
        {
            println!("{} joined team {:?}", bot.name, bot.team);
        }
    }

    send(&socket, args.server, &Packet::StartGame).await?;
    wait_for(&socket, |p| matches!(p, Packet::GameStarted { .. })).await?;
    println!("Game started");

    let deadline = Instant::now() + Duration::from_secs(args.max_secs);
    let mut last_heartbeat = Instant::now();
    let mut ball_states = 0u64;
    let mut buf = [0u8; 2048];

    while Instant::now() < deadline {
        if last_heartbeat.elapsed() >= Duration::from_secs(1) {
            send(&socket, args.server, &Packet::Heartbeat).await?;
            last_heartbeat = Instant::now();
        }

        let Ok(received) = timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await
        else {
            continue;
        };
        let (len, _) = received?;

        match deserialize::<Packet>(&buf[0..len]) {
            Ok(Packet::BallState(_)) => ball_states += 1,
            Ok(Packet::ScoreUpdate(event)) => println!(
                "{} - {} ({}, point for team {})",
                event.score.team_a,
                event.score.team_b,
                event.reason.as_str(),
                event.scoring_team
            ),
            Ok(Packet::GameEnded {
                winner,
                final_score,
            }) => {
                println!(
                    "Team {} wins {} - {} after {} ball updates",
                    winner, final_score.team_a, final_score.team_b, ball_states
                );
                break;
            }
            Ok(Packet::Error { message }) => println!("Server error: {}", message),
            Ok(_) => {}
            Err(e) => println!("Undecodable packet: {}", e),
        }
    }

    send(&socket, args.server, &Packet::Disconnect).await?;
    Ok(())
}
