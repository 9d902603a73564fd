//! Scripted player used for manual testing and load checks

use crate::network::{ClientError, GameClient};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{MessageKind, PlayerState, Vec3};
use std::time::Duration;

/// Arena half-extent the bot wanders within
const ARENA_EXTENT: f32 = 25.0;
const MAX_SPEED: f32 = 6.0;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub server: String,
    pub player_id: String,
    /// Position updates to send once seated
    pub updates: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotReport {
    pub room_id: String,
    pub updates_sent: u32,
    pub updates_received: u32,
}

/// Moves `state` a random step and returns it
pub fn wander<R: Rng>(rng: &mut R, state: &mut PlayerState) {
    let step = Vec3::new(rng.gen_range(-1.0..=1.0), 0.0, rng.gen_range(-1.0..=1.0));
    state.position.x = (state.position.x + step.x).clamp(-ARENA_EXTENT, ARENA_EXTENT);
    state.position.z = (state.position.z + step.z).clamp(-ARENA_EXTENT, ARENA_EXTENT);
    state.rotation.y = step.z.atan2(step.x).to_degrees();
    state.speed = rng.gen_range(0.0..=MAX_SPEED);
    state.animation.is_running = state.speed > MAX_SPEED / 2.0;
    state.animation.move_x = step.x;
    state.animation.move_y = step.z;
}

/// Logs in, waits for a match, streams movement and logs out
pub async fn run(config: &BotConfig) -> Result<BotReport, ClientError> {
    let mut client = GameClient::connect(&config.server).await?;
    let mut rng = StdRng::from_entropy();

    let login = client.login(&config.player_id).await?;
    info!("{}: {}", config.player_id, login.message);

    client.start_matchmaking(&config.player_id).await?;
    info!("{} waiting for an opponent", config.player_id);
    let room = client.wait_for_room().await?;
    info!("{} joined room {}", config.player_id, room.room_id);

    let mut state = room
        .player(&config.player_id)
        .cloned()
        .unwrap_or_else(|| PlayerState::new(config.player_id.as_str()));
    let mut report = BotReport {
        room_id: room.room_id.clone(),
        ..BotReport::default()
    };

    for _ in 0..config.updates {
        wander(&mut rng, &mut state);
        client
            .send_update(MessageKind::PlayerPositionUpdate, &room.room_id, state.clone())
            .await?;
        report.updates_sent += 1;

        while let Some(envelope) = client.recv_timeout(config.interval).await? {
            if envelope.as_response().and_then(|r| r.data.as_ref()).is_some() {
                report.updates_received += 1;
            }
        }
    }

    client.logout(&config.player_id).await?;
    info!(
        "{} done: sent {}, received {}",
        config.player_id, report.updates_sent, report.updates_received
    );
    Ok(report)
}
