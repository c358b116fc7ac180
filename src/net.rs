// src/net.rs

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};

use crate::physics::PhysicsWorld;
use crate::player_spawn_position;
use crate::state::SharedGameState;
use crate::vehicle::{DriveIntent, RACE_CAR};

#[derive(Debug)]
struct ClientMessage {
    msg_type: String,
    throttle: f32,
    steer: f32,
}

impl ClientMessage {
    fn from_json(txt: &str) -> Option<Self> {
        let v = serde_json::from_str::<serde_json::Value>(txt).ok()?;

        Some(ClientMessage {
            msg_type: v.get("type")?.as_str()?.to_string(),
            throttle: v.get("throttle").and_then(|x| x.as_f64()).unwrap_or(0.0) as f32,
            steer: v.get("steer").and_then(|x| x.as_f64()).unwrap_or(0.0) as f32,
        })
    }
}

pub async fn start_websocket_server(
    state: Arc<Mutex<SharedGameState>>,
    physics: Arc<Mutex<PhysicsWorld>>,
) {
    let listener = match TcpListener::bind("0.0.0.0:9001").await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, "failed to bind websocket port 9001");
            return;
        }
    };

    info!("websocket listening on ws://localhost:9001");

    loop {
        let (raw, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        let state_clone = Arc::clone(&state);
        let physics_clone = Arc::clone(&physics);

        tokio::spawn(async move {
            let ws = match accept_async(raw).await {
                Ok(ws) => ws,
                Err(err) => {
                    warn!(%err, %addr, "websocket handshake failed");
                    return;
                }
            };
            let (mut write, mut read) = ws.split();

            // Outgoing channel: the tick loop pushes snapshots into it.
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();

            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    let _ = write.send(Message::Text(msg)).await;
                }
            });

            // Register the client and put its car on the grid. The body
            // itself is spawned lazily by the tick loop.
            let (player_id, total_laps) = {
                let mut game = state_clone.lock().await;
                game.register_client(tx.clone());
                let spawn = player_spawn_position(game.player_count());
                let id = game.add_player(RACE_CAR, spawn);
                (id, game.race.total_laps())
            };

            info!(player = %player_id, %addr, "player connected");

            let welcome = format!(
                r#"{{"type":"welcome","player_id":"{player_id}","total_laps":{total_laps}}}"#
            );
            let _ = tx.send(welcome);

            while let Some(msg) = read.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => break,
                };

                if !msg.is_text() {
                    continue;
                }
                let text = match msg.to_text() {
                    Ok(t) => t,
                    Err(_) => continue,
                };

                let parsed = match ClientMessage::from_json(text) {
                    Some(v) => v,
                    None => continue,
                };

                match parsed.msg_type.as_str() {
                    "input" => {
                        let mut game = state_clone.lock().await;
                        game.set_player_intent(
                            &player_id,
                            DriveIntent {
                                throttle: parsed.throttle,
                                steer: parsed.steer,
                            },
                        );
                    }
                    "start" => {
                        state_clone.lock().await.start_requested = true;
                    }
                    "restart" => {
                        state_clone.lock().await.restart_requested = true;
                    }
                    "ping" => {
                        let _ = tx.send("{\"type\":\"pong\"}".into());
                    }
                    _ => {}
                }
            }

            info!(player = %player_id, "player disconnected");
            despawn_player(&state_clone, &physics_clone, &player_id).await;
        });
    }
}

/// Remove a departed player's car from the roster and the physics world.
/// The state lock is released before the physics lock is taken; the tick
/// loop acquires physics first, so holding both here would deadlock
/// against it.
async fn despawn_player(
    state: &Mutex<SharedGameState>,
    physics: &Mutex<PhysicsWorld>,
    id: &str,
) {
    let body = {
        let mut game = state.lock().await;
        game.remove_vehicle(id)
    };
    if let Some(handle) = body {
        physics.lock().await.remove_body(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::{DustPool, TrailPool};
    use crate::race::RaceTracker;
    use rapier3d::prelude::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn despawn_never_blocks_a_physics_first_tick_loop() {
        let race = RaceTracker::new(vec![vector![30.0, 0.0, -20.0]], 3, 10.0).unwrap();
        let mut game = SharedGameState::new(
            race,
            DustPool::new(8).unwrap(),
            TrailPool::new(8).unwrap(),
        );
        let id = game.add_player(RACE_CAR, [0.0, 2.0, -15.0]);
        let mut phys = PhysicsWorld::new();
        game.vehicles.get_mut(&id).unwrap().spawn(&mut phys);

        let state = Arc::new(Mutex::new(game));
        let physics = Arc::new(Mutex::new(phys));

        // Same acquisition order as the tick loop: physics, then state.
        let tick_state = Arc::clone(&state);
        let tick_physics = Arc::clone(&physics);
        let ticker = tokio::spawn(async move {
            for _ in 0..500 {
                let phys = tick_physics.lock().await;
                let mut game = tick_state.lock().await;
                game.tick += 1;
                drop(game);
                drop(phys);
                tokio::task::yield_now().await;
            }
        });

        let cleanup_state = Arc::clone(&state);
        let cleanup_physics = Arc::clone(&physics);
        let cleanup = tokio::spawn(async move {
            tokio::task::yield_now().await;
            despawn_player(&cleanup_state, &cleanup_physics, &id).await;
        });

        let both = async {
            ticker.await.unwrap();
            cleanup.await.unwrap();
        };
        timeout(std::time::Duration::from_secs(5), both)
            .await
            .expect("despawn deadlocked against the tick loop");

        let game = state.lock().await;
        assert!(game.vehicles.is_empty());
    }

    #[test]
    fn parses_input_message() {
        let msg =
            ClientMessage::from_json(r#"{"type":"input","throttle":1.0,"steer":-0.5}"#).unwrap();
        assert_eq!(msg.msg_type, "input");
        assert_eq!(msg.throttle, 1.0);
        assert_eq!(msg.steer, -0.5);
    }

    #[test]
    fn missing_axes_default_to_zero() {
        let msg = ClientMessage::from_json(r#"{"type":"start"}"#).unwrap();
        assert_eq!(msg.msg_type, "start");
        assert_eq!(msg.throttle, 0.0);
        assert_eq!(msg.steer, 0.0);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(ClientMessage::from_json("not json").is_none());
        assert!(ClientMessage::from_json(r#"{"throttle":1.0}"#).is_none());
    }
}
