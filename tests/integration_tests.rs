//! Integration tests for the world session engine
//!
//! These tests drive a full session through its public seams: binary and
//! text frames in, outbound frames and events out.

use client::{
    ClientError, ConnectionState, OutboundFrame, Rank, World, WorldEvent, WorldOptions,
};
use protocol::{Color, Opcode, Position, CHUNK_DATA_SIZE};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn set_id_frame(id: i32) -> Vec<u8> {
    let mut frame = vec![Opcode::SetId.to_byte()];
    frame.extend_from_slice(&id.to_le_bytes());
    frame
}

fn quota_frame(capacity: u16, fill_time: u16) -> Vec<u8> {
    let mut frame = vec![Opcode::SetPixelQuota.to_byte()];
    frame.extend_from_slice(&capacity.to_le_bytes());
    frame.extend_from_slice(&fill_time.to_le_bytes());
    frame
}

fn rank_frame(rank: u8) -> Vec<u8> {
    vec![Opcode::SetRank.to_byte(), rank]
}

/// An uncompressed chunk payload: zero repeated segments, all 768 bytes
/// literal.
fn chunk_load_frame(tile: Position, data: &[u8; CHUNK_DATA_SIZE]) -> Vec<u8> {
    let mut frame = vec![Opcode::ChunkLoad.to_byte()];
    frame.extend_from_slice(&tile.x.to_le_bytes());
    frame.extend_from_slice(&tile.y.to_le_bytes());
    frame.push(0);
    frame.extend_from_slice(&(CHUNK_DATA_SIZE as u16).to_le_bytes());
    frame.extend_from_slice(&0u16.to_le_bytes());
    frame.extend_from_slice(data);
    frame
}

struct UpdateFrame {
    players: Vec<(i32, Position, Color, u8)>,
    pixels: Vec<(i32, Position, Color)>,
    disconnects: Vec<i32>,
}

impl UpdateFrame {
    fn empty() -> Self {
        UpdateFrame {
            players: Vec::new(),
            pixels: Vec::new(),
            disconnects: Vec::new(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut frame = vec![Opcode::WorldUpdate.to_byte()];
        frame.push(self.players.len() as u8);
        for (id, pos, color, tool) in &self.players {
            frame.extend_from_slice(&id.to_le_bytes());
            frame.extend_from_slice(&pos.x.to_le_bytes());
            frame.extend_from_slice(&pos.y.to_le_bytes());
            frame.extend_from_slice(&color.to_bytes());
            frame.push(*tool);
        }
        frame.extend_from_slice(&(self.pixels.len() as u16).to_le_bytes());
        for (id, pos, color) in &self.pixels {
            frame.extend_from_slice(&id.to_le_bytes());
            frame.extend_from_slice(&pos.x.to_le_bytes());
            frame.extend_from_slice(&pos.y.to_le_bytes());
            frame.extend_from_slice(&color.to_bytes());
        }
        frame.push(self.disconnects.len() as u8);
        for id in &self.disconnects {
            frame.extend_from_slice(&id.to_le_bytes());
        }
        frame
    }
}

/// A connected session that has received its id and initial update.
async fn ready_world() -> (
    World,
    UnboundedReceiver<OutboundFrame>,
    UnboundedReceiver<WorldEvent>,
) {
    init_logging();
    let (mut world, mut frames, mut events) = World::new("testworld", WorldOptions::default());
    world.connect().unwrap();
    world.handle_binary(&set_id_frame(1)).await.unwrap();
    world
        .handle_binary(&UpdateFrame::empty().encode())
        .await
        .unwrap();
    assert_eq!(world.state(), ConnectionState::Ready);
    // Drop the handshake and startup events so tests observe only what
    // they trigger.
    while frames.try_recv().is_ok() {}
    while events.try_recv().is_ok() {}
    (world, frames, events)
}

fn drain_events(events: &mut UnboundedReceiver<WorldEvent>) -> Vec<WorldEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

/// WORLD UPDATE TESTS
mod world_update_tests {
    use super::*;

    /// Tests roster upserts, remote pixels, and disconnects in one frame
    #[tokio::test]
    async fn roster_and_pixels_end_to_end() {
        let (mut world, _frames, mut events) = ready_world().await;

        let update = UpdateFrame {
            players: vec![(7, Position::new(160, 160), Color::new(9, 9, 9), 0)],
            pixels: vec![(7, Position::new(3, 3), Color::BLACK)],
            disconnects: vec![],
        };
        world.handle_binary(&update.encode()).await.unwrap();

        let seen = drain_events(&mut events);
        assert!(seen
            .iter()
            .any(|e| matches!(e, WorldEvent::PlayerConnected(p) if p.id == 7)));
        assert!(seen.iter().any(|e| matches!(
            e,
            WorldEvent::PixelPlaced {
                player_id: 7,
                previous: Color::WHITE,
                ..
            }
        )));
        assert_eq!(world.players().len(), 1);

        let bye = UpdateFrame {
            players: vec![],
            pixels: vec![],
            disconnects: vec![7],
        };
        world.handle_binary(&bye.encode()).await.unwrap();
        assert!(drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, WorldEvent::PlayerDisconnected(7))));
        assert!(world.players().is_empty());
    }

    /// Tests that the client's own pixel echo stays silent
    #[tokio::test]
    async fn own_pixel_echo_is_silent() {
        let (mut world, _frames, mut events) = ready_world().await;
        let update = UpdateFrame {
            players: vec![],
            pixels: vec![(1, Position::new(0, 0), Color::BLACK)],
            disconnects: vec![],
        };
        world.handle_binary(&update.encode()).await.unwrap();
        assert!(!drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, WorldEvent::PixelPlaced { .. })));
        // The pixel still landed locally.
        assert_eq!(
            world.chunks().get_pixel(Position::new(0, 0)).await,
            None // chunk not loaded, reads stay unavailable
        );
    }

    /// Tests that a truncated update aborts the frame without failing
    /// the session
    #[tokio::test]
    async fn truncated_update_aborts_frame_only() {
        let (mut world, _frames, _events) = ready_world().await;
        let mut frame = UpdateFrame {
            players: vec![(9, Position::new(0, 0), Color::BLACK, 0)],
            pixels: vec![],
            disconnects: vec![],
        }
        .encode();
        frame.truncate(frame.len() - 6);
        assert!(world.handle_binary(&frame).await.is_err());
        // The next frame dispatches normally.
        world
            .handle_binary(&UpdateFrame::empty().encode())
            .await
            .unwrap();
    }
}

/// CHUNK TESTS
mod chunk_tests {
    use super::*;

    /// Tests chunk load delivery resolving concurrent queries with one
    /// wire request
    #[tokio::test]
    async fn concurrent_chunk_queries_share_one_request() {
        let (mut world, mut frames, mut events) = ready_world().await;
        let tile = Position::new(2, 2);
        let chunks = world.chunks();

        let a = tokio::spawn({
            let chunks = Arc::clone(&chunks);
            async move { chunks.query(tile, false).await }
        });
        let b = tokio::spawn({
            let chunks = Arc::clone(&chunks);
            async move { chunks.query(tile, false).await }
        });
        tokio::task::yield_now().await;
        assert!(frames.try_recv().is_ok());
        assert!(frames.try_recv().is_err());

        let data = [0u8; CHUNK_DATA_SIZE];
        world
            .handle_binary(&chunk_load_frame(tile, &data))
            .await
            .unwrap();

        let chunk_a = a.await.unwrap().unwrap();
        let chunk_b = b.await.unwrap().unwrap();
        assert!(chunk_a.loaded && chunk_b.loaded);
        assert_eq!(chunk_a.get(0, 0), Color::BLACK);
        assert!(drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, WorldEvent::ChunkLoaded(t) if *t == tile)));
    }

    /// Tests that disconnecting fails pending chunk queries
    #[tokio::test]
    async fn disconnect_fails_pending_queries() {
        let (mut world, _frames, _events) = ready_world().await;
        let chunks = world.chunks();
        let handle = tokio::spawn({
            let chunks = Arc::clone(&chunks);
            async move { chunks.query(Position::new(5, 5), false).await }
        });
        tokio::task::yield_now().await;
        world.disconnect().await;
        assert!(matches!(
            handle.await.unwrap(),
            Err(ClientError::QueryAborted)
        ));
    }
}

/// RATE LIMIT TESTS
mod rate_limit_tests {
    use super::*;

    /// Tests queued pixel placements going out in order once quota
    /// arrives
    #[tokio::test]
    async fn pixel_placements_respect_quota_and_order() {
        let (mut world, mut frames, _events) = ready_world().await;
        world.handle_binary(&rank_frame(1)).await.unwrap();
        world.handle_binary(&quota_frame(32, 1)).await.unwrap();

        let targets = [Position::new(1, 1), Position::new(2, 2), Position::new(3, 3)];
        let receivers: Vec<_> = targets
            .iter()
            .map(|pos| world.place_pixel(*pos, Color::BLACK).unwrap())
            .collect();
        for rx in receivers {
            let previous = rx.await.unwrap().unwrap();
            assert_eq!(previous, Color::WHITE);
        }

        for pos in targets {
            match frames.recv().await.unwrap() {
                OutboundFrame::Binary(bytes) => {
                    assert_eq!(bytes.len(), 11);
                    assert_eq!(&bytes[0..4], &pos.x.to_le_bytes());
                    assert_eq!(&bytes[4..8], &pos.y.to_le_bytes());
                    assert_eq!(&bytes[8..11], &Color::BLACK.to_bytes());
                }
                other => panic!("expected pixel frame, got {:?}", other),
            }
        }
    }

    /// Tests placement rejection below Player rank after a quota of zero
    #[tokio::test]
    async fn placement_requires_player_rank() {
        let (mut world, _frames, _events) = ready_world().await;
        world.handle_binary(&rank_frame(0)).await.unwrap();
        // Synchronous rejection happens before anything is queued.
        assert!(matches!(
            world.place_pixel(Position::new(0, 0), Color::BLACK),
            Err(ClientError::InsufficientRank { .. })
        ));
    }

    /// Tests admin promotion making both buckets infinite and demotion
    /// restoring the previous allowance
    #[tokio::test]
    async fn admin_rank_toggles_infinite_buckets() {
        let (mut world, mut frames, _events) = ready_world().await;
        world.handle_binary(&quota_frame(2, 100)).await.unwrap();
        world.handle_binary(&rank_frame(3)).await.unwrap();
        assert_eq!(world.client().rank, Rank::Admin);

        // Far more placements than the 2-unit bucket could ever cover.
        let receivers: Vec<_> = (0..10)
            .map(|i| world.place_pixel(Position::new(i, 0), Color::BLACK).unwrap())
            .collect();
        for rx in receivers {
            rx.await.unwrap().unwrap();
        }
        let mut sent = 0;
        while frames.try_recv().is_ok() {
            sent += 1;
        }
        assert!(sent >= 10);

        // Demotion back to a finite bucket: the next placement has to
        // wait on the slow refill, so it stays queued.
        world.handle_binary(&rank_frame(1)).await.unwrap();
        let mut rx =
            tokio_test::task::spawn(world.place_pixel(Position::new(99, 0), Color::BLACK).unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio_test::assert_pending!(rx.poll());
    }

    /// Tests chat truncation and the verification suffix
    #[tokio::test]
    async fn chat_is_truncated_and_suffixed() {
        let (world, mut frames, _events) = ready_world().await;
        let long: String = "x".repeat(300);
        world.send_chat(long).unwrap().await.unwrap().unwrap();
        match frames.recv().await.unwrap() {
            OutboundFrame::Text(text) => {
                // Unranked clients cap at 128 chars plus the suffix.
                assert_eq!(text.chars().count(), 129);
                assert!(text.ends_with('\u{A}'));
            }
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}

/// TEXT PROTOCOL TESTS
mod text_tests {
    use super::*;

    /// Tests a whois round trip resolving the pending query
    #[tokio::test]
    async fn whois_round_trip() {
        let (mut world, mut frames, mut events) = ready_world().await;
        let rx = world.query_whois(7).unwrap();

        // The command goes out through the chat queue.
        match frames.recv().await.unwrap() {
            OutboundFrame::Text(text) => assert!(text.starts_with("/whois 7")),
            other => panic!("expected whois command, got {:?}", other),
        }

        world.handle_text("Client information for: 7");
        world.handle_text("-> Connections by this IP: 1");
        world.handle_text("-> Origin header: (None)");
        world.handle_text("-> Warning level: 0");
        world.handle_text("-> Rank: 1");

        let record = rx.await.unwrap();
        assert_eq!(record.player_id, 7);
        assert_eq!(record.rank, Rank::Player);
        assert!(drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, WorldEvent::Whois(_))));
    }

    /// Tests chat and tell classification reaching the event stream
    #[tokio::test]
    async fn chat_and_tell_events() {
        let (mut world, _frames, mut events) = ready_world().await;
        world.handle_text("[12] ada: hello world");
        world.handle_text("-> 12 tells you: psst");
        let seen = drain_events(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e,
            WorldEvent::Chat(msg) if msg.content == "hello world" && msg.sender.id == Some(12)
        )));
        assert!(seen.iter().any(|e| matches!(
            e,
            WorldEvent::Tell { sender_id: 12, message } if message == "psst"
        )));
    }
}
