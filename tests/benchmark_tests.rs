//! Performance benchmarks for coordination hot paths

use shared::protocol::{decode, encode};
use shared::{Client, ClientId, Packet, PlayerSnapshot, Room, RoomId, SeededRng, WaitingPool};
use std::time::Instant;

fn client(i: usize) -> Client {
    Client::new(ClientId(format!("p_{:010}", i)), "Bench")
}

/// Benchmarks pool joins and room extraction
#[test]
fn benchmark_pool_formation() {
    let iterations = 10_000;
    let start = Instant::now();

    let mut pool = WaitingPool::new(4, 2);
    let mut rooms = 0;
    for i in 0..iterations {
        pool.join(client(i));
        if pool.len() >= 4 && pool.take_room().is_some() {
            rooms += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Pool formation: {} joins, {} rooms in {:?} ({:.2} μs/join)",
        iterations,
        rooms,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(rooms, iterations / 4);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks a full round lifecycle: form, play, die, ready, restart
#[test]
fn benchmark_room_lifecycle() {
    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let clients = (0..4).map(|j| client(i * 4 + j)).collect();
        let mut room = Room::form(RoomId::from("room_bench"), 0.5, clients);
        for generation in 0..3 {
            room.begin_play(generation).unwrap();
            for index in 0..4 {
                room.apply_death(index, generation).unwrap();
            }
            let mut due = false;
            for index in 0..4 {
                due |= room.mark_ready(index, generation).unwrap().restart_due;
            }
            assert!(due);
            room.restart(0.25, generation).unwrap();
        }
    }

    let duration = start.elapsed();
    println!(
        "Room lifecycle: {} rooms x 3 rounds in {:?} ({:.2} μs/room)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks state report encoding, the most frequent datagram
#[test]
fn benchmark_state_packet_codec() {
    let iterations = 100_000;
    let packet = Packet::PlayerState {
        state: PlayerSnapshot {
            player_index: 2,
            y: 312.5,
            velocity: -4.25,
            alive: true,
            score: 17,
        },
    };

    let start = Instant::now();
    let mut bytes = 0;
    for _ in 0..iterations {
        let data = encode(&packet).unwrap();
        bytes += data.len();
        let decoded: Packet = decode(&data).unwrap();
        assert!(matches!(decoded, Packet::PlayerState { .. }));
    }

    let duration = start.elapsed();
    println!(
        "State codec: {} packets ({} bytes) in {:?} ({:.2} ns/packet)",
        iterations,
        bytes,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks the seeded course generator
#[test]
fn benchmark_seeded_rng() {
    let iterations = 1_000_000;
    let mut rng = SeededRng::new(0.123);

    let start = Instant::now();
    let mut sum = 0.0;
    for _ in 0..iterations {
        sum += rng.next_f64();
    }

    let duration = start.elapsed();
    println!(
        "Seeded RNG: {} draws in {:?} (mean {:.3})",
        iterations,
        duration,
        sum / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}
