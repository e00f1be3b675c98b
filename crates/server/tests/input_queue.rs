use std::time::Duration;

use cubesync_server::input::{InputQueue, InputQueueConfig, InputState, MovementFlags, SharedInput};

fn config(capture: bool) -> InputQueueConfig {
    InputQueueConfig {
        period: Duration::from_millis(5),
        history: 1024,
        capture,
    }
}

fn collect(rx: &crossbeam_channel::Receiver<InputState>, n: usize) -> Vec<InputState> {
    (0..n)
        .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
        .collect()
}

#[test]
fn sequences_start_at_zero_without_gaps() {
    let input = SharedInput::new();
    input.press(MovementFlags::FORWARD);
    input.set_rotation(1.0, -0.5);
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut queue = InputQueue::start(config(true), input.clone(), tx).unwrap();

    let states = collect(&rx, 20);
    queue.stop();

    for (i, state) in states.iter().enumerate() {
        assert_eq!(state.sequence, i as u64);
        assert_eq!(state.flags, MovementFlags::FORWARD);
        assert_eq!((state.yaw, state.pitch), (1.0, -0.5));
    }
    let history = queue.history();
    assert!(history.len() >= 20);
    assert!(history.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));
}

#[test]
fn disabled_capture_sends_empty_flags() {
    let input = SharedInput::new();
    input.set_flags(MovementFlags::FORWARD | MovementFlags::JUMP);
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut queue = InputQueue::start(config(false), input.clone(), tx).unwrap();

    let states = collect(&rx, 5);
    assert!(states.iter().all(|s| s.flags.is_empty()));

    queue.set_capture(true);
    let state = (0..100)
        .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
        .find(|s| !s.flags.is_empty())
        .unwrap();
    assert_eq!(state.flags, MovementFlags::FORWARD | MovementFlags::JUMP);
    queue.stop();
}

#[test]
fn nothing_is_sent_after_stop() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut queue = InputQueue::start(config(true), SharedInput::new(), tx).unwrap();
    collect(&rx, 3);

    queue.stop();
    assert!(!queue.is_running());
    let sent = rx.try_iter().count();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(rx.try_iter().count(), 0, "{sent} sent before stop returned, none after");

    queue.stop();
}

#[test]
fn acknowledged_history_is_purged() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut queue = InputQueue::start(config(true), SharedInput::new(), tx).unwrap();
    collect(&rx, 10);
    queue.stop();

    let last = queue.last_sequence().unwrap();
    queue.purge_through(6);
    assert_eq!(queue.history().first().map(|s| s.sequence), Some(7));
    queue.purge_through(last);
    assert!(queue.history().is_empty());
}
