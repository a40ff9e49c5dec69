//! Property-based tests for the stream state machine.
//!
//! These tests use proptest to verify:
//! - The first terminal error per direction is never replaced
//! - Every read and write after termination reports that same error
//! - Data is delivered in order until the read side ends

#![cfg(test)]

use proptest::prelude::*;

use crate::classify::{Termination, TerminalError, classify};
use crate::error::Error;
use crate::stream::StreamCore;
use crate::transport::{Side, StreamId, StreamKind};

#[derive(Debug, Clone)]
enum Event {
    Data(Vec<u8>, bool),
    PeerReset(u64),
    PeerStopSending(u64),
    LocalAbortRead(u64),
    LocalAbortWrite(u64),
    LocalClose(u64),
    PeerClosedConnection(u64),
    IdleTimeout,
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => (prop::collection::vec(any::<u8>(), 0..64), any::<bool>())
            .prop_map(|(data, fin)| Event::Data(data, fin)),
        1 => any::<u64>().prop_map(Event::PeerReset),
        1 => any::<u64>().prop_map(Event::PeerStopSending),
        1 => any::<u64>().prop_map(Event::LocalAbortRead),
        1 => any::<u64>().prop_map(Event::LocalAbortWrite),
        1 => any::<u64>().prop_map(Event::LocalClose),
        1 => any::<u64>().prop_map(Event::PeerClosedConnection),
        1 => Just(Event::IdleTimeout),
    ]
}

/// Terminal errors each event assigns to (write side, read side).
fn apply(core: &mut StreamCore, event: &Event) -> (Option<TerminalError>, Option<TerminalError>) {
    match event {
        Event::Data(data, fin) => {
            core.on_data(data, *fin);
            (None, None)
        }
        Event::PeerReset(code) => {
            let t = classify(&Termination::peer_abort(*code));
            core.record_recv_error(t);
            (None, Some(t))
        }
        Event::PeerStopSending(code) => {
            let t = classify(&Termination::peer_abort(*code));
            core.record_send_error(t);
            (Some(t), None)
        }
        Event::LocalAbortRead(code) => {
            let t = classify(&Termination::local_abort(*code));
            core.record_recv_error(t);
            (None, Some(t))
        }
        Event::LocalAbortWrite(code) => {
            let t = classify(&Termination::local_abort(*code));
            core.record_send_error(t);
            (Some(t), None)
        }
        Event::LocalClose(code) => {
            let t = classify(&Termination::local_close(*code));
            core.record_terminal(t);
            (Some(t), Some(t))
        }
        Event::PeerClosedConnection(code) => {
            let t = classify(&Termination::peer_close(*code));
            core.record_terminal(t);
            (Some(t), Some(t))
        }
        Event::IdleTimeout => {
            let t = classify(&Termination::idle_timeout());
            core.record_terminal(t);
            (Some(t), Some(t))
        }
    }
}

fn same(err: &Error, terminal: TerminalError) -> bool {
    err.kind() == terminal.kind() && err.application_code() == terminal.application_code()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn first_terminal_error_wins(events in prop::collection::vec(arb_event(), 0..32)) {
        let id = StreamId::new(Side::Client, StreamKind::Bidirectional, 0);
        let mut core = StreamCore::new(id, Side::Client);

        let mut first_send = None;
        let mut first_recv = None;
        for event in &events {
            let (send, recv) = apply(&mut core, event);
            first_send = first_send.or(send);
            first_recv = first_recv.or(recv);

            prop_assert_eq!(core.send_error(), first_send);
            prop_assert_eq!(core.recv_error(), first_recv);
        }

        let mut buf = [0u8; 16];
        if let Some(terminal) = first_recv {
            for _ in 0..3 {
                let err = core.poll_read(&mut buf).unwrap().unwrap_err();
                prop_assert!(same(&err, terminal));
            }
        }
        if let Some(terminal) = first_send {
            for _ in 0..3 {
                let err = core.check_send().unwrap_err();
                prop_assert!(same(&err, terminal));
            }
        }
    }

    #[test]
    fn data_delivered_in_order(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..32), 1..16)) {
        let id = StreamId::new(Side::Server, StreamKind::Unidirectional, 0);
        let mut core = StreamCore::new(id, Side::Client);

        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert!(core.on_data(chunk, i == last));
        }

        let expected: Vec<u8> = chunks.concat();
        let mut received = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = core.poll_read(&mut buf).unwrap().unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        prop_assert_eq!(received, expected);
    }
}
