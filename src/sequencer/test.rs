use super::*;
use crate::{
    device::{DeviceInfo, MidiDevice, StreamTransmitter},
    message::{MetaMessage, ShortMessage},
    sequence::DivisionType,
    ErrorKind,
};
use std::{
    thread,
    time::{Duration, Instant},
};

/// Sink that remembers everything it is sent, and when.
#[derive(Default)]
struct Collector {
    got: Mutex<Vec<(Instant, Message, i64)>>,
}
impl Collector {
    fn messages(&self) -> Vec<Message> {
        lock(&self.got).iter().map(|(_, msg, _)| msg.clone()).collect()
    }

    fn times(&self) -> Vec<Instant> {
        lock(&self.got).iter().map(|(at, _, _)| *at).collect()
    }
}
impl Receiver for Collector {
    fn send(&self, message: &Message, timestamp: i64) {
        lock(&self.got).push((Instant::now(), message.clone(), timestamp));
    }
}

struct TestDevice {
    sink: Arc<Collector>,
    source: Arc<StreamTransmitter>,
}
impl MidiDevice for TestDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo::new("test device")
    }

    fn receivers(&self) -> Vec<Arc<dyn Receiver>> {
        vec![self.sink.clone() as Arc<dyn Receiver>]
    }

    fn transmitters(&self) -> Vec<Arc<dyn Transmitter>> {
        vec![self.source.clone() as Arc<dyn Transmitter>]
    }
}

struct Rig {
    sink: Arc<Collector>,
    source: Arc<StreamTransmitter>,
    seq: Sequencer,
}

/// An open sequencer wired to a single test device.
fn rig() -> Rig {
    let sink = Arc::new(Collector::default());
    let source = Arc::new(StreamTransmitter::new());
    let registry = Arc::new(DeviceRegistry::new());
    registry.add_device(Arc::new(TestDevice {
        sink: sink.clone(),
        source: source.clone(),
    }));
    let seq = Sequencer::new(registry);
    seq.open().unwrap();
    Rig { sink, source, seq }
}

fn note_on(key: u8, tick: i64) -> MidiEvent {
    MidiEvent::new(ShortMessage::new(0x90, key, 100).unwrap(), tick)
}

/// A PPQ sequence at 100 ticks per quarter note, so 10 ticks last 50ms at 120 BPM.
fn sequence(tracks: Vec<Vec<MidiEvent>>) -> Sequence {
    let mut seq = Sequence::new(DivisionType::Ppq, 100).unwrap();
    for events in tracks {
        let track = seq.create_track();
        for ev in events {
            track.add(ev);
        }
    }
    seq
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn is_invalid_param<T>(res: Result<T>) -> bool {
    matches!(res.map_err(|err| err.kind()), Err(ErrorKind::InvalidParameter(_)))
}

mod lifecycle {
    use super::*;

    #[test_log::test]
    fn open_and_close_are_idempotent() {
        let rig = rig();
        assert!(rig.seq.is_open());
        rig.seq.open().unwrap();
        assert_eq!(rig.seq.receivers().len(), 1);
        assert_eq!(rig.seq.transmitters().len(), 1);
        assert!(rig.source.receiver().is_some());

        rig.seq.close();
        assert!(!rig.seq.is_open());
        assert!(rig.seq.receivers().is_empty());
        assert!(rig.source.receiver().is_none());
        rig.seq.close();

        rig.seq.open().unwrap();
        assert!(rig.seq.is_open());
    }

    #[test_log::test]
    fn start_requires_open() {
        let seq = Sequencer::new(Arc::new(DeviceRegistry::new()));
        let err = seq.start().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::DeviceUnavailable(_)));
        assert!(!seq.is_running());
    }

    #[test_log::test]
    fn close_stops_playback() {
        let rig = rig();
        rig.seq
            .set_sequence(Some(sequence(vec![vec![note_on(60, 0), note_on(62, 10_000)]])));
        rig.seq.start().unwrap();
        assert!(wait_until(Duration::from_secs(1), || rig.sink.messages().len() == 1));
        rig.seq.close();
        assert!(!rig.seq.is_running());
        assert_eq!(rig.sink.messages().len(), 1);
    }
}

mod playback {
    use super::*;

    #[test_log::test]
    fn events_are_played_in_order_and_on_time() {
        let rig = rig();
        let events = vec![note_on(60, 0), note_on(62, 10), note_on(64, 20)];
        rig.seq.set_sequence(Some(sequence(vec![events.clone()])));
        assert_eq!(rig.seq.get_tick_length(), 20);

        rig.seq.start().unwrap();
        let mut last_pos = 0;
        let finished = wait_until(Duration::from_secs(2), || {
            let pos = rig.seq.get_tick_position();
            assert!(pos >= last_pos, "position went back from {} to {}", last_pos, pos);
            last_pos = pos;
            !rig.seq.is_running()
        });
        assert!(finished, "playback did not stop at the end of the sequence");

        let expected = events
            .iter()
            .map(|ev| ev.message().clone())
            .collect::<Vec<_>>();
        assert_eq!(rig.sink.messages(), expected);
        assert!(lock(&rig.sink.got)
            .iter()
            .all(|(_, _, timestamp)| *timestamp == NO_TIMESTAMP));
        let times = rig.sink.times();
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(
                gap >= Duration::from_millis(35) && gap <= Duration::from_millis(200),
                "10 ticks took {:?} instead of 50ms",
                gap
            );
        }
        assert_eq!(rig.seq.get_tick_position(), 20);
    }

    #[test_log::test]
    fn tempo_factor_speeds_up_playback() {
        let rig = rig();
        rig.seq
            .set_sequence(Some(sequence(vec![vec![note_on(60, 0), note_on(62, 40)]])));
        rig.seq.set_tempo_factor(4.0).unwrap();
        assert_eq!(rig.seq.get_tempo_in_bpm(), 120.0);
        rig.seq.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || !rig.seq.is_running()));
        let times = rig.sink.times();
        assert_eq!(times.len(), 2);
        //40 ticks is 200ms at normal speed
        assert!(times[1] - times[0] < Duration::from_millis(150));
    }

    #[test_log::test]
    fn tempo_events_change_tempo_without_reaching_sinks() {
        let rig = rig();
        let tempo = MidiEvent::new(MetaMessage::tempo(u24::new(250_000)), 0);
        let marker = MidiEvent::new(MetaMessage::new(0x06, b"verse").unwrap(), 0);
        rig.seq.set_sequence(Some(sequence(vec![vec![
            tempo,
            marker.clone(),
            note_on(60, 10),
        ]])));
        let metas = Arc::new(Mutex::new(Vec::new()));
        let listener: Arc<dyn MetaEventListener> = {
            let metas = metas.clone();
            Arc::new(move |meta: &MetaMessage| lock(&metas).push(meta.meta_type()))
        };
        assert!(rig.seq.add_meta_event_listener(listener.clone()));
        assert!(!rig.seq.add_meta_event_listener(listener));

        rig.seq.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || !rig.seq.is_running()));
        assert_eq!(rig.seq.get_tempo_in_bpm(), 240.0);
        assert_eq!(rig.seq.get_tempo_in_mpq(), 250_000.0);
        assert_eq!(*lock(&metas), vec![MetaMessage::TEMPO, 0x06]);
        assert_eq!(
            rig.sink.messages(),
            vec![marker.message().clone(), note_on(60, 10).into_message()]
        );
    }

    #[test_log::test]
    fn controller_listeners_only_hear_their_controllers() {
        let rig = rig();
        let cc = |controller, tick| {
            MidiEvent::new(ShortMessage::new(0xB0, controller, 64).unwrap(), tick)
        };
        rig.seq
            .set_sequence(Some(sequence(vec![vec![cc(7, 0), cc(10, 5), cc(7, 10)]])));
        let heard = Arc::new(Mutex::new(Vec::new()));
        let listener: Arc<dyn ControllerEventListener> = {
            let heard = heard.clone();
            Arc::new(move |msg: &ShortMessage| lock(&heard).push(msg.data1()))
        };
        assert_eq!(
            rig.seq
                .add_controller_event_listener(listener.clone(), &[7, 64])
                .unwrap(),
            vec![7, 64]
        );
        assert_eq!(
            rig.seq.remove_controller_event_listener(&listener, &[64]),
            vec![7]
        );
        assert!(is_invalid_param(
            rig.seq.add_controller_event_listener(listener, &[128])
        ));

        rig.seq.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || !rig.seq.is_running()));
        assert_eq!(*lock(&heard), vec![7, 7]);
        assert_eq!(rig.sink.messages().len(), 3);
    }

    #[test_log::test]
    fn panicking_listener_does_not_stop_playback() {
        let rig = rig();
        rig.seq.set_sequence(Some(sequence(vec![vec![
            MidiEvent::new(MetaMessage::new(0x01, b"boom").unwrap(), 0),
            note_on(60, 10),
        ]])));
        rig.seq
            .add_meta_event_listener(Arc::new(|_: &MetaMessage| panic!("listener failure")));
        rig.seq.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || !rig.seq.is_running()));
        assert_eq!(rig.sink.messages().len(), 2);
    }

    #[test_log::test]
    fn muted_and_soloed_tracks() {
        let rig = rig();
        rig.seq.set_sequence(Some(sequence(vec![
            vec![note_on(60, 0)],
            vec![note_on(61, 0)],
            vec![note_on(62, 0), note_on(63, 10)],
        ])));
        rig.seq.set_track_mute(1, true);
        rig.seq.set_track_solo(0, true);
        rig.seq.set_track_solo(1, true);
        assert!(rig.seq.get_track_mute(1));
        assert!(rig.seq.get_track_solo(0));
        assert!(!rig.seq.get_track_solo(2));

        rig.seq.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || !rig.seq.is_running()));
        assert_eq!(rig.sink.messages(), vec![note_on(60, 0).into_message()]);
    }

    #[test_log::test]
    fn starting_mid_sequence_catches_up_without_notes() {
        let rig = rig();
        let program = MidiEvent::new(ShortMessage::new(0xC0, 5, 0).unwrap(), 0);
        let volume = MidiEvent::new(ShortMessage::new(0xB0, 7, 90).unwrap(), 50);
        rig.seq.set_sequence(Some(sequence(vec![vec![
            program.clone(),
            note_on(60, 0),
            volume.clone(),
            note_on(62, 100),
        ]])));
        rig.seq.set_tick_position(80).unwrap();
        assert_eq!(rig.seq.get_tick_position(), 80);

        rig.seq.start().unwrap();
        assert!(wait_until(Duration::from_secs(2), || !rig.seq.is_running()));
        assert_eq!(
            rig.sink.messages(),
            vec![
                program.into_message(),
                volume.into_message(),
                note_on(62, 100).into_message(),
            ]
        );
    }

    #[test_log::test]
    fn stop_keeps_the_position() {
        let rig = rig();
        rig.seq
            .set_sequence(Some(sequence(vec![vec![note_on(60, 0), note_on(62, 10_000)]])));
        rig.seq.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        rig.seq.stop();
        assert!(!rig.seq.is_running());
        let pos = rig.seq.get_tick_position();
        assert!(pos > 0 && pos < 10_000);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(rig.seq.get_tick_position(), pos);
        assert_eq!(rig.sink.messages().len(), 1);
    }
}

mod looping {
    use super::*;

    #[test_log::test]
    fn loop_plays_count_plus_one_passes() {
        let rig = rig();
        let events = vec![note_on(60, 0), note_on(62, 10), note_on(64, 20)];
        rig.seq.set_sequence(Some(sequence(vec![events.clone()])));
        rig.seq.set_loop_start_point(0).unwrap();
        rig.seq.set_loop_end_point(20).unwrap();
        rig.seq.set_loop_count(2).unwrap();

        rig.seq.start().unwrap();
        assert!(
            wait_until(Duration::from_secs(3), || !rig.seq.is_running()),
            "looping playback never stopped"
        );
        let one_pass = events
            .iter()
            .map(|ev| ev.message().clone())
            .collect::<Vec<_>>();
        assert_eq!(
            rig.sink.messages(),
            [one_pass.clone(), one_pass.clone(), one_pass].concat()
        );
    }

    /// Play a looped sequence with events at ticks 0, 10, 20 and 30 until it stops, and return
    /// the keys that were played.
    fn play_looped(from: i64, start: i64, end: i64, count: i32) -> Vec<u8> {
        let rig = rig();
        rig.seq.set_sequence(Some(sequence(vec![vec![
            note_on(60, 0),
            note_on(62, 10),
            note_on(64, 20),
            note_on(66, 30),
        ]])));
        rig.seq.set_loop_end_point(end).unwrap();
        rig.seq.set_loop_start_point(start).unwrap();
        rig.seq.set_loop_count(count).unwrap();
        rig.seq.set_tick_position(from).unwrap();

        rig.seq.start().unwrap();
        assert!(
            wait_until(Duration::from_secs(3), || !rig.seq.is_running()),
            "looping playback never stopped"
        );
        rig.sink
            .messages()
            .iter()
            .map(|msg| msg.as_bytes()[1])
            .collect()
    }

    #[test_log::test]
    fn events_outside_the_loop_never_play() {
        assert_eq!(
            play_looped(0, 0, 20, 2),
            [60, 62, 64, 60, 62, 64, 60, 62, 64]
        );
        assert_eq!(play_looped(0, 10, 20, 1), [62, 64, 62, 64]);
        assert_eq!(play_looped(0, 10, 20, 0), [62, 64]);
        assert_eq!(play_looped(0, 10, LOOP_END_UNSPECIFIED, 0), [62, 64, 66]);
    }

    #[test_log::test]
    fn single_tick_loop() {
        assert_eq!(play_looped(0, 10, 10, 2), [62, 62, 62]);
    }

    #[test_log::test]
    fn starting_past_the_loop_end() {
        assert_eq!(play_looped(25, 0, 20, 0), Vec::<u8>::new());
        assert_eq!(play_looped(25, 0, 20, 1), [60, 62, 64]);
    }

    #[test_log::test]
    fn loop_points_are_validated() {
        let rig = rig();
        assert!(is_invalid_param(rig.seq.set_loop_start_point(10)));
        rig.seq.set_sequence(Some(sequence(vec![vec![
            note_on(60, 0),
            note_on(60, 20),
        ]])));

        assert!(is_invalid_param(rig.seq.set_loop_start_point(-1)));
        assert!(is_invalid_param(rig.seq.set_loop_start_point(21)));
        assert!(is_invalid_param(rig.seq.set_loop_end_point(21)));
        assert!(is_invalid_param(rig.seq.set_loop_end_point(-2)));
        assert!(is_invalid_param(rig.seq.set_loop_count(-2)));

        rig.seq.set_loop_end_point(10).unwrap();
        assert!(is_invalid_param(rig.seq.set_loop_start_point(15)));
        assert_eq!(rig.seq.get_loop_start_point(), 0);
        rig.seq.set_loop_start_point(5).unwrap();
        assert!(is_invalid_param(rig.seq.set_loop_end_point(4)));
        assert_eq!(rig.seq.get_loop_end_point(), 10);
        rig.seq.set_loop_end_point(LOOP_END_UNSPECIFIED).unwrap();
        rig.seq.set_loop_count(LOOP_CONTINUOUSLY).unwrap();
        assert_eq!(rig.seq.get_loop_count(), LOOP_CONTINUOUSLY);
    }
}

mod tempo {
    use super::*;

    #[test_log::test]
    fn extreme_tempos_do_not_stall_playback() {
        let rig = rig();
        rig.seq
            .set_sequence(Some(sequence(vec![vec![note_on(60, 0), note_on(62, 10)]])));
        rig.seq.set_tempo_in_bpm(1e-30).unwrap();
        rig.seq.start().unwrap();
        assert!(wait_until(Duration::from_secs(1), || rig.sink.messages().len() == 1));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(rig.sink.messages().len(), 1);
        assert!(rig.seq.is_running());

        rig.seq.set_tempo_in_mpq(f32::MAX).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(rig.sink.messages().len(), 1);

        rig.seq.set_tempo_in_bpm(120.0).unwrap();
        assert!(wait_until(Duration::from_secs(1), || rig.sink.messages().len() == 2));
        assert!(wait_until(Duration::from_secs(1), || !rig.seq.is_running()));
    }

    #[test_log::test]
    fn invalid_tempo_factor_is_rejected() {
        let rig = rig();
        assert_eq!(rig.seq.get_tempo_factor(), 1.0);
        assert!(is_invalid_param(rig.seq.set_tempo_factor(0.0)));
        assert_eq!(rig.seq.get_tempo_factor(), 1.0);
        assert!(is_invalid_param(rig.seq.set_tempo_factor(-1.0)));
        assert_eq!(rig.seq.get_tempo_factor(), 1.0);
        assert!(is_invalid_param(rig.seq.set_tempo_factor(f32::NAN)));
        rig.seq.set_tempo_factor(2.0).unwrap();
        assert!(is_invalid_param(rig.seq.set_tempo_factor(0.0)));
        assert_eq!(rig.seq.get_tempo_factor(), 2.0);
    }

    #[test_log::test]
    fn tempo_units() {
        let rig = rig();
        assert_eq!(rig.seq.get_tempo_in_bpm(), 120.0);
        assert_eq!(rig.seq.get_tempo_in_mpq(), 500_000.0);
        rig.seq.set_tempo_in_mpq(1_000_000.0).unwrap();
        assert_eq!(rig.seq.get_tempo_in_bpm(), 60.0);
        assert!(is_invalid_param(rig.seq.set_tempo_in_bpm(0.0)));
        assert!(is_invalid_param(rig.seq.set_tempo_in_mpq(-5.0)));
        assert_eq!(rig.seq.get_tempo_in_bpm(), 60.0);
    }

    #[test_log::test]
    fn microsecond_positions() {
        let rig = rig();
        assert_eq!(rig.seq.get_microsecond_length(), 0);
        //100 ticks per quarter at 120 BPM is 200 ticks per second
        rig.seq
            .set_sequence(Some(sequence(vec![vec![note_on(60, 0), note_on(60, 400)]])));
        assert_eq!(rig.seq.get_microsecond_length(), 2_000_000);
        rig.seq.set_microsecond_position(500_000).unwrap();
        assert_eq!(rig.seq.get_tick_position(), 100);
        assert_eq!(rig.seq.get_microsecond_position(), 500_000);
        assert!(is_invalid_param(rig.seq.set_tick_position(-1)));
    }
}

mod recording {
    use super::*;

    #[test_log::test]
    fn recorded_events_replace_the_recorded_window() {
        let rig = rig();
        let before = note_on(40, 10);
        let after = note_on(41, 100_000);
        let mut seq = Sequence::new(DivisionType::Ppq, 480).unwrap();
        let track = seq.create_track();
        track.add(before.clone());
        track.add(after.clone());
        rig.seq.set_sequence(Some(seq));
        rig.seq.record_enable(0, -1).unwrap();
        assert!(is_invalid_param(rig.seq.record_enable(0, 16)));
        rig.seq.set_tick_position(1000).unwrap();

        rig.seq.start_recording().unwrap();
        assert!(rig.seq.is_recording());
        assert!(rig.seq.is_running());
        let echoed = [[0x90, 60, 100], [0xB0, 7, 80], [0x80, 60, 0]];
        for bytes in echoed.iter() {
            assert_eq!(rig.source.feed(bytes, NO_TIMESTAMP), 1);
            thread::sleep(Duration::from_millis(150));
        }
        thread::sleep(Duration::from_millis(50));
        rig.seq.stop_recording();
        assert!(!rig.seq.is_recording());
        assert!(rig.seq.is_running());
        rig.seq.stop();

        let seq = rig.seq.get_sequence().unwrap();
        let events = seq.tracks()[0].events();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], before);
        assert_eq!(events[4], after);
        let recorded = &events[1..4];
        for (ev, bytes) in recorded.iter().zip(echoed.iter()) {
            assert_eq!(ev.message().as_bytes(), &bytes[..]);
            assert!(ev.tick() >= 1000 && ev.tick() < 2000, "recorded at {}", ev.tick());
        }
        assert!(recorded.windows(2).all(|w| w[0].tick() <= w[1].tick()));
        //The recording itself is never played back to the sinks
        assert!(rig.sink.messages().is_empty());
    }

    #[test_log::test]
    fn only_enabled_channels_are_recorded() {
        let rig = rig();
        let mut seq = Sequence::new(DivisionType::Ppq, 480).unwrap();
        seq.create_track();
        seq.create_track();
        seq.create_track().add(note_on(30, 100_000));
        rig.seq.set_sequence(Some(seq));
        rig.seq.record_enable(0, 1).unwrap();

        rig.seq.start_recording().unwrap();
        rig.source.feed(&[0x90, 60, 100, 0x91, 61, 100], NO_TIMESTAMP);
        thread::sleep(Duration::from_millis(20));
        rig.seq.stop();
        assert!(!rig.seq.is_recording());

        let seq = rig.seq.get_sequence().unwrap();
        let recorded = seq.tracks()[0]
            .iter()
            .map(|ev| ev.message().as_bytes().to_vec())
            .collect::<Vec<_>>();
        assert_eq!(recorded, vec![vec![0x91, 61, 100]]);
        assert!(seq.tracks()[1].is_empty());
    }

    #[test_log::test]
    fn incoming_messages_reach_listeners() {
        let rig = rig();
        let heard = Arc::new(Mutex::new(0));
        {
            let heard = heard.clone();
            rig.seq
                .add_controller_event_listener(
                    Arc::new(move |_: &ShortMessage| *lock(&heard) += 1),
                    &[1],
                )
                .unwrap();
        }
        //Listeners hear the sources even when nothing is being recorded
        assert!(!rig.seq.is_recording());
        rig.source.feed(&[0xB3, 1, 20, 0xB3, 2, 20], NO_TIMESTAMP);
        assert_eq!(*lock(&heard), 1);
        rig.seq.close();
        rig.source.feed(&[0xB3, 1, 20], NO_TIMESTAMP);
        assert_eq!(*lock(&heard), 1);
    }
}
