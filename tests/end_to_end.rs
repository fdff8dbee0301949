//! End-to-end scenarios spanning header, indexing, and iteration.

mod common;

use common::UlogBuilder;
use pretty_assertions::assert_eq;
use ulog_rs::{DataSectionMessage, ReadMessagesOptions, UlogEngine, UlogEngineOptions, Value};

fn attitude_log() -> Vec<u8> {
    let mut fields = 112_574_307u64.to_le_bytes().to_vec();
    fields.extend_from_slice(&(-0.000_425_926_6f32).to_le_bytes());
    fields.extend_from_slice(&0.000_473_720_02f32.to_le_bytes());

    UlogBuilder::new(0, 100)
        .flag_bits()
        .format("vehicle_attitude:uint64_t timestamp;float rollspeed;float pitchspeed;")
        .add_logged(0, 0, "vehicle_attitude")
        .data(0, &fields)
        .build()
}

#[test]
fn opens_a_small_log_and_reports_header_and_counts() {
    let bytes = attitude_log();
    let mut engine = UlogEngine::new(&bytes, UlogEngineOptions::default());
    engine.open().unwrap();

    let header = engine.header().unwrap();
    assert_eq!(0, header.version);
    assert_eq!(100, header.start_timestamp);
    assert!(header.definitions.contains_key("vehicle_attitude"));

    let subs = engine.subscriptions().unwrap();
    let sub = subs.get(&0).unwrap();
    assert_eq!("vehicle_attitude", sub.message_name);
    assert_eq!(0, sub.multi_id);

    assert_eq!(Some((112_574_307, 112_574_307)), engine.time_range().unwrap());
}

#[test]
fn first_data_record_decodes_against_its_subscription() {
    let bytes = attitude_log();
    let mut engine = UlogEngine::new(&bytes, UlogEngineOptions::default());
    engine.open().unwrap();

    let mut messages = engine.read_messages(ReadMessagesOptions::new()).unwrap();
    let data = messages.find_map(|m| match m.unwrap() {
        DataSectionMessage::Data { msg_id, timestamp, fields } if msg_id == 0 => Some((timestamp, fields)),
        _ => None,
    });
    let (timestamp, fields) = data.expect("expected a Data message for msg_id 0");
    assert_eq!(112_574_307, timestamp);
    assert_eq!(("rollspeed".to_string(), Value::F32(-0.000_425_926_6)), fields[1]);
}

#[test]
fn open_is_idempotent_across_fresh_engines() {
    let bytes = attitude_log();

    let mut first = UlogEngine::new(&bytes, UlogEngineOptions::default());
    first.open().unwrap();
    let mut second = UlogEngine::new(&bytes, UlogEngineOptions::default());
    second.open().unwrap();

    assert_eq!(first.message_count().unwrap(), second.message_count().unwrap());
    assert_eq!(first.time_range().unwrap(), second.time_range().unwrap());
    assert_eq!(first.header().unwrap().version, second.header().unwrap().version);
}

#[test]
fn appended_offset_clamps_the_data_section() {
    let bytes = UlogBuilder::new(1, 0)
        .flag_bits_with_appended_marker()
        .format("heartbeat:uint64_t timestamp;uint8_t beat;")
        .add_logged(0, 1, "heartbeat")
        .data(1, &{
            let mut f = 10u64.to_le_bytes().to_vec();
            f.push(1);
            f
        })
        .data(1, &{
            let mut f = 20u64.to_le_bytes().to_vec();
            f.push(2);
            f
        })
        .finish_with_appended(b"this is not a ulog record, just crash-dump bytes");

    let mut engine = UlogEngine::new(&bytes, UlogEngineOptions::default());
    engine.open().unwrap();

    // only the two Data records and the one AddLogged fall inside dataEnd
    assert_eq!(3, engine.message_count().unwrap());
    assert_eq!(Some((10, 20)), engine.time_range().unwrap());

    let header = engine.header().unwrap();
    let flags = header.flag_bits.unwrap();
    assert!(flags.has_appended_data());
}

#[test]
fn truncated_tail_drops_the_last_partial_record_but_keeps_the_rest() {
    let mut bytes = UlogBuilder::new(1, 0)
        .flag_bits()
        .format("heartbeat:uint64_t timestamp;uint8_t beat;")
        .add_logged(0, 1, "heartbeat")
        .data(1, &{
            let mut f = 10u64.to_le_bytes().to_vec();
            f.push(1);
            f
        })
        .build();

    let mut dangling = vec![9u8, 0, b'D', 1, 0]; // size=9, tag=D, msg_id=1, then nothing
    bytes.append(&mut dangling);

    let mut engine = UlogEngine::new(&bytes, UlogEngineOptions::default());
    engine.open().unwrap();

    // AddLogged + the one complete Data record; the dangling tail is dropped.
    assert_eq!(2, engine.message_count().unwrap());
}

#[test]
fn read_messages_respects_time_range_and_reverse() {
    let bytes = UlogBuilder::new(0, 0)
        .flag_bits()
        .format("heartbeat:uint64_t timestamp;uint8_t beat;")
        .add_logged(0, 1, "heartbeat")
        .data(1, &{
            let mut f = 10u64.to_le_bytes().to_vec();
            f.push(1);
            f
        })
        .data(1, &{
            let mut f = 20u64.to_le_bytes().to_vec();
            f.push(2);
            f
        })
        .data(1, &{
            let mut f = 30u64.to_le_bytes().to_vec();
            f.push(3);
            f
        })
        .build();

    let mut engine = UlogEngine::new(&bytes, UlogEngineOptions::default());
    engine.open().unwrap();

    let mut opts = ReadMessagesOptions::new();
    opts.start = Some(15);
    opts.end = Some(25);
    let messages: Vec<_> = engine.read_messages(opts).unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(1, messages.len());
    assert!(matches!(messages[0], DataSectionMessage::Data { timestamp: 20, .. }));

    let mut reverse_opts = ReadMessagesOptions::new();
    reverse_opts.reverse = true;
    let messages: Vec<_> = engine
        .read_messages(reverse_opts)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let timestamps: Vec<u64> = messages
        .iter()
        .filter_map(|m| match m {
            DataSectionMessage::Data { timestamp, .. } => Some(*timestamp),
            _ => None,
        })
        .collect();
    assert_eq!(vec![30, 20, 10], timestamps);
}

#[test]
fn empty_data_section_yields_nothing_and_has_no_time_range() {
    let bytes = UlogBuilder::new(0, 0).flag_bits().build();

    let mut engine = UlogEngine::new(&bytes, UlogEngineOptions::default());
    engine.open().unwrap();

    assert_eq!(0, engine.message_count().unwrap());
    assert_eq!(None, engine.time_range().unwrap());
    let messages: Vec<_> = engine
        .read_messages(ReadMessagesOptions::new())
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert!(messages.is_empty());
}

#[test]
fn counts_reconcile_across_data_log_and_other_records() {
    let bytes = UlogBuilder::new(0, 0)
        .flag_bits()
        .format("heartbeat:uint64_t timestamp;uint8_t beat;")
        .add_logged(0, 1, "heartbeat")
        .data(1, &{
            let mut f = 10u64.to_le_bytes().to_vec();
            f.push(1);
            f
        })
        .log(6, 15, "hello")
        .sync()
        .dropout(5)
        .remove_logged(1)
        .build();

    let mut engine = UlogEngine::new(&bytes, UlogEngineOptions::default());
    engine.open().unwrap();

    let total = engine.message_count().unwrap();
    let data_total: u64 = engine.data_message_counts().unwrap().values().sum();
    let log_total = engine.log_count().unwrap();
    // AddLogged, Synchronization, Dropout, RemoveLogged are the four Other-tagged entries.
    let other_total = 4;
    assert_eq!(total, data_total + log_total + other_total);
}

#[test]
fn querying_before_open_is_a_state_violation() {
    let bytes = attitude_log();
    let engine = UlogEngine::new(&bytes, UlogEngineOptions::default());
    assert!(engine.header().is_err());
    assert!(engine.message_count().is_err());
    assert!(engine.time_range().is_err());
    assert!(engine.read_messages(ReadMessagesOptions::new()).is_err());
}

#[test]
fn invalid_magic_is_rejected() {
    let mut bytes = attitude_log();
    bytes[0] = 0;
    let mut engine = UlogEngine::new(&bytes, UlogEngineOptions::default());
    assert!(engine.open().is_err());
}
