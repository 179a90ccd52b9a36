//! Whole-lifecycle tests over real backing files.
//!
//! Each test plays both roles in one process: a filter-flagged handle binds
//! the control endpoint and drives the live fields, an application handle
//! checkpoints against it.
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tcpr::{Config, Connection, ConnectionKey, Setup, SetupError};

fn key() -> ConnectionKey {
    ConnectionKey {
        peer: IpAddr::V4(Ipv4Addr::LOCALHOST),
        peer_port: 9999,
        port: 8888,
    }
}

fn config_in(dir: &tempfile::TempDir) -> Config {
    Config {
        dir: dir.path().to_owned(),
        ..Config::default()
    }
}

/// Filter and application handles on the same fresh connection.
fn protected_pair(config: &Config) -> (Connection, Connection) {
    let filter = Connection::setup(config, &key(), Setup::CREATE | Setup::FILTER)
        .expect("filter attaches first and creates the record");
    let application =
        Connection::setup(config, &key(), Setup::empty()).expect("application attaches");
    (filter, application)
}

#[test]
fn backing_files_use_the_derived_names() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let (_filter, _application) = protected_pair(&config);

    assert!(dir.path().join("tcpr-127.0.0.1-9999-8888.state").exists());
    assert!(dir.path().join("tcpr-127.0.0.1-9999-8888.ctl").exists());
}

#[test]
fn output_checkpoints_stay_silent() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let (filter, application) = protected_pair(&config);

    filter.filter().expect("filter-flagged handle").set_peer_ack(1000);
    assert_eq!(application.output_bytes(), 1000);

    application.checkpoint_output(400);
    assert_eq!(application.record().safe(), 400);
    assert_eq!(application.output_bytes(), 600);

    // Shrinking the retention buffer is the application's own business.
    assert_eq!(filter.control().drain_requests().unwrap(), 0);
}

#[test]
fn input_checkpoints_wake_the_filter_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let (filter, application) = protected_pair(&config);

    filter.filter().unwrap().set_ack(5000);
    assert_eq!(application.input_bytes(), 5000);

    application.checkpoint_input(1500).unwrap();
    assert_eq!(application.record().saved_ack(), 1500);
    assert_eq!(application.input_bytes(), 3500);
    assert_eq!(filter.control().drain_requests().unwrap(), 1);
}

#[test]
fn close_sets_both_flags_with_one_notification() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let (filter, application) = protected_pair(&config);

    application.close().unwrap();

    let record = application.record();
    assert!(record.done_reading());
    assert!(record.done_writing());
    assert_eq!(filter.control().drain_requests().unwrap(), 1);
}

#[test]
fn shutdown_output_alone_stays_silent() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let (filter, application) = protected_pair(&config);

    application.shutdown_output();
    assert!(application.record().done_writing());
    assert!(!application.record().done_reading());
    assert_eq!(filter.control().drain_requests().unwrap(), 0);
}

#[test]
fn checkpointing_works_without_a_filter_present() {
    // An administrative process may act while no filter is bound; only the
    // notification fails, the record update sticks.
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let application = Connection::setup(&config, &key(), Setup::CREATE).unwrap();

    assert!(application.checkpoint_input(0).is_err());
    assert_eq!(application.record().saved_ack(), 0);

    application.checkpoint_output(0);
}

#[test]
fn saved_checkpoint_recovers_into_a_fresh_record() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    let mut image = Vec::new();
    {
        let (filter, application) = protected_pair(&config);
        let half = filter.filter().unwrap();
        half.set_ack(9000);
        half.set_peer_ack(7000);
        half.set_seq(123_456);

        application
            .application()
            .set_peer_options(1460, Some(7), true);
        application.checkpoint_input(2500).unwrap();
        application.checkpoint_output(600);

        application.save(&mut image).unwrap();
    }

    // A new home, as after migrating to a standby host.
    let standby = tempfile::tempdir().unwrap();
    let config = config_in(&standby);
    let recovered = Connection::setup(&config, &key(), Setup::CREATE).unwrap();
    recovered.recover(image.as_slice()).unwrap();

    let record = recovered.record();
    assert_eq!(record.checkpoint_image().as_slice(), image.as_slice());
    assert_eq!(record.saved_ack(), 2500);
    assert_eq!(record.safe(), 600);
    assert_eq!(record.peer_mss(), Some(1460));
    assert_eq!(record.peer_ws(), Some(7));
    assert!(record.peer_sack_permitted());

    // Live state starts from scratch; a filter on this host rebuilds it.
    assert_eq!(record.seq(), 0);
    assert_eq!(record.ack(), 0);
    assert_eq!(record.peer_ack(), 0);
    assert!(!record.done());
}

#[test]
fn recover_from_a_short_source_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let application = Connection::setup(&config, &key(), Setup::CREATE).unwrap();

    let short = [0u8; tcpr::CHECKPOINT_LEN - 1];
    assert!(application.recover(short.as_slice()).is_err());
}

#[test]
fn restarted_application_resumes_from_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let (filter, application) = protected_pair(&config);

    filter.filter().unwrap().set_ack(4000);
    application.checkpoint_input(4000).unwrap();
    drop(application);

    // Same key, no CREATE: the successor sees its predecessor's progress.
    let successor = Connection::setup(&config, &key(), Setup::empty()).unwrap();
    assert_eq!(successor.record().saved_ack(), 4000);
    assert_eq!(successor.input_bytes(), 0);
}

#[test]
fn wait_observes_done_within_a_poll_interval() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let (filter, application) = protected_pair(&config);

    assert!(!application.wait_timeout(Duration::from_millis(50)));

    let marker = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        filter.filter().unwrap().set_done();
        filter
    });

    assert!(application.wait_timeout(Duration::from_secs(10)));
    assert!(application.record().done());
    drop(marker.join().unwrap());
}

#[test]
fn teardown_twice_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let (_filter, mut application) = protected_pair(&config);

    application.teardown();
    application.teardown();
    // Drop after explicit teardown must not double-release either.
    drop(application);
}

#[test]
fn setup_without_create_requires_an_existing_record() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    match Connection::setup(&config, &key(), Setup::empty()) {
        Err(SetupError::Open(_)) => {}
        Err(other) => panic!("unexpected failure: {other}"),
        Ok(_) => panic!("attached to a record that does not exist"),
    }
}

#[test]
fn failed_filter_setup_unbinds_its_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    // No CREATE and no state file: setup must fail after the bind and roll
    // the endpoint file back.
    assert!(Connection::setup(&config, &key(), Setup::FILTER).is_err());
    assert!(!config.control_path(&key()).exists());
}

#[test]
fn destroy_removes_both_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    {
        let (_filter, _application) = protected_pair(&config);
    }

    tcpr::destroy(&config, &key()).unwrap();
    assert!(!config.state_path(&key()).exists());
    assert!(!config.control_path(&key()).exists());
}
