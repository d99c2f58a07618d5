//! End-to-end runtime scenarios against the virtual device

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use rp2daq_client::commands::{GpioIn, GpioOnChange, GpioOut, Identify, InternalAdc, StepperInit, StepperMove};
use rp2daq_client::{ConnectOptions, Error, Rp2daq};
use rp2daq_core::parser;

fn firmware_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../firmware")
}

fn connect_dummy() -> Rp2daq {
    Rp2daq::connect(ConnectOptions {
        port: Some("dummy".into()),
        firmware_dir: firmware_dir(),
        require_serial: None,
        rx_delay: None,
    })
    .unwrap()
}

#[test]
fn test_identify_round_trip() {
    let rp = connect_dummy();

    let report = rp.call(&Identify).unwrap();
    assert_eq!(report.identity, "rp2daq_240715_E66118604B52522A");

    let identity = report.device().unwrap();
    assert_eq!(identity.version, 240715);
    assert_eq!(identity.unique_id, "E66118604B52522A");
    rp.quit();
}

#[test]
fn test_bounds_violation_writes_nothing() {
    let rp = connect_dummy();

    let err = rp.call(&GpioOut { gpio: 30, value: 0 }).unwrap_err();
    match err {
        Error::Core(rp2daq_core::Error::AboveMaximum { field, max, .. }) => {
            assert_eq!(field, "gpio");
            assert_eq!(max, 29);
        }
        other => panic!("unexpected error: {other}"),
    }

    // the device never saw a frame: a valid call still works in order
    let report = rp.call(&GpioIn { gpio: 3 }).unwrap();
    assert_eq!(report.value, 0);
    rp.quit();
}

#[test]
fn test_async_stream_counts_down_in_order() {
    let rp = connect_dummy();
    let (block_tx, block_rx) = mpsc::channel();

    rp.subscribe(
        &InternalAdc {
            blocksize: 2000,
            blocks_to_send: 10,
            ..Default::default()
        },
        move |block| {
            block_tx.send(block).unwrap();
        },
    )
    .unwrap();

    let mut total_samples = 0usize;
    let mut last_remaining: Option<u16> = None;
    for _ in 0..10 {
        let block = block_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(block.data.len(), 2000);
        assert!(block.data.iter().all(|&v| v <= 0x0FFF));
        total_samples += block.data.len();

        if let Some(previous) = last_remaining {
            assert!(block.blocks_to_send < previous, "blocks_to_send must decrease");
        }
        last_remaining = Some(block.blocks_to_send);
    }

    assert_eq!(total_samples, 20_000);
    assert_eq!(last_remaining, Some(0));
    rp.quit();
}

#[test]
fn test_sync_call_completes_during_async_stream() {
    let rp = connect_dummy();
    let counter = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&counter);
    rp.subscribe(
        &InternalAdc {
            blocksize: 2000,
            blocks_to_send: 20,
            ..Default::default()
        },
        move |block| {
            seen.fetch_add(block.data.len(), Ordering::Relaxed);
        },
    )
    .unwrap();

    // a blocking RPC must get through while samples are in flight
    let started = std::time::Instant::now();
    let report = rp.call(&Identify).unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(report.identity, "rp2daq_240715_E66118604B52522A");
    rp.quit();
}

#[test]
fn test_sync_command_inside_callback() {
    let rp = Arc::new(connect_dummy());
    let (done_tx, done_rx) = mpsc::channel();

    let inner = Arc::clone(&rp);
    rp.subscribe(&GpioOnChange { gpio: 2, ..Default::default() }, move |edge| {
        // issuing a blocking call from the callback worker must not
        // deadlock against the receive pipeline
        if let Ok(level) = inner.call(&GpioIn { gpio: edge.gpio }) {
            let _ = done_tx.send(level.gpio);
        }
    })
    .unwrap();

    assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
    rp.quit();
}

#[test]
fn test_edge_reports_arrive_in_wire_order() {
    let rp = connect_dummy();
    let (edge_tx, edge_rx) = mpsc::channel();

    rp.subscribe(&GpioOnChange { gpio: 7, ..Default::default() }, move |edge| {
        edge_tx.send(edge.time_us).unwrap();
    })
    .unwrap();

    let mut stamps = Vec::new();
    for _ in 0..3 {
        stamps.push(edge_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    rp.quit();
}

#[test]
fn test_quit_cancels_pending_sync_call() {
    let rp = Arc::new(connect_dummy());

    // both edges disabled: the device never answers this one
    let blocked = Arc::clone(&rp);
    let waiter = std::thread::spawn(move || {
        blocked.call(&GpioOnChange {
            gpio: 1,
            on_rising_edge: 0,
            on_falling_edge: 0,
        })
    });

    std::thread::sleep(Duration::from_millis(100));
    rp.quit();

    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(!rp.connected());

    // further commands are refused
    assert!(matches!(rp.call(&Identify), Err(Error::Cancelled)));
}

#[test]
fn test_disconnect_mid_stream() {
    use rp2daq_client::link::{pipe, LinkReader, LinkWriter};

    let catalogue = Arc::new(parser::parse_firmware(&firmware_dir()).unwrap());
    let ((host_rx, host_tx), (mut dev_rx, mut dev_tx)) = pipe::duplex();

    // scripted peer: answer two ADC blocks, then unplug
    let peer_catalogue = Arc::clone(&catalogue);
    let peer = std::thread::spawn(move || {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            match dev_rx.read_fragment() {
                Ok(Some(fragment)) => buf.extend(fragment),
                Ok(None) => continue,
                Err(_) => return,
            }
            if buf.len() >= 2 && buf.len() >= buf[0] as usize {
                break;
            }
        }

        let desc = peer_catalogue.report(6).unwrap();
        for remaining in [1i128, 0] {
            let samples = vec![0u16; 8];
            let packed = rp2daq_core::payload::pack_samples(&samples, 12).unwrap();
            let mut bytes = rp2daq_core::codec::encode_header(
                desc,
                &[6, samples.len() as i128, 12, 1, remaining, 0, 0],
            );
            bytes.extend(packed);
            dev_tx.write_all(&bytes).unwrap();
        }
        // dropping both halves closes the endpoint mid-stream
    });

    let rp = Rp2daq::over_link(catalogue, Box::new(host_rx), Box::new(host_tx), None);
    let (hook_tx, hook_rx) = mpsc::channel();
    rp.on_disconnect(move || hook_tx.send(()).unwrap());

    let (block_tx, block_rx) = mpsc::channel();
    rp.subscribe(
        &InternalAdc {
            blocksize: 8,
            blocks_to_send: 2,
            ..Default::default()
        },
        move |block| block_tx.send(block.blocks_to_send).unwrap(),
    )
    .unwrap();

    assert_eq!(block_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    assert_eq!(block_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
    peer.join().unwrap();

    // the loss is observable, the callback sees nothing further and
    // new commands fail
    hook_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!rp.connected());
    assert!(block_rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(matches!(rp.call(&Identify), Err(Error::Disconnected)));
    rp.quit();
}

#[test]
fn test_stepper_state_round_trip() {
    let rp = connect_dummy();

    let init = rp
        .call(&StepperInit {
            stepper_number: 1,
            dir_gpio: 14,
            step_gpio: 15,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(init.initial_nanopos, 0x8000_0000);

    let target = init.initial_nanopos - 200 * 3330;
    let moved = rp
        .call(&StepperMove {
            stepper_number: 1,
            to: target,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(moved.nanopos, target);
    assert_eq!(moved.move_finished, 1);
    rp.quit();
}

#[test]
fn test_generic_invoke_applies_defaults() {
    let rp = connect_dummy();

    // pwm_set_value's `value` defaults to 0 in the descriptor source
    let report = rp.invoke("pwm_set_value", &[("gpio", 14)]).unwrap();
    assert_eq!(report.name(), "pwm_set_value");

    let err = rp.invoke("pwm_set_value", &[("duty", 1)]).unwrap_err();
    assert!(matches!(
        err,
        Error::Core(rp2daq_core::Error::UnknownParameter { .. })
    ));
    rp.quit();
}
