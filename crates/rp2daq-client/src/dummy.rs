//! Virtual rp2daq device
//!
//! A deterministic in-process firmware emulation behind the link seam:
//! it decodes command frames against the same catalogue the runtime
//! uses and answers with well-formed reports, including multi-block
//! 12-bit ADC streams. Select it with the `dummy` endpoint name to run
//! examples and tests without hardware.
//!
//! Responses are written in deliberately small fragments so the receive
//! pipeline's reassembly is exercised the way real USB traffic does.

use std::collections::VecDeque;
use std::sync::Arc;

use rp2daq_core::{codec, payload, Catalogue};

use crate::error::{Error, Result};
use crate::link::{pipe, LinkReader, LinkWriter};
use crate::locator;

/// Unique ID the virtual device reports
pub const DUMMY_ID: &str = "E66118604B52522A";

/// Fragment size of virtual-device writes
const WRITE_CHUNK: usize = 17;

/// Number of synthetic edge reports per `gpio_on_change` arming
const EDGE_BURST: usize = 3;

/// Start the virtual device and return the host-side link halves
pub fn spawn(catalogue: Arc<Catalogue>) -> (Box<dyn LinkReader>, Box<dyn LinkWriter>) {
    let ((host_rx, host_tx), (device_rx, device_tx)) = pipe::duplex();

    std::thread::Builder::new()
        .name("rp2daq-dummy".into())
        .spawn(move || {
            let mut device = VirtualDevice::new(catalogue, device_rx, device_tx);
            device.run();
            log::debug!("virtual device stopped");
        })
        .expect("spawn virtual device");

    (Box::new(host_rx), Box::new(host_tx))
}

struct VirtualDevice {
    catalogue: Arc<Catalogue>,
    rx: pipe::PipeReader,
    tx: pipe::PipeWriter,
    buf: VecDeque<u8>,
    gpio_levels: [u8; 30],
    stepper_nanopos: [u32; 4],
    time_us: u64,
}

impl VirtualDevice {
    fn new(catalogue: Arc<Catalogue>, rx: pipe::PipeReader, tx: pipe::PipeWriter) -> Self {
        Self {
            catalogue,
            rx,
            tx,
            buf: VecDeque::new(),
            gpio_levels: [0; 30],
            stepper_nanopos: [0x8000_0000; 4],
            time_us: 1_000,
        }
    }

    fn run(&mut self) {
        while self.handle_one_frame().is_ok() {}
    }

    fn handle_one_frame(&mut self) -> Result<()> {
        let length = self.recv_exact(1)?[0] as usize;
        let opcode = self.recv_exact(1)?[0];
        // the historical identify probe carries length 1; every other
        // frame counts opcode plus the reserved slot in its length
        let args = self.recv_exact(length.saturating_sub(2))?;

        let command = self
            .catalogue
            .command(opcode)
            .ok_or(Error::ProtocolDesync { opcode })?;
        let name = command.name.clone();
        let values = if args.len() == command.args_len() {
            codec::decode_args(command, &args)?
        } else if name == "identify" {
            // the locator's historical probe frame carries no arguments
            Vec::new()
        } else {
            log::warn!(
                "malformed \"{}\" frame: {} argument bytes, expected {}",
                name,
                args.len(),
                command.args_len()
            );
            return Ok(());
        };

        match name.as_str() {
            "identify" => self.report_identify(),
            "gpio_out" => {
                let (gpio, value) = (values[0] as usize, values[1] as u8);
                self.gpio_levels[gpio.min(29)] = value;
                self.report(opcode, &[])
            }
            "gpio_in" => {
                let gpio = values[0] as usize;
                self.report(opcode, &[values[0], self.gpio_levels[gpio.min(29)] as i128])
            }
            "gpio_on_change" => self.report_edges(opcode, &values),
            "pwm_configure_pair" | "pwm_set_value" => self.report(opcode, &[]),
            "internal_adc" => self.report_adc_blocks(opcode, &values),
            "stepper_init" => {
                let n = (values[0] as usize).min(3);
                self.stepper_nanopos[n] = 0x8000_0000;
                self.report(opcode, &[values[0], self.stepper_nanopos[n] as i128])
            }
            "stepper_move" => {
                let n = (values[0] as usize).min(3);
                self.stepper_nanopos[n] = values[1] as u32;
                self.report(opcode, &[values[0], values[1], 0, 1])
            }
            "stepper_status" => {
                let n = (values[0] as usize).min(3);
                self.report(opcode, &[values[0], 0, 0, self.stepper_nanopos[n] as i128])
            }
            other => {
                log::warn!("virtual device has no behaviour for \"{}\"", other);
                Ok(())
            }
        }
    }

    /// Report header values after `report_code`, no payload
    fn report(&mut self, opcode: u8, tail: &[i128]) -> Result<()> {
        self.report_with_data(opcode, tail, None)
    }

    fn report_with_data(&mut self, opcode: u8, tail: &[i128], data: Option<&[u8]>) -> Result<()> {
        let desc = Arc::clone(self.catalogue.report(opcode).expect("known opcode"));

        let mut values = vec![opcode as i128];
        values.extend_from_slice(tail);
        debug_assert_eq!(values.len(), desc.fields.len());

        let mut bytes = codec::encode_header(&desc, &values);
        if let Some(data) = data {
            bytes.extend_from_slice(data);
        }
        self.write_chunked(&bytes)
    }

    fn report_identify(&mut self) -> Result<()> {
        let identity = format!("rp2daq_{:06}_{}", self.catalogue.version(), DUMMY_ID);
        debug_assert_eq!(identity.len(), locator::IDENTITY_LEN);
        let data = identity.into_bytes();
        self.report_with_data(0, &[data.len() as i128, 8], Some(&data))
    }

    fn report_edges(&mut self, opcode: u8, values: &[i128]) -> Result<()> {
        let (gpio, rising, falling) = (values[0], values[1] != 0, values[2] != 0);
        if !rising && !falling {
            // both edges off: reporting disarmed, nothing to say
            return Ok(());
        }
        for edge in 0..EDGE_BURST {
            let value = if rising { (edge % 2 == 0) as i128 } else { 0 };
            self.time_us += 100;
            self.report(opcode, &[gpio, value, 0, self.time_us as i128])?;
        }
        Ok(())
    }

    fn report_adc_blocks(&mut self, opcode: u8, values: &[i128]) -> Result<()> {
        let channel_mask = values[0];
        let blocksize = values[1] as usize;
        let blocks = values[2] as u16;

        for remaining in (0..blocks).rev() {
            let base = (blocks - 1 - remaining) as usize * blocksize;
            let samples: Vec<u16> = (0..blocksize).map(|i| ((base + i) & 0x0FFF) as u16).collect();
            let packed = payload::pack_samples(&samples, 12).map_err(Error::Core)?;

            self.time_us += 2_000;
            self.report_with_data(
                opcode,
                &[
                    blocksize as i128,
                    12,
                    channel_mask,
                    remaining as i128,
                    0,
                    self.time_us as i128,
                ],
                Some(&packed),
            )?;
        }
        Ok(())
    }

    fn write_chunked(&mut self, bytes: &[u8]) -> Result<()> {
        for chunk in bytes.chunks(WRITE_CHUNK) {
            self.tx.write_all(chunk)?;
        }
        Ok(())
    }

    fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.buf.len() < n {
            if let Some(fragment) = self.rx.read_fragment()? {
                self.buf.extend(fragment);
            }
        }
        Ok(self.buf.drain(..n).collect())
    }
}
