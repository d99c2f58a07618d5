//! rp2daq - command-line control of a Pico data-acquisition device

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use indicatif::{ProgressBar, ProgressStyle};
use rp2daq_client::commands::{
    GpioIn, GpioOut, Identify, InternalAdc, PwmConfigurePair, PwmSetValue, StepperMove,
    StepperStatus,
};
use rp2daq_client::{locator, ConnectOptions, Rp2daq};
use rp2daq_core::parser;
use std::sync::mpsc;
use std::time::Duration;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.verbose {
        0 => {}
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    // commands that need no device
    match cli.command {
        Commands::ListPorts => return cmd_list_ports(),
        Commands::Docs => {
            let catalogue = parser::parse_firmware(&cli.firmware)?;
            print!("{}", render_reference(&catalogue));
            return Ok(());
        }
        _ => {}
    }

    let rp = Rp2daq::connect(ConnectOptions {
        port: cli.port,
        require_serial: cli.serial,
        firmware_dir: cli.firmware,
        ..Default::default()
    })?;

    match cli.command {
        Commands::Identify => cmd_identify(&rp)?,
        Commands::GpioOut { gpio, value } => {
            rp.call(&GpioOut { gpio, value })?;
            println!("GPIO {} set to {}", gpio, value);
        }
        Commands::GpioIn { gpio } => {
            let report = rp.call(&GpioIn { gpio })?;
            println!("GPIO {} reads {}", report.gpio, report.value);
        }
        Commands::PwmConfig {
            gpio,
            wrap_value,
            clkdiv,
        } => {
            rp.call(&PwmConfigurePair {
                gpio,
                wrap_value,
                clkdiv,
                ..Default::default()
            })?;
            println!(
                "PWM slice of GPIO {} configured (wrap {}, clkdiv {})",
                gpio, wrap_value, clkdiv
            );
        }
        Commands::PwmSet { gpio, value } => {
            rp.call(&PwmSetValue { gpio, value })?;
            println!("PWM value on GPIO {} set to {}", gpio, value);
        }
        Commands::Adc {
            channels,
            blocksize,
            blocks,
            clkdiv,
        } => cmd_adc(&rp, channels, blocksize, blocks, clkdiv)?,
        Commands::StepperMove { stepper, to, speed } => {
            let report = rp.call(&StepperMove {
                stepper_number: stepper,
                to,
                speed,
                ..Default::default()
            })?;
            println!(
                "stepper {} stopped at nanopos {} (endswitch {})",
                report.stepper_number, report.nanopos, report.endswitch_triggered
            );
        }
        Commands::StepperStatus { stepper } => {
            let report = rp.call(&StepperStatus {
                stepper_number: stepper,
            })?;
            println!(
                "stepper {}: active={} endswitch={} nanopos={}",
                report.stepper_number, report.active, report.endswitch, report.nanopos
            );
        }
        Commands::ListPorts | Commands::Docs => unreachable!(),
    }

    rp.quit();
    Ok(())
}

fn cmd_list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let candidates = locator::list_candidates()?;
    for (path, serial) in &candidates {
        println!("{}  (serial {})", path, serial.as_deref().unwrap_or("unknown"));
    }
    if candidates.is_empty() {
        println!("no rp2daq-looking endpoints found");
    }
    Ok(())
}

fn cmd_identify(rp: &Rp2daq) -> Result<(), Box<dyn std::error::Error>> {
    let report = rp.call(&Identify)?;
    let identity = report.device()?;
    println!("identity:  {}", report.identity);
    println!("firmware:  {}", identity.version);
    println!("device ID: {}", identity.unique_id);
    Ok(())
}

fn cmd_adc(
    rp: &Rp2daq,
    channels: u8,
    blocksize: u16,
    blocks: u16,
    clkdiv: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let bar = ProgressBar::new(blocks as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} blocks  {msg}")
            .expect("valid template"),
    );

    let (block_tx, block_rx) = mpsc::channel();
    rp.subscribe(
        &InternalAdc {
            channel_mask: channels,
            blocksize,
            blocks_to_send: blocks,
            infinite: 0,
            clkdiv,
        },
        move |block| {
            let _ = block_tx.send(block);
        },
    )?;

    let mut total = 0usize;
    let mut minimum = u16::MAX;
    let mut maximum = 0u16;
    let mut sum = 0u64;
    for _ in 0..blocks {
        let block = block_rx.recv_timeout(Duration::from_secs(10))?;
        total += block.data.len();
        for &sample in &block.data {
            minimum = minimum.min(sample);
            maximum = maximum.max(sample);
            sum += sample as u64;
        }
        bar.set_message(format!("{} samples", total));
        bar.inc(1);
    }
    bar.finish();

    if total > 0 {
        println!(
            "{} samples: min {}, max {}, mean {:.1} (of 4095 full scale)",
            total,
            minimum,
            maximum,
            sum as f64 / total as f64
        );
    }
    Ok(())
}

fn render_reference(catalogue: &rp2daq_core::Catalogue) -> String {
    use std::fmt::Write;

    let mut doc = String::new();
    writeln!(doc, "# rp2daq command reference\n").unwrap();
    writeln!(
        doc,
        "Generated from the firmware descriptor sources, version {}.\n",
        catalogue.version()
    )
    .unwrap();

    for command in catalogue.commands() {
        writeln!(doc, "## {} (opcode {})\n", command.name, command.opcode).unwrap();

        if command.fields.is_empty() {
            writeln!(doc, "No parameters.\n").unwrap();
        } else {
            for field in &command.fields {
                let mut attrs = Vec::new();
                if let Some(min) = field.min {
                    attrs.push(format!("min={}", min));
                }
                if let Some(max) = field.max {
                    attrs.push(format!("max={}", max));
                }
                if let Some(default) = field.default {
                    attrs.push(format!("default={}", default));
                }
                let attrs = if attrs.is_empty() {
                    String::new()
                } else {
                    format!(" _({})_", attrs.join(", "))
                };
                writeln!(
                    doc,
                    "* **{}** `{}`{} {}",
                    field.name,
                    field.type_name(),
                    attrs,
                    field.comment
                )
                .unwrap();
            }
            writeln!(doc).unwrap();
        }

        let report = catalogue.report(command.opcode).expect("paired report");
        writeln!(doc, "Report fields:\n").unwrap();
        for field in &report.fields {
            writeln!(doc, "* **{}** `{}` {}", field.name, field.type_name(), field.comment)
                .unwrap();
        }
        if report.has_payload {
            writeln!(doc, "* **data** expanded sample payload").unwrap();
        }
        writeln!(doc).unwrap();
    }
    doc
}
