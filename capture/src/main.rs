use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use hantek_types::Channel;
use hantek_usb::acquisition::{Acquisition, AcquisitionConfig, AcquisitionEvent};
use hantek_usb::device::{find_devices, UsbTransport};
use hantek_usb::session::Session;
use log::{error, info, warn};
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;

use crate::cli::{CaptureMode, Cli};
use crate::profile::Profile;

mod cli;
mod profile;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    CombinedLogger::init(vec![TermLogger::new(
        args.log_level.into(),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .context("Could not configure the logger")?;

    if args.list {
        let devices = find_devices();
        if devices.is_empty() {
            warn!("No Hantek 6022 found. Is the firmware loaded, and are permissions correct?");
        }
        for device in devices {
            println!(
                "{}: bus {:03} address {:03}",
                device.index, device.bus_number, device.address
            );
        }
        return Ok(());
    }

    let output = args.output.clone().context("No output file given")?;
    let mut profile = match &args.profile {
        Some(path) => Profile::read(path)?,
        None => Profile::default(),
    };
    profile.apply(&args);

    info!("Hantek Capture v{}", VERSION);
    let mut session = Session::open(profile.device).context(
        "Unable to open the scope. Is the firmware loaded, and are permissions correct?",
    )?;

    configure(&mut session, &profile)?;
    session.start().context("Unable to start sampling")?;

    // The custom firmware can hang if read from too soon after starting.
    thread::sleep(Duration::from_millis(profile.settle_ms));

    let file = File::create(&output).context(format!(
        "Could not open output file for writing at {}",
        output.to_string_lossy()
    ))?;
    let mut writer = BufWriter::new(file);

    let captured = match profile.mode {
        CaptureMode::Sync => capture_sync(&mut session, &profile, &mut writer),
        CaptureMode::Stream => capture_stream(&mut session, &profile, &mut writer),
    };

    // Stop sampling whatever happened above, then report the capture error if there was one.
    if let Err(error) = session.stop() {
        warn!("Unable to stop sampling: {}", error);
    }
    let captured = captured?;

    writer.flush().context("Could not write output file")?;
    session.close().context("Unable to release the scope")?;

    info!("Wrote {} bytes to {}", captured, output.to_string_lossy());
    Ok(())
}

fn configure(session: &mut Session<UsbTransport>, profile: &Profile) -> Result<()> {
    session
        .set_channel_count(profile.channels.count())
        .context("Unable to select channels")?;
    session
        .set_sample_rate(profile.sample_rate.code())
        .context("Unable to set sample rate")?;
    session
        .set_voltage_range(profile.range_ch1.code(), Channel::One.number())
        .context("Unable to set CH1 voltage range")?;
    if let Some(range) = profile.range_ch2 {
        session
            .set_voltage_range(range.code(), Channel::Two.number())
            .context("Unable to set CH2 voltage range")?;
    }

    info!(
        "Configured {} channel(s) at {}, CH1 {}",
        profile.channels.count(),
        profile.sample_rate,
        profile.range_ch1
    );
    Ok(())
}

fn capture_sync(
    session: &mut Session<UsbTransport>,
    profile: &Profile,
    writer: &mut impl Write,
) -> Result<usize> {
    let mut buffer = vec![0; profile.bytes];
    let transferred = session
        .read_sync(&mut buffer)
        .context("Error during bulk transfer")?;
    info!("{} bytes transferred", transferred);

    writer
        .write_all(&buffer[..transferred])
        .context("Could not write output file")?;
    Ok(transferred)
}

fn capture_stream(
    session: &mut Session<UsbTransport>,
    profile: &Profile,
    writer: &mut (impl Write + Send),
) -> Result<usize> {
    let target = profile.bytes;
    let written = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let mut write_error = None;

    let config = AcquisitionConfig {
        buffer_size: profile.buffer_size,
        concurrency: profile.transfers,
    };
    let (sender, mut events) = unbounded_channel();

    let handler = |data: &[u8]| {
        let done = written.load(Ordering::SeqCst);
        if done >= target || failed.load(Ordering::SeqCst) {
            return;
        }

        let take = data.len().min(target - done);
        match writer.write_all(&data[..take]) {
            Ok(()) => {
                written.fetch_add(take, Ordering::SeqCst);
            }
            Err(error) => {
                write_error = Some(error);
                failed.store(true, Ordering::SeqCst);
            }
        }
    };

    let engine = Acquisition::start(session, config, handler, Some(sender))
        .context("Unable to start acquisition")?;

    let pumped = thread::scope(|scope| {
        let pump = scope.spawn(|| {
            while engine.is_streaming() {
                engine.pump()?;
            }
            Ok::<(), hantek_usb::error::AcquisitionError>(())
        });

        let poll_interval = Duration::from_millis(20);
        while engine.is_streaming()
            && written.load(Ordering::SeqCst) < target
            && !failed.load(Ordering::SeqCst)
        {
            while let Ok(event) = events.try_recv() {
                match event {
                    AcquisitionEvent::TransferFailed(error) => warn!("{}", error),
                    AcquisitionEvent::SlotRetired { slot, error } => {
                        warn!("Transfer slot {} retired: {}", slot, error)
                    }
                    AcquisitionEvent::Exhausted => error!("All transfers have failed"),
                }
            }
            thread::sleep(poll_interval);
        }

        let stopped = engine.stop();
        let pumped = pump
            .join()
            .map_err(|_| anyhow!("Acquisition thread panicked"))?;

        pumped.context("Acquisition failed")?;
        stopped.context("Unable to stop acquisition")
    });

    let completions = engine.completions();
    drop(engine);
    pumped?;

    if let Some(error) = write_error {
        return Err(error).context("Could not write output file");
    }

    let written = written.load(Ordering::SeqCst);
    if written < target {
        bail!("Acquisition ended after {} of {} bytes", written, target);
    }

    info!("{} bytes captured over {} transfers", written, completions);
    Ok(written)
}
