//! Audiobox - control plane for an RFID-triggered audiobook player
//!
//! Cards on the RC522 reader select content, GPIO buttons and a rotary
//! encoder drive playback and volume, and a browser frontend on a local
//! TCP socket does the actual playing.
//!
//! Module structure:
//! - `domain/` - Card content, wire protocol, errors
//! - `hw/` - GPIO/SPI backends (rppal on the Pi, mocks elsewhere)
//! - `io/` - Reader, buttons, encoder, LED, transport, file server
//! - `services/` - Orchestrator, sound output, host actions, repeaters
//! - `infra/` - Config and actor loops

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

use audiobox::domain::Result;
use audiobox::hw::{DigitalInput, DigitalOutput};
use audiobox::infra::config::ButtonPinConfig;
use audiobox::infra::{ActorLoop, Config};
use audiobox::io::rc522::TagReader;
use audiobox::io::reader::REMOVAL_POLL;
use audiobox::io::{
    fileserver, GpioButton, GpioRotaryEncoder, Rc522, RfidReader, StatusLed, Transport,
};
use audiobox::services::repeat::spawn_repeaters;
use audiobox::services::{
    event_channel, ControlEvent, EventSender, Orchestrator, ShellSynthesizer, System,
};

/// Audiobox - RFID audiobook appliance control plane
#[derive(Parser, Debug)]
#[command(name = "audiobox", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/audiobox.toml")]
    config: String,
}

/// The physical endpoints main has to wire together, opened by whichever
/// hardware backend is compiled in.
struct Rig {
    led: Box<dyn DigitalOutput>,
    tag: Box<dyn TagReader>,
    play_pause: Option<Box<dyn DigitalInput>>,
    rewind: Option<Box<dyn DigitalInput>>,
    forward: Option<Box<dyn DigitalInput>>,
    shutdown: Option<Box<dyn DigitalInput>>,
    volume: Option<(Box<dyn DigitalInput>, Box<dyn DigitalInput>)>,
}

#[cfg(feature = "rpi")]
fn open_rig(config: &Config) -> Result<Rig> {
    use audiobox::hw::rpi::{resolve_pin, RpiInput, RpiIrq, RpiOutput, RpiSpi};

    let pins = config.pins();
    let numbering = pins.numbering;
    let open_input = |cfg: &ButtonPinConfig| -> Result<Option<Box<dyn DigitalInput>>> {
        if !cfg.enabled() {
            return Ok(None);
        }
        let bcm = resolve_pin(numbering, cfg.pin)?;
        Ok(Some(Box::new(RpiInput::open(bcm, cfg.pullup)?)))
    };

    let rfid = config.rfid();
    let tag = Rc522::new(
        Box::new(RpiSpi::open(rfid)?),
        Box::new(RpiIrq::open(resolve_pin(numbering, rfid.irq_pin)?, true)?),
        Box::new(RpiOutput::open(resolve_pin(numbering, rfid.rst_pin)?)?),
    );

    let volume = if pins.volume_clk > 0 && pins.volume_dt > 0 {
        let clk: Box<dyn DigitalInput> =
            Box::new(RpiInput::open(resolve_pin(numbering, pins.volume_clk)?, true)?);
        let dt: Box<dyn DigitalInput> =
            Box::new(RpiInput::open(resolve_pin(numbering, pins.volume_dt)?, true)?);
        Some((clk, dt))
    } else {
        None
    };

    let shutdown = if pins.shutdown > 0 {
        let bcm = resolve_pin(numbering, pins.shutdown)?;
        Some(Box::new(RpiInput::open(bcm, true)?) as Box<dyn DigitalInput>)
    } else {
        None
    };

    Ok(Rig {
        led: Box::new(RpiOutput::open(resolve_pin(numbering, pins.status_led)?)?),
        tag: Box::new(tag),
        play_pause: open_input(&pins.play_pause)?,
        rewind: open_input(&pins.rewind)?,
        forward: open_input(&pins.forward)?,
        shutdown,
        volume,
    })
}

#[cfg(not(feature = "rpi"))]
fn open_rig(config: &Config) -> Result<Rig> {
    use audiobox::hw::mock::{MockInput, MockIrq, MockOutput, MockSpi};
    use audiobox::hw::Level;

    info!(event = "mock_hardware_in_use");
    let pins = config.pins();
    let input = |cfg: &ButtonPinConfig| -> Option<Box<dyn DigitalInput>> {
        cfg.enabled().then(|| Box::new(MockInput::new(Level::High)) as Box<dyn DigitalInput>)
    };
    let tag = Rc522::new(
        Box::new(MockSpi::new()),
        Box::new(MockIrq::new()),
        Box::new(MockOutput::new()),
    );
    Ok(Rig {
        led: Box::new(MockOutput::new()),
        tag: Box::new(tag),
        play_pause: input(&pins.play_pause),
        rewind: input(&pins.rewind),
        forward: input(&pins.forward),
        shutdown: (pins.shutdown > 0)
            .then(|| Box::new(MockInput::new(Level::High)) as Box<dyn DigitalInput>),
        volume: None,
    })
}

fn bind_button(
    input: Option<Box<dyn DigitalInput>>,
    name: &'static str,
    cfg: &ButtonPinConfig,
    actor: &ActorLoop,
    events: &EventSender,
    event: fn() -> ControlEvent,
) -> Result<Option<GpioButton>> {
    let Some(input) = input else {
        return Ok(None);
    };
    let tx = events.clone();
    let button = GpioButton::bind(input, name, cfg, actor, move || {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event());
        }
    })?;
    Ok(Some(button))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Log level via RUST_LOG, default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("audiobox starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    info!(
        config_file = %config.config_file(),
        language = %config.language(),
        transport = %format!("{}:{}", config.transport_host(), config.transport_port()),
        offline_dir = %config.offline_dir().display(),
        use_offline = config.use_offline(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = event_channel();

    // Transport to the browser frontend
    let transport_tx = event_tx.clone();
    let transport = Arc::new(Transport::start(
        config.transport_host(),
        config.transport_port(),
        move |ev| {
            let _ = transport_tx.send(ControlEvent::Transport(ev));
        },
    )?);

    // Offline library file server
    if config.use_offline() {
        let root = config.offline_dir().to_path_buf();
        let port = config.offline_port();
        let fs_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = fileserver::serve(root, port, fs_shutdown).await {
                tracing::error!(error = %e, "fileserver_error");
            }
        });
    }

    // Periodic maintenance commands from the config
    let repeaters = spawn_repeaters(config.commands(), shutdown_rx.clone());

    // Hardware
    let rig = open_rig(&config)?;
    let input_actor = ActorLoop::spawn("inputs");
    let led_actor = ActorLoop::spawn("led");
    let led = StatusLed::new(rig.led, led_actor.clone());

    let pins = config.pins().clone();
    let mut buttons = Vec::new();
    if let Some(button) = bind_button(
        rig.play_pause,
        "play_pause",
        &pins.play_pause,
        &input_actor,
        &event_tx,
        || ControlEvent::PlayPausePressed,
    )? {
        buttons.push(button);
    }
    if let Some(button) = bind_button(
        rig.rewind,
        "rewind",
        &pins.rewind,
        &input_actor,
        &event_tx,
        || ControlEvent::RewindPressed,
    )? {
        buttons.push(button);
    }
    if let Some(button) = bind_button(
        rig.forward,
        "forward",
        &pins.forward,
        &input_actor,
        &event_tx,
        || ControlEvent::ForwardPressed,
    )? {
        buttons.push(button);
    }
    if let Some(input) = rig.shutdown {
        let cfg = ButtonPinConfig {
            pin: pins.shutdown,
            debounce_ms: 500,
            edge: pins.shutdown_edge,
            pullup: true,
        };
        let tx = event_tx.clone();
        let button = GpioButton::bind_hold(
            input,
            "shutdown",
            &cfg,
            Duration::from_millis(pins.shutdown_hold_ms),
            &input_actor,
            move || {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(ControlEvent::ShutdownRequested);
                }
            },
        )?;
        buttons.push(button);
    }

    let mut encoder = None;
    if let Some((clk, dt)) = rig.volume {
        let tx = event_tx.clone();
        encoder = Some(GpioRotaryEncoder::bind(clk, dt, &input_actor, move |rotation| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(ControlEvent::VolumeStep(rotation));
            }
        })?);
    }

    // Card reader thread
    let reader_tx = event_tx.clone();
    let mut reader = RfidReader::spawn(
        rig.tag,
        config.rfid_key(),
        config.rfid_key_type(),
        REMOVAL_POLL,
        move |ev| {
            let _ = reader_tx.send(ControlEvent::Reader(ev));
        },
    );

    // Orchestrator owns the rest
    let synth = Arc::new(ShellSynthesizer::default());
    let system = Arc::new(System::new(config.volume_step_percent(), config.browser_display()));
    let orchestrator = Orchestrator::new(
        config,
        transport.clone(),
        led.clone(),
        synth,
        system,
        event_tx.clone(),
        shutdown_tx.clone(),
    );

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    info!("orchestrator_running");
    orchestrator.run(event_rx).await;

    // Ordered teardown: stop producing events, then drain the loops
    let _ = shutdown_tx.send(true);
    reader.stop();
    for mut button in buttons {
        let _ = button.release();
    }
    if let Some(mut encoder) = encoder {
        let _ = encoder.release();
    }
    transport.stop();
    led.shutdown();
    input_actor.stop();
    led_actor.stop();
    for handle in repeaters {
        handle.abort();
    }

    info!("audiobox shutdown complete");
    Ok(())
}
