//! Voice Client Application
//!
//! Joins a room on the relay server and streams microphone audio while
//! playing back the room mix. Type `/mute`, `/unmute`, `/status` or `/quit`.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_voice_client::{
    audio::{list_devices, CpalBackend},
    config::ClientConfig,
    session::{ChannelEvents, ConnectParams, Notification, VoiceClient},
};

/// LAN voice chat client
#[derive(Parser, Debug)]
#[command(name = "voice-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address or hostname
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Room to join
    #[arg(long)]
    room: Option<String>,

    /// Display name (defaults to the user or machine name)
    #[arg(long)]
    name: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input device id as printed by --list-devices
    #[arg(long)]
    input_device: Option<String>,

    /// Output device id as printed by --list-devices
    #[arg(long)]
    output_device: Option<String>,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Write the effective settings to the config file before connecting
    #[arg(long)]
    save_config: bool,
}

impl Args {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(room) = &self.room {
            config.session.room = room.clone();
        }
        if let Some(name) = &self.name {
            config.session.name = name.clone();
        }
    }
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

/// Signal handler body: tear down whichever client is still in `slot`
fn interrupt_hook(slot: Arc<Mutex<Option<VoiceClient>>>) -> impl Fn() + Send + 'static {
    move || {
        if let Some(client) = slot.lock().as_ref() {
            client.disconnect();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let mut config = ClientConfig::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;

    if args.save_config {
        let path = args
            .config
            .clone()
            .or_else(ClientConfig::default_path)
            .context("no config directory available")?;
        config.save(&path)?;
        tracing::info!("Saved configuration to {}", path.display());
    }

    let backend = CpalBackend {
        input_device: args.input_device.clone(),
        output_device: args.output_device.clone(),
    };
    let (events, notifications) = ChannelEvents::new();
    let client = VoiceClient::new(config.audio, Arc::new(backend), Arc::new(events));

    // Presentation side: the only consumer of notifications
    let printer = thread::Builder::new()
        .name("notifications".into())
        .spawn(move || {
            for notification in notifications {
                match notification {
                    Notification::Log(text) => println!("{}", text),
                    Notification::ConnectionStateChanged(true) => {
                        println!("status: connected (low latency)");
                        println!("commands: /mute, /unmute, /status, /quit");
                    }
                    Notification::ConnectionStateChanged(false) => println!("status: not connected"),
                }
            }
        })?;

    // Ctrl-C tears the session down like /quit. The slot is emptied before
    // exit so the handler does not keep the notification channel open.
    let interrupt_target = Arc::new(Mutex::new(Some(client.clone())));
    ctrlc::set_handler(interrupt_hook(interrupt_target.clone()))
        .context("failed to install Ctrl-C handler")?;

    let params = ConnectParams::from_config(&config);
    tracing::info!(
        "Frame size {} bytes ({} Hz, {} ms)",
        config.audio.frame_bytes(),
        config.audio.sample_rate,
        config.audio.frame_ms
    );

    let result = match client.connect_in_background(params)?.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("connect worker panicked"),
    };

    if result.is_ok() {
        let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();
        thread::Builder::new().name("stdin".into()).spawn(move || {
            for line in std::io::stdin().lock().lines().map_while(|l| l.ok()) {
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        })?;

        while client.is_connected() {
            let line = match line_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            match line.trim().to_lowercase().as_str() {
                "/quit" => break,
                "/mute" => client.set_muted(true),
                "/unmute" => client.set_muted(false),
                "/status" => println!(
                    "state: {}, muted: {}",
                    client.connection_state(),
                    client.is_muted()
                ),
                "" => {}
                other => println!("unknown command: {}", other),
            }
        }
    }

    // Process exit is a teardown trigger like any other
    client.disconnect();
    interrupt_target.lock().take();
    drop(client);
    let _ = printer.join();

    result.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lan_voice_client::config::AudioConfig;
    use lan_voice_client::session::ConnectionState;

    #[test]
    fn test_interrupt_hook_lets_notifications_close() {
        let (events, notifications) = ChannelEvents::new();
        let client = VoiceClient::new(
            AudioConfig::default(),
            Arc::new(CpalBackend::default()),
            Arc::new(events),
        );
        let slot = Arc::new(Mutex::new(Some(client.clone())));
        let hook = interrupt_hook(slot.clone());

        // Idle client: disconnect is a no-op
        hook();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        slot.lock().take();
        drop(client);
        hook();
        assert!(matches!(
            notifications.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }
}
