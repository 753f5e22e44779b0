mod app;
mod cli;
mod command_bus;
mod config;
mod frames;
mod k8s;
mod keys;
mod list;
mod model;
mod navpath;
mod page;
mod persist;
mod relay;
mod tab_store;
mod tabs;
mod ui;

use anyhow::{Context, Result};
use app::App;
use clap::Parser;
use cli::CliArgs;
use config::{KeymapSnapshot, RuntimeConfigWatcher};
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use futures::StreamExt;
use k8s::KubeGateway;
use page::PageResponse;
use persist::TabFileStore;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use relay::{ChannelCounterpart, Delivery};
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use tab_store::{LocalTabBackend, TabResponse, TabStore};
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

struct Channels {
    tabs: mpsc::UnboundedReceiver<TabResponse>,
    relay: mpsc::UnboundedReceiver<Delivery>,
    pages: mpsc::UnboundedReceiver<PageResponse>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args)?;

    let mut config = match &args.config {
        Some(path) => RuntimeConfigWatcher::at(path),
        None => RuntimeConfigWatcher::discover(),
    };
    let keymap = match config.load_current() {
        Ok(keymap) => keymap,
        Err(error) => {
            error!("runtime config rejected, using default key bindings: {error:#}");
            KeymapSnapshot::default()
        }
    };

    let tab_file = if args.no_persist {
        None
    } else {
        match &args.tabs_file {
            Some(path) => Some(TabFileStore::new(path)),
            None => match TabFileStore::in_cache_dir() {
                Ok(store) => Some(store),
                Err(error) => {
                    warn!("tabs will not be saved: {error:#}");
                    None
                }
            },
        }
    };
    if let Some(store) = &tab_file {
        info!(path = %store.path().display(), "tab persistence enabled");
    }

    let gateway = KubeGateway::new(args.context.clone());
    info!(context = gateway.active_context(), "starting skiff");

    let (tabs_tx, tabs_rx) = mpsc::unbounded_channel();
    let (relay_tx, relay_rx) = mpsc::unbounded_channel();
    let (pages_tx, pages_rx) = mpsc::unbounded_channel();
    let store = TabStore::new(Arc::new(LocalTabBackend::open(tab_file)), tabs_tx);
    let mut app = App::new(
        store,
        Arc::new(gateway),
        Rc::new(ChannelCounterpart::new(relay_tx)),
        pages_tx,
        keymap,
    );
    let channels = Channels {
        tabs: tabs_rx,
        relay: relay_rx,
        pages: pages_rx,
    };

    run(&mut app, channels, config, args.refresh_ms.max(250)).await
}

fn init_tracing(args: &CliArgs) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    // The terminal owns stdout, so logs go to a file or nowhere.
    let _ = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(io::sink).try_init(),
    };

    Ok(())
}

async fn run(
    app: &mut App,
    channels: Channels,
    config: RuntimeConfigWatcher,
    refresh_ms: u64,
) -> Result<()> {
    let mut session = TerminalSession::enter()?;
    let outcome = run_loop(&mut session.terminal, app, channels, config, refresh_ms).await;
    let restored = session.leave();

    match (outcome, restored) {
        (Err(error), Err(restore_error)) => {
            Err(error.context(format!("terminal restore also failed: {restore_error:#}")))
        }
        (Err(error), Ok(())) | (Ok(()), Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// Raw mode on the alternate screen. Where the terminal supports it, key
/// disambiguation is switched on so chords like meta+shift+BracketLeft keep
/// their modifiers.
struct TerminalSession {
    terminal: TuiTerminal,
    keyboard_enhanced: bool,
}

impl TerminalSession {
    fn enter() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;

        let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
        if keyboard_enhanced {
            execute!(
                stdout,
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_ALTERNATE_KEYS
                )
            )
            .context("failed to enable keyboard enhancement")?;
        }
        debug!(keyboard_enhanced, "terminal session started");

        let mut terminal =
            Terminal::new(CrosstermBackend::new(stdout)).context("failed to create terminal")?;
        terminal.clear().context("failed to clear terminal")?;
        Ok(Self {
            terminal,
            keyboard_enhanced,
        })
    }

    fn leave(mut self) -> Result<()> {
        let backend = self.terminal.backend_mut();
        if self.keyboard_enhanced {
            execute!(backend, PopKeyboardEnhancementFlags)
                .context("failed to disable keyboard enhancement")?;
        }
        execute!(backend, LeaveAlternateScreen).context("failed to leave alternate screen")?;
        disable_raw_mode().context("failed to disable raw mode")?;
        self.terminal.show_cursor().context("failed to show cursor")
    }
}

/// Every window event is handled to completion on this one task; relay
/// deliveries posted while handling one are picked up on a later turn.
async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    mut channels: Channels,
    mut config: RuntimeConfigWatcher,
    refresh_ms: u64,
) -> Result<()> {
    app.start();

    let mut reader = EventStream::new();
    let mut ticker = interval(Duration::from_millis(refresh_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut config_ticker = interval(CONFIG_POLL_INTERVAL);
    config_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        debug!(?key, "key press");
                        app.handle_key(key)?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            Some(delivery) = channels.relay.recv() => {
                app.receive_delivery(delivery)?;
            }
            Some(response) = channels.tabs.recv() => {
                app.apply_tab_response(response);
            }
            Some(response) = channels.pages.recv() => {
                app.apply_page_response(response);
            }
            _ = ticker.tick() => {
                app.refresh();
            }
            _ = config_ticker.tick() => {
                match config.reload_if_changed() {
                    Ok(Some(keymap)) => app.apply_keymap(keymap),
                    Ok(None) => {}
                    Err(error) => {
                        error!("runtime config reload rejected: {error:#}");
                        app.set_status(format!("Config rejected: {}", compact_error(&error)));
                    }
                }
            }
        }
    }

    Ok(())
}

fn compact_error(error: &anyhow::Error) -> String {
    let text = format!("{error:#}");
    text.lines().next().unwrap_or_default().to_string()
}
