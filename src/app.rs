use std::sync::Arc;
use std::time::Duration;

use glam::Vec2;
use instant::Instant;
use winit::application::ApplicationHandler;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, MouseButton, TouchPhase, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId, WindowLevel};

use crate::config::PetConfig;
use crate::engine::{PetEngine, TransitionOutcome, WindowHost};
use crate::error::PetError;
use crate::pet::animation::{AnimationEvent, Channel};
use crate::pet::drag::PointerButton;
use crate::pet::state::{Behavior, Listener, StateKey, SubscriptionId};
use crate::platform;
use crate::sched::Millis;
use crate::telemetry::batcher::ChatRole;
use crate::telemetry::collector::{Collector, HttpCollector, LogCollector};

/// Used when the monitor does not report a refresh rate.
const FALLBACK_REFRESH_MHZ: u32 = 60_000;
/// Used when the window is not on any monitor yet.
const FALLBACK_DISPLAY: Vec2 = Vec2::new(1920.0, 1080.0);

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// The real window the pet lives in.
pub struct WinitHost {
    window: Arc<Window>,
}

impl WindowHost for WinitHost {
    fn request_move(&mut self, pos: Vec2) {
        self.window
            .set_outer_position(PhysicalPosition::new(pos.x.round() as i32, pos.y.round() as i32));
    }

    fn window_position(&self) -> Option<Vec2> {
        let p = self.window.outer_position().ok()?;
        Some(Vec2::new(p.x as f32, p.y as f32))
    }

    fn cursor_position(&self) -> Option<Vec2> {
        platform::cursor_position()
    }

    fn display_size(&self) -> Vec2 {
        self.window
            .current_monitor()
            .map(|m| {
                let size = m.size();
                Vec2::new(size.width as f32, size.height as f32)
            })
            .unwrap_or(FALLBACK_DISPLAY)
    }

    fn window_size(&self) -> Vec2 {
        let size = self.window.outer_size();
        Vec2::new(size.width as f32, size.height as f32)
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

struct App {
    cfg: PetConfig,
    collector: Option<Box<dyn Collector>>,
    engine: Option<PetEngine<WinitHost>>,
    /// Keeps the window title on the current behavior while set.
    title_listener: Option<SubscriptionId>,
    started: Instant,
    /// Last cursor position inside the window, in window pixels.
    cursor_local: Vec2,
    frame_interval: Duration,
}

impl App {
    fn new(cfg: PetConfig, collector: Box<dyn Collector>) -> Self {
        Self {
            cfg,
            collector: Some(collector),
            engine: None,
            title_listener: None,
            started: Instant::now(),
            cursor_local: Vec2::ZERO,
            frame_interval: frame_interval(FALLBACK_REFRESH_MHZ),
        }
    }

    fn now_ms(&self) -> Millis {
        self.started.elapsed().as_millis() as Millis
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>, PetError> {
        let w = &self.cfg.window;
        let attrs = WindowAttributes::default()
            .with_title("PetPal")
            .with_decorations(false)
            .with_transparent(true)
            .with_resizable(false)
            .with_window_level(WindowLevel::AlwaysOnTop)
            .with_inner_size(PhysicalSize::new(w.width, w.height))
            .with_position(PhysicalPosition::new(w.x, w.y));
        let window = Arc::new(event_loop.create_window(attrs)?);
        platform::hide_from_taskbar(&window);
        Ok(window)
    }

    fn on_key(&mut self, key: &Key, event_loop: &ActiveEventLoop) {
        let now = self.now_ms();
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match key {
            Key::Named(NamedKey::Escape) => {
                log::info!("ESC pressed, exiting");
                if let Some(id) = self.title_listener.take() {
                    engine.unsubscribe(id);
                }
                engine.shutdown();
                event_loop.exit();
            }
            Key::Character(c) => match c.as_str() {
                "1" => outcome("Idle", engine.request(Behavior::Idle, now)),
                "2" => outcome("Excited", engine.request(Behavior::Excited, now)),
                "3" => outcome("Sleeping", engine.request(Behavior::Sleeping, now)),
                "n" => outcome("Nap", engine.request_nap(now)),
                "w" => outcome("Wake", engine.wake(now)),
                "c" if engine.chat_open() => outcome("Chat closed", engine.on_chat_closed(now)),
                "c" => outcome("Chat opened", engine.on_chat_opened(now)),
                "u" => engine.on_chat_message(ChatRole::User, now),
                "a" => engine.on_chat_message(ChatRole::Assistant, now),
                "m" => {
                    let target = pointer(engine, self.cursor_local) - engine.host().window_size() * 0.5;
                    match engine.move_to(target, now) {
                        Ok(ms) => log::info!("Gliding to the cursor ({ms}ms)"),
                        Err(refusal) => log::info!("Glide refused: {refusal:?}"),
                    }
                }
                "t" => match self.title_listener.take() {
                    Some(id) => {
                        engine.unsubscribe(id);
                        engine.host().window.set_title("PetPal");
                    }
                    None => {
                        let window = engine.host().window.clone();
                        self.title_listener =
                            Some(engine.subscribe(StateKey::Behavior, title_listener(window)));
                    }
                },
                "s" => status(engine),
                _ => {}
            },
            _ => {}
        }
    }
}

/// Window title follows the behavior.
fn title_listener(window: Arc<Window>) -> Listener {
    Box::new(move |new, _, _, _| {
        let behavior = new.as_behavior().ok_or("behavior listener got another field")?;
        window.set_title(&format!("PetPal ({})", behavior.label()));
        Ok(())
    })
}

fn outcome(what: &str, outcome: TransitionOutcome) {
    match outcome {
        TransitionOutcome::Committed { from, to, forced } => log::debug!(
            "{what}: {} -> {}{}",
            from.label(),
            to.label(),
            if forced { " (forced)" } else { "" }
        ),
        TransitionOutcome::Rejected(rejection) => log::debug!("{what}: {rejection}"),
        TransitionOutcome::Unchanged => log::debug!("{what}: no change"),
    }
}

/// One-line dump of energy, stats and what is playing.
fn status(engine: &PetEngine<WinitHost>) {
    let r = engine.energy_report();
    let stats = engine.stats();
    let empty_in = r
        .minutes_to_empty
        .map_or_else(|| "never".to_string(), |m| format!("{m:.0} min"));
    log::info!(
        "{} | energy {:.1}% ({:?}, -{:.2}/min, empty in {empty_in}) | can wake: {} | {} clicks, {} drags, {} chats",
        r.behavior.label(),
        r.energy,
        r.level,
        r.decay_per_minute,
        r.can_wake,
        stats.clicks,
        stats.drags,
        stats.chats,
    );
    let playing: Vec<String> = Channel::ALL
        .iter()
        .filter_map(|&ch| engine.animation(ch).map(|name| format!("{ch:?}={}", name.as_str())))
        .collect();
    log::info!("Playing: {}", playing.join(", "));
    if let Some(last) = engine.history().last() {
        log::info!(
            "Last change (pass {}): {:?} {:?} -> {:?}",
            last.pass,
            last.key,
            last.old,
            last.new
        );
    }
}

/// Cursor in screen pixels. The OS answer is preferred; otherwise the
/// window-local position is offset by where the pet is.
fn pointer(engine: &PetEngine<WinitHost>, local: Vec2) -> Vec2 {
    platform::cursor_position().unwrap_or(engine.state().position + local)
}

fn frame_interval(refresh_mhz: u32) -> Duration {
    Duration::from_micros(1_000_000_000 / u64::from(refresh_mhz.max(1)))
}

/// Log what the engine wants the user to know, then what the renderer
/// would have drawn.
fn report(engine: &mut PetEngine<WinitHost>) {
    for feedback in engine.drain_feedback() {
        log::info!("{feedback}");
    }
    for event in engine.drain_animation_events() {
        let (what, channel, name) = match event {
            AnimationEvent::Started { channel, name } => ("start", channel, name),
            AnimationEvent::Finished { channel, name } => ("finish", channel, name),
            AnimationEvent::Cancelled { channel, name } => ("cancel", channel, name),
        };
        log::debug!("Animation {what}: {} on {channel:?}", name.as_str());
    }
}

fn button(b: MouseButton) -> PointerButton {
    match b {
        MouseButton::Left => PointerButton::Primary,
        MouseButton::Middle => PointerButton::Middle,
        _ => PointerButton::Secondary,
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.engine.is_some() {
            return;
        }
        let Some(collector) = self.collector.take() else {
            return;
        };

        let window = match self.create_window(event_loop) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Could not create pet window: {e}");
                event_loop.exit();
                return;
            }
        };
        let refresh = window
            .current_monitor()
            .and_then(|m| m.refresh_rate_millihertz())
            .unwrap_or(FALLBACK_REFRESH_MHZ);
        self.frame_interval = frame_interval(refresh);
        log::info!(
            "Pet window created: {:?}, {:.1}Hz",
            window.outer_size(),
            refresh as f64 / 1000.0
        );

        let now = self.now_ms();
        let title = title_listener(window.clone());
        let mut engine = PetEngine::new(WinitHost { window }, collector, self.cfg.clone(), now);
        self.title_listener = Some(engine.subscribe(StateKey::Behavior, title));
        log::info!("Session {}", engine.session_id());
        report(&mut engine);
        self.engine = Some(engine);
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let now = self.now_ms();
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        engine.advance(now);

        let mut wake = engine
            .next_deadline()
            .map(|due| self.started + Duration::from_millis(due));
        if engine.wants_frames() {
            engine.on_frame();
            let frame = Instant::now() + self.frame_interval;
            wake = Some(wake.map_or(frame, |w| w.min(frame)));
        }
        report(engine);

        event_loop.set_control_flow(match wake {
            Some(at) => ControlFlow::WaitUntil(at),
            None => ControlFlow::Wait,
        });
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let now = self.now_ms();
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting");
                if let Some(engine) = self.engine.as_mut() {
                    engine.shutdown();
                }
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    self.on_key(&event.logical_key, event_loop);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor_local = Vec2::new(position.x as f32, position.y as f32);
                if let Some(engine) = self.engine.as_mut() {
                    let at = pointer(engine, self.cursor_local);
                    engine.on_pointer_move(at);
                }
            }
            WindowEvent::MouseInput { state, button: b, .. } => {
                let Some(engine) = self.engine.as_mut() else {
                    return;
                };
                match state {
                    ElementState::Pressed => {
                        let at = pointer(engine, self.cursor_local);
                        engine.on_pointer_down(button(b), at, now);
                    }
                    ElementState::Released => engine.on_pointer_up(now),
                }
            }
            WindowEvent::Touch(touch) => {
                let Some(engine) = self.engine.as_mut() else {
                    return;
                };
                let local = Vec2::new(touch.location.x as f32, touch.location.y as f32);
                let at = engine.state().position + local;
                match touch.phase {
                    TouchPhase::Started => engine.on_pointer_down(PointerButton::Touch, at, now),
                    TouchPhase::Moved => engine.on_pointer_move(at),
                    TouchPhase::Ended | TouchPhase::Cancelled => engine.on_pointer_up(now),
                }
            }
            WindowEvent::CursorEntered { .. } => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.on_hover_start(now);
                }
            }
            WindowEvent::CursorLeft { .. } => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.on_hover_end(now);
                }
            }
            WindowEvent::Moved(pos) => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.on_window_moved(Vec2::new(pos.x as f32, pos.y as f32));
                }
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(engine) = self.engine.as_mut() {
                    let (display, window) = (engine.host().display_size(), engine.host().window_size());
                    engine.set_bounds(display, window);
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(engine) = self.engine.as_mut() {
            engine.shutdown();
        }
    }
}

/// Pick a collector from config: HTTP when an endpoint is set, the log
/// otherwise.
fn collector(cfg: &PetConfig) -> Box<dyn Collector> {
    let t = &cfg.telemetry;
    let Some(endpoint) = t.endpoint() else {
        log::info!("No collector endpoint, events go to the log");
        return Box::new(LogCollector::default());
    };
    match HttpCollector::new(endpoint, Duration::from_millis(t.request_timeout_ms)) {
        Ok(http) => {
            if let Some(url) = t.health_url.as_deref() {
                http.probe(url, Duration::from_millis(t.probe_timeout_ms));
            }
            Box::new(http)
        }
        Err(e) => {
            log::warn!("Could not set up collector, events go to the log: {e}");
            Box::new(LogCollector::default())
        }
    }
}

/// Entry point: create the event loop and run.
pub fn run(cfg: PetConfig) -> Result<(), PetError> {
    let event_loop = EventLoop::new()?;
    let collector = collector(&cfg);
    let mut app = App::new(cfg, collector);
    event_loop.run_app(&mut app)?;
    Ok(())
}
