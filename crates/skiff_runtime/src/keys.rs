//! Keyboard trigger source.
//!
//! Terminal reads block, so they run on their own thread and reach the
//! coordinator as [`KeyAction`] messages.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use skiff_core::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

/// Operator action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAction {
    /// Resume the pending snapshot, or start a fresh run
    ResumeOrRun,
    /// Arm the breakpoint, then run
    SnapshotNow,
    /// Stop without capturing
    Abort,
}

/// Key combination (key + modifiers)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    /// The key code
    pub code: KeyCode,
    /// Modifiers (ctrl, alt, shift)
    pub modifiers: KeyModifiers,
}

impl KeyCombo {
    /// Create a plain key without modifiers
    #[must_use]
    pub fn key(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: KeyModifiers::empty(),
        }
    }

    /// Create a Ctrl+key combination
    #[must_use]
    pub fn ctrl(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: KeyModifiers::CONTROL,
        }
    }
}

/// Key to action bindings
#[derive(Debug, Clone)]
pub struct KeyMap {
    bindings: HashMap<KeyCombo, KeyAction>,
}

impl KeyMap {
    /// Map a key event; unbound keys and releases yield `None`
    #[must_use]
    pub fn action(&self, key: &KeyEvent) -> Option<KeyAction> {
        if key.kind == KeyEventKind::Release {
            return None;
        }
        let combo = KeyCombo {
            code: key.code,
            modifiers: key.modifiers.difference(KeyModifiers::SHIFT),
        };
        self.bindings.get(&combo).copied()
    }

    /// Bind a key, replacing any previous binding
    pub fn bind(&mut self, combo: KeyCombo, action: KeyAction) {
        self.bindings.insert(combo, action);
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        let mut bindings = HashMap::new();
        bindings.insert(KeyCombo::key(KeyCode::Char('r')), KeyAction::ResumeOrRun);
        bindings.insert(KeyCombo::key(KeyCode::Char('s')), KeyAction::SnapshotNow);
        bindings.insert(KeyCombo::key(KeyCode::Char('q')), KeyAction::Abort);
        bindings.insert(KeyCombo::key(KeyCode::Esc), KeyAction::Abort);
        bindings.insert(KeyCombo::ctrl(KeyCode::Char('c')), KeyAction::Abort);
        Self { bindings }
    }
}

/// Restores cooked mode when the reader thread ends
struct RawMode;

impl RawMode {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Background keyboard reader
pub struct KeyListener {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl KeyListener {
    /// Poll interval of the reader thread
    pub const POLL: Duration = Duration::from_millis(100);

    /// Start reading the terminal; actions arrive on the returned receiver
    ///
    /// # Errors
    ///
    /// Returns error if the terminal cannot enter raw mode
    pub fn spawn(keymap: KeyMap) -> CoreResult<(Self, mpsc::Receiver<KeyAction>)> {
        let raw = RawMode::enable().map_err(|e| CoreError::Io {
            path: "<terminal>".to_string(),
            reason: e.to_string(),
        })?;
        let (tx, rx) = mpsc::channel(16);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("skiff-keys".to_string())
            .spawn(move || {
                let _raw = raw;
                read_loop(&keymap, &flag, &tx);
            })
            .map_err(|e| CoreError::Io {
                path: "<terminal>".to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!("keyboard control: r = run/resume, s = snapshot, q = abort");
        Ok((
            Self {
                stop,
                thread: Some(thread),
            },
            rx,
        ))
    }
}

fn read_loop(keymap: &KeyMap, stop: &AtomicBool, tx: &mpsc::Sender<KeyAction>) {
    while !stop.load(Ordering::Relaxed) {
        match event::poll(KeyListener::POLL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                tracing::warn!(error = %e, "keyboard poll failed, stopping listener");
                return;
            }
        }
        let key = match event::read() {
            Ok(Event::Key(key)) => key,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "keyboard read failed, stopping listener");
                return;
            }
        };
        if let Some(action) = keymap.action(&key) {
            tracing::debug!(?action, "key action");
            if tx.blocking_send(action).is_err() {
                return;
            }
        }
    }
}

impl Drop for KeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
