use crate::control::ControlHandle;
use crate::error::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Start,
    Stop,
    Cancel,
    List,
    Status,
    /// Play the most recent finished session
    PlayLatest,
    /// Open the log of the most recent finished session
    ViewLatestLog,
    Quit,
}

pub fn map_key(code: KeyCode) -> Option<KeyAction> {
    match code {
        KeyCode::Char('s') => Some(KeyAction::Start),
        KeyCode::Char('x') => Some(KeyAction::Stop),
        KeyCode::Char('c') => Some(KeyAction::Cancel),
        KeyCode::Char('l') | KeyCode::Char('r') => Some(KeyAction::List),
        KeyCode::Char('i') => Some(KeyAction::Status),
        KeyCode::Char('p') => Some(KeyAction::PlayLatest),
        KeyCode::Char('v') => Some(KeyAction::ViewLatestLog),
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
        _ => None,
    }
}

/// Terminal control surface: single key presses become control commands
pub struct KeyboardInputHandler {
    control: ControlHandle,
    quit: CancellationToken,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    /// `quit` is cancelled when the user asks to leave
    pub fn new(control: ControlHandle, quit: CancellationToken) -> Self {
        Self {
            control,
            quit,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Keyboard controls: s=start x=stop c=cancel l=list i=status p=play v=view log q=quit");

        let control = self.control.clone();
        let quit = self.quit.clone();
        let cancellation_token = self.cancellation_token.clone();
        let runtime_handle = Handle::current();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }
                        match map_key(key_event.code) {
                            Some(KeyAction::Quit) => {
                                info!("Quit key pressed - requesting shutdown");
                                quit.cancel();
                                break;
                            }
                            Some(action) => {
                                let control = control.clone();
                                runtime_handle.spawn(perform(control, action));
                            }
                            None => debug!("Key pressed: {:?}", key_event.code),
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        self.cancellation_token.cancel();

        // Give the task a moment to clean up and disable raw mode
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}

async fn perform(control: ControlHandle, action: KeyAction) {
    let outcome = match action {
        KeyAction::Start => control
            .start()
            .await
            .map(|id| info!("Recording session {}", id)),
        KeyAction::Stop | KeyAction::Cancel => {
            let result = if action == KeyAction::Stop {
                control.stop().await
            } else {
                control.cancel().await
            };
            result.map(|summary| {
                info!(
                    "Session {} {:?}: {} frames, {} detections",
                    summary.id, summary.status, summary.frames_recorded, summary.detections_logged
                )
            })
        }
        KeyAction::List => control.list().await.map(|entries| {
            info!("{} recorded sessions", entries.len());
            for entry in entries {
                info!(
                    "  {} {} {}",
                    entry.id,
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    if entry.is_failed() { "FAILED" } else { "" }
                );
            }
        }),
        KeyAction::Status => control.status().await.map(|(status, session)| match session {
            Some(s) => info!("Status: {} ({}, {} frames)", status, s.id, s.frames_recorded),
            None => info!("Status: {}", status),
        }),
        KeyAction::PlayLatest | KeyAction::ViewLatestLog => match control.list().await {
            Ok(entries) => match entries.into_iter().next() {
                Some(latest) if action == KeyAction::PlayLatest => {
                    control.play(latest.id).await.map(|_| ())
                }
                Some(latest) => control.view_log(latest.id).await.map(|_| ()),
                None => {
                    info!("No recorded sessions yet");
                    Ok(())
                }
            },
            Err(e) => Err(e),
        },
        KeyAction::Quit => Ok(()),
    };

    if let Err(e) = outcome {
        warn!("{:?} failed: {}", action, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(map_key(KeyCode::Char('s')), Some(KeyAction::Start));
        assert_eq!(map_key(KeyCode::Char('x')), Some(KeyAction::Stop));
        assert_eq!(map_key(KeyCode::Char('c')), Some(KeyAction::Cancel));
        assert_eq!(map_key(KeyCode::Char('l')), Some(KeyAction::List));
        assert_eq!(map_key(KeyCode::Char('q')), Some(KeyAction::Quit));
        assert_eq!(map_key(KeyCode::Esc), Some(KeyAction::Quit));
        assert_eq!(map_key(KeyCode::Char(' ')), None);
    }

    #[tokio::test]
    async fn test_keyboard_handler_stop() {
        let (sender, _receiver) = tokio::sync::mpsc::channel(1);
        let handler = KeyboardInputHandler::new(ControlHandle::new(sender), CancellationToken::new());

        handler.stop().await.unwrap();
        assert!(handler.cancellation_token.is_cancelled());
        assert!(!handler.quit.is_cancelled());
    }
}
