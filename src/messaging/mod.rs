/// Messaging module
///
/// Commands flow into the acquisition controller; notifications flow out.
///
/// ## Architecture
///
/// ```text
/// ┌──────────────┐   Command    ┌────────────┐  Notification  ┌──────────────────┐
/// │ User / AR    │ ───────────> │ Controller │ ─────────────> │ NotificationBus  │
/// │ session /    │              │  thread    │                │                  │
/// │ workers      │              └────────────┘                └──────────────────┘
/// └──────────────┘                                                    │
///                                                                     ▼
///                                                               ┌───────────┐
///                                                               │ Observers │
///                                                               └───────────┘
/// ```
///
/// ## Usage
///
/// ```rust,ignore
/// let (rx, _id) = controller.notifications().subscribe();
///
/// controller.start()?;
///
/// while let Ok(notification) = rx.recv() {
///     if let Notification::GameRecognised { payload } = notification {
///         println!("{}", payload.score_line());
///     }
/// }
/// ```

pub mod bus;
pub mod commands;
pub mod events;

// Re-export commonly used types
pub use bus::{NotificationBus, SubscriberId};
pub use commands::Command;
pub use events::Notification;
