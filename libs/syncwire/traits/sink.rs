use crate::notify::{Notification, Severity};

/// OS-level notification sink
///
/// The notification center forwards enabled notifications here when desktop
/// delivery is switched on and permission has been granted. The sink only
/// ever displays; history mutations never reach it.
pub trait DesktopNotifier: Send + Sync + 'static {
    /// Whether display permission is currently granted
    fn permission_granted(&self) -> bool;

    /// Ask the platform for display permission
    fn request_permission(&self) -> bool;

    /// Display a notification
    ///
    /// `auto_close` is the effective flag after severity gating: error
    /// notifications are always passed with `auto_close = false`.
    fn display(&self, notification: &Notification, auto_close: bool);
}

/// A sink that never displays anything
pub struct NoOpNotifier;

impl DesktopNotifier for NoOpNotifier {
    fn permission_granted(&self) -> bool {
        false
    }

    fn request_permission(&self) -> bool {
        false
    }

    fn display(&self, _notification: &Notification, _auto_close: bool) {}
}

/// Audible cue player, keyed by severity
pub trait ChimePlayer: Send + Sync + 'static {
    fn play(&self, severity: Severity);
}

/// A chime player that stays silent
pub struct SilentChime;

impl ChimePlayer for SilentChime {
    fn play(&self, _severity: Severity) {}
}
