use tracing::debug;

/// Host-shell side effects of a mode change.
///
/// The device binary wires these to whatever window manager or browser
/// shell hosts the kiosk surface.
pub trait KioskShell: Send + Sync {
    /// Block back-navigation and the context menu.
    fn install_navigation_lock(&self);

    fn release_navigation_lock(&self);

    /// Hide any open management surface before public playback resumes.
    fn suspend_management_surfaces(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopShell;

impl KioskShell for NoopShell {
    fn install_navigation_lock(&self) {
        debug!("navigation lock installed");
    }

    fn release_navigation_lock(&self) {
        debug!("navigation lock released");
    }

    fn suspend_management_surfaces(&self) {
        debug!("management surfaces suspended");
    }
}
