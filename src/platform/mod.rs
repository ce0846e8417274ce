//! OS queries winit does not cover.

use glam::Vec2;

#[cfg(windows)]
pub mod win32;

/// Global cursor position, or `None` where the platform cannot say.
pub fn cursor_position() -> Option<Vec2> {
    #[cfg(windows)]
    {
        win32::cursor_position().map(|(x, y)| Vec2::new(x as f32, y as f32))
    }
    #[cfg(not(windows))]
    {
        None
    }
}

pub fn hide_from_taskbar(window: &winit::window::Window) {
    #[cfg(windows)]
    win32::hide_from_taskbar(window);
    #[cfg(not(windows))]
    let _ = window;
}
