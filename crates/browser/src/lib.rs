//! Chrome DevTools Protocol automation surface.
//!
//! - `cdp`: raw CDP client over WebSocket (commands, responses, events)
//! - `surface`: one browser process + one isolated browser context, owned by
//!   a single batch and torn down with it
//! - `page`: one tab with bounded waits and selector-based interaction

pub mod cdp;
pub mod page;
pub mod surface;

pub use cdp::CdpClient;
pub use page::{ElementQuery, ElementState, Page, PageSettings};
pub use surface::{find_browser_binary, list_available_browsers, AutomationSurface, BrowserEngine, LaunchOptions};
