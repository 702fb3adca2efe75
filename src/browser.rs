//! Seam to the in-page collaborator that can see and drive the active tab.
//!
//! The coordination core never talks to a real browser directly; everything
//! goes through this trait so hosts can be swapped (extension transport,
//! test double, or the headless default that reports no tab).

use std::sync::Arc;

use crate::{ActionResult, BrowserAction, PageContext, TabInfo};

pub(crate) trait BrowserHost: Send + Sync {
    /// The currently focused tab, if any.
    fn active_tab(&self) -> Result<Option<TabInfo>, String>;

    /// Full page context (url, title, readable text) from the active tab.
    fn extract_page_context(&self) -> Result<PageContext, String>;

    /// Run scripted actions against the active tab, one result per action.
    fn run_actions(&self, actions: &[BrowserAction]) -> Result<Vec<ActionResult>, String>;

    /// Screenshot of the visible viewport as a data URL, when supported.
    fn capture_screenshot(&self) -> Result<Option<String>, String>;

    /// Open a URL in a new tab.
    fn open_url(&self, url: &str) -> Result<(), String>;
}

pub(crate) type SharedHost = Arc<dyn BrowserHost>;

/// Default host for environments without a browser attached. Reports no
/// active tab; opening a URL prints it for the operator to follow.
pub(crate) struct HeadlessHost;

impl BrowserHost for HeadlessHost {
    fn active_tab(&self) -> Result<Option<TabInfo>, String> {
        Ok(None)
    }

    fn extract_page_context(&self) -> Result<PageContext, String> {
        Err("no active tab".to_string())
    }

    fn run_actions(&self, _actions: &[BrowserAction]) -> Result<Vec<ActionResult>, String> {
        Err("no active tab".to_string())
    }

    fn capture_screenshot(&self) -> Result<Option<String>, String> {
        Ok(None)
    }

    fn open_url(&self, url: &str) -> Result<(), String> {
        println!("open: {url}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_host_reports_no_tab() {
        let host = HeadlessHost;
        assert!(host.active_tab().unwrap().is_none());
        assert!(host.extract_page_context().is_err());
        assert!(host.capture_screenshot().unwrap().is_none());
    }
}
